use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use backporter_core::resolve_active_lines;
use backporter_server::config::{DEFAULT_EMAIL, DEFAULT_MAIN_BRANCH, DEFAULT_UPSTREAM, DEFAULT_WORKDIR};
use backporter_server::executor::{CommandExecutor, SystemRunner};
use backporter_server::git::WorkingTree;
use backporter_server::lgtm::sync_approval_status;
use backporter_server::review_state::fetch_review_state;
use backporter_server::{get_bot_version, BackportEngine, GitHubClient, RepositoryClient};

/// Backporter: backports merged pull requests to maintained release branches
#[derive(Parser, Debug)]
#[command(name = "backporter")]
#[command(about = "One-shot entry points for the backport bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single backport cycle and print what happened
    RunCycle(RunCycleArgs),
    /// List the maintenance lines derived from open milestones
    ActiveLines(GitHubArgs),
    /// Print who currently approves or blocks a pull request
    ReviewState(PullRequestArgs),
    /// Bring the lgtm label and status of a pull request up to date
    SyncApprovals(PullRequestArgs),
    /// Print the build version
    Version,
}

#[derive(Args, Debug)]
struct GitHubArgs {
    /// GitHub token (if not provided, will use BACKPORTER_GITHUB_TOKEN environment variable)
    #[arg(long, env = "BACKPORTER_GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// Repository being maintained, as owner/repo
    #[arg(long, env = "BACKPORTER_UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    upstream: String,

    #[arg(long, env = "BACKPORTER_MAIN_BRANCH", default_value = DEFAULT_MAIN_BRANCH)]
    main_branch: String,
}

#[derive(Args, Debug)]
struct PullRequestArgs {
    /// Pull request number
    pr_number: u64,

    #[command(flatten)]
    github: GitHubArgs,
}

#[derive(Args, Debug)]
struct RunCycleArgs {
    #[command(flatten)]
    github: GitHubArgs,

    /// Fork that backport branches are pushed to, as owner/repo
    #[arg(long, env = "BACKPORTER_FORK")]
    fork: String,

    /// Location of the shared clone
    #[arg(long, env = "BACKPORTER_WORKDIR", default_value = DEFAULT_WORKDIR)]
    workdir: PathBuf,

    /// Commit email used when the bot account hides its own
    #[arg(long, env = "BACKPORTER_DEFAULT_EMAIL", default_value = DEFAULT_EMAIL)]
    default_email: String,

    /// Kill any git command running longer than this many seconds
    #[arg(long, env = "BACKPORTER_COMMAND_TIMEOUT_SECS")]
    command_timeout: Option<u64>,
}

fn github_client(args: &GitHubArgs) -> Result<Arc<dyn RepositoryClient>> {
    Ok(Arc::new(GitHubClient::new(
        &args.upstream,
        &args.main_branch,
        args.token.clone(),
    )?))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn run_cycle(args: RunCycleArgs) -> Result<()> {
    let client = github_client(&args.github)?;
    let identity = client
        .current_user()
        .await
        .context("Failed to look up the bot account")?;

    let timeout = args.command_timeout.filter(|s| *s > 0).map(Duration::from_secs);
    let executor = Arc::new(CommandExecutor::new(
        Arc::new(SystemRunner::new(timeout)),
        &args.workdir,
    ));
    let tree = Arc::new(WorkingTree::new(executor, &args.github.main_branch));
    tree.initialize(
        &identity,
        &args.github.token,
        &args.fork,
        &args.github.upstream,
        &args.default_email,
    )
    .await?;

    let fork_owner = args.fork.split('/').next().unwrap_or(&args.fork);
    let engine = BackportEngine::new(client, tree, fork_owner);
    let report = engine.run_cycle().await?;
    print_json(&report)
}

async fn run_active_lines(args: GitHubArgs) -> Result<()> {
    let milestones = github_client(&args)?.fetch_milestones().await?;
    let lines = resolve_active_lines(&milestones);
    info!("{} open milestones, {} lines", milestones.len(), lines.len());
    print_json(&lines)
}

async fn run_review_state(args: PullRequestArgs) -> Result<()> {
    let client = github_client(&args.github)?;
    let pr = client.fetch_pull_request(args.pr_number).await?;
    let state = fetch_review_state(client.as_ref(), &pr).await?;
    print_json(&state)
}

async fn run_sync_approvals(args: PullRequestArgs) -> Result<()> {
    let client = github_client(&args.github)?;
    let status = sync_approval_status(client.as_ref(), args.pr_number).await?;
    println!("#{}: {} ({})", args.pr_number, status.label, status.description);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::RunCycle(args) => run_cycle(args).await,
        Commands::ActiveLines(args) => run_active_lines(args).await,
        Commands::ReviewState(args) => run_review_state(args).await,
        Commands::SyncApprovals(args) => run_sync_approvals(args).await,
        Commands::Version => {
            println!("backporter {}", get_bot_version());
            Ok(())
        }
    }
}
