use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_UPSTREAM: &str = "go-gitea/gitea";
pub const DEFAULT_MAIN_BRANCH: &str = "main";
pub const DEFAULT_WORKDIR: &str = "gitea";
pub const DEFAULT_EMAIL: &str = "teabot@gitea.io";
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub github_webhook_secret: String,
    /// `owner/repo` of the fork backport branches are pushed to
    pub fork: String,
    /// `owner/repo` of the repository being maintained
    pub upstream: String,
    pub main_branch: String,
    pub working_dir: PathBuf,
    /// Commit email when the bot account hides its own
    pub default_email: String,
    pub port: u16,
    pub debounce: Duration,
    /// Run a backport cycle on this interval even without webhooks
    pub poll_interval: Option<Duration>,
    /// Kill any single git invocation that runs longer than this
    pub command_timeout: Option<Duration>,
    pub recording_enabled: bool,
    pub recording_log_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_token = env::var("BACKPORTER_GITHUB_TOKEN")
            .context("BACKPORTER_GITHUB_TOKEN environment variable is required")?;

        let github_webhook_secret = env::var("BACKPORTER_GITHUB_SECRET")
            .context("BACKPORTER_GITHUB_SECRET environment variable is required")?;

        let fork = env::var("BACKPORTER_FORK")
            .context("BACKPORTER_FORK environment variable is required")?;
        parse_repo_name(&fork).context("BACKPORTER_FORK must look like owner/repo")?;

        let upstream =
            env::var("BACKPORTER_UPSTREAM").unwrap_or_else(|_| DEFAULT_UPSTREAM.to_string());
        parse_repo_name(&upstream).context("BACKPORTER_UPSTREAM must look like owner/repo")?;

        let main_branch =
            env::var("BACKPORTER_MAIN_BRANCH").unwrap_or_else(|_| DEFAULT_MAIN_BRANCH.to_string());

        let working_dir = env::var("BACKPORTER_WORKDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORKDIR));

        let default_email =
            env::var("BACKPORTER_DEFAULT_EMAIL").unwrap_or_else(|_| DEFAULT_EMAIL.to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let debounce = parse_debounce(env::var("BACKPORTER_DEBOUNCE_SECS").ok())
            .context("BACKPORTER_DEBOUNCE_SECS must be a number of seconds")?;

        let poll_interval = parse_seconds(env::var("BACKPORTER_POLL_INTERVAL_SECS").ok())
            .context("BACKPORTER_POLL_INTERVAL_SECS must be a number of seconds")?;

        let command_timeout = parse_seconds(env::var("BACKPORTER_COMMAND_TIMEOUT_SECS").ok())
            .context("BACKPORTER_COMMAND_TIMEOUT_SECS must be a number of seconds")?;

        let recording_enabled = env::var("RECORDING_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let recording_log_path =
            env::var("RECORDING_LOG_PATH").unwrap_or_else(|_| "recordings.jsonl".to_string());

        Ok(Config {
            github_token,
            github_webhook_secret,
            fork,
            upstream,
            main_branch,
            working_dir,
            default_email,
            port,
            debounce,
            poll_interval,
            command_timeout,
            recording_enabled,
            recording_log_path,
        })
    }

    /// Account owning the fork, used as the head owner of backport pull requests
    pub fn fork_owner(&self) -> &str {
        self.fork.split('/').next().unwrap_or(&self.fork)
    }
}

/// Split `owner/repo`.
pub fn parse_repo_name(full_name: &str) -> Result<(&str, &str)> {
    match full_name.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner, repo))
        }
        _ => Err(anyhow!("invalid repository name {:?}", full_name)),
    }
}

/// Parse an optional number of seconds. Missing, empty or zero means unset.
pub fn parse_seconds(value: Option<String>) -> Result<Option<Duration>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => {
            let secs = s.parse::<u64>()?;
            Ok((secs > 0).then(|| Duration::from_secs(secs)))
        }
    }
}

/// Quiet period before a backport cycle. Unset means 30 seconds; an
/// explicit zero runs the cycle as soon as the trigger is seen.
pub fn parse_debounce(value: Option<String>) -> Result<Duration> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(DEFAULT_DEBOUNCE),
        Some(s) => Ok(Duration::from_secs(s.parse::<u64>()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_name() {
        assert_eq!(
            parse_repo_name("go-gitea/gitea").unwrap(),
            ("go-gitea", "gitea")
        );
        assert!(parse_repo_name("gitea").is_err());
        assert!(parse_repo_name("/gitea").is_err());
        assert!(parse_repo_name("go-gitea/").is_err());
        assert!(parse_repo_name("a/b/c").is_err());
    }

    #[test]
    fn test_parse_seconds_unset() {
        assert_eq!(parse_seconds(None).unwrap(), None);
        assert_eq!(parse_seconds(Some("".to_string())).unwrap(), None);
        assert_eq!(parse_seconds(Some("  ".to_string())).unwrap(), None);
        assert_eq!(parse_seconds(Some("0".to_string())).unwrap(), None);
    }

    #[test]
    fn test_parse_debounce_keeps_explicit_zero() {
        assert_eq!(parse_debounce(None).unwrap(), DEFAULT_DEBOUNCE);
        assert_eq!(parse_debounce(Some("".to_string())).unwrap(), DEFAULT_DEBOUNCE);
        assert_eq!(parse_debounce(Some("0".to_string())).unwrap(), Duration::ZERO);
        assert_eq!(
            parse_debounce(Some("5".to_string())).unwrap(),
            Duration::from_secs(5)
        );
        assert!(parse_debounce(Some("later".to_string())).is_err());
    }

    #[test]
    fn test_parse_seconds_value() {
        assert_eq!(
            parse_seconds(Some("45".to_string())).unwrap(),
            Some(Duration::from_secs(45))
        );
        assert!(parse_seconds(Some("soon".to_string())).is_err());
        assert!(parse_seconds(Some("-5".to_string())).is_err());
    }
}
