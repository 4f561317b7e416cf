pub mod backport;
pub mod client;
pub mod config;
pub mod debounce;
pub mod executor;
pub mod git;
pub mod github;
pub mod lgtm;
pub mod recording;
pub mod review_state;
pub mod webhook;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

pub use backport::{BackportEngine, BackportError, CycleReport};
pub use backporter_core::get_bot_version;
pub use client::RepositoryClient;
pub use debounce::Debouncer;
pub use github::GitHubClient;
pub use recording::RecordingLogger;

pub struct AppState {
    pub client: Arc<dyn RepositoryClient>,
    /// Runs a backport cycle once pushes to the main branch quiet down
    pub debouncer: Debouncer,
    pub webhook_secret: String,
    pub upstream: String,
    pub main_branch: String,
    pub recording_logger: Option<RecordingLogger>,
}
