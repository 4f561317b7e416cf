pub mod backport;
pub mod labels;
pub mod lgtm;
pub mod pull_request;
pub mod recording;
pub mod review;
pub mod version;

pub use backport::*;
pub use pull_request::*;
pub use recording::{
    CorrelationId, Direction, EventType, RecordedEvent, Sanitizer, ServiceType,
    CORRELATION_ID_HEADER,
};
pub use review::*;
pub use version::*;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short git hash of the running build, or "unknown".
pub fn get_bot_version() -> String {
    let hash = option_env!("BACKPORTER_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(git_hash) if git_hash.len() >= 8 => git_hash[..8].to_string(),
        Some(git_hash) => git_hash.to_string(),
        None => "unknown".to_string(),
    }
}
