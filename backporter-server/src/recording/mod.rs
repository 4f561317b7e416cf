pub mod logger;
pub mod middleware;

pub use backporter_core::recording::*;
pub use logger::RecordingLogger;
pub use middleware::RecordingMiddleware;
