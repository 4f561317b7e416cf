use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One line of the JSONL recording log
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    pub timestamp: String,      // RFC 3339
    pub correlation_id: String, // groups a request with its response
    pub event_type: EventType,
    pub direction: Direction,
    pub operation: String,       // e.g. "webhook", "GET /repos/o/r/pulls/1", "git"
    pub data: serde_json::Value, // already sanitized
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum EventType {
    WebhookReceived,
    GitHubApiCall,
    /// An external process run by the command executor
    CommandInvocation,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ServiceType {
    GitHub,
}

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
