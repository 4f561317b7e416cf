use axum::http;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    CorrelationId, Direction, EventType, RecordingLogger, Sanitizer, ServiceType,
    CORRELATION_ID_HEADER,
};

/// Records every outbound API request and its response status.
pub struct RecordingMiddleware {
    logger: RecordingLogger,
    service_type: ServiceType,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger, service_type: ServiceType) -> Self {
        Self {
            logger,
            service_type,
        }
    }

    fn event_type(&self) -> EventType {
        match self.service_type {
            ServiceType::GitHub => EventType::GitHubApiCall,
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| extensions.get::<CorrelationId>().map(|id| id.0.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = correlation_id.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let request_data = RequestData::from_request(&req);
        self.logger.record_now(
            &correlation_id,
            self.event_type(),
            Direction::Request,
            format!("{} {}", request_data.method, extract_path(&request_data.url)),
            serde_json::to_value(&request_data).unwrap_or(serde_json::Value::Null),
        );

        let response = next.run(req, extensions).await;

        let (operation, data) = match &response {
            Ok(resp) => {
                let response_data = ResponseData::from_response(resp);
                (
                    format!("response_{}", response_data.status_code),
                    serde_json::to_value(&response_data).unwrap_or(serde_json::Value::Null),
                )
            }
            Err(err) => (
                "error".to_string(),
                serde_json::json!({ "error": err.to_string() }),
            ),
        };
        self.logger.record_now(
            &correlation_id,
            self.event_type(),
            Direction::Response,
            operation,
            data,
        );

        response
    }
}

#[derive(Debug, serde::Serialize)]
struct RequestData {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: String,
}

impl RequestData {
    fn from_request(request: &Request) -> Self {
        let body = match request.body().map(|b| b.as_bytes()) {
            None => "[NO_BODY]".to_string(),
            Some(None) => "[STREAM_BODY]".to_string(),
            Some(Some(bytes)) if bytes.len() > 10_000 => format!("[LARGE_BODY_{}b]", bytes.len()),
            Some(Some(bytes)) => match serde_json::from_slice::<serde_json::Value>(bytes) {
                Ok(json) => Sanitizer::sanitize_json(&json).to_string(),
                Err(_) => String::from_utf8_lossy(bytes).into_owned(),
            },
        };

        Self {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: Sanitizer::sanitize_headers(&header_map(request.headers())),
            body,
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct ResponseData {
    status_code: u16,
    headers: HashMap<String, String>,
    body_size: u64,
}

impl ResponseData {
    fn from_response(response: &Response) -> Self {
        Self {
            status_code: response.status().as_u16(),
            headers: Sanitizer::sanitize_headers(&header_map(response.headers())),
            body_size: response.content_length().unwrap_or(0),
        }
    }
}

pub(crate) fn header_map(headers: &http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

fn extract_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
