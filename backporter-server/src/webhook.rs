use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lgtm::sync_approval_status;
use crate::recording::middleware::header_map;
use crate::recording::{CorrelationId, Direction, EventType, Sanitizer};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<String>,
    /// Set on push events, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub pull_request: Option<PullRequestPayload>,
    pub repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub message: String,
}

/// What a webhook delivery asks the bot to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    BackportCycle,
    ApprovalStatus(u64),
    Ignore,
}

const APPROVAL_ACTIONS: &[&str] = &[
    "opened",
    "synchronize",
    "review_requested",
    "review_request_removed",
];

pub fn route_event(event: &str, payload: &WebhookPayload, main_branch: &str) -> Route {
    match event {
        "push" => {
            let main_ref = format!("refs/heads/{}", main_branch);
            if payload.git_ref.as_deref() == Some(main_ref.as_str()) {
                Route::BackportCycle
            } else {
                Route::Ignore
            }
        }
        "pull_request" => match (&payload.pull_request, payload.action.as_deref()) {
            (Some(pr), Some(action)) if APPROVAL_ACTIONS.contains(&action) => {
                Route::ApprovalStatus(pr.number)
            }
            _ => Route::Ignore,
        },
        "pull_request_review" => payload
            .pull_request
            .as_ref()
            .map_or(Route::Ignore, |pr| Route::ApprovalStatus(pr.number)),
        _ => Route::Ignore,
    }
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    if let Some(ref logger) = state.recording_logger {
        logger.record_now(
            &correlation_id.0,
            EventType::WebhookReceived,
            Direction::Request,
            "webhook",
            serde_json::json!({
                "headers": Sanitizer::sanitize_headers(&header_map(&parts.headers)),
                "body": serde_json::from_slice::<serde_json::Value>(&bytes)
                    .unwrap_or(serde_json::Value::Null)
            }),
        );
    }

    let mut request = Request::from_parts(parts, axum::body::Body::from(bytes));
    request.extensions_mut().insert(correlation_id);

    Ok(next.run(request).await)
}

pub async fn trigger_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let event = headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    if let Some(repo) = &payload.repository {
        if repo.full_name != state.upstream {
            warn!("Ignoring {} event from {}", event, repo.full_name);
            return Ok(respond("ignored"));
        }
    }

    match route_event(event, &payload, &state.main_branch) {
        Route::BackportCycle => {
            info!("Push to {}, scheduling backport cycle", state.main_branch);
            state.debouncer.trigger();
            Ok(respond("backport cycle scheduled"))
        }
        Route::ApprovalStatus(pr_number) => {
            info!("{} event for PR #{}, updating approvals", event, pr_number);
            let client = state.client.clone();
            tokio::spawn(async move {
                if let Err(e) = sync_approval_status(client.as_ref(), pr_number).await {
                    error!("Failed to update approvals for PR #{}: {:#}", pr_number, e);
                }
            });
            Ok(respond("approval status update scheduled"))
        }
        Route::Ignore => {
            info!(
                "Ignoring {} event (action {:?})",
                event,
                payload.action.as_deref()
            );
            Ok(respond("ignored"))
        }
    }
}

fn respond(message: &str) -> Json<WebhookResponse> {
    Json(WebhookResponse {
        message: message.to_string(),
    })
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/trigger", post(trigger_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backport::BackportEngine;
    use crate::debounce::Debouncer;
    use crate::executor::CommandExecutor;
    use crate::git::WorkingTree;
    use crate::test_support::{FakeClient, FakeGitRunner};
    use axum::body::Body;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "It's a Secret to Everybody";

    fn sign(payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn payload(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    fn app() -> Router {
        let client = Arc::new(FakeClient::new());
        let executor = Arc::new(CommandExecutor::new(Arc::new(FakeGitRunner::new()), "/work"));
        let tree = Arc::new(WorkingTree::new(executor, "main"));
        let engine = Arc::new(BackportEngine::new(client.clone(), tree, "teabot"));
        let debouncer = Debouncer::spawn(Duration::from_secs(30), move || {
            let engine = engine.clone();
            async move {
                let _ = engine.run_cycle().await;
            }
        });
        let state = Arc::new(AppState {
            client,
            debouncer,
            webhook_secret: SECRET.to_string(),
            upstream: "go-gitea/gitea".to_string(),
            main_branch: "main".to_string(),
            recording_logger: None,
        });
        webhook_router(state.clone()).with_state(state)
    }

    fn request(event: &str, body: &[u8], signature: Option<String>) -> Request {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/trigger")
            .header("x-github-event", event);
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }
        builder.body(Body::from(body.to_vec())).unwrap()
    }

    #[test]
    fn test_signature_from_github_docs() {
        assert!(verify_github_signature(
            SECRET,
            b"Hello, World!",
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        ));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let signature = sign(b"{\"ref\":\"refs/heads/main\"}");
        assert!(verify_github_signature(
            SECRET,
            b"{\"ref\":\"refs/heads/main\"}",
            &signature
        ));
        assert!(!verify_github_signature(
            SECRET,
            b"{\"ref\":\"refs/heads/evil\"}",
            &signature
        ));
        assert!(!verify_github_signature(
            "another secret",
            b"{\"ref\":\"refs/heads/main\"}",
            &signature
        ));
    }

    #[test]
    fn test_signature_requires_sha256_prefix() {
        let signature = sign(b"body");
        assert!(!verify_github_signature(
            SECRET,
            b"body",
            signature.trim_start_matches("sha256=")
        ));
        assert!(!verify_github_signature(SECRET, b"body", "sha256=not-hex"));
    }

    #[test]
    fn test_push_to_main_triggers_cycle() {
        let push = payload(json!({ "ref": "refs/heads/main" }));
        assert_eq!(route_event("push", &push, "main"), Route::BackportCycle);

        let other = payload(json!({ "ref": "refs/heads/release/v1.19" }));
        assert_eq!(route_event("push", &other, "main"), Route::Ignore);

        let tag = payload(json!({ "ref": "refs/tags/v1.19.1" }));
        assert_eq!(route_event("push", &tag, "main"), Route::Ignore);
    }

    #[test]
    fn test_pull_request_actions() {
        for action in APPROVAL_ACTIONS {
            let event = payload(json!({ "action": action, "pull_request": { "number": 42 } }));
            assert_eq!(
                route_event("pull_request", &event, "main"),
                Route::ApprovalStatus(42)
            );
        }

        let closed = payload(json!({ "action": "closed", "pull_request": { "number": 42 } }));
        assert_eq!(route_event("pull_request", &closed, "main"), Route::Ignore);
    }

    #[test]
    fn test_review_events_update_approvals() {
        let review = payload(json!({ "action": "dismissed", "pull_request": { "number": 7 } }));
        assert_eq!(
            route_event("pull_request_review", &review, "main"),
            Route::ApprovalStatus(7)
        );
        assert_eq!(route_event("issues", &review, "main"), Route::Ignore);
    }

    #[tokio::test]
    async fn test_unsigned_request_is_rejected() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let response = app().oneshot(request("push", body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signed_push_is_accepted() {
        let body = br#"{"ref":"refs/heads/main","repository":{"full_name":"go-gitea/gitea"}}"#;
        let response = app()
            .oneshot(request("push", body, Some(sign(body))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let response: WebhookResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response.message, "backport cycle scheduled");
    }

    #[tokio::test]
    async fn test_other_repository_is_ignored() {
        let body = br#"{"ref":"refs/heads/main","repository":{"full_name":"someone/fork"}}"#;
        let response = app()
            .oneshot(request("push", body, Some(sign(body))))
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let response: WebhookResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response.message, "ignored");
    }
}
