use std::collections::HashMap;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
};
use serde_json::json;
use tracing::{debug, warn};

use super::registry::IngressRegistry;
use crate::queue::PushOutcome;

/// Normalize the configured root to `/segment` form (empty for `/`).
pub(crate) fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

pub fn create_router(registry: IngressRegistry, root: &str) -> Router {
    let root = normalize_root(root);

    Router::new()
        .route(&format!("{root}/{{name}}"), any(missing_token))
        .route(&format!("{root}/{{name}}/{{token}}"), any(receive))
        .with_state(registry)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn missing_token(Path(name): Path<String>) -> Response {
    debug!(listener = %name, "Webhook request without token");
    error(StatusCode::BAD_REQUEST, "missing token")
}

async fn receive(
    State(registry): State<IngressRegistry>,
    Path((name, token)): Path<(String, String)>,
    Query(mut params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(endpoint) = registry.get(&name) else {
        return error(StatusCode::NOT_FOUND, "unknown webhook");
    };

    if token != endpoint.token {
        warn!(listener = %name, "Webhook request with invalid token");
        return error(StatusCode::BAD_REQUEST, "invalid token");
    }

    // JSON body keys complement the query string; the query wins on conflicts.
    if !body.is_empty() {
        match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&body) {
            Ok(map) => {
                for (key, value) in map {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    params.entry(key).or_insert(value);
                }
            }
            Err(e) => {
                debug!(listener = %name, error = %e, "Ignoring non-JSON webhook body");
            }
        }
    }

    let Some(alert) = endpoint.alert(&params) else {
        return error(StatusCode::BAD_REQUEST, "missing alert text");
    };

    match endpoint.queue.push(alert) {
        Ok(outcome) => {
            let status = match outcome {
                PushOutcome::Dispatched => "dispatched",
                PushOutcome::Buffered => "buffered",
                PushOutcome::Dropped => "dropped",
            };
            (StatusCode::OK, Json(json!({ "status": status }))).into_response()
        }
        Err(e) => {
            warn!(listener = %name, error = %e, "Rejected webhook alert");
            error(StatusCode::SERVICE_UNAVAILABLE, "alert queue is closed")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::Responder;
    use crate::queue::{AlertQueue, AlertQueueConfig};
    use crate::server::{WebhookEndpoint, WebhookFields};
    use crate::test_helpers::RecordingNotifier;

    async fn spawn(registry: IngressRegistry) -> String {
        let app = create_router(registry, "/hooks/");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hooks")
    }

    fn registry_with(queue: AlertQueue) -> IngressRegistry {
        let registry = IngressRegistry::new();
        registry
            .register(WebhookEndpoint {
                name: "grafana".to_string(),
                token: "secret".to_string(),
                fields: WebhookFields::default(),
                queue,
            });
        registry
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root("/"), "");
        assert_eq!(normalize_root("hooks"), "/hooks");
        assert_eq!(normalize_root("/api/hooks/"), "/api/hooks");
    }

    #[tokio::test]
    async fn test_status_codes() {
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        let queue = AlertQueue::new(AlertQueueConfig::default(), vec![recorder.clone()]);
        queue.bind(Responder::new("Bob", "+2"));
        let base = spawn(registry_with(queue.clone())).await;
        let client = reqwest::Client::new();

        let status = |url: String| {
            let client = client.clone();
            async move { client.get(url).send().await.unwrap().status() }
        };

        assert_eq!(status(format!("{base}/grafana")).await, StatusCode::BAD_REQUEST);
        assert_eq!(
            status(format!("{base}/grafana/wrong?text=x")).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(format!("{base}/unknown/secret?text=x")).await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(format!("{base}/grafana/secret")).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(format!("{base}/grafana/secret?text=disk%20full&from=prom")).await,
            StatusCode::OK
        );

        queue.close();
        assert_eq!(
            status(format!("{base}/grafana/secret?text=late")).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_json_body_is_accepted() {
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        let queue = AlertQueue::new(AlertQueueConfig::default(), vec![recorder.clone()]);
        queue.bind(Responder::new("Bob", "+2"));
        let base = spawn(registry_with(queue.clone())).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/grafana/secret?chat=infra"))
            .json(&json!({ "text": "cpu hot", "from": "alertmanager" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "dispatched");

        let calls = recorder.wait_for_calls(1).await;
        assert_eq!(calls[0].alerts[0].from, "alertmanager");
        assert_eq!(calls[0].alerts[0].chat, "infra");
    }
}
