use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::application::ports::RepositoryRef;
use crate::application::services::{parse_repository_url, DeploymentRequest, ProgressEvent, ServerSpec};
use crate::infrastructure::logging::Timer;
use crate::state::AppContext;

pub fn deployments_routes() -> Router<AppContext> {
    Router::new()
        .route("/", get(list_deployments).post(create_deployment).delete(clear_finished))
        .route("/stop", post(stop_all))
        .route("/{id}", get(get_deployment))
        .route("/{id}/stop", post(stop_deployment))
}

#[derive(Debug, Deserialize)]
struct CreateDeploymentBody {
    server: ServerSpec,
    repository_url: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl CreateDeploymentBody {
    fn into_request(self) -> Result<DeploymentRequest, String> {
        let parsed = parse_repository_url(&self.repository_url)
            .ok_or_else(|| format!("Unsupported repository URL: {}", self.repository_url))?;
        if self.server.host.trim().is_empty() {
            return Err("Server host is required".to_string());
        }

        Ok(DeploymentRequest {
            server: self.server,
            repository: RepositoryRef {
                name: self.name.filter(|n| !n.trim().is_empty()).unwrap_or(parsed.name),
                url: parsed.url,
                branch: self.branch.filter(|b| !b.trim().is_empty()).unwrap_or(parsed.branch),
            },
        })
    }
}

fn progress_to_sse(event: &ProgressEvent) -> SseEvent {
    let name = match event {
        ProgressEvent::Finished { .. } => "finished",
        _ => "progress",
    };
    SseEvent::default()
        .event(name)
        .json_data(event)
        .unwrap_or_else(|_| SseEvent::default().event(name).data(event.message()))
}

/// Starts a deployment and streams its progress. The first event carries the
/// session id; the deployment keeps running if the client disconnects.
async fn create_deployment(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<CreateDeploymentBody>,
) -> Response {
    let trace_id = super::trace_id(&headers);
    let timer = Timer::start();
    ctx.logger.api_entry(&trace_id, "POST", "/api/deployments", &body.repository_url);

    let request = match body.into_request() {
        Ok(request) => request,
        Err(message) => {
            warn!("[{}] Rejected deployment: {}", trace_id, message);
            ctx.logger.api_exit(&trace_id, "POST", "/api/deployments", timer.elapsed_ms(), 400);
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    let handle = ctx.workflow.start(&request).await;
    info!("[{}] Deployment session {} started", trace_id, handle.id);

    let (tx, rx) = mpsc::unbounded_channel();
    let workflow = ctx.workflow.clone();
    let session = handle.clone();
    tokio::spawn(async move {
        workflow.run(&session, &request, &tx).await;
    });

    let first = SseEvent::default()
        .event("session")
        .json_data(json!({ "session_id": handle.id }))
        .unwrap_or_else(|_| SseEvent::default().event("session").data(handle.id.clone()));

    ctx.logger.api_exit(&trace_id, "POST", "/api/deployments", timer.elapsed_ms(), 200);
    Sse::new(progress_stream(first, rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn progress_stream(
    first: SseEvent,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let progress = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(progress_to_sse(&event)), rx))
    });
    stream::once(async move { Ok(first) }).chain(progress)
}

async fn list_deployments(State(ctx): State<AppContext>, headers: HeaderMap) -> impl IntoResponse {
    let trace_id = super::trace_id(&headers);
    let timer = Timer::start();
    ctx.logger.api_entry(&trace_id, "GET", "/api/deployments", "");

    let sessions = ctx.registry.list().await;

    ctx.logger.api_exit(&trace_id, "GET", "/api/deployments", timer.elapsed_ms(), 200);
    Json(sessions)
}

async fn get_deployment(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let trace_id = super::trace_id(&headers);
    let timer = Timer::start();
    let path = format!("/api/deployments/{}", id);
    ctx.logger.api_entry(&trace_id, "GET", &path, "");

    match ctx.registry.get(&id).await {
        Some(session) => {
            ctx.logger.api_exit(&trace_id, "GET", &path, timer.elapsed_ms(), 200);
            (StatusCode::OK, Json(session)).into_response()
        }
        None => {
            ctx.logger.api_exit(&trace_id, "GET", &path, timer.elapsed_ms(), 404);
            (StatusCode::NOT_FOUND, Json(json!({ "error": "Deployment not found" }))).into_response()
        }
    }
}

async fn stop_deployment(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let trace_id = super::trace_id(&headers);
    let timer = Timer::start();
    let path = format!("/api/deployments/{}/stop", id);
    ctx.logger.api_entry(&trace_id, "POST", &path, "");

    let (status, body) = match ctx.registry.stop(&id).await {
        Some(true) => {
            info!("[{}] Stop requested for {}", trace_id, id);
            (StatusCode::ACCEPTED, json!({ "stopping": id }))
        }
        Some(false) => (
            StatusCode::CONFLICT,
            json!({ "error": "Deployment already finished" }),
        ),
        None => (StatusCode::NOT_FOUND, json!({ "error": "Deployment not found" })),
    };

    ctx.logger.api_exit(&trace_id, "POST", &path, timer.elapsed_ms(), status.as_u16());
    (status, Json(body))
}

async fn stop_all(State(ctx): State<AppContext>, headers: HeaderMap) -> impl IntoResponse {
    let trace_id = super::trace_id(&headers);
    let timer = Timer::start();
    ctx.logger.api_entry(&trace_id, "POST", "/api/deployments/stop", "");

    let count = ctx.registry.stop_all().await;
    info!("[{}] Stop requested for {} running deployment(s)", trace_id, count);

    ctx.logger.api_exit(&trace_id, "POST", "/api/deployments/stop", timer.elapsed_ms(), 202);
    (StatusCode::ACCEPTED, Json(json!({ "stopping": count })))
}

async fn clear_finished(State(ctx): State<AppContext>, headers: HeaderMap) -> impl IntoResponse {
    let trace_id = super::trace_id(&headers);
    let timer = Timer::start();
    ctx.logger.api_entry(&trace_id, "DELETE", "/api/deployments", "");

    let removed = ctx.registry.clear_finished().await;

    ctx.logger.api_exit(&trace_id, "DELETE", "/api/deployments", timer.elapsed_ms(), 200);
    Json(json!({ "removed": removed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(url: &str, branch: Option<&str>) -> CreateDeploymentBody {
        serde_json::from_value(json!({
            "server": { "host": "10.0.0.1" },
            "repository_url": url,
            "branch": branch,
        }))
        .unwrap()
    }

    #[test]
    fn test_body_defaults() {
        let request = body("https://github.com/acme/widget", None).into_request().unwrap();
        assert_eq!(request.server.port, 22);
        assert_eq!(request.server.user, "root");
        assert_eq!(request.server.deploy_path, "/opt");
        assert_eq!(request.repository.branch, "main");
    }

    #[test]
    fn test_explicit_branch_wins_over_url() {
        let request = body("https://github.com/acme/widget/tree/dev", Some("release"))
            .into_request()
            .unwrap();
        assert_eq!(request.repository.branch, "release");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(body("not-a-url", None).into_request().is_err());
    }
}
