use axum::{extract::State, http::HeaderMap, Json};

use crate::application::services::{ConnectionReport, ServerSpec};
use crate::infrastructure::logging::Timer;
use crate::state::AppContext;

pub async fn test_server(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(server): Json<ServerSpec>,
) -> Json<ConnectionReport> {
    let trace_id = super::trace_id(&headers);
    let timer = Timer::start();
    ctx.logger
        .api_entry(&trace_id, "POST", "/api/servers/test", &format!("{}@{}", server.user, server.host));

    let report = ctx.workflow.test_connection(&server.target()).await;

    ctx.logger
        .api_exit(&trace_id, "POST", "/api/servers/test", timer.elapsed_ms(), 200);
    Json(report)
}
