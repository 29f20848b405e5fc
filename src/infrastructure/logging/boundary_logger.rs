use std::time::Instant;
use tracing::{error, info};

/// BoundaryLogger - 모듈 경계 로깅
///
/// 포맷: [trace_id] [호출자→피호출자] [작업] [상태] [duration]
/// Deployments use the session id as trace id, so one grep follows a whole run.
#[derive(Clone)]
pub struct BoundaryLogger;

impl BoundaryLogger {
    pub fn new() -> Self {
        Self
    }

    /// 예: [API→Handler] POST /api/deployments [ENTRY] repo="demo"
    pub fn api_entry(&self, trace_id: &str, method: &str, path: &str, params: &str) {
        info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            flow = "API→Handler",
            stage = "ENTRY",
            "[{}] [API→Handler] {} {} [ENTRY] {}",
            trace_id, method, path, params
        );
    }

    pub fn api_exit(&self, trace_id: &str, method: &str, path: &str, duration_ms: f64, status: u16) {
        info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            flow = "API→Handler",
            stage = "←DONE",
            duration_ms = %duration_ms,
            status = %status,
            "[{}] [API→Handler] {} {} [←DONE] {:.2}ms status={}",
            trace_id, method, path, duration_ms, status
        );
    }

    /// 예: [CLI→DeploymentWorkflow] run [ENTRY] params="demo"
    pub fn service_entry<T: std::fmt::Debug>(&self, trace_id: &str, from: &str, service: &str, method: &str, params: &T) {
        info!(
            trace_id = %trace_id,
            from = %from,
            service = %service,
            method = %method,
            flow = format!("{}→{}", from, service),
            stage = "ENTRY",
            params = ?params,
            "[{}] [{}→{}] {} [ENTRY] params={:?}",
            trace_id, from, service, method, params
        );
    }

    pub fn service_exit(&self, trace_id: &str, from: &str, service: &str, method: &str, duration_ms: f64) {
        info!(
            trace_id = %trace_id,
            from = %from,
            service = %service,
            method = %method,
            flow = format!("{}→{}", from, service),
            stage = "←DONE",
            duration_ms = %duration_ms,
            "[{}] [{}→{}] {} [←DONE] {:.2}ms",
            trace_id, from, service, method, duration_ms
        );
    }

    pub fn service_error<E: std::fmt::Display>(&self, trace_id: &str, from: &str, service: &str, method: &str, error: &E) {
        error!(
            trace_id = %trace_id,
            from = %from,
            service = %service,
            method = %method,
            flow = format!("{}→{}", from, service),
            stage = "←FAIL",
            error = %error,
            "[{}] [{}→{}] {} [←FAIL] error={}",
            trace_id, from, service, method, error
        );
    }

    /// 외부 시스템 호출 시작 (git, tar, ssh, 로컬 프로세스)
    /// 예: [DeploymentWorkflow→SSH] connect [EXT→]
    pub fn external_call(&self, trace_id: &str, from: &str, system: &str, operation: &str) {
        info!(
            trace_id = %trace_id,
            from = %from,
            system = %system,
            operation = %operation,
            flow = format!("{}→{}", from, system),
            stage = "EXT→",
            "[{}] [{}→{}] {} [EXT→]",
            trace_id, from, system, operation
        );
    }

    pub fn external_done(&self, trace_id: &str, from: &str, system: &str, operation: &str, duration_ms: f64) {
        info!(
            trace_id = %trace_id,
            from = %from,
            system = %system,
            operation = %operation,
            flow = format!("{}→{}", from, system),
            stage = "←DONE",
            duration_ms = %duration_ms,
            "[{}] [{}→{}] {} [←DONE] {:.2}ms",
            trace_id, from, system, operation, duration_ms
        );
    }

    pub fn external_error<E: std::fmt::Display>(&self, trace_id: &str, from: &str, system: &str, operation: &str, error: &E) {
        error!(
            trace_id = %trace_id,
            from = %from,
            system = %system,
            operation = %operation,
            flow = format!("{}→{}", from, system),
            stage = "←FAIL",
            error = %error,
            "[{}] [{}→{}] {} [←FAIL] error={}",
            trace_id, from, system, operation, error
        );
    }

    /// 예: [DeploymentWorkflow→EventBus] emit [EVT↗] DeploymentStatus::Completed
    pub fn event_emit(&self, trace_id: &str, from: &str, event_type: &str) {
        info!(
            trace_id = %trace_id,
            from = %from,
            event_type = %event_type,
            flow = format!("{}→EventBus", from),
            stage = "EVT↗",
            "[{}] [{}→EventBus] emit [EVT↗] {}",
            trace_id, from, event_type
        );
    }
}

impl Default for BoundaryLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// 성능 측정용 타이머
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// 경과 시간 (밀리초)
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}
