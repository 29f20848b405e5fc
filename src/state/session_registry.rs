use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only copy of a session, safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSession {
    pub id: String,
    pub project: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Final message (error text for failed sessions).
    pub message: Option<String>,
}

/// Handle given to the workflow that owns a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    pub project: String,
    stop_flag: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

struct Entry {
    session: DeploymentSession,
    stop_flag: Arc<AtomicBool>,
}

/// SessionRegistry - 배포 세션 레지스트리
///
/// 책임:
/// - 세션 생성 (id = `<project>_<unix timestamp>`)
/// - 상태 조회 및 종료 상태 기록
/// - 중지 요청 플래그 전달
///
/// Nothing is removed automatically; `clear_finished` is the only removal path.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a running session for `project`.
    pub async fn create(&self, project: &str) -> SessionHandle {
        let started_at = Utc::now();
        let base = format!("{}_{}", project, started_at.timestamp());

        let mut sessions = self.sessions.write().await;
        let mut id = base.clone();
        let mut suffix = 2;
        while sessions.contains_key(&id) {
            id = format!("{}-{}", base, suffix);
            suffix += 1;
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        sessions.insert(
            id.clone(),
            Entry {
                session: DeploymentSession {
                    id: id.clone(),
                    project: project.to_string(),
                    status: SessionStatus::Running,
                    started_at,
                    finished_at: None,
                    message: None,
                },
                stop_flag: stop_flag.clone(),
            },
        );

        SessionHandle {
            id,
            project: project.to_string(),
            stop_flag,
        }
    }

    pub async fn get(&self, id: &str) -> Option<DeploymentSession> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|e| e.session.clone())
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> Vec<DeploymentSession> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<_> = sessions.values().map(|e| e.session.clone()).collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Record a terminal status. A session that is already terminal keeps its first one.
    pub async fn finish(&self, id: &str, status: SessionStatus, message: Option<String>) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(id) {
            if entry.session.status.is_terminal() {
                return;
            }
            entry.session.status = status;
            entry.session.finished_at = Some(Utc::now());
            entry.session.message = message;
        }
    }

    /// Flag a running session for stopping. Returns `None` for unknown ids and
    /// `Some(false)` when the session already finished.
    pub async fn stop(&self, id: &str) -> Option<bool> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(id)?;
        if entry.session.status.is_terminal() {
            return Some(false);
        }
        entry.stop_flag.store(true, Ordering::SeqCst);
        Some(true)
    }

    /// Flag every running session. Returns how many were flagged.
    pub async fn stop_all(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|e| !e.session.status.is_terminal())
            .map(|e| e.stop_flag.store(true, Ordering::SeqCst))
            .count()
    }

    /// Drop every terminal session. Returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, e| !e.session.status.is_terminal());
        before - sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
