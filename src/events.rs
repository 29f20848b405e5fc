use serde::{Deserialize, Serialize};

use crate::state::SessionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "deployment_status")]
    DeploymentStatus {
        session_id: String,
        project: String,
        status: SessionStatus,
        timestamp: String,
    },

    /// One progress message of a deployment, mirrored from its progress channel.
    #[serde(rename = "deployment_log")]
    DeploymentLog {
        session_id: String,
        step: String,
        line: String,
        timestamp: String,
    },

    #[serde(rename = "error")]
    Error {
        session_id: Option<String>,
        message: String,
        timestamp: String,
    },
}

impl Event {
    pub fn now() -> String {
        chrono::Local::now().to_rfc3339()
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::DeploymentStatus { .. } => "DeploymentStatus",
            Event::DeploymentLog { .. } => "DeploymentLog",
            Event::Error { .. } => "Error",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Event::DeploymentStatus { session_id, .. } | Event::DeploymentLog { session_id, .. } => {
                Some(session_id)
            }
            Event::Error { session_id, .. } => session_id.as_deref(),
        }
    }

    pub fn deployment_status(session_id: &str, project: &str, status: SessionStatus) -> Self {
        Event::DeploymentStatus {
            session_id: session_id.to_string(),
            project: project.to_string(),
            status,
            timestamp: Self::now(),
        }
    }

    pub fn deployment_log(session_id: &str, step: &str, line: String) -> Self {
        Event::DeploymentLog {
            session_id: session_id.to_string(),
            step: step.to_string(),
            line,
            timestamp: Self::now(),
        }
    }

    pub fn error(session_id: Option<&str>, message: String) -> Self {
        Event::Error {
            session_id: session_id.map(str::to_string),
            message,
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::deployment_status("demo_1700000000", "demo", SessionStatus::Running);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "deployment_status");
        assert_eq!(json["status"], "running");
        assert_eq!(json["session_id"], "demo_1700000000");
    }
}
