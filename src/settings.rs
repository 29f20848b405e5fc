use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Logging configuration from environment variables
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub default_filter: String,
    pub json: bool,
    pub dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: env::var("AUTOMATA_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            dir: env::var("AUTOMATA_LOG_DIR").ok().filter(|v| !v.is_empty()).map(PathBuf::from),
        }
    }
}

/// Agent settings (timeouts, event bus capacity, bind address)
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Limit for each local build/test/deploy command. `None` waits forever.
    pub command_timeout: Option<Duration>,
    pub ssh_connect_timeout: Duration,
    pub ssh_exec_timeout: Duration,
    pub clone_timeout: Duration,
    pub event_capacity: usize,
    pub bind: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command_timeout: None,
            ssh_connect_timeout: Duration::from_secs(30),
            ssh_exec_timeout: Duration::from_secs(900),
            clone_timeout: Duration::from_secs(60),
            event_capacity: 1000,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AgentSettings {
    /// Load from environment variables; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            command_timeout: lookup("AUTOMATA_COMMAND_TIMEOUT")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|&n| n > 0)
                .map(Duration::from_secs),
            ssh_connect_timeout: secs("AUTOMATA_SSH_CONNECT_TIMEOUT", defaults.ssh_connect_timeout),
            ssh_exec_timeout: secs("AUTOMATA_SSH_EXEC_TIMEOUT", defaults.ssh_exec_timeout),
            clone_timeout: secs("AUTOMATA_CLONE_TIMEOUT", defaults.clone_timeout),
            event_capacity: lookup("AUTOMATA_EVENT_CAPACITY")
                .and_then(|v| v.trim().parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.event_capacity),
            bind: lookup("AUTOMATA_BIND").unwrap_or(defaults.bind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let settings = AgentSettings::from_lookup(|_| None);
        assert_eq!(settings.ssh_connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.clone_timeout, Duration::from_secs(60));
        assert_eq!(settings.bind, "0.0.0.0:3000");
        assert_eq!(settings.command_timeout, None);
    }

    #[test]
    fn test_command_timeout() {
        let settings = AgentSettings::from_lookup(|k| (k == "AUTOMATA_COMMAND_TIMEOUT").then(|| "600".to_string()));
        assert_eq!(settings.command_timeout, Some(Duration::from_secs(600)));

        let settings = AgentSettings::from_lookup(|k| (k == "AUTOMATA_COMMAND_TIMEOUT").then(|| "0".to_string()));
        assert_eq!(settings.command_timeout, None);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = [
            ("AUTOMATA_SSH_EXEC_TIMEOUT", "120"),
            ("AUTOMATA_CLONE_TIMEOUT", "soon"),
            ("AUTOMATA_EVENT_CAPACITY", "0"),
        ]
        .into_iter()
        .collect();

        let settings = AgentSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(settings.ssh_exec_timeout, Duration::from_secs(120));
        assert_eq!(settings.clone_timeout, Duration::from_secs(60));
        assert_eq!(settings.event_capacity, 1000);
    }
}
