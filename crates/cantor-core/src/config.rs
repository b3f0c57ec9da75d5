//! Configuration types for the Cantor REPL bridge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{BackendProfile, Error};

/// Application configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Session settings
    pub session: SessionSettings,
    /// Additional backend profiles; a profile named like a built-in one replaces it
    pub backends: Vec<BackendProfile>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_sessions == 0 {
            return Err(Error::Config("server.max_sessions must be > 0".to_string()));
        }

        if self.session.login_timeout_ms == 0 {
            return Err(Error::Config(
                "session.login_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.session.expression_retention == 0 {
            return Err(Error::Config(
                "session.expression_retention must be > 0".to_string(),
            ));
        }

        for backend in &self.backends {
            backend.validate()?;
        }

        Ok(())
    }

    /// All known profiles: built-ins, then configured ones overriding by name.
    pub fn profiles(&self) -> Vec<BackendProfile> {
        let mut profiles = BackendProfile::builtin();
        for configured in &self.backends {
            match profiles.iter_mut().find(|p| p.name == configured.name) {
                Some(existing) => *existing = configured.clone(),
                None => profiles.push(configured.clone()),
            }
        }
        profiles
    }

    /// Resolve a profile by name.
    pub fn backend(&self, name: &str) -> crate::Result<BackendProfile> {
        self.profiles()
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::BackendNotFound(name.to_string()))
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            log_level: "info".to_string(),
        }
    }
}

/// Session timing and recording settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Upper bound for the interpreter to present its first boundary
    pub login_timeout_ms: u64,
    /// Grace period between the exit command and a forced kill
    pub logout_grace_ms: u64,
    /// Default wait for an expression result in the tool layer
    pub evaluation_wait_ms: u64,
    /// How long a failed expression that printed no error waits for one
    pub stderr_grace_ms: u64,
    /// Finished expressions kept per session for later lookup
    pub expression_retention: usize,
    /// Keep a transcript of the protocol traffic
    pub record_transcript: bool,
    /// Where transcripts are saved at logout; the system temp dir if unset
    pub transcript_dir: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            login_timeout_ms: 10_000,
            logout_grace_ms: 1_000,
            evaluation_wait_ms: 30_000,
            stderr_grace_ms: 50,
            expression_retention: 100,
            record_transcript: false,
            transcript_dir: None,
        }
    }
}

impl SessionSettings {
    /// Login timeout as a duration.
    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    /// Logout grace period as a duration.
    pub fn logout_grace(&self) -> Duration {
        Duration::from_millis(self.logout_grace_ms)
    }

    /// Quiet period a silently failed expression waits for its error text.
    pub fn stderr_grace(&self) -> Duration {
        Duration::from_millis(self.stderr_grace_ms)
    }

    /// Default evaluation wait as a duration.
    pub fn evaluation_wait(&self) -> Duration {
        Duration::from_millis(self.evaluation_wait_ms)
    }

    /// Directory transcripts are written to.
    pub fn transcript_dir(&self) -> PathBuf {
        self.transcript_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FramingConfig, TransportKind};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.max_sessions, 10);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.session.login_timeout_ms, 10_000);
        assert_eq!(config.session.logout_grace(), Duration::from_millis(1000));
        assert!(!config.session.record_transcript);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_max_sessions() {
        let mut config = AppConfig::default();
        config.server.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_login_timeout() {
        let mut config = AppConfig::default();
        config.session.login_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retention_must_keep_something() {
        let mut config = AppConfig::default();
        assert_eq!(config.session.expression_retention, 100);
        assert_eq!(config.session.stderr_grace(), Duration::from_millis(50));
        config.session.expression_retention = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  max_sessions: 5
  log_level: debug

session:
  login_timeout_ms: 2000
  logout_grace_ms: 500
  evaluation_wait_ms: 60000
  record_transcript: true
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.max_sessions, 5);
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.session.login_timeout_ms, 2000);
        assert_eq!(config.session.logout_grace_ms, 500);
        assert_eq!(config.session.evaluation_wait(), Duration::from_secs(60));
        assert!(config.session.record_transcript);
    }

    #[test]
    fn test_custom_backend() {
        let yaml = r#"
backends:
  - name: octave
    program: /opt/octave/bin/octave-cli
    framing:
      type: numbered_prompt
      prompt: "CANTOR_OCTAVE_BACKEND_PROMPT:([0-9]+)> "
  - name: shell
    program: /bin/sh
    transport: pty
    framing:
      type: numbered_prompt
      prompt: "SH([0-9]+)\\$ "
      skip_check_exempt: ["complete"]
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.backends.len(), 2);

        let octave = config.backend("octave").unwrap();
        assert_eq!(octave.program, "/opt/octave/bin/octave-cli");

        let shell = config.backend("shell").unwrap();
        assert_eq!(shell.transport, TransportKind::Pty);
        match shell.framing {
            FramingConfig::NumberedPrompt {
                force_close,
                skip_check_exempt,
                ..
            } => {
                assert_eq!(force_close, ")]'\"\n");
                assert_eq!(skip_check_exempt, vec!["complete".to_string()]);
            }
            other => panic!("unexpected framing: {other:?}"),
        }

        assert_eq!(config.profiles().len(), 3);
        assert!(config.backend("scilab").is_ok());
    }

    #[test]
    fn test_unknown_backend() {
        let config = AppConfig::default();
        assert!(matches!(
            config.backend("maxima"),
            Err(Error::BackendNotFound(name)) if name == "maxima"
        ));
    }

    #[test]
    fn test_invalid_backend_pattern() {
        let yaml = r#"
backends:
  - name: bad
    program: bad
    framing:
      type: numbered_prompt
      prompt: "([unclosed"
"#;

        let result = AppConfig::from_yaml(yaml);
        assert!(matches!(result, Err(Error::InvalidPattern { .. })));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = AppConfig::from_yaml("server: [1, 2");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
