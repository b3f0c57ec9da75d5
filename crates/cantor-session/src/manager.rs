//! Session manager for coordinating multiple interpreter sessions.

use std::collections::HashMap;

use cantor_core::{
    AppConfig, BackendProfile, Error, Result, SessionId, SessionInfo, SessionSettings,
};
use cantor_transport::{default_factory, TransportFactory};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::session::Session;

/// Configuration for session manager.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,

    /// Settings handed to every session
    pub session: SessionSettings,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            session: SessionSettings::default(),
        }
    }
}

impl From<&AppConfig> for SessionManagerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_sessions: config.server.max_sessions,
            session: config.session.clone(),
        }
    }
}

/// Registry of logged-in sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
    config: SessionManagerConfig,
    factory: TransportFactory,
}

impl SessionManager {
    /// Create a new session manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(SessionManagerConfig::default())
    }

    /// Create a new session manager with custom configuration.
    pub fn with_config(config: SessionManagerConfig) -> Self {
        Self::with_factory(config, default_factory())
    }

    /// Create a session manager attaching interpreters through `factory`.
    pub fn with_factory(config: SessionManagerConfig, factory: TransportFactory) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            factory,
        }
    }

    /// Start a session for `profile` and log it in.
    pub async fn create_session(&self, profile: BackendProfile) -> Result<Session> {
        if self.session_count().await >= self.config.max_sessions {
            return Err(Error::SessionLimitReached(self.config.max_sessions));
        }

        let session =
            Session::with_factory(profile, self.config.session.clone(), self.factory.clone())?;
        session.login().await?;

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_sessions {
            drop(sessions);
            warn!("Session limit reached while logging in, closing {}", session.id());
            session.logout().await?;
            return Err(Error::SessionLimitReached(self.config.max_sessions));
        }
        sessions.insert(session.id(), session.clone());
        info!(
            "Registered session {} ({} active)",
            session.id(),
            sessions.len()
        );

        Ok(session)
    }

    /// Get a session by ID.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(Error::SessionNotFound(*session_id))
    }

    /// List all registered sessions.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos
    }

    /// Log a session out and forget it.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or(Error::SessionNotFound(*session_id))?;
        info!("Closing session {}", session_id);
        session.logout().await
    }

    /// Close all sessions.
    pub async fn close_all(&self) -> Result<()> {
        let sessions: Vec<(SessionId, Session)> = self.sessions.write().await.drain().collect();
        for (session_id, session) in sessions {
            if let Err(err) = session.logout().await {
                warn!("Failed to log out session {}: {}", session_id, err);
            }
        }
        Ok(())
    }

    /// Get the number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantor_core::FramingConfig;
    use cantor_transport::testing::{failing_factory, scripted_factory};

    fn profile() -> BackendProfile {
        BackendProfile::new(
            "test",
            "octave-cli",
            FramingConfig::numbered_prompt("P:([0-9]+)> ", None),
        )
    }

    #[tokio::test]
    async fn test_session_manager_create() {
        let manager = SessionManager::new();
        assert_eq!(manager.session_count().await, 0);
        assert!(manager.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_manager_lifecycle() {
        let (factory, mut peers) = scripted_factory();
        let manager = std::sync::Arc::new(SessionManager::with_factory(
            SessionManagerConfig::default(),
            factory,
        ));

        let create = tokio::spawn({
            let manager = manager.clone();
            async move { manager.create_session(profile()).await }
        });
        let peer = peers.recv().await.unwrap();
        peer.exit_on_input("exit\n");
        peer.stdout("P:1> ");
        let session = create.await.unwrap().unwrap();

        assert_eq!(manager.session_count().await, 1);
        let listed = manager.list_sessions().await;
        assert_eq!(listed[0].id, session.id());
        assert_eq!(listed[0].backend, "test");
        assert!(manager.get_session(&session.id()).await.is_ok());

        manager.close_session(&session.id()).await.unwrap();
        assert_eq!(manager.session_count().await, 0);
        assert!(peer.has_exited());
        assert!(matches!(
            manager.get_session(&session.id()).await,
            Err(Error::SessionNotFound(_))
        ));
        assert!(matches!(
            manager.close_session(&session.id()).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_manager_session_limit() {
        let (factory, mut peers) = scripted_factory();
        let config = SessionManagerConfig {
            max_sessions: 1,
            ..Default::default()
        };
        let manager = std::sync::Arc::new(SessionManager::with_factory(config, factory));

        let create = tokio::spawn({
            let manager = manager.clone();
            async move { manager.create_session(profile()).await }
        });
        peers.recv().await.unwrap().stdout("P:1> ");
        create.await.unwrap().unwrap();

        let result = manager.create_session(profile()).await;
        assert!(matches!(result, Err(Error::SessionLimitReached(1))));
        manager.close_all().await.unwrap();
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_session_manager_spawn_failure_not_registered() {
        let manager = SessionManager::with_factory(SessionManagerConfig::default(), failing_factory());
        let result = manager.create_session(profile()).await;
        assert!(matches!(result, Err(Error::SpawnFailed(_))));
        assert_eq!(manager.session_count().await, 0);
    }
}
