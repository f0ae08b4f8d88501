//! Session registry
//!
//! One actor per session id, created on first use. There is no cross-session
//! lock: the map is a `DashMap` and every session's state lives in its actor.

use std::sync::Arc;

use dashmap::DashMap;
use parley_connectors::{SessionLoader, Transport};
use parley_protocol::{Message, SessionMeta, StreamState};
use tracing::info;

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::observer::{SessionView, Subscription};
use crate::session::SessionHandle;
use crate::session_actor::SessionActorHandle;
use crate::session_command::StartOutcome;

/// Owns every live session. Must be used inside a tokio runtime.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionActorHandle>,
    transport: Arc<dyn Transport>,
    loader: Arc<dyn SessionLoader>,
    config: ManagerConfig,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        loader: Arc<dyn SessionLoader>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            transport,
            loader,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The actor for `session_id`, spawned on first use.
    pub fn actor(&self, session_id: &str) -> SessionActorHandle {
        if let Some(existing) = self.sessions.get(session_id) {
            return existing.clone();
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(
                    component = "registry",
                    event = "registry.session.created",
                    session_id = %session_id,
                    "Spawning session actor"
                );
                SessionActorHandle::spawn(
                    SessionHandle::new(session_id),
                    self.transport.clone(),
                    self.loader.clone(),
                    self.config.clone(),
                )
            })
            .clone()
    }

    /// Call `observer` after every change to the session.
    pub fn subscribe(
        &self,
        session_id: &str,
        observer: impl Fn(Arc<StreamState>) + Send + Sync + 'static,
    ) -> Subscription {
        self.actor(session_id).subscribe(Arc::new(observer))
    }

    pub fn view(&self, session_id: &str) -> SessionView {
        self.actor(session_id).view()
    }

    /// Current state; an unknown session reads as empty and idle.
    pub fn get_state(&self, session_id: &str) -> Arc<StreamState> {
        self.sessions
            .get(session_id)
            .map(|actor| actor.snapshot().state.clone())
            .unwrap_or_default()
    }

    /// Metadata of an initialized session.
    pub fn get_cached_session(&self, session_id: &str) -> Option<SessionMeta> {
        let snapshot = self.sessions.get(session_id)?.snapshot();
        snapshot.initialized.then(|| snapshot.meta.clone())
    }

    pub fn is_stream_active(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|actor| actor.snapshot().stream_active)
    }

    /// Load the session once. Concurrent callers share the same load.
    pub async fn initialize_session(&self, session_id: &str) -> Result<(), ManagerError> {
        self.actor(session_id).initialize().await
    }

    pub async fn start_stream(
        &self,
        session_id: &str,
        content: impl Into<String>,
    ) -> Result<StartOutcome, ManagerError> {
        self.actor(session_id).start_stream(content).await
    }

    /// Returns `false` when no stream was running.
    pub async fn stop_stream(&self, session_id: &str) -> Result<bool, ManagerError> {
        match self.sessions.get(session_id).map(|actor| actor.clone()) {
            Some(actor) => actor.stop_stream().await,
            None => Ok(false),
        }
    }

    pub async fn resume_stream(&self, session_id: &str) -> Result<StartOutcome, ManagerError> {
        self.actor(session_id).resume_stream().await
    }

    pub async fn update_cache(
        &self,
        session_id: &str,
        meta: SessionMeta,
        messages: Vec<Message>,
    ) -> Result<(), ManagerError> {
        self.actor(session_id).update_cache(meta, messages).await
    }

    pub async fn resolve_notification(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<bool, ManagerError> {
        match self.sessions.get(session_id).map(|actor| actor.clone()) {
            Some(actor) => actor.resolve_notification(request_id).await,
            None => Ok(false),
        }
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop a session and stop its actor. Existing subscriptions stay valid
    /// but receive no further updates.
    pub async fn evict(&self, session_id: &str) -> bool {
        let Some((_, actor)) = self.sessions.remove(session_id) else {
            return false;
        };
        info!(
            component = "registry",
            event = "registry.session.evicted",
            session_id = %session_id,
            "Evicting session"
        );
        actor.shutdown().await;
        true
    }

    pub async fn shutdown(&self) {
        let ids = self.session_ids();
        for id in &ids {
            self.evict(id).await;
        }
        info!(
            component = "registry",
            event = "registry.shutdown",
            sessions = ids.len(),
            "Registry shut down"
        );
    }
}
