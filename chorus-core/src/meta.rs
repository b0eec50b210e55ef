//! Process-level server registry
//!
//! [`Meta`] hosts any number of virtual servers keyed by [`ServerId`] and
//! raises `ServerStarted` / `ServerStopped` on its own listener registry.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::events::{EventKind, Listener, ListenerHandle, ListenerRegistry, ServerEvent};
use crate::server::Server;
use crate::types::ServerId;
use crate::version::{self, VersionInfo};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Default)]
pub struct Meta {
    servers: RwLock<BTreeMap<ServerId, Arc<Server>>>,
    listeners: ListenerRegistry,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a server from `config`; its id is taken from `config.id`
    pub async fn start_server(&self, config: &ServerConfig) -> ServerResult<Arc<Server>> {
        let id = config.id;
        let server = {
            let mut servers = self.servers.write().await;
            if servers.contains_key(&id) {
                return Err(ServerError::ServerRunning(id));
            }
            let server = Arc::new(Server::from_config(config)?);
            servers.insert(id, Arc::clone(&server));
            server
        };

        info!(server = %id, name = %server.name(), "Server started");
        self.listeners.dispatch(&ServerEvent::ServerStarted { server: id });
        Ok(server)
    }

    /// Unregister a server and disconnect all of its sessions
    pub async fn stop_server(&self, id: ServerId) -> ServerResult<()> {
        let server = self
            .servers
            .write()
            .await
            .remove(&id)
            .ok_or(ServerError::UnknownServer(id))?;

        let disconnected = server.stop().await;
        info!(server = %id, disconnected, "Server stopped");
        self.listeners.dispatch(&ServerEvent::ServerStopped { server: id });
        Ok(())
    }

    /// Stop every running server
    pub async fn stop_all(&self) {
        let ids: Vec<ServerId> = self.servers.read().await.keys().copied().collect();
        for id in ids {
            // Concurrent stops may have removed it already
            let _ = self.stop_server(id).await;
        }
    }

    pub async fn server(&self, id: ServerId) -> Option<Arc<Server>> {
        self.servers.read().await.get(&id).cloned()
    }

    pub async fn running(&self) -> Vec<ServerId> {
        self.servers.read().await.keys().copied().collect()
    }

    pub fn subscribe(&self, listener: Listener) -> ListenerHandle {
        self.listeners
            .subscribe(&[EventKind::ServerStarted, EventKind::ServerStopped], listener)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.listeners.unsubscribe(handle)
    }

    pub fn version(&self) -> &'static VersionInfo {
        version::version()
    }
}
