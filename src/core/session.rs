//! Demonstration session: provision, listen, publish, tear down.
//!
//! ```text
//! Idle ─> Provisioning ─> AwaitingOperator ─> Listening ─> Publishing
//!                                                              │
//!           Completed <─ TearingDown <─ AwaitingOperator <─────┘
//!
//! any step ──(error)──> TearingDown (best effort) ─> Aborted(reason)
//! ```
//!
//! The first failing step ends the session. Whatever was provisioned up to
//! that point is then removed best-effort: rollback failures are logged and
//! the original error is returned.

use std::{fmt, fs, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    checkpoint::{Checkpoint, CheckpointError, Prompt},
    registry::{GatewayCredential, RegistryClient, RegistryError, RegistryPath},
    sink::MessageSink,
    transport::{GatewayTransport, TransportError},
};
use crate::config::session::SessionConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Provisioning,
    AwaitingOperator,
    Listening,
    Publishing,
    TearingDown,
    Completed,
    Aborted(String),
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Provisioning => "Provisioning",
            SessionState::AwaitingOperator => "AwaitingOperator",
            SessionState::Listening => "Listening",
            SessionState::Publishing => "Publishing",
            SessionState::TearingDown => "TearingDown",
            SessionState::Completed => "Completed",
            SessionState::Aborted(_) => "Aborted",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Aborted(reason) => write!(f, "Aborted ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to read gateway certificate '{path}': {source}")]
    Certificate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Session cancelled")]
    Cancelled,
}

/// Everything the session delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn RegistryClient>,
    pub transport: Arc<dyn GatewayTransport>,
    pub sink: Arc<dyn MessageSink>,
    pub checkpoint: Arc<dyn Checkpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub registry: String,
    pub messages_recorded: usize,
    pub messages_published: usize,
    pub elapsed: Duration,
}

/// Resources created so far, in creation order.
#[derive(Debug, Default)]
struct Provisioned {
    registry: bool,
    gateway: bool,
    device: bool,
    bound: bool,
}

pub struct Session<'a> {
    config: &'a SessionConfig,
    collaborators: Collaborators,
    path: RegistryPath,
    provisioned: Provisioned,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
}

impl<'a> Session<'a> {
    pub fn new(config: &'a SessionConfig, collaborators: Collaborators, cancel: CancellationToken) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            path: RegistryPath::new(&config.project_id, &config.cloud_region, &config.registry_id),
            config,
            collaborators,
            provisioned: Provisioned::default(),
            cancel,
            state_tx,
        }
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: SessionState) {
        info!(state = %state, "Session state changed");
        self.state_tx.send_replace(state);
    }

    fn ensure_not_cancelled(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    /// Runs every step; on failure, rolls back and returns the first error.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step: `SessionError::Certificate`
    /// if the gateway certificate cannot be read, `Registry`, `Transport` or
    /// `Checkpoint` from the collaborators, and `Cancelled` once the token
    /// fires. Rollback failures are logged, never returned.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        let started = tokio::time::Instant::now();
        match self.execute(started).await {
            Ok(report) => {
                self.set_state(SessionState::Completed);
                info!(
                    registry = %report.registry,
                    recorded = report.messages_recorded,
                    published = report.messages_published,
                    "Session completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Session step failed, rolling back");
                self.set_state(SessionState::TearingDown);
                self.rollback().await;
                self.set_state(SessionState::Aborted(e.to_string()));
                Err(e)
            }
        }
    }

    async fn execute(&mut self, started: tokio::time::Instant) -> Result<SessionReport, SessionError> {
        self.ensure_not_cancelled()?;
        self.set_state(SessionState::Provisioning);
        self.provision().await?;

        self.ensure_not_cancelled()?;
        self.set_state(SessionState::AwaitingOperator);
        self.checkpoint(Prompt::new(
            format!(
                "Listening for messages for {} seconds. Try setting configuration in:",
                self.config.listen_time
            ),
            self.config.registry_url(),
            "Press enter to continue",
        ))
        .await?;

        self.ensure_not_cancelled()?;
        self.set_state(SessionState::Listening);
        let messages_recorded = self
            .collaborators
            .transport
            .listen(
                &self.config.device_id,
                self.collaborators.sink.clone(),
                Duration::from_secs(self.config.listen_time),
                &self.cancel,
            )
            .await?;
        info!(recorded = messages_recorded, "Listening finished");

        self.ensure_not_cancelled()?;
        self.set_state(SessionState::Publishing);
        let payloads = (1..=self.config.num_messages)
            .map(|i| self.config.message_payload(i).into_bytes())
            .collect();
        let messages_published = self
            .collaborators
            .transport
            .publish_states(
                &self.config.device_id,
                payloads,
                Duration::from_millis(self.config.publish_interval_ms),
                &self.cancel,
            )
            .await?;
        info!(published = messages_published, "Publishing finished");

        self.ensure_not_cancelled()?;
        self.set_state(SessionState::AwaitingOperator);
        self.checkpoint(Prompt::new(
            "You can read the state messages for your device at this URL:",
            self.config.device_url(&self.config.device_id),
            "Press enter to continue after reading the messages",
        ))
        .await?;

        self.set_state(SessionState::TearingDown);
        self.teardown().await?;

        Ok(SessionReport {
            registry: self.path.to_string(),
            messages_recorded,
            messages_published,
            elapsed: started.elapsed(),
        })
    }

    async fn checkpoint(&self, prompt: Prompt) -> Result<(), SessionError> {
        self.collaborators
            .checkpoint
            .confirm(&prompt, &self.cancel)
            .await
            .map_err(|e| match e {
                CheckpointError::Cancelled => SessionError::Cancelled,
                other => other.into(),
            })
    }

    fn gateway_credential(&self) -> Result<GatewayCredential, SessionError> {
        let path = &self.config.gateway_certificate_path;
        let public_key_pem = fs::read_to_string(path).map_err(|source| SessionError::Certificate {
            path: path.clone(),
            source,
        })?;
        Ok(GatewayCredential {
            algorithm: self.config.algorithm,
            public_key_pem,
        })
    }

    async fn provision(&mut self) -> Result<(), SessionError> {
        let credential = self.gateway_credential()?;
        let registry = self.collaborators.registry.clone();
        let config = self.config;

        info!(registry = %self.path, "Creating registry");
        registry
            .create_registry(&self.path, &config.pubsub_topic())
            .await?;
        self.provisioned.registry = true;

        info!(gateway = %config.gateway_id, "Creating gateway");
        registry
            .create_gateway(&self.path, &config.gateway_id, &credential)
            .await?;
        self.provisioned.gateway = true;

        info!(device = %config.device_id, "Creating device to bind");
        registry.create_device(&self.path, &config.device_id).await?;
        self.provisioned.device = true;

        info!(device = %config.device_id, gateway = %config.gateway_id, "Binding device");
        registry
            .bind_device_to_gateway(&self.path, &config.device_id, &config.gateway_id)
            .await?;
        self.provisioned.bound = true;
        Ok(())
    }

    /// Removes provisioned resources in reverse order, stopping at the first error.
    async fn teardown(&mut self) -> Result<(), SessionError> {
        let registry = self.collaborators.registry.clone();
        let config = self.config;

        if self.provisioned.bound {
            registry
                .unbind_device_from_gateway(&self.path, &config.device_id, &config.gateway_id)
                .await?;
            self.provisioned.bound = false;
        }
        if self.provisioned.device {
            registry.delete_device(&self.path, &config.device_id).await?;
            self.provisioned.device = false;
        }
        if self.provisioned.gateway {
            registry.delete_device(&self.path, &config.gateway_id).await?;
            self.provisioned.gateway = false;
        }
        if self.provisioned.registry {
            registry.delete_registry(&self.path).await?;
            self.provisioned.registry = false;
        }
        Ok(())
    }

    /// Like `teardown`, but tries every step and only logs failures.
    async fn rollback(&mut self) {
        let registry = self.collaborators.registry.clone();
        let config = self.config;

        if self.provisioned.bound {
            match registry
                .unbind_device_from_gateway(&self.path, &config.device_id, &config.gateway_id)
                .await
            {
                Ok(()) => self.provisioned.bound = false,
                Err(e) => warn!(error = %e, "Rollback: failed to unbind device"),
            }
        }
        if self.provisioned.device {
            match registry.delete_device(&self.path, &config.device_id).await {
                Ok(()) => self.provisioned.device = false,
                Err(e) => warn!(error = %e, "Rollback: failed to delete device"),
            }
        }
        if self.provisioned.gateway {
            match registry.delete_device(&self.path, &config.gateway_id).await {
                Ok(()) => self.provisioned.gateway = false,
                Err(e) => warn!(error = %e, "Rollback: failed to delete gateway"),
            }
        }
        if self.provisioned.registry {
            match registry.delete_registry(&self.path).await {
                Ok(()) => self.provisioned.registry = false,
                Err(e) => warn!(error = %e, "Rollback: failed to delete registry"),
            }
        }
    }
}
