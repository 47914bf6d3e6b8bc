//! Top-level entry point: builds the client, spawns the kernel, hands back an
//! [`MqttInstance`] for subscribing, publishing and shutting down.
//!
//! ```ignore
//! let instance = MqttManager::new(config, identity.client_id(), credentials)
//!     .build_and_start(Some(handler))?;
//! instance.wait_connected(Duration::from_secs(30)).await?;
//! instance.subscribe("/devices/dev-1/config", QoS::AtLeastOnce).await?;
//! // ...
//! instance.shutdown().await?;
//! ```
//!
//! Subscriptions made through the instance are remembered and replayed each
//! time the kernel reconnects, since the bridge only supports clean sessions.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use rumqttc::{AsyncClient, QoS};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backoff::Backoff, client::ClientBuilder, config::Config, connection::ConnectionKernel,
    credentials::CredentialProvider, error::TransferError, handler::MessageHandler,
    state::ConnectionState,
};

pub struct MqttManager {
    config: Config,
    client_id: String,
    credentials: Arc<dyn CredentialProvider>,
    cancel_token: CancellationToken,
}

impl MqttManager {
    /// Creates a manager; nothing connects until [`build_and_start`](Self::build_and_start).
    ///
    /// # Arguments
    ///
    /// * `config` - Bridge connection settings.
    /// * `client_id` - MQTT client id; for a gateway, its full device path.
    /// * `credentials` - Source of the CONNECT username and password.
    pub fn new(
        config: Config,
        client_id: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            client_id: client_id.into(),
            credentials,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops the kernel once the instance exists.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Builds the client and spawns the connection kernel on the current runtime.
    ///
    /// Connecting happens in the background; use
    /// [`MqttInstance::wait_connected`] to wait for the first CONNACK.
    ///
    /// # Arguments
    ///
    /// * `handler` - Receives every inbound PUBLISH, in arrival order. An
    ///   error from it stops the kernel.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ConfigError` if the config fails validation,
    /// `TransferError::Credentials` if no password can be resolved, and
    /// `TransferError::ClientSetup` or `TransferError::Io` if the TLS files
    /// cannot be loaded.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build_and_start(
        self,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<MqttInstance, TransferError> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.client_id,
            "Building MQTT client"
        );

        let (client, event_loop) =
            ClientBuilder::from_config(&self.config, self.client_id, self.credentials.as_ref())?
                .build()?;

        let backoff = Backoff::from_policy(
            self.config.reconnect_delay,
            self.config.max_reconnect_delay,
            self.config.reconnect_multiplier,
            self.config.max_reconnect_attempts,
        );
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            backoff,
            handler,
            self.cancel_token.clone(),
        );
        let state_rx = kernel.subscribe_state();

        let kernel = tokio::spawn(async move {
            let result = kernel.run().await;
            if let Err(e) = &result {
                error!(error = %e, "MQTT connection kernel exited with error");
            }
            result
        });

        let subscriptions = Arc::new(Mutex::new(BTreeMap::new()));
        tokio::spawn(resubscribe_on_reconnect(
            client.clone(),
            state_rx.clone(),
            subscriptions.clone(),
        ));

        Ok(MqttInstance {
            client,
            state_rx,
            cancel_token: self.cancel_token,
            kernel,
            subscriptions,
            connect_timeout: Duration::from_secs(self.config.connection_timeout),
        })
    }
}

/// Replays recorded subscriptions on every CONNACK after the first.
async fn resubscribe_on_reconnect(
    client: AsyncClient,
    mut state_rx: watch::Receiver<ConnectionState>,
    subscriptions: Arc<Mutex<BTreeMap<String, QoS>>>,
) {
    let mut connected_before = false;
    while state_rx.changed().await.is_ok() {
        let connected = state_rx.borrow_and_update().is_connected();
        if !connected {
            continue;
        }
        if connected_before {
            let topics = subscriptions.lock().await.clone();
            for (topic, qos) in topics {
                match client.subscribe(topic.as_str(), qos).await {
                    Ok(()) => debug!(topic = %topic, "Resubscribed after reconnect"),
                    Err(e) => warn!(topic = %topic, error = %e, "Resubscribe failed"),
                }
            }
        }
        connected_before = true;
    }
}

/// A running bridge connection.
pub struct MqttInstance {
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    cancel_token: CancellationToken,
    kernel: JoinHandle<Result<(), TransferError>>,
    subscriptions: Arc<Mutex<BTreeMap<String, QoS>>>,
    connect_timeout: Duration,
}

impl MqttInstance {
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// `connection_timeout` from the transport config.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Waits for the kernel to report `Connected`.
    ///
    /// Fails with `ConnectTimeout` if that takes longer than `timeout`, or
    /// with `KernelStopped` if the kernel gives up first.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransferError> {
        let mut state_rx = self.state_rx.clone();
        let connected = async { state_rx.wait_for(|s| s.is_connected()).await.map(|_| ()) };
        let outcome = tokio::time::timeout(timeout, connected).await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransferError::KernelStopped(self.state().to_string())),
            Err(_) => Err(TransferError::ConnectTimeout(timeout)),
        }
    }

    /// Resolves once the kernel task has ended, for any reason.
    pub async fn closed(&self) {
        let mut state_rx = self.state_rx.clone();
        while state_rx.changed().await.is_ok() {}
    }

    pub fn is_running(&self) -> bool {
        !self.kernel.is_finished()
    }

    /// Subscribes now and again after every reconnect.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransferError> {
        self.subscriptions.lock().await.insert(topic.to_string(), qos);
        self.client.subscribe(topic, qos).await?;
        info!(topic = %topic, ?qos, "Subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransferError> {
        self.subscriptions.lock().await.remove(topic);
        self.client.unsubscribe(topic).await?;
        info!(topic = %topic, "Unsubscribed");
        Ok(())
    }

    /// Queues a PUBLISH; delivery happens on the kernel task.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransferError> {
        self.client.publish(topic, qos, retain, payload).await?;
        debug!(topic = %topic, ?qos, "Publish queued");
        Ok(())
    }

    /// Stops the kernel and returns how it ended.
    ///
    /// If the kernel had already stopped on an error (e.g. the message
    /// handler failed), that error is returned here.
    pub async fn shutdown(self) -> Result<(), TransferError> {
        self.cancel_token.cancel();
        match self.kernel.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::KernelStopped(format!("kernel task failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{credentials::StaticCredentials, handler::IncomingMessage};

    fn unreachable_config(max_attempts: u32) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 1,
            tls: None,
            reconnect_delay: 1,
            max_reconnect_attempts: max_attempts,
            ..Default::default()
        }
    }

    fn manager(config: Config) -> MqttManager {
        MqttManager::new(
            config,
            "projects/p/locations/r/registries/reg/devices/gw",
            Arc::new(StaticCredentials::new("unused", "jwt")),
        )
    }

    #[tokio::test]
    async fn test_build_fails_without_password() {
        let manager = MqttManager::new(
            unreachable_config(1),
            "gw",
            Arc::new(StaticCredentials::new("unused", "")),
        );
        assert!(matches!(
            manager.build_and_start(None),
            Err(TransferError::Credentials(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_connect_is_clean() {
        let handler = |_: &IncomingMessage| -> Result<(), crate::HandlerError> { Ok(()) };
        let instance = manager(unreachable_config(0))
            .build_and_start(Some(Arc::new(handler)))
            .unwrap();
        assert!(!instance.state().is_connected());

        let result = tokio::time::timeout(Duration::from_secs(10), instance.shutdown())
            .await
            .expect("shutdown hung");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_connected_reports_stopped_kernel() {
        let instance = manager(unreachable_config(1)).build_and_start(None).unwrap();

        let err = instance
            .wait_connected(Duration::from_secs(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::KernelStopped(_)));

        tokio::time::timeout(Duration::from_secs(5), instance.closed())
            .await
            .expect("closed() did not resolve");
        assert!(matches!(
            instance.shutdown().await,
            Err(TransferError::RetriesPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_replay() {
        let instance = manager(unreachable_config(0)).build_and_start(None).unwrap();

        instance
            .subscribe("/devices/dev/config", QoS::AtLeastOnce)
            .await
            .unwrap();
        instance
            .subscribe("/devices/dev/commands/#", QoS::AtMostOnce)
            .await
            .unwrap();
        instance.unsubscribe("/devices/dev/config").await.unwrap();

        let remembered: Vec<String> = instance.subscriptions.lock().await.keys().cloned().collect();
        assert_eq!(remembered, vec!["/devices/dev/commands/#".to_string()]);
        instance.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_connected_times_out() {
        let instance = manager(unreachable_config(0)).build_and_start(None).unwrap();
        let err = instance
            .wait_connected(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ConnectTimeout(_)));
        instance.shutdown().await.unwrap();
    }
}
