//! Gateway transport: how the session talks to devices through the bridge.
//!
//! [`GatewayTransport`] keeps the session independent of MQTT.
//! [`MqttGatewayTransport`] implements it with `gatelog-mqtt`: every step
//! opens its own gateway connection, attaches the bound device, does its
//! work, detaches and disconnects.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use gatelog_mqtt::{
    gateway::{GatewayIdentity, GatewayLink},
    Config as TransportConfig, CredentialProvider, HandlerError, IncomingMessage, MessageHandler,
    MqttInstance, MqttManager, TransferError,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sink::MessageSink;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] TransferError),

    #[error("Cancelled")]
    Cancelled,
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Records every message arriving for the gateway and `device_id` into
    /// `sink` for `duration`. Returns the number of messages recorded.
    async fn listen(
        &self,
        device_id: &str,
        sink: Arc<dyn MessageSink>,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError>;

    /// Publishes `payloads` as state messages of `device_id`, `interval`
    /// apart. Returns the number of messages published.
    async fn publish_states(
        &self,
        device_id: &str,
        payloads: Vec<Vec<u8>>,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError>;
}

/// Feeds inbound messages into a [`MessageSink`].
pub struct SinkHandler {
    sink: Arc<dyn MessageSink>,
    recorded: AtomicUsize,
}

impl SinkHandler {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            recorded: AtomicUsize::new(0),
        }
    }

    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::Acquire)
    }
}

impl MessageHandler for SinkHandler {
    fn on_message(&self, message: &IncomingMessage) -> Result<(), HandlerError> {
        self.sink.record(&message.topic, &message.payload)?;
        let total = self.recorded.fetch_add(1, Ordering::AcqRel) + 1;
        info!(topic = %message.topic, bytes = message.payload.len(), total, "Received message");
        Ok(())
    }
}

pub struct MqttGatewayTransport {
    config: TransportConfig,
    identity: GatewayIdentity,
    credentials: Arc<dyn CredentialProvider>,
}

impl MqttGatewayTransport {
    pub fn new(
        config: TransportConfig,
        identity: GatewayIdentity,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            identity,
            credentials,
        }
    }

    fn start(&self, handler: Option<Arc<dyn MessageHandler>>) -> Result<MqttInstance, TransferError> {
        MqttManager::new(
            self.config.clone(),
            self.identity.client_id(),
            self.credentials.clone(),
        )
        .build_and_start(handler)
    }

    async fn connect_and_attach<'a>(
        &self,
        instance: &'a MqttInstance,
        device_id: &str,
    ) -> Result<GatewayLink<'a>, TransportError> {
        instance.wait_connected(instance.connect_timeout()).await?;
        let link = GatewayLink::new(instance, self.identity.gateway_id());
        link.subscribe_gateway().await?;
        link.attach(device_id).await?;
        Ok(link)
    }

    async fn listen_on(
        &self,
        instance: &MqttInstance,
        device_id: &str,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let link = self.connect_and_attach(instance, device_id).await?;
        link.subscribe_device(device_id).await?;
        info!(device = %device_id, seconds = duration.as_secs(), "Listening for messages");

        let mut cancelled = false;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            // the kernel stopped; shutdown() reports why
            _ = instance.closed() => return Ok(()),
            _ = cancel.cancelled() => cancelled = true,
        }

        link.detach(device_id).await?;
        if cancelled {
            return Err(TransportError::Cancelled);
        }
        Ok(())
    }

    async fn publish_on(
        &self,
        instance: &MqttInstance,
        device_id: &str,
        payloads: Vec<Vec<u8>>,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        let link = self.connect_and_attach(instance, device_id).await?;

        let total = payloads.len();
        let mut published = 0;
        for (i, payload) in payloads.into_iter().enumerate() {
            debug!(device = %device_id, index = i + 1, total, "Publishing state");
            link.publish_state(device_id, payload).await?;
            published += 1;

            if i + 1 < total {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => {
                        link.detach(device_id).await?;
                        return Err(TransportError::Cancelled);
                    }
                }
            }
        }

        link.detach(device_id).await?;
        Ok(published)
    }
}

/// Keeps the step's own error; a shutdown error surfaces only when the step succeeded.
fn first_error<T>(step: Result<T, TransportError>, shutdown: Result<(), TransferError>) -> Result<T, TransportError> {
    match (step, shutdown) {
        (Err(e), Err(shutdown_err)) => {
            warn!(error = %shutdown_err, "Connection also failed during shutdown");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(shutdown_err)) => Err(shutdown_err.into()),
        (Ok(value), Ok(())) => Ok(value),
    }
}

#[async_trait]
impl GatewayTransport for MqttGatewayTransport {
    async fn listen(
        &self,
        device_id: &str,
        sink: Arc<dyn MessageSink>,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        let handler = Arc::new(SinkHandler::new(sink));
        let dispatch: Arc<dyn MessageHandler> = handler.clone();
        let instance = self.start(Some(dispatch))?;

        let step = self.listen_on(&instance, device_id, duration, cancel).await;
        first_error(step, instance.shutdown().await)?;

        Ok(handler.recorded())
    }

    async fn publish_states(
        &self,
        device_id: &str,
        payloads: Vec<Vec<u8>>,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        let instance = self.start(None)?;
        let step = self
            .publish_on(&instance, device_id, payloads, interval, cancel)
            .await;
        first_error(step, instance.shutdown().await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::sink::{MemorySink, SinkError};

    struct FailingSink {
        calls: Mutex<usize>,
    }

    impl MessageSink for FailingSink {
        fn record(&self, _topic: &str, _payload: &[u8]) -> Result<(), SinkError> {
            *self.calls.lock().unwrap() += 1;
            Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    #[test]
    fn test_sink_handler_records_and_counts() {
        let sink = Arc::new(MemorySink::new());
        let handler = SinkHandler::new(sink.clone());

        handler
            .on_message(&IncomingMessage::new("/devices/dev/config", "cfg-1"))
            .unwrap();
        handler
            .on_message(&IncomingMessage::new("/devices/dev/config", "cfg-1"))
            .unwrap();

        assert_eq!(handler.recorded(), 2);
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].topic(), "/devices/dev/config");
        assert_eq!(records[1].payload(), b"cfg-1");
    }

    #[test]
    fn test_sink_handler_propagates_sink_errors() {
        let sink = Arc::new(FailingSink {
            calls: Mutex::new(0),
        });
        let handler = SinkHandler::new(sink.clone());

        let err = handler
            .on_message(&IncomingMessage::new("t", "x"))
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(handler.recorded(), 0);
        assert_eq!(*sink.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_first_error_prefers_step_error() {
        let step: Result<usize, TransportError> = Err(TransportError::Cancelled);
        let shutdown = Err(TransferError::KernelStopped("x".into()));
        assert!(matches!(first_error(step, shutdown), Err(TransportError::Cancelled)));

        let shutdown = Err(TransferError::Handler {
            topic: "t".into(),
            reason: "disk full".into(),
        });
        assert!(matches!(
            first_error(Ok(3usize), shutdown),
            Err(TransportError::Mqtt(TransferError::Handler { .. }))
        ));
        assert_eq!(first_error(Ok(3usize), Ok(())).unwrap(), 3);
    }
}
