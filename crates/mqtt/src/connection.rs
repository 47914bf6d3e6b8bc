//! Connection kernel: the task that drives the `rumqttc` event loop.
//!
//! ```text
//! session ──(AsyncClient requests)──> EventLoop <──poll── ConnectionKernel
//!                                                              │
//!                          MessageHandler <──(PUBLISH)─────────┤
//!                          watch<ConnectionState> <──(state)───┘
//! ```
//!
//! The kernel runs until one of:
//! - the cancellation token fires (DISCONNECT is sent, `Ok(())`)
//! - a fatal connection error occurs (TLS, refused credentials, protocol)
//! - the reconnect budget is spent
//! - the message handler returns an error
//!
//! Inbound messages are dispatched inline, one at a time, in arrival order.

use std::{sync::Arc, time::Duration};

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    backoff::Backoff,
    error::TransferError,
    handler::{IncomingMessage, MessageHandler},
    state::ConnectionState,
};

/// Upper bound for flushing DISCONNECT during shutdown.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    backoff: Backoff,
    handler: Option<Arc<dyn MessageHandler>>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        handler: Option<Arc<dyn MessageHandler>>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            backoff,
            handler,
            cancel,
            state_tx,
            state_rx,
        }
    }

    /// Receiver that always holds the latest [`ConnectionState`].
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            info!(state = %state, "Connection state changed");
        }
    }

    /// Drives the event loop until shutdown or an unrecoverable error.
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        self.backoff.reset();
        info!("Starting connection event loop");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting");
                    self.disconnect().await;
                    self.update_state(ConnectionState::Disconnected("shutdown".into()));
                    info!("Connection kernel stopped");
                    return Ok(());
                }

                event_result = self.event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            if let Err(e) = self.handle_event(event) {
                                error!(error = %e, "Stopping connection kernel");
                                self.disconnect().await;
                                self.update_state(ConnectionState::Disconnected(e.to_string()));
                                return Err(e);
                            }
                        }
                        Err(e) => self.on_connection_error(e).await?,
                    }
                }
            }
        }
    }

    /// Decides between giving up and sleeping before the next attempt.
    async fn on_connection_error(&mut self, e: ConnectionError) -> Result<(), TransferError> {
        if is_fatal_error(&e) {
            error!(error = %get_error_message(&e), "Fatal connection error");
            self.update_state(ConnectionState::Disconnected(e.to_string()));
            return Err(TransferError::from(e));
        }

        let sleep_duration = match self.backoff.next_sleep() {
            Ok(duration) => duration,
            Err(backoff_err) => {
                error!(error = %backoff_err, "Reconnect attempts exhausted");
                self.update_state(ConnectionState::Disconnected(backoff_err.to_string()));
                return Err(TransferError::RetriesPolicy(backoff_err));
            }
        };

        warn!(
            attempt = self.backoff.attempt(),
            "Reconnecting in {:.2} seconds due to error: {}",
            sleep_duration.as_secs_f64(),
            get_error_message(&e)
        );
        self.update_state(ConnectionState::Reconnecting(sleep_duration.as_secs_f64()));

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(sleep_duration) => {}
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<(), TransferError> {
        match event {
            Event::Incoming(Packet::ConnAck(conn_ack)) => {
                if conn_ack.code == ConnectReturnCode::Success {
                    info!(session_present = conn_ack.session_present, "Connection established");
                    self.update_state(ConnectionState::Connected);
                    self.backoff.reset();
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                trace!(topic = %publish.topic, bytes = publish.payload.len(), "Received publish");
                if let Some(handler) = &self.handler {
                    let message = IncomingMessage::from(&publish);
                    handler
                        .on_message(&message)
                        .map_err(|e| TransferError::Handler {
                            topic: message.topic.clone(),
                            reason: e.to_string(),
                        })?;
                }
            }
            Event::Incoming(Packet::SubAck(suback)) => {
                debug!(pkid = suback.pkid, codes = ?suback.return_codes, "Subscription acknowledged");
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.update_state(ConnectionState::Disconnected("Disconnected by broker".into()));
            }
            Event::Incoming(_) => {}
            Event::Outgoing(outgoing) => {
                trace!("Outgoing packet: {:?}", outgoing);
            }
        }
        Ok(())
    }

    /// Queues DISCONNECT and polls until it is written or the flush timeout passes.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "Error queueing disconnect packet");
            return;
        }

        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %get_error_message(&e), "Event loop closed during disconnect");
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await.is_err() {
            warn!("Timed out flushing disconnect packet");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // bad certificates or crypto setup
        ConnectionError::Tls(_) => Fatal,
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        // an expired or malformed JWT shows up here
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain, without surrounding quotes.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
