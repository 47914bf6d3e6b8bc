//! # gatelog-mqtt: gateway-side MQTT plumbing for Cloud IoT style bridges
//!
//! Thin, reconnecting wrapper around `rumqttc` used by the `gatelog` session.
//! The crate does not speak MQTT itself; it owns the pieces around the
//! protocol client that a gateway session needs:
//!
//! - **Client construction** from a validated [`Config`] (TLS, keep-alive,
//!   packet limits) with credentials supplied by a [`CredentialProvider`]
//! - **Connection kernel** driving the event loop, publishing
//!   [`ConnectionState`] transitions and backing off on transient failures
//! - **Inbound dispatch**: every PUBLISH received from the bridge is handed
//!   to a registered [`MessageHandler`]; a handler error stops the kernel
//! - **Gateway topics**: the attach/detach/config/commands/state topic scheme
//!   a gateway uses to relay traffic for bound devices
//!
//! # Example
//!
//! ```ignore
//! use std::{sync::Arc, time::Duration};
//! use gatelog_mqtt::{gateway::{GatewayIdentity, GatewayLink}, Config, MqttManager, StaticCredentials};
//!
//! let identity = GatewayIdentity::new("my-project", "europe-west1", "my-registry", "my-gateway");
//! let credentials = Arc::new(StaticCredentials::new("unused", token));
//! let instance = MqttManager::new(Config::default(), identity.client_id(), credentials)
//!     .build_and_start(None)?;
//! instance.wait_connected(Duration::from_secs(30)).await?;
//!
//! let link = GatewayLink::new(&instance, identity.gateway_id());
//! link.attach("my-device").await?;
//! link.publish_state("my-device", b"online".to_vec()).await?;
//! link.detach("my-device").await?;
//! instance.shutdown().await?;
//! ```
//!
//! # Connection lifecycle
//!
//! ```text
//! Connecting ──(CONNACK)──> Connected ──(network error)──> Disconnected
//!      ▲                                                        │
//!      └──────────── Reconnecting(secs) <──(backoff)────────────┘
//! ```
//!
//! Fatal errors (TLS failures, refused credentials, protocol violations)
//! skip the backoff and end the kernel with the error.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod manager;
pub mod state;

pub use config::{Config, TlsConfig};
pub use connection::ConnectionKernel;
pub use credentials::{CredentialProvider, CredentialsConfig, StaticCredentials};
pub use error::TransferError;
pub use handler::{HandlerError, IncomingMessage, MessageHandler};
pub use manager::{MqttInstance, MqttManager};
pub use state::ConnectionState;

/// Result type for fallible MQTT operations in this crate.
pub type Result<T> = std::result::Result<T, TransferError>;
