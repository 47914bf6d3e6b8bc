//! Construction of the `rumqttc` client pair for the bridge.
//!
//! `ClientBuilder` turns a validated [`Config`], a client id and a
//! [`CredentialProvider`] into an `AsyncClient` and its `EventLoop`. The two
//! must be used together: the client queues requests, the event loop (driven
//! by the [`ConnectionKernel`](crate::ConnectionKernel)) moves them over the
//! wire.
//!
//! ```ignore
//! let credentials = StaticCredentials::from_config(&config.credentials)?;
//! let (client, event_loop) =
//!     ClientBuilder::from_config(&config, identity.client_id(), &credentials)?.build()?;
//! ```

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use tracing::debug;
use validator::Validate;

use super::{
    config::{Config, TlsConfig},
    credentials::CredentialProvider,
    error::TransferError,
};

/// Accumulates options until [`build`](Self::build) is called.
pub struct ClientBuilder {
    opts: MqttOptions,
    /// Request channel capacity between the client and the event loop.
    cap: usize,
    tls_config: Option<TlsConfig>,
}

impl ClientBuilder {
    /// Plain TCP builder with `rumqttc` defaults.
    ///
    /// An empty `client_id` is replaced by a random UUID.
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(resolve_client_id(client_id.into()), host, port),
            cap,
            tls_config: None,
        }
    }

    /// Builder configured from the `[transport]` table.
    ///
    /// Validates `config` and resolves the password from `credentials`, so a
    /// missing token is reported here rather than as a refused CONNECT.
    pub fn from_config(
        config: &Config,
        client_id: impl Into<String>,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self, TransferError> {
        config.validate()?;

        let mut opts = MqttOptions::new(
            resolve_client_id(client_id.into()),
            config.host.clone(),
            config.port,
        );
        opts.set_keep_alive(Duration::from_secs(config.keep_alive));
        opts.set_clean_session(config.clean_session);
        opts.set_inflight(config.max_inflight);
        if let Some(max_packet_size) = config.max_packet_size {
            opts.set_max_packet_size(max_packet_size as usize, max_packet_size as usize);
        }
        opts.set_credentials(credentials.username(), credentials.password()?);

        Ok(Self {
            opts,
            cap: config.request_channel_capacity.unwrap_or(10) as usize,
            tls_config: config.effective_tls().cloned(),
        })
    }

    pub fn with_tls_ca_only(mut self, ca_cert_path: impl Into<String>) -> Self {
        self.tls_config = Some(TlsConfig::with_ca_only(ca_cert_path));
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn client_id(&self) -> String {
        self.opts.client_id()
    }

    fn build_transport(tls_config: &TlsConfig) -> Result<Transport, TransferError> {
        tls_config
            .validate_files()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        // validate_files guarantees the CA path is present
        let ca_path = tls_config.ca_cert_path.as_deref().unwrap_or_default();
        let ca = fs::read(ca_path)?;

        let client_auth = match (&tls_config.client_cert_path, &tls_config.client_key_path) {
            (Some(cert), Some(key)) => Some((fs::read(cert)?, fs::read(key)?)),
            _ => None,
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            client_auth,
            alpn: None,
        }))
    }

    /// Loads TLS material (if configured) and creates the client pair.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;
        if let Some(tls_config) = &self.tls_config {
            opts.set_transport(Self::build_transport(tls_config)?);
        }
        debug!(
            client_id = %opts.client_id(),
            tls = self.tls_config.is_some(),
            "MQTT client options assembled"
        );

        Ok(AsyncClient::new(opts, self.cap))
    }
}

fn resolve_client_id(client_id: String) -> String {
    if client_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        client_id
    }
}
