//! `[session]` table: what the demonstration session provisions and how long it runs.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::registry::KeyAlgorithm;

const CONSOLE_BASE_URL: &str = "https://console.cloud.google.com/iot/locations";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_jwt_window"))]
pub struct SessionConfig {
    #[validate(length(min = 1, message = "project_id is required"))]
    pub project_id: String,

    #[validate(length(min = 1, message = "cloud_region cannot be empty"))]
    pub cloud_region: String,

    /// Registry to create. Defaults to `test-registry-<unix secs>`.
    #[validate(length(min = 3, max = 64, message = "registry_id must be 3-64 characters"))]
    pub registry_id: String,

    /// Pub/Sub topic id for telemetry. Defaults to `test-device-events-topic-<unix secs>`.
    #[validate(length(min = 1, message = "pubsub_topic_id cannot be empty"))]
    pub pubsub_topic_id: String,

    #[validate(length(min = 3, max = 128, message = "gateway_id must be 3-128 characters"))]
    pub gateway_id: String,

    /// Device bound to the gateway; it has no credentials of its own.
    #[validate(length(min = 3, max = 128, message = "device_id must be 3-128 characters"))]
    pub device_id: String,

    /// PEM public key or certificate registered for the gateway.
    #[validate(length(min = 1, message = "gateway_certificate_path cannot be empty"))]
    pub gateway_certificate_path: String,

    pub algorithm: KeyAlgorithm,

    /// State messages published on behalf of the bound device.
    #[validate(range(min = 1, max = 1000, message = "num_messages must be between 1 and 1000"))]
    pub num_messages: u32,

    /// Seconds spent recording inbound messages.
    #[validate(range(min = 1, max = 3600, message = "listen_time must be between 1 and 3600 seconds"))]
    pub listen_time: u64,

    /// Lifetime of the bridge JWT; the listening window must fit inside it.
    #[validate(range(min = 1, max = 1440, message = "jwt_exp_minutes must be between 1 and 1440"))]
    pub jwt_exp_minutes: u64,

    /// Pause between published messages.
    #[validate(range(max = 60000, message = "publish_interval_ms must be at most 60000"))]
    pub publish_interval_ms: u64,

    /// Base text of each published message; `#<n>` is appended.
    pub payload: String,

    /// Wait for Enter at operator checkpoints instead of continuing.
    pub interactive: bool,
}

fn validate_jwt_window(config: &SessionConfig) -> Result<(), ValidationError> {
    if config.listen_time > config.jwt_exp_minutes.saturating_mul(60) {
        return Err(ValidationError::new("jwt_window").with_message(
            format!(
                "listen_time ({}s) exceeds the JWT lifetime ({} min)",
                config.listen_time, config.jwt_exp_minutes
            )
            .into(),
        ));
    }
    Ok(())
}

impl Default for SessionConfig {
    fn default() -> Self {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        SessionConfig {
            project_id: String::new(),
            cloud_region: "europe-west1".to_string(),
            registry_id: format!("test-registry-{now}"),
            pubsub_topic_id: format!("test-device-events-topic-{now}"),
            gateway_id: "test-device-RS256".to_string(),
            device_id: "test-device-noauthbind".to_string(),
            gateway_certificate_path: "resources/rsa_cert.pem".to_string(),
            algorithm: KeyAlgorithm::default(),
            num_messages: 15,
            listen_time: 30,
            jwt_exp_minutes: 20,
            publish_interval_ms: 1000,
            payload: "Hello from gatelog".to_string(),
            interactive: true,
        }
    }
}

impl SessionConfig {
    /// `projects/{project}/topics/{topic}`.
    pub fn pubsub_topic(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.pubsub_topic_id)
    }

    /// Console page where the operator can push device configuration.
    pub fn registry_url(&self) -> String {
        format!(
            "{CONSOLE_BASE_URL}/{}/registries/{}?project={}",
            self.cloud_region, self.registry_id, self.project_id
        )
    }

    /// Console page showing a device's state messages.
    pub fn device_url(&self, device_id: &str) -> String {
        format!(
            "{CONSOLE_BASE_URL}/{}/registries/{}/devices/{}?project={}",
            self.cloud_region, self.registry_id, device_id, self.project_id
        )
    }

    pub fn gateway_identity(&self) -> gatelog_mqtt::gateway::GatewayIdentity {
        gatelog_mqtt::gateway::GatewayIdentity::new(
            &self.project_id,
            &self.cloud_region,
            &self.registry_id,
            &self.gateway_id,
        )
    }

    /// Published payload number `index` (1-based).
    pub fn message_payload(&self, index: u32) -> String {
        format!("{} #{index}", self.payload)
    }
}
