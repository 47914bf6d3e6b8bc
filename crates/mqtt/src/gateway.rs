//! Cloud IoT gateway topic scheme.
//!
//! A gateway holds the only MQTT connection; traffic for each bound device is
//! relayed over it after the gateway publishes an `attach` message for that
//! device. Topics:
//!
//! | Topic                        | Direction | QoS |
//! |------------------------------|-----------|-----|
//! | `/devices/{id}/attach`       | out       | 1   |
//! | `/devices/{id}/detach`       | out       | 1   |
//! | `/devices/{id}/config`       | in        | 1   |
//! | `/devices/{id}/commands/#`   | in        | 0   |
//! | `/devices/{gateway}/errors`  | in        | 0   |
//! | `/devices/{id}/state`        | out       | 1   |
//! | `/devices/{id}/events`       | out       | 1   |

use rumqttc::QoS;
use serde::Serialize;
use tracing::info;

use super::{error::TransferError, manager::MqttInstance};

/// Fully qualified name of a gateway inside a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayIdentity {
    project_id: String,
    cloud_region: String,
    registry_id: String,
    gateway_id: String,
}

impl GatewayIdentity {
    pub fn new(
        project_id: impl Into<String>,
        cloud_region: impl Into<String>,
        registry_id: impl Into<String>,
        gateway_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cloud_region: cloud_region.into(),
            registry_id: registry_id.into(),
            gateway_id: gateway_id.into(),
        }
    }

    /// MQTT client id the bridge expects for this gateway.
    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.cloud_region, self.registry_id, self.gateway_id
        )
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }
}

pub fn attach_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/attach")
}

pub fn detach_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/detach")
}

pub fn config_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/config")
}

pub fn commands_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/commands/#")
}

pub fn errors_topic(gateway_id: &str) -> String {
    format!("/devices/{gateway_id}/errors")
}

pub fn state_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/state")
}

pub fn events_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/events")
}

#[derive(Serialize)]
struct AttachPayload<'a> {
    authorization: &'a str,
}

/// Gateway operations over a running instance.
pub struct GatewayLink<'a> {
    instance: &'a MqttInstance,
    gateway_id: String,
}

impl<'a> GatewayLink<'a> {
    pub fn new(instance: &'a MqttInstance, gateway_id: impl Into<String>) -> Self {
        Self {
            instance,
            gateway_id: gateway_id.into(),
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Subscribes to the gateway's own config, commands and errors topics.
    pub async fn subscribe_gateway(&self) -> Result<(), TransferError> {
        self.instance
            .subscribe(&config_topic(&self.gateway_id), QoS::AtLeastOnce)
            .await?;
        self.instance
            .subscribe(&commands_topic(&self.gateway_id), QoS::AtMostOnce)
            .await?;
        self.instance
            .subscribe(&errors_topic(&self.gateway_id), QoS::AtMostOnce)
            .await
    }

    /// Announces that the gateway now relays for `device_id`.
    ///
    /// Bound devices without their own credentials attach with an empty
    /// authorization token.
    pub async fn attach(&self, device_id: &str) -> Result<(), TransferError> {
        let payload = serde_json::to_vec(&AttachPayload { authorization: "" })?;
        self.instance
            .publish(&attach_topic(device_id), QoS::AtLeastOnce, false, payload)
            .await?;
        info!(gateway = %self.gateway_id, device = %device_id, "Attach queued");
        Ok(())
    }

    /// Subscribes to the config and commands topics of an attached device.
    pub async fn subscribe_device(&self, device_id: &str) -> Result<(), TransferError> {
        self.instance
            .subscribe(&config_topic(device_id), QoS::AtLeastOnce)
            .await?;
        self.instance
            .subscribe(&commands_topic(device_id), QoS::AtMostOnce)
            .await
    }

    pub async fn publish_state(&self, device_id: &str, payload: Vec<u8>) -> Result<(), TransferError> {
        self.instance
            .publish(&state_topic(device_id), QoS::AtLeastOnce, false, payload)
            .await
    }

    pub async fn publish_event(&self, device_id: &str, payload: Vec<u8>) -> Result<(), TransferError> {
        self.instance
            .publish(&events_topic(device_id), QoS::AtLeastOnce, false, payload)
            .await
    }

    pub async fn detach(&self, device_id: &str) -> Result<(), TransferError> {
        self.instance
            .publish(&detach_topic(device_id), QoS::AtLeastOnce, false, Vec::new())
            .await?;
        info!(gateway = %self.gateway_id, device = %device_id, "Detach queued");
        Ok(())
    }
}
