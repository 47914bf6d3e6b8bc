//! Device registry collaborator.
//!
//! [`RegistryClient`] is the narrow surface the session needs from a cloud
//! IoT registry: create and delete a registry, a gateway and a device, and
//! bind or unbind the device to the gateway. [`InMemoryRegistry`] enforces
//! the same lifecycle rules as the cloud service and backs the binary and
//! the tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Signature algorithm of a gateway's public key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[default]
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "ES256")]
    Es256,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rs256 => "RS256",
            KeyAlgorithm::Es256 => "ES256",
        }
    }

    /// Key format name for an X.509 certificate with this algorithm.
    pub fn certificate_format(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rs256 => "RSA_X509_PEM",
            KeyAlgorithm::Es256 => "ES256_X509_PEM",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public key material registered for a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCredential {
    pub algorithm: KeyAlgorithm,
    pub public_key_pem: String,
}

/// Project and region a registry lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPath {
    pub project_id: String,
    pub cloud_region: String,
    pub registry_id: String,
}

impl RegistryPath {
    pub fn new(
        project_id: impl Into<String>,
        cloud_region: impl Into<String>,
        registry_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cloud_region: cloud_region.into(),
            registry_id: registry_id.into(),
        }
    }
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/registries/{}",
            self.project_id, self.cloud_region, self.registry_id
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry already exists: {0}")]
    RegistryExists(String),

    #[error("Registry not found: {0}")]
    RegistryNotFound(String),

    #[error("Registry {0} still has devices")]
    RegistryNotEmpty(String),

    #[error("Device already exists: {0}")]
    DeviceExists(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("{0} is not a gateway")]
    NotAGateway(String),

    #[error("Device {device} is not bound to gateway {gateway}")]
    NotBound { device: String, gateway: String },

    #[error("Device {0} is still bound to a gateway")]
    StillBound(String),

    #[error("Registry request failed: {0}")]
    Request(String),
}

/// Lifecycle operations on a cloud device registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn create_registry(&self, path: &RegistryPath, pubsub_topic: &str) -> Result<(), RegistryError>;

    async fn create_gateway(
        &self,
        path: &RegistryPath,
        gateway_id: &str,
        credential: &GatewayCredential,
    ) -> Result<(), RegistryError>;

    /// Creates a device without credentials of its own.
    async fn create_device(&self, path: &RegistryPath, device_id: &str) -> Result<(), RegistryError>;

    async fn bind_device_to_gateway(
        &self,
        path: &RegistryPath,
        device_id: &str,
        gateway_id: &str,
    ) -> Result<(), RegistryError>;

    async fn unbind_device_from_gateway(
        &self,
        path: &RegistryPath,
        device_id: &str,
        gateway_id: &str,
    ) -> Result<(), RegistryError>;

    /// Deletes a device or a gateway.
    async fn delete_device(&self, path: &RegistryPath, device_id: &str) -> Result<(), RegistryError>;

    async fn delete_registry(&self, path: &RegistryPath) -> Result<(), RegistryError>;
}

#[derive(Debug, Default)]
struct DeviceEntry {
    gateway_credential: Option<GatewayCredential>,
    /// For devices: gateways they are bound to. For gateways: bound devices.
    bindings: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct RegistryEntry {
    pubsub_topic: String,
    devices: BTreeMap<String, DeviceEntry>,
}

/// Registry held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    registries: Mutex<BTreeMap<String, RegistryEntry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn registry_exists(&self, path: &RegistryPath) -> bool {
        self.registries.lock().await.contains_key(&path.to_string())
    }

    pub async fn device_ids(&self, path: &RegistryPath) -> Vec<String> {
        self.registries
            .lock()
            .await
            .get(&path.to_string())
            .map(|r| r.devices.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_bound(&self, path: &RegistryPath, device_id: &str, gateway_id: &str) -> bool {
        self.registries
            .lock()
            .await
            .get(&path.to_string())
            .and_then(|r| r.devices.get(device_id))
            .is_some_and(|d| d.bindings.contains(gateway_id))
    }

    pub async fn pubsub_topic(&self, path: &RegistryPath) -> Option<String> {
        self.registries
            .lock()
            .await
            .get(&path.to_string())
            .map(|r| r.pubsub_topic.clone())
    }
}

fn registry_mut<'a>(
    registries: &'a mut BTreeMap<String, RegistryEntry>,
    path: &RegistryPath,
) -> Result<&'a mut RegistryEntry, RegistryError> {
    let key = path.to_string();
    registries
        .get_mut(&key)
        .ok_or(RegistryError::RegistryNotFound(key))
}

/// Checks that both ends of a binding exist and `gateway_id` is a gateway.
fn check_binding_ends(
    registry: &RegistryEntry,
    device_id: &str,
    gateway_id: &str,
) -> Result<(), RegistryError> {
    if !registry.devices.contains_key(device_id) {
        return Err(RegistryError::DeviceNotFound(device_id.to_string()));
    }
    match registry.devices.get(gateway_id) {
        None => Err(RegistryError::DeviceNotFound(gateway_id.to_string())),
        Some(gateway) if gateway.gateway_credential.is_none() => {
            Err(RegistryError::NotAGateway(gateway_id.to_string()))
        }
        Some(_) => Ok(()),
    }
}

fn set_binding(registry: &mut RegistryEntry, a: &str, b: &str, bound: bool) {
    if let Some(entry) = registry.devices.get_mut(a) {
        if bound {
            entry.bindings.insert(b.to_string());
        } else {
            entry.bindings.remove(b);
        }
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn create_registry(&self, path: &RegistryPath, pubsub_topic: &str) -> Result<(), RegistryError> {
        let mut registries = self.registries.lock().await;
        let key = path.to_string();
        if registries.contains_key(&key) {
            return Err(RegistryError::RegistryExists(key));
        }
        registries.insert(
            key,
            RegistryEntry {
                pubsub_topic: pubsub_topic.to_string(),
                devices: BTreeMap::new(),
            },
        );
        info!(registry = %path, topic = %pubsub_topic, "Registry created");
        Ok(())
    }

    async fn create_gateway(
        &self,
        path: &RegistryPath,
        gateway_id: &str,
        credential: &GatewayCredential,
    ) -> Result<(), RegistryError> {
        let mut registries = self.registries.lock().await;
        let registry = registry_mut(&mut registries, path)?;
        if registry.devices.contains_key(gateway_id) {
            return Err(RegistryError::DeviceExists(gateway_id.to_string()));
        }
        registry.devices.insert(
            gateway_id.to_string(),
            DeviceEntry {
                gateway_credential: Some(credential.clone()),
                bindings: BTreeSet::new(),
            },
        );
        info!(registry = %path, gateway = %gateway_id, algorithm = %credential.algorithm, "Gateway created");
        Ok(())
    }

    async fn create_device(&self, path: &RegistryPath, device_id: &str) -> Result<(), RegistryError> {
        let mut registries = self.registries.lock().await;
        let registry = registry_mut(&mut registries, path)?;
        if registry.devices.contains_key(device_id) {
            return Err(RegistryError::DeviceExists(device_id.to_string()));
        }
        registry
            .devices
            .insert(device_id.to_string(), DeviceEntry::default());
        info!(registry = %path, device = %device_id, "Device created");
        Ok(())
    }

    async fn bind_device_to_gateway(
        &self,
        path: &RegistryPath,
        device_id: &str,
        gateway_id: &str,
    ) -> Result<(), RegistryError> {
        let mut registries = self.registries.lock().await;
        let registry = registry_mut(&mut registries, path)?;
        check_binding_ends(registry, device_id, gateway_id)?;

        set_binding(registry, device_id, gateway_id, true);
        set_binding(registry, gateway_id, device_id, true);
        info!(device = %device_id, gateway = %gateway_id, "Device bound to gateway");
        Ok(())
    }

    async fn unbind_device_from_gateway(
        &self,
        path: &RegistryPath,
        device_id: &str,
        gateway_id: &str,
    ) -> Result<(), RegistryError> {
        let mut registries = self.registries.lock().await;
        let registry = registry_mut(&mut registries, path)?;
        check_binding_ends(registry, device_id, gateway_id)?;

        let bound = registry
            .devices
            .get(device_id)
            .is_some_and(|d| d.bindings.contains(gateway_id));
        if !bound {
            return Err(RegistryError::NotBound {
                device: device_id.to_string(),
                gateway: gateway_id.to_string(),
            });
        }

        set_binding(registry, device_id, gateway_id, false);
        set_binding(registry, gateway_id, device_id, false);
        info!(device = %device_id, gateway = %gateway_id, "Device unbound from gateway");
        Ok(())
    }

    async fn delete_device(&self, path: &RegistryPath, device_id: &str) -> Result<(), RegistryError> {
        let mut registries = self.registries.lock().await;
        let registry = registry_mut(&mut registries, path)?;
        let entry = registry
            .devices
            .get(device_id)
            .ok_or_else(|| RegistryError::DeviceNotFound(device_id.to_string()))?;
        if !entry.bindings.is_empty() {
            return Err(RegistryError::StillBound(device_id.to_string()));
        }
        registry.devices.remove(device_id);
        info!(registry = %path, device = %device_id, "Device deleted");
        Ok(())
    }

    async fn delete_registry(&self, path: &RegistryPath) -> Result<(), RegistryError> {
        let mut registries = self.registries.lock().await;
        let registry = registry_mut(&mut registries, path)?;
        if !registry.devices.is_empty() {
            debug!(devices = ?registry.devices.keys().collect::<Vec<_>>(), "Registry not empty");
            return Err(RegistryError::RegistryNotEmpty(path.to_string()));
        }
        registries.remove(&path.to_string());
        info!(registry = %path, "Registry deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> RegistryPath {
        RegistryPath::new("proj", "europe-west1", "reg-1")
    }

    fn credential() -> GatewayCredential {
        GatewayCredential {
            algorithm: KeyAlgorithm::Rs256,
            public_key_pem: "-----BEGIN CERTIFICATE-----".into(),
        }
    }

    async fn provisioned() -> InMemoryRegistry {
        let registry = InMemoryRegistry::new();
        registry.create_registry(&path(), "projects/proj/topics/t").await.unwrap();
        registry.create_gateway(&path(), "gw", &credential()).await.unwrap();
        registry.create_device(&path(), "dev").await.unwrap();
        registry
    }

    #[test]
    fn test_registry_path_display() {
        assert_eq!(
            path().to_string(),
            "projects/proj/locations/europe-west1/registries/reg-1"
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let registry = provisioned().await;
        registry.bind_device_to_gateway(&path(), "dev", "gw").await.unwrap();
        assert!(registry.is_bound(&path(), "dev", "gw").await);

        registry.unbind_device_from_gateway(&path(), "dev", "gw").await.unwrap();
        registry.delete_device(&path(), "dev").await.unwrap();
        registry.delete_device(&path(), "gw").await.unwrap();
        registry.delete_registry(&path()).await.unwrap();
        assert!(!registry.registry_exists(&path()).await);
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let registry = provisioned().await;
        assert!(matches!(
            registry.create_registry(&path(), "t").await,
            Err(RegistryError::RegistryExists(_))
        ));
        assert_eq!(
            registry.create_device(&path(), "dev").await,
            Err(RegistryError::DeviceExists("dev".into()))
        );
    }

    #[tokio::test]
    async fn test_binding_requires_gateway() {
        let registry = provisioned().await;
        registry.create_device(&path(), "other").await.unwrap();

        assert_eq!(
            registry.bind_device_to_gateway(&path(), "dev", "other").await,
            Err(RegistryError::NotAGateway("other".into()))
        );
        assert_eq!(
            registry.bind_device_to_gateway(&path(), "ghost", "gw").await,
            Err(RegistryError::DeviceNotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_bound_device_cannot_be_deleted() {
        let registry = provisioned().await;
        registry.bind_device_to_gateway(&path(), "dev", "gw").await.unwrap();

        assert_eq!(
            registry.delete_device(&path(), "dev").await,
            Err(RegistryError::StillBound("dev".into()))
        );
        assert_eq!(
            registry.delete_device(&path(), "gw").await,
            Err(RegistryError::StillBound("gw".into()))
        );
    }

    #[tokio::test]
    async fn test_non_empty_registry_cannot_be_deleted() {
        let registry = provisioned().await;
        assert!(matches!(
            registry.delete_registry(&path()).await,
            Err(RegistryError::RegistryNotEmpty(_))
        ));
    }

    #[tokio::test]
    async fn test_unbind_without_binding() {
        let registry = provisioned().await;
        assert!(matches!(
            registry.unbind_device_from_gateway(&path(), "dev", "gw").await,
            Err(RegistryError::NotBound { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_registry() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(
            registry.create_device(&path(), "dev").await,
            Err(RegistryError::RegistryNotFound(_))
        ));
        assert_eq!(registry.pubsub_topic(&path()).await, None);
    }
}
