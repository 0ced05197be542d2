//! Output resolution
//!
//! Reads the current infrastructure state and turns it into a typed,
//! read-only [`Outputs`] snapshot.

use crate::error::{InfraError, Result};
use crate::terraform::Terraform;
use async_trait::async_trait;
use fleetwire_core::{HostAddress, Outputs, Registry, RegistryCredentials, Sensitive};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source of the raw `terraform output -json` document
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn read(&self) -> Result<String>;
}

#[async_trait]
impl StateSource for Terraform {
    async fn read(&self) -> Result<String> {
        self.check_installed().await?;
        self.output_json().await
    }
}

#[async_trait]
impl<T: StateSource + ?Sized> StateSource for Arc<T> {
    async fn read(&self) -> Result<String> {
        (**self).read().await
    }
}

/// Fixed JSON document, used when the state is already at hand
pub struct StaticState(pub String);

#[async_trait]
impl StateSource for StaticState {
    async fn read(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// One entry of `terraform output -json`
#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: Value,
    #[serde(default)]
    sensitive: bool,
}

#[derive(Debug, Deserialize)]
struct VmEntry {
    #[serde(default)]
    public_ip: Option<String>,
    #[serde(default)]
    private_ip: Option<String>,
}

const CONNECTION_STRING_SUFFIX: &str = "_connection_string";
const VM_PUBLIC_SUFFIX: &str = "_vm_public_ip";
const VM_PRIVATE_SUFFIX: &str = "_vm_private_ip";

/// Keys consumed into dedicated fields instead of the generic value table
const RESERVED: [&str; 6] = [
    "resource_group_name",
    "acr_login_server",
    "acr_admin_username",
    "acr_admin_password",
    "aks_cluster_name",
    "virtual_machines",
];

/// Resolves [`Outputs`] from a [`StateSource`]
pub struct OutputResolver {
    source: Box<dyn StateSource>,
}

impl OutputResolver {
    pub fn new(source: impl StateSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Read the state and build the snapshot
    pub async fn resolve(&self) -> Result<Outputs> {
        let raw = self.source.read().await?;
        let outputs = parse_outputs(&raw)?;
        tracing::info!(
            resource_group = outputs.resource_group(),
            hosts = outputs.hosts().len(),
            cluster = outputs.cluster_name().unwrap_or("-"),
            "Resolved infrastructure outputs"
        );
        Ok(outputs)
    }
}

/// Parse a `terraform output -json` document
pub fn parse_outputs(raw: &str) -> Result<Outputs> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InfraError::InfrastructureNotProvisioned(
            "no outputs found".to_string(),
        ));
    }

    let entries: BTreeMap<String, OutputEntry> = serde_json::from_str(trimmed)?;
    if entries.is_empty() {
        return Err(InfraError::InfrastructureNotProvisioned(
            "no outputs found".to_string(),
        ));
    }

    let resource_group = entries
        .get("resource_group_name")
        .and_then(|e| e.value.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            InfraError::InfrastructureNotProvisioned("resource_group_name is missing".to_string())
        })?;

    let mut builder = Outputs::builder(resource_group);

    if let Some(login_server) = string_value(&entries, "acr_login_server") {
        let credentials = match (
            string_value(&entries, "acr_admin_username"),
            string_value(&entries, "acr_admin_password"),
        ) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                username: username.to_string(),
                password: Sensitive::new(password),
            }),
            _ => None,
        };
        builder = builder.registry(Registry {
            login_server: login_server.to_string(),
            credentials,
        });
    }

    if let Some(cluster) = string_value(&entries, "aks_cluster_name") {
        builder = builder.cluster(cluster);
    }

    if let Some(entry) = entries.get("virtual_machines") {
        let vms: BTreeMap<String, VmEntry> = serde_json::from_value(entry.value.clone())
            .map_err(|e| InfraError::InvalidOutput {
                key: "virtual_machines".to_string(),
                message: e.to_string(),
            })?;
        for (name, vm) in vms {
            match host_address(&name, vm.public_ip, vm.private_ip) {
                Some(host) => builder = builder.host(host),
                None => tracing::warn!("VM '{}' has no address, skipping", name),
            }
        }
    }

    // Flat form: <name>_vm_public_ip / <name>_vm_private_ip
    let mut flat: BTreeMap<&str, (Option<String>, Option<String>)> = BTreeMap::new();
    for (key, entry) in &entries {
        let Some(ip) = entry.value.as_str().filter(|s| !s.is_empty()) else {
            continue;
        };
        if let Some(name) = key.strip_suffix(VM_PUBLIC_SUFFIX) {
            flat.entry(name).or_default().0 = Some(ip.to_string());
        } else if let Some(name) = key.strip_suffix(VM_PRIVATE_SUFFIX) {
            flat.entry(name).or_default().1 = Some(ip.to_string());
        }
    }
    for (name, (public_ip, private_ip)) in flat {
        match host_address(name, public_ip, private_ip) {
            Some(host) => builder = builder.host(host),
            None => tracing::warn!("VM '{}' has no address, skipping", name),
        }
    }

    for (key, entry) in &entries {
        if RESERVED.contains(&key.as_str())
            || key.ends_with(VM_PUBLIC_SUFFIX)
            || key.ends_with(VM_PRIVATE_SUFFIX)
        {
            continue;
        }

        let Some(text) = scalar_text(&entry.value) else {
            tracing::debug!("Ignoring non-scalar output '{}'", key);
            continue;
        };

        if let Some(store) = key.strip_suffix(CONNECTION_STRING_SUFFIX) {
            builder = builder.connection_string(store, Sensitive::new(text));
        } else if entry.sensitive || looks_secret(key) {
            builder = builder.secret(key.as_str(), Sensitive::new(text));
        } else {
            builder = builder.value(key.as_str(), text);
        }
    }

    Ok(builder.build())
}

fn string_value<'a>(entries: &'a BTreeMap<String, OutputEntry>, key: &str) -> Option<&'a str> {
    entries
        .get(key)
        .and_then(|e| e.value.as_str())
        .filter(|s| !s.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn looks_secret(key: &str) -> bool {
    key.ends_with("_key") || key.ends_with("_password") || key.ends_with("_secret")
}

/// A VM without a private address falls back to its public one
fn host_address(
    name: &str,
    public_ip: Option<String>,
    private_ip: Option<String>,
) -> Option<HostAddress> {
    let public_ip = public_ip.filter(|s| !s.is_empty());
    let private_ip = private_ip.filter(|s| !s.is_empty()).or_else(|| public_ip.clone())?;
    Some(HostAddress {
        name: name.to_string(),
        public_ip,
        private_ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "resource_group_name": {"sensitive": false, "type": "string", "value": "rg-otel-demo"},
        "acr_login_server": {"sensitive": false, "type": "string", "value": "oteldemo.azurecr.io"},
        "acr_admin_username": {"sensitive": false, "type": "string", "value": "oteldemo"},
        "acr_admin_password": {"sensitive": true, "type": "string", "value": "acr-pass"},
        "aks_cluster_name": {"sensitive": false, "type": "string", "value": "aks-otel-demo"},
        "event_hub_connection_string": {"sensitive": true, "type": "string", "value": "Endpoint=sb://eh/"},
        "redis_connection_string": {"sensitive": true, "type": "string", "value": "rediss://:pw@cache:6380"},
        "cosmos_endpoint": {"sensitive": false, "type": "string", "value": "https://cosmos.example/"},
        "cosmos_key": {"sensitive": false, "type": "string", "value": "cosmos-key"},
        "frontend_app_name": {"sensitive": false, "type": "string", "value": "app-otel-frontend"},
        "vm_count": {"sensitive": false, "type": "number", "value": 2},
        "tags": {"sensitive": false, "type": ["map", "string"], "value": {"env": "demo"}},
        "virtual_machines": {
            "sensitive": false,
            "type": ["object", {}],
            "value": {
                "gateway": {"public_ip": "20.1.2.3", "private_ip": "10.0.1.4"},
                "inventory": {"public_ip": "20.1.2.4", "private_ip": "10.0.1.5"}
            }
        }
    }"#;

    #[test]
    fn test_parse_full_document() {
        let outputs = parse_outputs(FULL).unwrap();

        assert_eq!(outputs.resource_group(), "rg-otel-demo");
        assert_eq!(outputs.cluster_name(), Some("aks-otel-demo"));

        let registry = outputs.registry().unwrap();
        assert_eq!(registry.login_server, "oteldemo.azurecr.io");
        let credentials = registry.credentials.as_ref().unwrap();
        assert_eq!(credentials.username, "oteldemo");
        assert_eq!(credentials.password.expose(), "acr-pass");

        assert_eq!(
            outputs.connection_string("event_hub").unwrap().expose(),
            "Endpoint=sb://eh/"
        );
        assert!(outputs.connection_string("redis").is_some());
        assert_eq!(outputs.secret("cosmos_key").unwrap().expose(), "cosmos-key");
        assert_eq!(outputs.value("cosmos_endpoint"), Some("https://cosmos.example/"));
        assert_eq!(outputs.value("vm_count"), Some("2"));
        assert_eq!(outputs.value("tags"), None);
        assert_eq!(outputs.frontend_app_name(), Some("app-otel-frontend"));

        assert_eq!(outputs.hosts().len(), 2);
        let gateway = outputs.host("gateway").unwrap();
        assert_eq!(gateway.private_ip, "10.0.1.4");
        assert_eq!(gateway.public_ip.as_deref(), Some("20.1.2.3"));
    }

    #[test]
    fn test_flat_vm_outputs() {
        let raw = r#"{
            "resource_group_name": {"value": "rg"},
            "gateway_vm_public_ip": {"value": "20.0.0.1"},
            "gateway_vm_private_ip": {"value": "10.0.0.4"},
            "inventory_vm_private_ip": {"value": "10.0.0.5"}
        }"#;
        let outputs = parse_outputs(raw).unwrap();

        assert_eq!(outputs.hosts().len(), 2);
        assert_eq!(outputs.host("gateway").unwrap().reachable_ip(), "20.0.0.1");
        assert_eq!(outputs.host("inventory").unwrap().public_ip, None);
        assert_eq!(outputs.value("gateway_vm_public_ip"), None);
    }

    #[test]
    fn test_empty_state_is_not_provisioned() {
        assert!(matches!(
            parse_outputs("{}"),
            Err(InfraError::InfrastructureNotProvisioned(_))
        ));
        assert!(matches!(
            parse_outputs(""),
            Err(InfraError::InfrastructureNotProvisioned(_))
        ));
    }

    #[test]
    fn test_missing_resource_group_is_not_provisioned() {
        let raw = r#"{"acr_login_server": {"value": "r.azurecr.io"}}"#;
        assert!(matches!(
            parse_outputs(raw),
            Err(InfraError::InfrastructureNotProvisioned(_))
        ));
    }

    #[test]
    fn test_optional_features_absent() {
        let raw = r#"{"resource_group_name": {"value": "rg"}}"#;
        let outputs = parse_outputs(raw).unwrap();

        assert!(outputs.registry().is_none());
        assert!(outputs.cluster_name().is_none());
        assert!(outputs.hosts().is_empty());
    }

    #[test]
    fn test_registry_without_admin_credentials() {
        let raw = r#"{
            "resource_group_name": {"value": "rg"},
            "acr_login_server": {"value": "r.azurecr.io"}
        }"#;
        let outputs = parse_outputs(raw).unwrap();
        assert!(outputs.registry().unwrap().credentials.is_none());
    }

    #[tokio::test]
    async fn test_resolver_reads_through_source() {
        let resolver = OutputResolver::new(StaticState(FULL.to_string()));
        let outputs = resolver.resolve().await.unwrap();
        assert_eq!(outputs.resource_group(), "rg-otel-demo");
    }
}
