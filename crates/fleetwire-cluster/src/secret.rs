//! Shared secret materialization

use fleetwire_core::{Outputs, Sensitive, secret_env};
use serde_json::{Map, Value, json};

/// Name of the Secret every cluster workload reads its credentials from
pub const SECRET_NAME: &str = "fleetwire-secrets";

/// Build the Secret document from the outputs snapshot
///
/// The document is replaced wholesale on every run. Keys are the environment
/// variable names the workloads expect.
pub fn secret_document(namespace: &str, outputs: &Outputs) -> Sensitive {
    let mut data = Map::new();
    for (key, value) in secret_env(outputs) {
        data.insert(key.env_name().to_string(), Value::String(value.expose().to_string()));
    }

    let document = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": SECRET_NAME,
            "namespace": namespace,
            "labels": { "app.kubernetes.io/managed-by": "fleetwire" }
        },
        "type": "Opaque",
        "stringData": data,
    });
    Sensitive::new(document.to_string())
}
