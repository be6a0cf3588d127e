//! Machine specification as supplied by callers of `POST /v1/apps/{app}/machines`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Caller-supplied machine config.
///
/// Only the fields the merger rewrites are typed; everything else is kept in
/// `extra` and passed through to the compute backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MachineConfig {
    pub image: String,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub mounts: Vec<Mount>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Explicit `null` reads the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Mount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Volume id and any other mount attributes.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RestartPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `GET /v1/apps/{app}/secrets`. Values are never returned.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SecretInfo {
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SecretInfo {
    #[cfg(test)]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSecretsResponse {
    #[serde(default)]
    pub secrets: Vec<SecretInfo>,
}
