//! Builds the machine config sent to the compute backend.
//!
//! The caller's config is combined with a fixed deployment template and the
//! app's current secret names. The merge is a pure function; the template is
//! validated once at startup so a broken template never reaches a request.

use super::secrets::is_storage_secret;
use crate::models::machine::{MachineConfig, SecretInfo};
use serde_json::{Map, Value, json};
use std::{fs, io, path::Path};
use thiserror::Error;

/// Every mount is rewritten to this in-container path.
pub const FIXED_MOUNT_PATH: &str = "/dev/fly_vol";
/// Used for `FLY_USER_DATA_PATH` when the caller supplied no mount.
pub const DEFAULT_USER_DATA_PATH: &str = "/data";
pub const USER_DATA_PATH_ENV: &str = "FLY_USER_DATA_PATH";
pub const APP_CONTAINER: &str = "app";
pub const IMAGE_VOLUME: &str = "app-image";
pub const IMAGE_CONFIG_GUEST_PATH: &str = "/etc/app-image.json";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("reading deployment template `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("parsing deployment template: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("deployment template must be a JSON object")]
    NotAnObject,
    #[error("deployment template field `{0}` must be an array")]
    MissingArray(&'static str),
    #[error("deployment template must contain exactly one {kind} named `{name}`, found {found}")]
    Marker {
        kind: &'static str,
        name: &'static str,
        found: usize,
    },
}

/// A validated deployment template.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentTemplate {
    containers: Vec<Value>,
    volumes: Vec<Value>,
}

impl DeploymentTemplate {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_value(serde_json::from_str(&raw)?)
    }

    pub fn from_value(value: Value) -> Result<Self, TemplateError> {
        let Value::Object(mut document) = value else {
            return Err(TemplateError::NotAnObject);
        };
        let containers = take_array(&mut document, "containers")?;
        let volumes = take_array(&mut document, "volumes")?;

        ensure_single(&containers, "container", APP_CONTAINER)?;
        ensure_single(&volumes, "volume", IMAGE_VOLUME)?;

        Ok(Self {
            containers,
            volumes,
        })
    }

    pub fn containers(&self) -> &[Value] {
        &self.containers
    }

    pub fn volumes(&self) -> &[Value] {
        &self.volumes
    }
}

fn take_array(document: &mut Map<String, Value>, field: &'static str) -> Result<Vec<Value>, TemplateError> {
    match document.remove(field) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(TemplateError::MissingArray(field)),
    }
}

fn has_name(entry: &Value, name: &str) -> bool {
    entry.get("name").and_then(Value::as_str) == Some(name)
}

fn ensure_single(
    entries: &[Value],
    kind: &'static str,
    name: &'static str,
) -> Result<(), TemplateError> {
    let found = entries
        .iter()
        .filter(|e| e.is_object() && has_name(e, name))
        .count();
    if found != 1 {
        return Err(TemplateError::Marker { kind, name, found });
    }
    Ok(())
}

/// Produce the processed machine config.
///
/// Only the first mount's caller-supplied path feeds `FLY_USER_DATA_PATH`; all mounts
/// are rewritten to [`FIXED_MOUNT_PATH`].
pub fn merge(
    config: &MachineConfig,
    secrets: &[SecretInfo],
    template: &DeploymentTemplate,
) -> Value {
    let mut output = match serde_json::to_value(config) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let mounts: Vec<Value> = config
        .mounts
        .iter()
        .map(|mount| {
            let mut rewritten = mount.extra.clone();
            rewritten.insert("path".into(), Value::from(FIXED_MOUNT_PATH));
            Value::Object(rewritten)
        })
        .collect();

    let user_data_path = config
        .mounts
        .first()
        .and_then(|m| m.path.as_deref())
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_USER_DATA_PATH);

    let container_secrets: Vec<Value> = secrets
        .iter()
        .filter(|s| !is_storage_secret(&s.name))
        .map(|s| json!({ "name": s.name, "env_var": s.name }))
        .collect();

    let containers: Vec<Value> = template
        .containers()
        .iter()
        .map(|container| match container {
            Value::Object(fields) if has_name(container, APP_CONTAINER) => {
                stamp_app_container(fields, config, user_data_path, &container_secrets)
            }
            other => other.clone(),
        })
        .collect();

    let volumes: Vec<Value> = template
        .volumes()
        .iter()
        .map(|volume| match volume {
            Value::Object(fields) if has_name(volume, IMAGE_VOLUME) => {
                let mut stamped = fields.clone();
                stamped.insert("image".into(), Value::from(config.image.clone()));
                Value::Object(stamped)
            }
            other => other.clone(),
        })
        .collect();

    output.insert("mounts".into(), Value::Array(mounts));
    output.insert("containers".into(), Value::Array(containers));
    output.insert("volumes".into(), Value::Array(volumes));
    Value::Object(output)
}

fn stamp_app_container(
    fields: &Map<String, Value>,
    config: &MachineConfig,
    user_data_path: &str,
    container_secrets: &[Value],
) -> Value {
    let mut env: Map<String, Value> = config
        .env
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.clone())))
        .collect();
    env.insert(USER_DATA_PATH_ENV.into(), Value::from(user_data_path));

    let restart = match config.restart.as_ref().and_then(|r| r.policy.as_deref()) {
        Some(policy) => json!({ "policy": policy }),
        None => json!({}),
    };

    let mut stamped = fields.clone();
    stamped.insert("env".into(), Value::Object(env));
    stamped.insert("secrets".into(), Value::Array(container_secrets.to_vec()));
    stamped.insert(
        "files".into(),
        json!([{ "guest_path": IMAGE_CONFIG_GUEST_PATH, "image_config": config.image }]),
    );
    stamped.insert("restart".into(), restart);
    Value::Object(stamped)
}
