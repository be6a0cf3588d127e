use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, time::Duration};

use crate::services::org_gatekeeper::OrgPolicy;

const DEFAULT_UPSTREAM_URL: &str = "https://api.machines.dev";
const DEFAULT_S3_ENDPOINT: &str = "https://fly.storage.tigris.dev";
const DEFAULT_IAM_ENDPOINT: &str = "https://fly.iam.storage.tigris.dev";
const DEFAULT_TEMPLATE_PATH: &str = "templates/machine-container-config.json";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub template_path: PathBuf,
    pub storage: StorageConfig,
    pub orgs: OrgPolicy,
}

/// System-held credentials and endpoints for the bucket/IAM backend.
#[derive(Clone)]
pub struct StorageConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub s3_endpoint: String,
    pub iam_endpoint: String,
    pub region: String,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub force_path_style: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("s3_endpoint", &self.s3_endpoint)
            .field("iam_endpoint", &self.iam_endpoint)
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Machines API proxy with per-app storage provisioning")]
pub struct Args {
    /// Host to bind to (overrides MACHINES_PROXY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MACHINES_PROXY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Compute backend base URL (overrides MACHINES_PROXY_UPSTREAM_URL)
    #[arg(long)]
    pub upstream_url: Option<String>,

    /// Per-call upstream timeout in seconds (overrides MACHINES_PROXY_UPSTREAM_TIMEOUT_SECS)
    #[arg(long)]
    pub upstream_timeout_secs: Option<u64>,

    /// Deployment template file (overrides MACHINES_PROXY_TEMPLATE)
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Storage S3 endpoint (overrides FLY_TIGRIS_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Storage IAM endpoint (overrides FLY_TIGRIS_IAM_ENDPOINT)
    #[arg(long)]
    pub iam_endpoint: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge parsed CLI args over values obtained from `lookup`.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // --- Environment fallback ---
        let env_host = non_empty("MACHINES_PROXY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match non_empty("MACHINES_PROXY_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing MACHINES_PROXY_PORT value `{}`", value))?,
            None => 8080,
        };
        let env_timeout = match non_empty("MACHINES_PROXY_UPSTREAM_TIMEOUT_SECS") {
            Some(value) => value.parse::<u64>().with_context(|| {
                format!("parsing MACHINES_PROXY_UPSTREAM_TIMEOUT_SECS value `{}`", value)
            })?,
            None => 30,
        };
        let env_upstream =
            non_empty("MACHINES_PROXY_UPSTREAM_URL").unwrap_or_else(|| DEFAULT_UPSTREAM_URL.into());
        let env_template = non_empty("MACHINES_PROXY_TEMPLATE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_PATH));

        let access_key_id = non_empty("FLY_TIGRIS_ACCESS_KEY").context(
            "Missing configuration for Tigris: FLY_TIGRIS_ACCESS_KEY. Ensure environment variables are set.",
        )?;
        let secret_access_key = non_empty("FLY_TIGRIS_SECRET_ACCESS_KEY").context(
            "Missing configuration for Tigris: FLY_TIGRIS_SECRET_ACCESS_KEY. Ensure environment variables are set.",
        )?;

        let force_path_style = match non_empty("FLY_TIGRIS_FORCE_PATH_STYLE") {
            Some(value) => value.trim().parse::<bool>().with_context(|| {
                format!("parsing FLY_TIGRIS_FORCE_PATH_STYLE value `{}`", value)
            })?,
            None => false,
        };

        let timeout_secs = args.upstream_timeout_secs.unwrap_or(env_timeout);
        if timeout_secs == 0 {
            bail!("upstream timeout must be at least one second");
        }

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upstream_url: args
                .upstream_url
                .unwrap_or(env_upstream)
                .trim_end_matches('/')
                .to_string(),
            upstream_timeout: Duration::from_secs(timeout_secs),
            template_path: args.template.unwrap_or(env_template),
            storage: StorageConfig {
                access_key_id,
                secret_access_key,
                s3_endpoint: args
                    .s3_endpoint
                    .or_else(|| non_empty("FLY_TIGRIS_S3_ENDPOINT"))
                    .unwrap_or_else(|| DEFAULT_S3_ENDPOINT.into()),
                iam_endpoint: args
                    .iam_endpoint
                    .or_else(|| non_empty("FLY_TIGRIS_IAM_ENDPOINT"))
                    .unwrap_or_else(|| DEFAULT_IAM_ENDPOINT.into()),
                region: non_empty("FLY_TIGRIS_REGION").unwrap_or_else(|| "auto".into()),
                force_path_style,
            },
            orgs: OrgPolicy::from_env(non_empty("FLY_APP_NAME"), non_empty("FLY_ALLOWED_ORGS")),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
