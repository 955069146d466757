//! Manifest configuration
//!
//! Loaded from TOML. Every field has a Debian-stock default, so an empty
//! file (or none at all) describes a stock Varnish install.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/varnish-converge/config.toml";

/// `malloc[,size]`, `file,<path>[,size[,granularity]]`, `persistent,<path>,<size>`
fn is_storage_spec(spec: &str) -> bool {
    let size = r"(\d+(\.\d+)?([kKmMgGtTpP][bB]?|[bB])?|\d+%)";
    let pattern = format!(
        r"^(malloc(,{size})?|file,/[^,]+(,{size}(,{size})?)?|persistent,/[^,]+,{size})$"
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(spec))
        .unwrap_or(false)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid storage spec '{0}' (expected malloc[,size], file,<path>[,size] or persistent,<path>,<size>)")]
    Storage(String),

    #[error("{field} must be a port number between 1 and 65535, got '{value}'")]
    Port { field: &'static str, value: String },

    #[error("min_threads ({min}) must not exceed max_threads ({max})")]
    ThreadBounds { min: u32, max: u32 },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Top-level manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    pub varnish: VarnishConfig,
    pub repo: RepoConfig,
    pub engine: EngineConfig,
}

/// `[varnish]` - daemon and log service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VarnishConfig {
    pub start_service: bool,
    pub start_ncsa: bool,
    pub start_log: bool,
    pub instance: String,
    pub vcl_conf: String,
    pub secret_file: String,
    pub ncsa_log_file: String,
    pub listen_address: String,
    #[serde(deserialize_with = "string_or_number")]
    pub listen_port: String,
    pub admin_listen_address: String,
    #[serde(deserialize_with = "string_or_number")]
    pub admin_listen_port: String,
    pub min_threads: u32,
    pub max_threads: u32,
    pub thread_timeout: u32,
    pub nfiles: u64,
    pub memlock: u64,
    /// `""` (no secret), `"auto"` (generated) or a literal secret
    pub secret: String,
    pub storage: String,
    pub ttl: u32,
    /// Local VCL file copied to `vcl_conf`
    pub vcl_source: Option<String>,
    /// Package ensure: `present`, `latest`, `absent` or a version
    pub version: String,
}

impl Default for VarnishConfig {
    fn default() -> Self {
        Self {
            start_service: true,
            start_ncsa: false,
            start_log: false,
            instance: "default".to_string(),
            vcl_conf: "/etc/varnish/default.vcl".to_string(),
            secret_file: "/etc/varnish/secret".to_string(),
            ncsa_log_file: "/var/log/varnish/varnishncsa.log".to_string(),
            listen_address: String::new(),
            listen_port: "6081".to_string(),
            admin_listen_address: "localhost".to_string(),
            admin_listen_port: "6082".to_string(),
            min_threads: 5,
            max_threads: 500,
            thread_timeout: 300,
            nfiles: 131_072,
            memlock: 82_000,
            secret: "auto".to_string(),
            storage: "malloc,256m".to_string(),
            ttl: 120,
            vcl_source: None,
            version: "present".to_string(),
        }
    }
}

/// `[repo]` - upstream APT repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    pub manage: bool,
    pub url: String,
    pub key_url: String,
    pub codename: String,
    pub release: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            manage: false,
            url: "https://packagecloud.io/varnishcache/varnish60lts/debian/".to_string(),
            key_url: "https://packagecloud.io/varnishcache/varnish60lts/gpgkey".to_string(),
            codename: "bookworm".to_string(),
            release: "main".to_string(),
        }
    }
}

/// `[engine]` - how convergence runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Per external process; 0 disables the limit
    pub timeout_secs: u64,
    pub jobs: usize,
    /// Extra attempts after the first for network failures
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub dry_run: bool,
    pub state_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            jobs: 1,
            retries: 3,
            retry_delay_ms: 2000,
            dry_run: false,
            state_file: "/var/lib/varnish-converge/last_run.json".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.retries.saturating_add(1),
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    pub fn state_path(&self) -> PathBuf {
        expand_path(&self.state_file)
    }
}

impl Manifest {
    /// Load a manifest from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut manifest: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        manifest.expand_paths();

        log::debug!("Loaded config from {}", path.display());
        Ok(manifest)
    }

    /// Tilde-expand every path-valued field
    fn expand_paths(&mut self) {
        let v = &mut self.varnish;
        for field in [
            &mut v.vcl_conf,
            &mut v.secret_file,
            &mut v.ncsa_log_file,
            &mut self.engine.state_file,
        ] {
            *field = shellexpand::tilde(field.as_str()).into_owned();
        }
        if let Some(source) = &mut v.vcl_source {
            *source = shellexpand::tilde(source.as_str()).into_owned();
        }
    }

    /// Reject malformed settings before any resource is declared
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let v = &self.varnish;

        if !is_storage_spec(&v.storage) {
            return Err(ValidationError::Storage(v.storage.clone()));
        }
        check_port("listen_port", &v.listen_port)?;
        check_port("admin_listen_port", &v.admin_listen_port)?;
        if v.min_threads > v.max_threads {
            return Err(ValidationError::ThreadBounds {
                min: v.min_threads,
                max: v.max_threads,
            });
        }
        for (field, value) in [
            ("instance", &v.instance),
            ("vcl_conf", &v.vcl_conf),
            ("secret_file", &v.secret_file),
            ("ncsa_log_file", &v.ncsa_log_file),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::Empty { field });
            }
        }
        Ok(())
    }
}

fn check_port(field: &'static str, value: &str) -> std::result::Result<(), ValidationError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(ValidationError::Port {
            field,
            value: value.to_string(),
        }),
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Ports may be written as `80` or `"80"`
fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Port::deserialize(deserializer)? {
        Port::Text(s) => s,
        Port::Number(n) => n.to_string(),
    })
}
