//! File-backed external auth config resolver (CLI mode)
//!
//! Each external auth config is one YAML document at
//! `<auth_config_dir>/<name>.yaml` deserializing directly into a
//! [`BackendAuthStrategy`]. Secret-bearing fields support `env:VAR`
//! indirection resolved at lookup time.

use std::env;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::AuthResolver;
use crate::backend::BackendAuthStrategy;
use crate::config::auth_config_dir;
use crate::{Error, Result};

/// Resolver reading strategy documents from a local directory
pub struct FileAuthResolver {
    dir: PathBuf,
}

impl FileAuthResolver {
    /// Create a resolver over the given directory
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a resolver over the process-wide auth-config directory
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(auth_config_dir())
    }

    fn document_path(&self, name: &str) -> Result<PathBuf> {
        // Config names become file names; reject anything path-like.
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(Error::AuthResolution(format!(
                "invalid external auth config name '{name}'"
            )));
        }
        Ok(self.dir.join(format!("{name}.yaml")))
    }
}

/// Resolve an `env:VAR` indirection, failing when the variable is unset
fn resolve_secret(field: &str, value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => env::var(var).map_err(|_| {
            Error::AuthResolution(format!(
                "{field} references environment variable '{var}' which is not set"
            ))
        }),
        None => Ok(value.to_string()),
    }
}

fn resolve_secrets(strategy: BackendAuthStrategy) -> Result<BackendAuthStrategy> {
    match strategy {
        BackendAuthStrategy::HeaderInjection {
            header_name,
            header_value,
        } => Ok(BackendAuthStrategy::HeaderInjection {
            header_value: resolve_secret("header_value", &header_value)?,
            header_name,
        }),
        BackendAuthStrategy::TokenExchange {
            token_url,
            client_id,
            client_secret,
            audience,
            scopes,
        } => Ok(BackendAuthStrategy::TokenExchange {
            client_secret: resolve_secret("client_secret", &client_secret)?,
            token_url,
            client_id,
            audience,
            scopes,
        }),
        other => Ok(other),
    }
}

#[async_trait]
impl AuthResolver for FileAuthResolver {
    async fn resolve_external_auth_config(&self, name: &str) -> Result<BackendAuthStrategy> {
        let path = self.document_path(name)?;

        let raw = fs::read_to_string(&path).map_err(|e| {
            Error::AuthResolution(format!(
                "cannot read external auth config '{name}' at {}: {e}",
                path.display()
            ))
        })?;

        let strategy: BackendAuthStrategy = serde_yaml::from_str(&raw).map_err(|e| {
            Error::AuthResolution(format!("external auth config '{name}' is malformed: {e}"))
        })?;

        if strategy.is_external_ref() {
            return Err(Error::AuthResolution(format!(
                "external auth config '{name}' must not reference another config"
            )));
        }

        debug!(config = %name, path = %path.display(), "Loaded external auth config");
        resolve_secrets(strategy)
    }
}
