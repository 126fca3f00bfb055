//! Outgoing authentication resolution
//!
//! Selects a strategy for each backend from the process-wide
//! [`OutgoingAuthConfig`] and resolves indirect
//! `external_auth_config_ref` strategies to concrete ones. Resolution
//! failures are fail-closed: the caller excludes the backend rather
//! than routing to it without credentials.

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{Backend, BackendAuthStrategy};
use crate::config::{AuthSourceMode, OutgoingAuthConfig};
use crate::{Error, Result};

pub mod file_resolver;

pub use file_resolver::FileAuthResolver;

/// Resolves indirect external-auth-config references to concrete
/// strategies, reading whatever secrets the strategy needs
#[async_trait]
pub trait AuthResolver: Send + Sync {
    /// Resolve the named external auth config
    ///
    /// Must return a fully concrete strategy; never another reference.
    async fn resolve_external_auth_config(&self, name: &str) -> Result<BackendAuthStrategy>;
}

/// Select and resolve the outgoing auth strategy for one backend
///
/// With `source == "discovered"`, auth populated by the workload
/// discoverer wins; otherwise the inline config is consulted. Any
/// selected `external_auth_config_ref` is resolved through `resolver`.
///
/// # Errors
///
/// Returns [`Error::AuthResolution`] when a reference cannot be
/// resolved. Callers MUST exclude the backend on error.
pub async fn apply_auth_config_to_backend(
    backend: &mut Backend,
    name: &str,
    auth_config: Option<&OutgoingAuthConfig>,
    resolver: Option<&dyn AuthResolver>,
) -> Result<()> {
    let Some(config) = auth_config else {
        return Ok(());
    };

    let selected = match config.source_mode() {
        AuthSourceMode::Discovered => match backend.auth.take() {
            Some(discovered) => Some(discovered),
            None => config.resolve_for_backend(name),
        },
        AuthSourceMode::Inline => {
            // Inline mode discards anything the discoverer found.
            backend.auth = None;
            config.resolve_for_backend(name)
        }
    };

    let Some(strategy) = selected else {
        backend.auth = None;
        return Ok(());
    };

    let resolved = if let BackendAuthStrategy::ExternalAuthConfigRef { name: ref_name } = &strategy
    {
        let Some(resolver) = resolver else {
            return Err(Error::AuthResolution(format!(
                "backend '{name}' references external auth config '{ref_name}' but no auth resolver is initialized"
            )));
        };

        let concrete = resolver
            .resolve_external_auth_config(ref_name)
            .await
            .map_err(|e| {
                Error::AuthResolution(format!(
                    "failed to resolve external auth config '{ref_name}' for backend '{name}': {e}"
                ))
            })?;

        if concrete.is_external_ref() {
            return Err(Error::AuthResolution(format!(
                "external auth config '{ref_name}' resolved to another reference"
            )));
        }

        debug!(backend = %name, config = %ref_name, "Resolved external auth config");
        concrete
    } else {
        strategy
    };

    backend.auth = Some(resolved);
    Ok(())
}
