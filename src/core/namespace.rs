//! Process-wide namespace resolution.
//!
//! The namespace is resolved once at startup and handed to the storage
//! factory. Nothing reads the environment per call.

use std::path::Path;

/// Environment variable that overrides the namespace.
pub const NAMESPACE_ENV: &str = "RUDDER_NAMESPACE";

/// Namespace file mounted alongside the service-account token.
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Namespace used when neither the override nor the mounted file is present.
pub const DEFAULT_NAMESPACE: &str = "kube-system";

/// Resolve the namespace from the process environment.
pub fn namespace_from_env() -> String {
    resolve_namespace(
        std::env::var(NAMESPACE_ENV).ok(),
        Path::new(SERVICE_ACCOUNT_NAMESPACE_PATH),
    )
}

/// Resolve the namespace: explicit override, then mounted file, then default.
///
/// Empty or whitespace-only values fall through to the next source.
pub fn resolve_namespace(env_override: Option<String>, service_account_path: &Path) -> String {
    if let Some(ns) = env_override {
        let ns = ns.trim();
        if !ns.is_empty() {
            return ns.to_string();
        }
    }

    if let Ok(data) = std::fs::read_to_string(service_account_path) {
        let ns = data.trim();
        if !ns.is_empty() {
            return ns.to_string();
        }
    }

    DEFAULT_NAMESPACE.to_string()
}
