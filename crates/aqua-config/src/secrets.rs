//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"AQUA_GATEWAY_KEY_SECRET"`).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the result
//!   into constructors; nothing else reads these variables.
//! - `Debug` redacts values. Errors name the variable, never the value.
//!
//! # Enforcement
//! | Environment | Required                                  |
//! |-------------|-------------------------------------------|
//! | production  | gateway key_id, gateway key_secret, database url |
//! | development | gateway key_secret                        |

use anyhow::{bail, Result};

use crate::{Environment, RentalConfig};

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Public key id shown to checkout clients. Optional outside production.
    pub gateway_key_id: Option<String>,
    /// HMAC key for callback verification.
    pub gateway_key_secret: String,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "gateway_key_id",
                &self.gateway_key_id.as_ref().map(|_| "<REDACTED>"),
            )
            .field("gateway_key_secret", &"<REDACTED>")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Returns `None` if the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_secrets(cfg: &RentalConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, resolve_env)
}

/// Same as [`resolve_secrets`] with an injectable lookup.
pub fn resolve_secrets_with<F>(cfg: &RentalConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let env = cfg.environment.as_str();
    let key_id_var = cfg.gateway.keys_env.key_id.as_str();
    let key_secret_var = cfg.gateway.keys_env.key_secret.as_str();
    let db_var = cfg.database.url_env.as_str();

    let gateway_key_id = lookup(key_id_var);
    let database_url = lookup(db_var);

    let Some(gateway_key_secret) = lookup(key_secret_var) else {
        bail!(
            "SECRETS_MISSING environment={env}: required env var '{key_secret_var}' \
             (gateway key_secret) is not set or empty"
        );
    };

    if cfg.environment == Environment::Production {
        if gateway_key_id.is_none() {
            bail!(
                "SECRETS_MISSING environment={env}: required env var '{key_id_var}' \
                 (gateway key_id) is not set or empty"
            );
        }
        if database_url.is_none() {
            bail!(
                "SECRETS_MISSING environment={env}: required env var '{db_var}' \
                 (database url) is not set or empty"
            );
        }
    }

    Ok(ResolvedSecrets {
        gateway_key_id,
        gateway_key_secret,
        database_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).filter(|v| !v.trim().is_empty()).cloned()
    }

    #[test]
    fn development_needs_only_the_secret() {
        let cfg = RentalConfig::default();
        let s = resolve_secrets_with(&cfg, lookup_from(&[("AQUA_GATEWAY_KEY_SECRET", "shh")])).unwrap();
        assert_eq!(s.gateway_key_secret, "shh");
        assert!(s.gateway_key_id.is_none());
    }

    #[test]
    fn missing_secret_names_the_variable() {
        let cfg = RentalConfig::default();
        let err = resolve_secrets_with(&cfg, lookup_from(&[])).unwrap_err().to_string();
        assert!(err.contains("SECRETS_MISSING"));
        assert!(err.contains("AQUA_GATEWAY_KEY_SECRET"));
    }

    #[test]
    fn production_requires_key_id_and_database() {
        let cfg = RentalConfig {
            environment: Environment::Production,
            ..RentalConfig::default()
        };
        let err = resolve_secrets_with(&cfg, lookup_from(&[("AQUA_GATEWAY_KEY_SECRET", "shh")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("AQUA_GATEWAY_KEY_ID"));

        let ok = resolve_secrets_with(
            &cfg,
            lookup_from(&[
                ("AQUA_GATEWAY_KEY_SECRET", "shh"),
                ("AQUA_GATEWAY_KEY_ID", "key"),
                ("AQUA_DATABASE_URL", "postgres://localhost/aqua"),
            ]),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn debug_is_redacted() {
        let cfg = RentalConfig::default();
        let s = resolve_secrets_with(
            &cfg,
            lookup_from(&[("AQUA_GATEWAY_KEY_SECRET", "very-secret-value")]),
        )
        .unwrap();
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("very-secret-value"));
        assert!(dbg.contains("<REDACTED>"));
    }
}
