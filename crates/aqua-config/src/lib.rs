//! Layered YAML configuration.
//!
//! Documents are merged in order (earlier = base, later = override), checked
//! for literal secrets, canonicalised to JSON and hashed. The typed
//! [`RentalConfig`] view is read from the merged JSON.

use anyhow::{bail, Context, Result};
use aqua_domain::LifecyclePolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod secrets;

pub use secrets::{resolve_secrets, ResolvedSecrets};

/// If any leaf string value in the effective config starts with one of
/// these, loading aborts with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "rzp_live_",  // Razorpay live key id
    "rzp_test_",  // Razorpay test key id
    "sk-",        // OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "postgres://",
    "postgresql://",
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    // serde_json's default map is ordered by key, so this is canonical.
    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}

// ---------------------------------------------------------------------------
// Typed view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysEnv {
    pub key_id: String,
    pub key_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    pub name: String,
    pub currency: String,
    pub keys_env: KeysEnv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub url_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RentalConfig {
    pub environment: Environment,
    pub gateway: GatewaySection,
    #[serde(default)]
    pub lifecycle: LifecyclePolicy,
    pub database: DatabaseSection,
}

impl Default for RentalConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            gateway: GatewaySection {
                name: "razorpay".to_string(),
                currency: "INR".to_string(),
                keys_env: KeysEnv {
                    key_id: "AQUA_GATEWAY_KEY_ID".to_string(),
                    key_secret: "AQUA_GATEWAY_KEY_SECRET".to_string(),
                },
            },
            lifecycle: LifecyclePolicy::default(),
            database: DatabaseSection {
                url_env: "AQUA_DATABASE_URL".to_string(),
            },
        }
    }
}

impl RentalConfig {
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let cfg: RentalConfig = serde_json::from_value(loaded.config_json.clone())
            .context("CONFIG_INVALID: merged config does not match the rental schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.currency.len() != 3 {
            bail!(
                "CONFIG_INVALID gateway.currency must be an ISO-4217 code, got '{}'",
                self.gateway.currency
            );
        }
        if self.lifecycle.billing_interval_months == 0 {
            bail!("CONFIG_INVALID lifecycle.billing_interval_months must be >= 1");
        }
        if self.lifecycle.maintenance_interval_months == 0 {
            bail!("CONFIG_INVALID lifecycle.maintenance_interval_months must be >= 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_override_nested_keys() {
        let a = "gateway:\n  currency: INR\n  name: razorpay\n";
        let b = "gateway:\n  currency: USD\n";
        let loaded = load_layered_yaml_from_strings(&[a, b]).unwrap();
        assert_eq!(loaded.config_json["gateway"]["currency"], "USD");
        assert_eq!(loaded.config_json["gateway"]["name"], "razorpay");
    }

    #[test]
    fn short_values_are_not_treated_as_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("rzp_live_ABCDEFGH1234"));
    }

    #[test]
    fn default_matches_base_layout() {
        let cfg = RentalConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.lifecycle.maintenance_interval_months, 3);
    }
}
