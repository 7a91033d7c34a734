//! Shared wiring for the `aqua` subcommands.

pub mod seed;

use std::sync::Arc;

use anyhow::{Context, Result};
use aqua_config::{resolve_secrets, RentalConfig, ResolvedSecrets};
use aqua_db::{CoreSettings, RentalCore};
use aqua_domain::{Actor, Role};
use aqua_gateway::{PaperGateway, PaymentSigner};
use sqlx::PgPool;

/// Load layered YAML (or the built-in defaults when no paths are given)
/// and resolve secrets from the environment.
pub fn load_config(paths: &[String]) -> Result<(RentalConfig, ResolvedSecrets)> {
    let cfg = if paths.is_empty() {
        RentalConfig::default()
    } else {
        let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
        let loaded = aqua_config::load_layered_yaml(&refs)?;
        tracing::debug!(config_hash = %loaded.config_hash, "config loaded");
        RentalConfig::from_loaded(&loaded)?
    };
    let secrets = resolve_secrets(&cfg)?;
    Ok((cfg, secrets))
}

pub fn signer(secrets: &ResolvedSecrets) -> Result<PaymentSigner> {
    PaymentSigner::new(&secrets.gateway_key_secret)
}

pub async fn connect(secrets: &ResolvedSecrets) -> Result<PgPool> {
    match secrets.database_url.as_deref() {
        Some(url) => aqua_db::connect(url).await,
        None => aqua_db::connect_from_env().await,
    }
}

/// Operator tooling runs against the paper gateway; a live gateway client
/// is wired by the serving process, not here.
pub async fn build_core(paths: &[String]) -> Result<RentalCore> {
    let (cfg, secrets) = load_config(paths)?;
    let pool = connect(&secrets).await?;
    let settings = CoreSettings {
        policy: cfg.lifecycle,
        currency: cfg.gateway.currency.clone(),
        gateway_key_id: secrets.gateway_key_id.clone(),
        payment_method: cfg.gateway.name.clone(),
    };
    Ok(RentalCore::new(
        pool,
        Arc::new(PaperGateway::new()),
        signer(&secrets)?,
        settings,
    ))
}

pub fn actor(user_id: i64, role: &str) -> Result<Actor> {
    let role = Role::parse(role.trim()).context("invalid --role")?;
    Ok(Actor::new(user_id, role))
}
