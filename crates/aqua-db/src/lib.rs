//! aqua-db
//!
//! Postgres persistence and the transactional rental operations.
//!
//! Every operation follows the same shape: open one transaction, lock the
//! rows it guards with `SELECT … FOR UPDATE`, authorize, validate the
//! transition against the tables in `aqua-domain`, write, insert the
//! commit-critical notifications, commit. Dropping an uncommitted
//! transaction rolls it back, so every early `?` return is a rollback.

use anyhow::{Context, Result};
use aqua_domain::{RentalError, RentalResult};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

pub mod directory;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod rental_core;
pub mod service_requests;
pub mod subscriptions;

pub use notifications::{Notification, NotificationPublisher, PgNotificationPublisher};
pub use orders::{Order, OrderStatusChange, PlacedOrder};
pub use payments::{Checkout, GatewayCallback, Payment, Settlement};
pub use rental_core::{CoreSettings, RentalCore};
pub use service_requests::ServiceRequest;
pub use subscriptions::Subscription;

pub const ENV_DB_URL: &str = "AQUA_DATABASE_URL";

/// Connect to Postgres using AQUA_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Detect a unique-constraint violation (SQLSTATE 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Map a driver error for operation `op`. Unique violations surface as
/// `Conflict`; everything else is logged here and surfaces as `Storage`.
pub(crate) fn db_err(op: &'static str) -> impl FnOnce(sqlx::Error) -> RentalError {
    move |err| {
        if is_unique_violation(&err) {
            let constraint = match &err {
                sqlx::Error::Database(db) => db.constraint().unwrap_or("unique").to_string(),
                _ => "unique".to_string(),
            };
            tracing::warn!(op, constraint = %constraint, "unique constraint rejected write");
            return RentalError::Conflict(format!("{op}: duplicate ({constraint})"));
        }
        tracing::error!(op, error = %err, "storage failure");
        RentalError::Storage(op)
    }
}

/// Row cap for a listing. Postgres rejects a negative `LIMIT` at execution
/// time, so it is refused here as bad input instead.
pub(crate) fn page_limit(limit: i64) -> RentalResult<i64> {
    if limit < 0 {
        return Err(RentalError::Validation(format!(
            "limit must not be negative, got {limit}"
        )));
    }
    Ok(limit)
}

/// Decode a text status column through a domain parser.
pub(crate) fn status_col<T>(
    row: &PgRow,
    col: &str,
    parse: fn(&str) -> RentalResult<T>,
) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    parse(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}
