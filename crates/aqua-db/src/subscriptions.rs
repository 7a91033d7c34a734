//! Subscription lifecycle: creation by the approval handoff, pause, resume,
//! auto-renew, cancellation.

use aqua_domain::notify;
use aqua_domain::subscription::{self, INITIAL_MAINTENANCE_NOTE};
use aqua_domain::{
    authorize, Action, Actor, LifecyclePolicy, Ownership, RentalError, RentalResult, Resource,
    Schedule, SubscriptionStatus,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};

use crate::notifications::{self, NotificationPublisher};
use crate::orders::Order;
use crate::{db_err, directory, status_col};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: i64,
    pub order_id: i64,
    pub customer_id: i64,
    pub product_id: i64,
    pub franchise_id: i64,
    pub service_agent_id: Option<i64>,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub last_maintenance: Option<DateTime<Utc>>,
    pub next_maintenance: DateTime<Utc>,
    pub monthly_rent: i64,
    pub auto_renew: bool,
    pub maintenance_notes: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Subscription {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            customer_id: row.try_get("customer_id")?,
            product_id: row.try_get("product_id")?,
            franchise_id: row.try_get("franchise_id")?,
            service_agent_id: row.try_get("service_agent_id")?,
            status: status_col(row, "status", SubscriptionStatus::parse)?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            next_billing_date: row.try_get("next_billing_date")?,
            last_maintenance: row.try_get("last_maintenance")?,
            next_maintenance: row.try_get("next_maintenance")?,
            monthly_rent: row.try_get("monthly_rent")?,
            auto_renew: row.try_get("auto_renew")?,
            maintenance_notes: row.try_get("maintenance_notes")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped helpers
// ---------------------------------------------------------------------------

/// Creates the subscription for an order that was just approved at `now`.
/// A second subscription for the same order trips `subscriptions_order_id_key`
/// and surfaces as `Conflict`.
pub(crate) async fn create_for_order(
    conn: &mut PgConnection,
    order: &Order,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> RentalResult<Subscription> {
    let schedule = Schedule::from_approval(now, order.rental_duration, policy)?;

    sqlx::query_as::<_, Subscription>(
        r#"
        insert into subscriptions (
          order_id, customer_id, product_id, franchise_id, service_agent_id, status,
          start_date, end_date, next_billing_date, last_maintenance, next_maintenance,
          monthly_rent, auto_renew, maintenance_notes, notes, created_at, updated_at
        ) values (
          $1, $2, $3, $4, $5, 'active',
          $6, $7, $8, null, $9,
          $10, false, $11, $12, $13, $13
        )
        returning *
        "#,
    )
    .bind(order.id)
    .bind(order.customer_id)
    .bind(order.product_id)
    .bind(order.franchise_id)
    .bind(order.service_agent_id)
    .bind(schedule.start_date)
    .bind(schedule.end_date)
    .bind(schedule.next_billing_date)
    .bind(schedule.next_maintenance)
    .bind(order.monthly_rent)
    .bind(INITIAL_MAINTENANCE_NOTE)
    .bind(format!("Created from order #{}", order.id))
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("subscriptions.create"))
}

pub(crate) async fn lock(conn: &mut PgConnection, id: i64) -> RentalResult<Subscription> {
    sqlx::query_as::<_, Subscription>("select * from subscriptions where id = $1 for update")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("subscriptions.lock"))?
        .ok_or_else(|| RentalError::not_found("subscription", id))
}

pub(crate) async fn ownership(conn: &mut PgConnection, s: &Subscription) -> RentalResult<Ownership> {
    Ok(Ownership {
        customer_id: s.customer_id,
        franchise_owner_id: directory::franchise_owner(conn, s.franchise_id).await?,
        agent_id: s.service_agent_id,
    })
}

async fn set_status(
    conn: &mut PgConnection,
    id: i64,
    status: SubscriptionStatus,
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RentalResult<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        update subscriptions
           set status = $2, end_date = coalesce($3, end_date), updated_at = $4
         where id = $1
        returning *
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(end_date)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("subscriptions.set_status"))
}

/// Moves the billing date forward by one interval from its current value.
pub(crate) async fn advance_billing(
    conn: &mut PgConnection,
    s: &Subscription,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> RentalResult<Subscription> {
    let next = subscription::advance_billing(s.next_billing_date, policy)?;
    sqlx::query_as::<_, Subscription>(
        r#"
        update subscriptions
           set next_billing_date = $2, updated_at = $3
         where id = $1
        returning *
        "#,
    )
    .bind(s.id)
    .bind(next)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("subscriptions.advance_billing"))
}

/// Cancels the subscription paired with an order being cancelled, if any.
pub(crate) async fn cancel_for_order(
    conn: &mut PgConnection,
    order_id: i64,
    now: DateTime<Utc>,
) -> RentalResult<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        update subscriptions
           set status = 'cancelled', updated_at = $2
         where order_id = $1 and status in ('active','paused')
        returning *
        "#,
    )
    .bind(order_id)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("subscriptions.cancel_for_order"))
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub async fn get(pool: &PgPool, id: i64) -> RentalResult<Subscription> {
    sqlx::query_as::<_, Subscription>("select * from subscriptions where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("subscriptions.get"))?
        .ok_or_else(|| RentalError::not_found("subscription", id))
}

/// A single subscription, visible to its customer, its franchise owner,
/// its agent, and admins.
pub async fn view(pool: &PgPool, actor: &Actor, id: i64) -> RentalResult<Subscription> {
    let mut conn = pool.acquire().await.map_err(db_err("subscriptions.view"))?;
    let s = sqlx::query_as::<_, Subscription>("select * from subscriptions where id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("subscriptions.view"))?
        .ok_or_else(|| RentalError::not_found("subscription", id))?;
    let owner = ownership(&mut conn, &s).await?;
    authorize(actor, &Resource::Owned(owner), Action::View)?;
    Ok(s)
}

pub async fn find_by_order(pool: &PgPool, order_id: i64) -> RentalResult<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("select * from subscriptions where order_id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("subscriptions.find_by_order"))
}

/// Pause until `pause_end`; `end_date` is pushed out by the pause length.
pub async fn pause(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    pause_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RentalResult<Subscription> {
    let mut tx = pool.begin().await.map_err(db_err("subscriptions.pause"))?;

    let s = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &s).await?;
    authorize(actor, &Resource::Owned(owner), Action::ManageSubscription)?;
    subscription::check_transition(s.status, SubscriptionStatus::Paused)?;
    let new_end = subscription::extend_for_pause(s.end_date, now, pause_end)?;

    let updated = set_status(&mut tx, id, SubscriptionStatus::Paused, Some(new_end), now).await?;
    notifications::insert_all(
        &mut tx,
        &[notify::subscription_status_changed(s.customer_id, id, SubscriptionStatus::Paused)],
        now,
    )
    .await?;

    tx.commit().await.map_err(db_err("subscriptions.pause"))?;

    tracing::info!(
        subscription_id = id,
        end_date = %updated.end_date,
        pause_end = %pause_end,
        "subscription paused"
    );
    Ok(updated)
}

/// Plain status flip back to active; `end_date` is left as the pause set it.
pub async fn resume(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    now: DateTime<Utc>,
) -> RentalResult<Subscription> {
    let mut tx = pool.begin().await.map_err(db_err("subscriptions.resume"))?;

    let s = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &s).await?;
    authorize(actor, &Resource::Owned(owner), Action::ManageSubscription)?;
    subscription::check_transition(s.status, SubscriptionStatus::Active)?;

    let updated = set_status(&mut tx, id, SubscriptionStatus::Active, None, now).await?;
    notifications::insert_all(
        &mut tx,
        &[notify::subscription_status_changed(s.customer_id, id, SubscriptionStatus::Active)],
        now,
    )
    .await?;

    tx.commit().await.map_err(db_err("subscriptions.resume"))?;

    tracing::info!(subscription_id = id, "subscription resumed");
    Ok(updated)
}

pub async fn set_auto_renew(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    enabled: bool,
    now: DateTime<Utc>,
) -> RentalResult<Subscription> {
    let mut tx = pool.begin().await.map_err(db_err("subscriptions.auto_renew"))?;

    let s = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &s).await?;
    authorize(actor, &Resource::Owned(owner), Action::ConfigureSubscription)?;

    let updated = sqlx::query_as::<_, Subscription>(
        r#"
        update subscriptions
           set auto_renew = $2, updated_at = $3
         where id = $1
        returning *
        "#,
    )
    .bind(id)
    .bind(enabled)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err("subscriptions.auto_renew"))?;

    notifications::insert_all(
        &mut tx,
        &[notify::auto_renew_changed(s.customer_id, id, enabled)],
        now,
    )
    .await?;

    tx.commit().await.map_err(db_err("subscriptions.auto_renew"))?;

    tracing::info!(subscription_id = id, auto_renew = enabled, "subscription auto-renew set");
    Ok(updated)
}

/// Customer cancellation. Unconditional: any current status goes to
/// `cancelled`. The franchise owner is told after commit.
pub async fn cancel(
    pool: &PgPool,
    publisher: &dyn NotificationPublisher,
    actor: &Actor,
    id: i64,
    now: DateTime<Utc>,
) -> RentalResult<Subscription> {
    let mut tx = pool.begin().await.map_err(db_err("subscriptions.cancel"))?;

    let s = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &s).await?;
    authorize(actor, &Resource::Owned(owner), Action::ActAsCustomer)?;

    let updated = set_status(&mut tx, id, SubscriptionStatus::Cancelled, None, now).await?;
    let fanout = notify::subscription_cancelled(s.customer_id, owner.franchise_owner_id, id);
    notifications::insert_all(&mut tx, &fanout.critical, now).await?;

    tx.commit().await.map_err(db_err("subscriptions.cancel"))?;

    tracing::info!(subscription_id = id, from = s.status.as_str(), "subscription cancelled");
    notifications::publish_best_effort(publisher, &fanout.informational).await;
    Ok(updated)
}
