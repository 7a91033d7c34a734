//! Order operations.
//!
//! Lock order depends on the root entity an operation starts from:
//! order-rooted paths (approval, cancellation, initial verification) lock
//! order → payment → subscription; subscription-rooted paths (monthly
//! checkout and verification) lock subscription → payment. No path locks an
//! order after a subscription.

use aqua_domain::notify;
use aqua_domain::order::{self, append_note, initial_invoice_number};
use aqua_domain::{
    authorize, Action, Actor, LifecyclePolicy, OrderRequest, OrderStatus, Ownership, PriceSnapshot,
    RentalError, RentalResult, Resource, Role,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};

use crate::notifications;
use crate::payments::{self, Payment};
use crate::subscriptions::{self, Subscription};
use crate::{db_err, directory, status_col};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub product_id: i64,
    pub franchise_id: i64,
    pub service_agent_id: Option<i64>,
    pub status: OrderStatus,
    pub monthly_rent: i64,
    pub security_deposit: i64,
    pub installation_fee: i64,
    pub total_initial_amount: i64,
    pub shipping_address: String,
    pub billing_address: String,
    pub rental_start_date: DateTime<Utc>,
    pub rental_duration: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Order {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            product_id: row.try_get("product_id")?,
            franchise_id: row.try_get("franchise_id")?,
            service_agent_id: row.try_get("service_agent_id")?,
            status: status_col(row, "status", OrderStatus::parse)?,
            monthly_rent: row.try_get("monthly_rent")?,
            security_deposit: row.try_get("security_deposit")?,
            installation_fee: row.try_get("installation_fee")?,
            total_initial_amount: row.try_get("total_initial_amount")?,
            shipping_address: row.try_get("shipping_address")?,
            billing_address: row.try_get("billing_address")?,
            rental_start_date: row.try_get("rental_start_date")?,
            rental_duration: row.try_get("rental_duration")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Result of placing an order: the order and its pending initial payment.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: Payment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub status: OrderStatus,
    pub agent_id: Option<i64>,
    pub notes: Option<String>,
}

impl OrderStatusChange {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            status,
            agent_id: None,
            notes: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped helpers
// ---------------------------------------------------------------------------

pub(crate) async fn lock(conn: &mut PgConnection, id: i64) -> RentalResult<Order> {
    sqlx::query_as::<_, Order>("select * from orders where id = $1 for update")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("orders.lock"))?
        .ok_or_else(|| RentalError::not_found("order", id))
}

async fn ownership(conn: &mut PgConnection, o: &Order) -> RentalResult<Ownership> {
    Ok(Ownership {
        customer_id: o.customer_id,
        franchise_owner_id: directory::franchise_owner(conn, o.franchise_id).await?,
        agent_id: o.service_agent_id,
    })
}

async fn set_status(
    conn: &mut PgConnection,
    id: i64,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> RentalResult<Order> {
    sqlx::query_as::<_, Order>(
        "update orders set status = $2, updated_at = $3 where id = $1 returning *",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("orders.set_status"))
}

/// Approval handoff: order → approved with `rental_start_date = now`, and
/// the subscription is created on the same connection.
///
/// Callers must hold the order row lock and have checked the transition.
pub(crate) async fn approve_in_tx(
    conn: &mut PgConnection,
    order_id: i64,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> RentalResult<(Order, Subscription)> {
    let approved = sqlx::query_as::<_, Order>(
        r#"
        update orders
           set status = 'approved', rental_start_date = $2, updated_at = $2
         where id = $1
        returning *
        "#,
    )
    .bind(order_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("orders.approve"))?;

    let sub = subscriptions::create_for_order(conn, &approved, policy, now).await?;

    tracing::info!(
        order_id,
        subscription_id = sub.id,
        end_date = %sub.end_date,
        "order approved; subscription created"
    );
    Ok((approved, sub))
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub async fn get(pool: &PgPool, id: i64) -> RentalResult<Order> {
    sqlx::query_as::<_, Order>("select * from orders where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("orders.get"))?
        .ok_or_else(|| RentalError::not_found("order", id))
}

/// A single order, visible to its customer, its franchise owner, its
/// assigned agent, and admins.
pub async fn view(pool: &PgPool, actor: &Actor, id: i64) -> RentalResult<Order> {
    let mut conn = pool.acquire().await.map_err(db_err("orders.view"))?;
    let o = sqlx::query_as::<_, Order>("select * from orders where id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("orders.view"))?
        .ok_or_else(|| RentalError::not_found("order", id))?;
    let owner = ownership(&mut conn, &o).await?;
    authorize(actor, &Resource::Owned(owner), Action::View)?;
    Ok(o)
}

/// Place an order with its pending initial payment.
pub async fn create(
    pool: &PgPool,
    actor: &Actor,
    req: &OrderRequest,
    now: DateTime<Utc>,
) -> RentalResult<PlacedOrder> {
    authorize(actor, &Resource::Fresh, Action::PlaceOrder)?;
    req.validate()?;

    let mut tx = pool.begin().await.map_err(db_err("orders.create"))?;

    let product = directory::product(&mut tx, req.product_id)
        .await?
        .ok_or_else(|| RentalError::not_found("product", req.product_id))?;
    if !product.is_active {
        return Err(RentalError::InvalidState(format!(
            "product {} is not available",
            product.id
        )));
    }

    let franchise = directory::franchise(&mut tx, req.franchise_id)
        .await?
        .ok_or_else(|| RentalError::not_found("franchise", req.franchise_id))?;
    if !franchise.is_active {
        return Err(RentalError::InvalidState(format!(
            "franchise {} is not active",
            franchise.id
        )));
    }

    let prices = PriceSnapshot {
        monthly_rent: product.monthly_rent,
        security_deposit: product.security_deposit,
        installation_fee: product.installation_fee,
    };
    let total = prices.total_initial_amount()?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        insert into orders (
          customer_id, product_id, franchise_id, status,
          monthly_rent, security_deposit, installation_fee, total_initial_amount,
          shipping_address, billing_address, rental_start_date, rental_duration, notes,
          created_at, updated_at
        ) values (
          $1, $2, $3, 'pending',
          $4, $5, $6, $7,
          $8, $9, $10, $11, $12,
          $10, $10
        )
        returning *
        "#,
    )
    .bind(actor.user_id)
    .bind(product.id)
    .bind(franchise.id)
    .bind(prices.monthly_rent)
    .bind(prices.security_deposit)
    .bind(prices.installation_fee)
    .bind(total)
    .bind(&req.shipping_address)
    .bind(&req.billing_address)
    .bind(now)
    .bind(req.rental_duration)
    .bind(&req.notes)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err("orders.create"))?;

    let payment =
        payments::insert_initial(&mut tx, &order, &initial_invoice_number(order.id, now), now)
            .await?;

    notifications::insert_all(
        &mut tx,
        &[notify::order_placed(order.customer_id, order.id, &product.name)],
        now,
    )
    .await?;

    tx.commit().await.map_err(db_err("orders.create"))?;

    tracing::info!(
        order_id = order.id,
        customer_id = order.customer_id,
        total = order.total_initial_amount,
        invoice = %payment.invoice_number,
        "order placed"
    );
    Ok(PlacedOrder { order, payment })
}

/// Back-office status change, optionally assigning an agent and appending a note.
pub async fn update_status(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    change: &OrderStatusChange,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> RentalResult<Order> {
    let target = change.status;

    let mut tx = pool.begin().await.map_err(db_err("orders.update_status"))?;

    let current = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &current).await?;
    authorize(actor, &Resource::Owned(owner), Action::ManageOrder)?;
    order::guard_status_update(current.status, target)?;

    if let Some(agent_id) = change.agent_id {
        let restrict = (actor.role == Role::FranchiseOwner).then_some(current.franchise_id);
        directory::require_service_agent(&mut tx, agent_id, restrict).await?;
    }
    let notes = change
        .notes
        .as_deref()
        .map(|n| append_note(current.notes.as_deref(), n));

    if change.agent_id.is_some() || notes.is_some() {
        sqlx::query(
            r#"
            update orders
               set service_agent_id = coalesce($2, service_agent_id),
                   notes = coalesce($3, notes),
                   updated_at = $4
             where id = $1
            "#,
        )
        .bind(id)
        .bind(change.agent_id)
        .bind(&notes)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err("orders.update_status"))?;
    }

    let updated = match target {
        OrderStatus::Approved => approve_in_tx(&mut tx, id, policy, now).await?.0,
        OrderStatus::Cancelled => {
            let o = set_status(&mut tx, id, target, now).await?;
            payments::fail_pending_initial(&mut tx, id, now).await?;
            if let Some(sub) = subscriptions::cancel_for_order(&mut tx, id, now).await? {
                tracing::info!(order_id = id, subscription_id = sub.id, "paired subscription cancelled");
            }
            o
        }
        _ => set_status(&mut tx, id, target, now).await?,
    };

    notifications::insert_all(
        &mut tx,
        &[notify::order_status_changed(updated.customer_id, id, target)],
        now,
    )
    .await?;

    tx.commit().await.map_err(db_err("orders.update_status"))?;

    tracing::info!(
        order_id = id,
        from = current.status.as_str(),
        to = target.as_str(),
        actor = actor.user_id,
        "order status updated"
    );
    Ok(updated)
}

/// Admin-only franchise reassignment. The order's subscription, if any,
/// keeps the franchise it was created under.
pub async fn assign_franchise(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    franchise_id: i64,
    now: DateTime<Utc>,
) -> RentalResult<Order> {
    let mut tx = pool.begin().await.map_err(db_err("orders.assign_franchise"))?;

    let current = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &current).await?;
    authorize(actor, &Resource::Owned(owner), Action::ReassignFranchise)?;

    directory::franchise(&mut tx, franchise_id)
        .await?
        .ok_or_else(|| RentalError::not_found("franchise", franchise_id))?;

    let updated = sqlx::query_as::<_, Order>(
        "update orders set franchise_id = $2, updated_at = $3 where id = $1 returning *",
    )
    .bind(id)
    .bind(franchise_id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err("orders.assign_franchise"))?;

    tx.commit().await.map_err(db_err("orders.assign_franchise"))?;

    tracing::info!(
        order_id = id,
        from = current.franchise_id,
        to = franchise_id,
        "order franchise reassigned"
    );
    Ok(updated)
}

/// Customer cancellation of their own pending order.
pub async fn cancel(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    now: DateTime<Utc>,
) -> RentalResult<Order> {
    let mut tx = pool.begin().await.map_err(db_err("orders.cancel"))?;

    let current = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &current).await?;
    authorize(actor, &Resource::Owned(owner), Action::ActAsCustomer)?;

    if current.status != OrderStatus::Pending {
        return Err(RentalError::InvalidState(format!(
            "only pending orders can be cancelled by the customer; order {id} is {}",
            current.status.as_str()
        )));
    }
    order::check_transition(current.status, OrderStatus::Cancelled)?;

    let updated = set_status(&mut tx, id, OrderStatus::Cancelled, now).await?;
    payments::fail_pending_initial(&mut tx, id, now).await?;
    notifications::insert_all(
        &mut tx,
        &[notify::order_status_changed(updated.customer_id, id, OrderStatus::Cancelled)],
        now,
    )
    .await?;

    tx.commit().await.map_err(db_err("orders.cancel"))?;

    tracing::info!(order_id = id, "order cancelled by customer");
    Ok(updated)
}
