//! Payment verification engine.
//!
//! Checkout generation calls the gateway outside any transaction, then
//! re-locks and re-checks before persisting the gateway reference. Callback
//! verification checks the HMAC before touching the database; settlement and
//! its downstream transition (order approval or billing advance) commit
//! together.

use std::collections::BTreeMap;

use aqua_domain::notify;
use aqua_domain::payment::{
    self, checkout_details, initial_receipt, monthly_invoice_number, monthly_receipt,
    settlement_details,
};
use aqua_domain::{
    authorize, Action, Actor, LifecyclePolicy, OrderStatus, Ownership, PaymentStatus,
    PaymentTarget, PaymentType, RentalError, RentalResult, Resource, SubscriptionStatus,
    ViewScope,
};
use aqua_gateway::{GatewayClient, GatewayOrderRequest, PaymentSigner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};

use crate::orders::{self, Order};
use crate::subscriptions::{self, Subscription};
use crate::{db_err, directory, notifications, page_limit, status_col};

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub order_id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub customer_id: i64,
    pub amount: i64,
    pub status: PaymentStatus,
    pub payment_type: PaymentType,
    pub payment_method: Option<String>,
    pub invoice_number: String,
    pub gateway_order_ref: Option<String>,
    pub gateway_payment_ref: Option<String>,
    pub payment_details: Option<Value>,
    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Payment {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            subscription_id: row.try_get("subscription_id")?,
            customer_id: row.try_get("customer_id")?,
            amount: row.try_get("amount")?,
            status: status_col(row, "status", PaymentStatus::parse)?,
            payment_type: status_col(row, "payment_type", PaymentType::parse)?,
            payment_method: row.try_get("payment_method")?,
            invoice_number: row.try_get("invoice_number")?,
            gateway_order_ref: row.try_get("gateway_order_ref")?,
            gateway_payment_ref: row.try_get("gateway_payment_ref")?,
            payment_details: row.try_get("payment_details")?,
            notes: row.try_get("notes")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// What a client needs to open the gateway's checkout widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub payment_id: i64,
    pub invoice_number: String,
    pub gateway_order_ref: String,
    pub amount_minor: i64,
    pub currency: String,
    /// Public key id; not a secret.
    pub key_id: Option<String>,
}

/// Signed callback fields as received from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCallback {
    pub order_ref: String,
    pub payment_ref: String,
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct Settlement {
    pub payment: Payment,
    /// Set on the initial path: the order, now approved.
    pub order: Option<Order>,
    pub subscription: Subscription,
}

// ---------------------------------------------------------------------------
// Transaction-scoped helpers
// ---------------------------------------------------------------------------

pub(crate) async fn insert_initial(
    conn: &mut PgConnection,
    order: &Order,
    invoice_number: &str,
    now: DateTime<Utc>,
) -> RentalResult<Payment> {
    sqlx::query_as::<_, Payment>(
        r#"
        insert into payments (
          order_id, customer_id, amount, status, payment_type, invoice_number, notes,
          created_at, updated_at
        ) values ($1, $2, $3, 'pending', 'initial', $4, 'Initial payment for order', $5, $5)
        returning *
        "#,
    )
    .bind(order.id)
    .bind(order.customer_id)
    .bind(order.total_initial_amount)
    .bind(invoice_number)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("payments.insert_initial"))
}

/// Pending monthly row for the billing date currently due.
async fn insert_monthly(
    conn: &mut PgConnection,
    sub: &Subscription,
    now: DateTime<Utc>,
) -> RentalResult<Payment> {
    sqlx::query_as::<_, Payment>(
        r#"
        insert into payments (
          subscription_id, customer_id, amount, status, payment_type, invoice_number, notes,
          created_at, updated_at
        ) values ($1, $2, $3, 'pending', 'monthly', $4, $5, $6, $6)
        returning *
        "#,
    )
    .bind(sub.id)
    .bind(sub.customer_id)
    .bind(sub.monthly_rent)
    .bind(monthly_invoice_number(sub.id, sub.next_billing_date))
    .bind(format!(
        "Monthly payment for subscription #{} due {}",
        sub.id,
        sub.next_billing_date.format("%Y-%m-%d")
    ))
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("payments.insert_monthly"))
}

fn pending_query(target: PaymentTarget, for_update: bool) -> (String, i64) {
    let (filter, id) = match target {
        PaymentTarget::Initial { order_id } => (
            "order_id = $1 and payment_type = 'initial' and status = 'pending'",
            order_id,
        ),
        PaymentTarget::Monthly { subscription_id } => (
            "subscription_id = $1 and payment_type = 'monthly' and status = 'pending'",
            subscription_id,
        ),
    };
    let lock = if for_update { " for update" } else { "" };
    (
        format!("select * from payments where {filter} order by id desc limit 1{lock}"),
        id,
    )
}

async fn lock_pending(
    conn: &mut PgConnection,
    target: PaymentTarget,
) -> RentalResult<Option<Payment>> {
    let (sql, id) = pending_query(target, true);
    sqlx::query_as::<_, Payment>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("payments.lock_pending"))
}

/// Unlocked pre-check before the gateway call; the write path re-reads
/// under `lock_pending`.
async fn find_pending(pool: &PgPool, target: PaymentTarget) -> RentalResult<Option<Payment>> {
    let (sql, id) = pending_query(target, false);
    sqlx::query_as::<_, Payment>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("payments.find_pending"))
}

/// Marks the order's pending initial payment as failed, if there is one.
pub(crate) async fn fail_pending_initial(
    conn: &mut PgConnection,
    order_id: i64,
    now: DateTime<Utc>,
) -> RentalResult<Option<Payment>> {
    let Some(p) = lock_pending(conn, PaymentTarget::Initial { order_id }).await? else {
        return Ok(None);
    };
    payment::check_transition(p.status, PaymentStatus::Failed)?;

    let failed = sqlx::query_as::<_, Payment>(
        "update payments set status = 'failed', updated_at = $2 where id = $1 returning *",
    )
    .bind(p.id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("payments.fail"))?;
    Ok(Some(failed))
}

/// Records the gateway order ref unless one is already present.
async fn attach_gateway_ref(
    conn: &mut PgConnection,
    payment_id: i64,
    order_ref: &str,
    now: DateTime<Utc>,
) -> RentalResult<Payment> {
    sqlx::query_as::<_, Payment>(
        r#"
        update payments
           set gateway_order_ref = coalesce(gateway_order_ref, $2),
               payment_details = coalesce(payment_details, $3),
               updated_at = $4
         where id = $1
        returning *
        "#,
    )
    .bind(payment_id)
    .bind(order_ref)
    .bind(checkout_details(order_ref))
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("payments.attach_gateway_ref"))
}

async fn settle(
    conn: &mut PgConnection,
    p: &Payment,
    cb: &GatewayCallback,
    method: &str,
    now: DateTime<Utc>,
) -> RentalResult<Payment> {
    if let Some(expected) = p.gateway_order_ref.as_deref() {
        if expected != cb.order_ref {
            return Err(RentalError::Validation(format!(
                "gateway order ref does not match payment {}",
                p.id
            )));
        }
    }
    payment::check_transition(p.status, PaymentStatus::Success)?;

    sqlx::query_as::<_, Payment>(
        r#"
        update payments
           set status = 'success',
               payment_method = $2,
               gateway_order_ref = $3,
               gateway_payment_ref = $4,
               payment_details = $5,
               paid_at = $6,
               updated_at = $6
         where id = $1
        returning *
        "#,
    )
    .bind(p.id)
    .bind(method)
    .bind(&cb.order_ref)
    .bind(&cb.payment_ref)
    .bind(settlement_details(&cb.order_ref, &cb.payment_ref, &cb.signature))
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("payments.settle"))
}

fn checkout_for(p: &Payment, order_ref: String, currency: &str, key_id: Option<&str>) -> Checkout {
    Checkout {
        payment_id: p.id,
        invoice_number: p.invoice_number.clone(),
        gateway_order_ref: order_ref,
        amount_minor: p.amount,
        currency: currency.to_string(),
        key_id: key_id.map(str::to_string),
    }
}

fn customer_only(customer_id: i64) -> Resource {
    Resource::Owned(Ownership {
        customer_id,
        franchise_owner_id: None,
        agent_id: None,
    })
}

fn require_pending_order(o: &Order) -> RentalResult<()> {
    if o.status == OrderStatus::Pending {
        Ok(())
    } else {
        Err(RentalError::InvalidState(format!(
            "order {} is {}, payment can only be opened while pending",
            o.id,
            o.status.as_str()
        )))
    }
}

fn require_active_subscription(s: &Subscription) -> RentalResult<()> {
    if s.status == SubscriptionStatus::Active {
        Ok(())
    } else {
        Err(RentalError::InvalidState(format!(
            "subscription {} is {}",
            s.id,
            s.status.as_str()
        )))
    }
}

async fn open_gateway_order(
    gateway: &dyn GatewayClient,
    target: PaymentTarget,
    receipt: String,
    customer_id: i64,
    amount_minor: i64,
    currency: &str,
) -> RentalResult<String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("customer_id".to_string(), customer_id.to_string());
    match target {
        PaymentTarget::Initial { order_id } => {
            metadata.insert("order_id".to_string(), order_id.to_string());
        }
        PaymentTarget::Monthly { subscription_id } => {
            metadata.insert("subscription_id".to_string(), subscription_id.to_string());
        }
    }
    metadata.insert(
        "payment_type".to_string(),
        target.payment_type().as_str().to_string(),
    );

    let req = GatewayOrderRequest {
        amount_minor,
        currency: currency.to_string(),
        receipt,
        metadata,
    };

    let created = gateway.create_order(&req).await.map_err(|err| {
        tracing::warn!(gateway = gateway.name(), receipt = %req.receipt, error = %err, "gateway create_order failed");
        RentalError::Gateway(err.to_string())
    })?;
    Ok(created.order_ref)
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Franchise and agent behind a payment, through its order or subscription.
async fn ownership(conn: &mut PgConnection, p: &Payment) -> RentalResult<Ownership> {
    let (franchise_id, agent_id): (Option<i64>, Option<i64>) = sqlx::query_as(
        r#"
        select coalesce(o.franchise_id, s.franchise_id),
               coalesce(s.service_agent_id, o.service_agent_id)
          from payments p
          left join orders o on o.id = p.order_id
          left join subscriptions s on s.id = p.subscription_id
         where p.id = $1
        "#,
    )
    .bind(p.id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("payments.ownership"))?;

    let franchise_owner_id = match franchise_id {
        Some(fid) => directory::franchise_owner(conn, fid).await?,
        None => None,
    };
    Ok(Ownership {
        customer_id: p.customer_id,
        franchise_owner_id,
        agent_id,
    })
}

/// Unscoped; role-checked reads go through [`view`] and [`history`].
pub async fn list_for_order(pool: &PgPool, order_id: i64) -> RentalResult<Vec<Payment>> {
    sqlx::query_as::<_, Payment>("select * from payments where order_id = $1 order by id")
        .bind(order_id)
        .fetch_all(pool)
        .await
        .map_err(db_err("payments.list_for_order"))
}

pub async fn list_for_subscription(pool: &PgPool, subscription_id: i64) -> RentalResult<Vec<Payment>> {
    sqlx::query_as::<_, Payment>("select * from payments where subscription_id = $1 order by id")
        .bind(subscription_id)
        .fetch_all(pool)
        .await
        .map_err(db_err("payments.list_for_subscription"))
}

/// A single payment, visible to its customer, the franchise owner it is
/// booked under, the agent on its subscription, and admins.
pub async fn view(pool: &PgPool, actor: &Actor, id: i64) -> RentalResult<Payment> {
    let mut conn = pool.acquire().await.map_err(db_err("payments.view"))?;
    let p = sqlx::query_as::<_, Payment>("select * from payments where id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("payments.view"))?
        .ok_or_else(|| RentalError::not_found("payment", id))?;
    let owner = ownership(&mut conn, &p).await?;
    authorize(actor, &Resource::Owned(owner), Action::View)?;
    Ok(p)
}

/// Newest-first payment history scoped to the actor's role. Agents have
/// no payment history.
pub async fn history(pool: &PgPool, actor: &Actor, limit: i64) -> RentalResult<Vec<Payment>> {
    let limit = page_limit(limit)?;
    let query = match ViewScope::for_actor(actor) {
        ViewScope::All => sqlx::query_as::<_, Payment>(
            "select * from payments order by created_at desc, id desc limit $1",
        )
        .bind(limit),
        ViewScope::FranchiseOwner(owner_id) => sqlx::query_as::<_, Payment>(
            r#"
            select p.* from payments p
              left join orders o on o.id = p.order_id
              left join subscriptions s on s.id = p.subscription_id
             where o.franchise_id in (select id from franchises where owner_id = $1)
                or s.franchise_id in (select id from franchises where owner_id = $1)
             order by p.created_at desc, p.id desc
             limit $2
            "#,
        )
        .bind(owner_id)
        .bind(limit),
        ViewScope::Customer(customer_id) => sqlx::query_as::<_, Payment>(
            r#"
            select * from payments
             where customer_id = $1
             order by created_at desc, id desc
             limit $2
            "#,
        )
        .bind(customer_id)
        .bind(limit),
        ViewScope::Agent(_) => {
            return Err(RentalError::PermissionDenied(
                "service_agent may not view payment history".into(),
            ))
        }
    };
    query.fetch_all(pool).await.map_err(db_err("payments.history"))
}

/// Opens (or reuses) a gateway checkout for the order's initial payment.
pub async fn generate_initial(
    pool: &PgPool,
    gateway: &dyn GatewayClient,
    actor: &Actor,
    order_id: i64,
    currency: &str,
    key_id: Option<&str>,
    now: DateTime<Utc>,
) -> RentalResult<Checkout> {
    let target = PaymentTarget::Initial { order_id };

    let order = orders::get(pool, order_id).await?;
    authorize(actor, &customer_only(order.customer_id), Action::ActAsCustomer)?;
    require_pending_order(&order)?;

    let pending = find_pending(pool, target).await?.ok_or_else(|| {
        RentalError::InvalidState(format!("order {order_id} has no pending initial payment"))
    })?;
    if let Some(existing) = pending.gateway_order_ref.clone() {
        return Ok(checkout_for(&pending, existing, currency, key_id));
    }

    let order_ref = open_gateway_order(
        gateway,
        target,
        initial_receipt(order_id),
        order.customer_id,
        pending.amount,
        currency,
    )
    .await?;

    let mut tx = pool.begin().await.map_err(db_err("payments.generate_initial"))?;
    let order = orders::lock(&mut tx, order_id).await?;
    require_pending_order(&order)?;
    let pending = lock_pending(&mut tx, target).await?.ok_or_else(|| {
        RentalError::InvalidState(format!("order {order_id} has no pending initial payment"))
    })?;
    let p = attach_gateway_ref(&mut tx, pending.id, &order_ref, now).await?;
    tx.commit().await.map_err(db_err("payments.generate_initial"))?;

    let stored = p.gateway_order_ref.clone().unwrap_or(order_ref);
    tracing::info!(order_id, payment_id = p.id, gateway_order_ref = %stored, "initial checkout opened");
    Ok(checkout_for(&p, stored, currency, key_id))
}

/// Opens (or reuses) a gateway checkout for the subscription's next rent.
pub async fn generate_monthly(
    pool: &PgPool,
    gateway: &dyn GatewayClient,
    actor: &Actor,
    subscription_id: i64,
    currency: &str,
    key_id: Option<&str>,
    now: DateTime<Utc>,
) -> RentalResult<Checkout> {
    let target = PaymentTarget::Monthly { subscription_id };

    let sub = subscriptions::get(pool, subscription_id).await?;
    authorize(actor, &customer_only(sub.customer_id), Action::ActAsCustomer)?;
    require_active_subscription(&sub)?;

    let pending = find_pending(pool, target).await?;
    if let Some(p) = &pending {
        if let Some(existing) = p.gateway_order_ref.clone() {
            return Ok(checkout_for(p, existing, currency, key_id));
        }
    }
    let amount = pending.as_ref().map(|p| p.amount).unwrap_or(sub.monthly_rent);

    let order_ref = open_gateway_order(
        gateway,
        target,
        monthly_receipt(subscription_id, sub.next_billing_date),
        sub.customer_id,
        amount,
        currency,
    )
    .await?;

    let mut tx = pool.begin().await.map_err(db_err("payments.generate_monthly"))?;
    let sub = subscriptions::lock(&mut tx, subscription_id).await?;
    require_active_subscription(&sub)?;
    let row = match lock_pending(&mut tx, target).await? {
        Some(p) => p,
        None => insert_monthly(&mut tx, &sub, now).await?,
    };
    let p = attach_gateway_ref(&mut tx, row.id, &order_ref, now).await?;
    tx.commit().await.map_err(db_err("payments.generate_monthly"))?;

    let stored = p.gateway_order_ref.clone().unwrap_or(order_ref);
    tracing::info!(subscription_id, payment_id = p.id, gateway_order_ref = %stored, "monthly checkout opened");
    Ok(checkout_for(&p, stored, currency, key_id))
}

/// Verifies a signed gateway callback and settles the payment it refers to.
///
/// A bad signature is rejected before any database access. On the initial
/// path the order must still be pending; settlement approves it and creates
/// the subscription. On the monthly path the pending row is settled (or
/// created settled when the checkout was opened elsewhere) and the billing
/// date moves forward one interval.
#[allow(clippy::too_many_arguments)]
pub async fn verify(
    pool: &PgPool,
    signer: &PaymentSigner,
    method: &str,
    actor: &Actor,
    cb: &GatewayCallback,
    target: PaymentTarget,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> RentalResult<Settlement> {
    if !signer.verify(&cb.order_ref, &cb.payment_ref, &cb.signature) {
        tracing::warn!(
            gateway_order_ref = %cb.order_ref,
            gateway_payment_ref = %cb.payment_ref,
            "payment callback signature rejected"
        );
        return Err(RentalError::InvalidSignature);
    }

    let mut tx = pool.begin().await.map_err(db_err("payments.verify"))?;

    let settlement = match target {
        PaymentTarget::Initial { order_id } => {
            let order = orders::lock(&mut tx, order_id).await?;
            authorize(actor, &customer_only(order.customer_id), Action::ActAsCustomer)?;
            if order.status != OrderStatus::Pending {
                return Err(RentalError::Conflict(format!(
                    "order {order_id} is {}, not pending",
                    order.status.as_str()
                )));
            }

            let pending = lock_pending(&mut tx, target).await?.ok_or_else(|| {
                RentalError::InvalidState(format!("order {order_id} has no pending initial payment"))
            })?;
            let paid = settle(&mut tx, &pending, cb, method, now).await?;
            let (approved, sub) = orders::approve_in_tx(&mut tx, order_id, policy, now).await?;

            Settlement {
                payment: paid,
                order: Some(approved),
                subscription: sub,
            }
        }
        PaymentTarget::Monthly { subscription_id } => {
            let sub = subscriptions::lock(&mut tx, subscription_id).await?;
            authorize(actor, &customer_only(sub.customer_id), Action::ActAsCustomer)?;

            let row = match lock_pending(&mut tx, target).await? {
                Some(p) => p,
                None => insert_monthly(&mut tx, &sub, now).await?,
            };
            let paid = settle(&mut tx, &row, cb, method, now).await?;
            let advanced = subscriptions::advance_billing(&mut tx, &sub, policy, now).await?;

            Settlement {
                payment: paid,
                order: None,
                subscription: advanced,
            }
        }
    };

    notifications::insert_all(
        &mut tx,
        &[notify::payment_succeeded(
            settlement.payment.customer_id,
            settlement.payment.id,
            settlement.payment.payment_type,
        )],
        now,
    )
    .await?;

    tx.commit().await.map_err(db_err("payments.verify"))?;

    tracing::info!(
        payment_id = settlement.payment.id,
        payment_type = settlement.payment.payment_type.as_str(),
        subscription_id = settlement.subscription.id,
        next_billing_date = %settlement.subscription.next_billing_date,
        "payment verified"
    );
    Ok(settlement)
}
