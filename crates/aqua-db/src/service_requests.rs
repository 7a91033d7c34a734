//! Service request workflow.

use aqua_domain::notify::{self, ServiceChange};
use aqua_domain::service::{self, resolve_next_status, validate_rating};
use aqua_domain::{
    authorize, Action, Actor, Ownership, RentalError, RentalResult, Resource, Role,
    ServiceRequestDraft, ServiceStatus, ServiceUpdate, SubscriptionStatus, ViewScope,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};

use crate::notifications::{self, NotificationPublisher};
use crate::{db_err, directory, page_limit, status_col, subscriptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub id: i64,
    pub subscription_id: i64,
    pub customer_id: i64,
    pub franchise_id: i64,
    pub service_agent_id: Option<i64>,
    pub request_type: String,
    pub description: String,
    pub status: ServiceStatus,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub rating: Option<i32>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ServiceRequest {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            subscription_id: row.try_get("subscription_id")?,
            customer_id: row.try_get("customer_id")?,
            franchise_id: row.try_get("franchise_id")?,
            service_agent_id: row.try_get("service_agent_id")?,
            request_type: row.try_get("request_type")?,
            description: row.try_get("description")?,
            status: status_col(row, "status", ServiceStatus::parse)?,
            scheduled_time: row.try_get("scheduled_time")?,
            completion_time: row.try_get("completion_time")?,
            notes: row.try_get("notes")?,
            rating: row.try_get("rating")?,
            feedback: row.try_get("feedback")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

async fn lock(conn: &mut PgConnection, id: i64) -> RentalResult<ServiceRequest> {
    sqlx::query_as::<_, ServiceRequest>("select * from service_requests where id = $1 for update")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("service_requests.lock"))?
        .ok_or_else(|| RentalError::not_found("service request", id))
}

async fn ownership(conn: &mut PgConnection, r: &ServiceRequest) -> RentalResult<Ownership> {
    Ok(Ownership {
        customer_id: r.customer_id,
        franchise_owner_id: directory::franchise_owner(conn, r.franchise_id).await?,
        agent_id: r.service_agent_id,
    })
}

async fn set_status(
    conn: &mut PgConnection,
    id: i64,
    status: ServiceStatus,
    now: DateTime<Utc>,
) -> RentalResult<ServiceRequest> {
    sqlx::query_as::<_, ServiceRequest>(
        "update service_requests set status = $2, updated_at = $3 where id = $1 returning *",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("service_requests.set_status"))
}

pub async fn get(pool: &PgPool, id: i64) -> RentalResult<ServiceRequest> {
    sqlx::query_as::<_, ServiceRequest>("select * from service_requests where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("service_requests.get"))?
        .ok_or_else(|| RentalError::not_found("service request", id))
}

/// A single request, visible to its customer, its franchise owner, the
/// assigned agent, and admins.
pub async fn view(pool: &PgPool, actor: &Actor, id: i64) -> RentalResult<ServiceRequest> {
    let mut conn = pool.acquire().await.map_err(db_err("service_requests.view"))?;
    let r = sqlx::query_as::<_, ServiceRequest>("select * from service_requests where id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("service_requests.view"))?
        .ok_or_else(|| RentalError::not_found("service request", id))?;
    let owner = ownership(&mut conn, &r).await?;
    authorize(actor, &Resource::Owned(owner), Action::View)?;
    Ok(r)
}

/// Newest-first requests scoped to the actor's role: franchise owners see
/// their franchises' requests, agents see what is assigned to them.
pub async fn list_visible(
    pool: &PgPool,
    actor: &Actor,
    limit: i64,
) -> RentalResult<Vec<ServiceRequest>> {
    let limit = page_limit(limit)?;
    let query = match ViewScope::for_actor(actor) {
        ViewScope::All => sqlx::query_as::<_, ServiceRequest>(
            "select * from service_requests order by created_at desc, id desc limit $1",
        )
        .bind(limit),
        ViewScope::FranchiseOwner(owner_id) => sqlx::query_as::<_, ServiceRequest>(
            r#"
            select * from service_requests
             where franchise_id in (select id from franchises where owner_id = $1)
             order by created_at desc, id desc
             limit $2
            "#,
        )
        .bind(owner_id)
        .bind(limit),
        ViewScope::Agent(agent_id) => sqlx::query_as::<_, ServiceRequest>(
            r#"
            select * from service_requests
             where service_agent_id = $1
             order by created_at desc, id desc
             limit $2
            "#,
        )
        .bind(agent_id)
        .bind(limit),
        ViewScope::Customer(customer_id) => sqlx::query_as::<_, ServiceRequest>(
            r#"
            select * from service_requests
             where customer_id = $1
             order by created_at desc, id desc
             limit $2
            "#,
        )
        .bind(customer_id)
        .bind(limit),
    };
    query.fetch_all(pool).await.map_err(db_err("service_requests.list"))
}

/// Open a request against the customer's own active subscription.
pub async fn create(
    pool: &PgPool,
    publisher: &dyn NotificationPublisher,
    actor: &Actor,
    draft: &ServiceRequestDraft,
    now: DateTime<Utc>,
) -> RentalResult<ServiceRequest> {
    draft.validate()?;

    let mut tx = pool.begin().await.map_err(db_err("service_requests.create"))?;

    let sub = subscriptions::lock(&mut tx, draft.subscription_id).await?;
    let owner = subscriptions::ownership(&mut tx, &sub).await?;
    authorize(actor, &Resource::Owned(owner), Action::ActAsCustomer)?;
    if sub.status != SubscriptionStatus::Active {
        return Err(RentalError::InvalidState(format!(
            "subscription {} is {}; service requests need an active subscription",
            sub.id,
            sub.status.as_str()
        )));
    }

    let created = sqlx::query_as::<_, ServiceRequest>(
        r#"
        insert into service_requests (
          subscription_id, customer_id, franchise_id, request_type, description, status,
          created_at, updated_at
        ) values ($1, $2, $3, $4, $5, 'pending', $6, $6)
        returning *
        "#,
    )
    .bind(sub.id)
    .bind(sub.customer_id)
    .bind(sub.franchise_id)
    .bind(draft.request_type.trim())
    .bind(draft.description.trim())
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err("service_requests.create"))?;

    let fanout = notify::service_request_created(sub.customer_id, owner.franchise_owner_id, created.id);
    notifications::insert_all(&mut tx, &fanout.critical, now).await?;

    tx.commit().await.map_err(db_err("service_requests.create"))?;

    tracing::info!(
        service_request_id = created.id,
        subscription_id = sub.id,
        request_type = %created.request_type,
        "service request created"
    );
    notifications::publish_best_effort(publisher, &fanout.informational).await;
    Ok(created)
}

/// Field update by staff, or withdrawal by the owning customer.
pub async fn update(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    upd: &ServiceUpdate,
    now: DateTime<Utc>,
) -> RentalResult<ServiceRequest> {
    if upd.is_empty() {
        return Err(RentalError::Validation("update carries no fields".into()));
    }

    let mut tx = pool.begin().await.map_err(db_err("service_requests.update"))?;

    let current = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &current).await?;

    if actor.role == Role::Customer {
        authorize(actor, &Resource::Owned(owner), Action::ActAsCustomer)?;
        if !upd.is_customer_withdrawal() {
            return Err(RentalError::PermissionDenied(
                "customers may only cancel their service request".into(),
            ));
        }
        if current.status != ServiceStatus::Pending {
            return Err(RentalError::InvalidState(format!(
                "service request {id} is {}; customers may only cancel pending requests",
                current.status.as_str()
            )));
        }
    } else {
        authorize(actor, &Resource::Owned(owner), Action::WorkServiceRequest)?;
        if let Some(agent_id) = upd.agent_id {
            authorize(actor, &Resource::Owned(owner), Action::AssignAgent)?;
            let restrict = (actor.role == Role::FranchiseOwner).then_some(current.franchise_id);
            directory::require_service_agent(&mut tx, agent_id, restrict).await?;
        }
    }

    let next = resolve_next_status(current.status, upd)?;
    let completion_time = upd.completion_time.or_else(|| {
        (next == Some(ServiceStatus::Completed) && current.completion_time.is_none()).then_some(now)
    });

    let updated = sqlx::query_as::<_, ServiceRequest>(
        r#"
        update service_requests
           set status = coalesce($2, status),
               service_agent_id = coalesce($3, service_agent_id),
               scheduled_time = coalesce($4, scheduled_time),
               completion_time = coalesce($5, completion_time),
               notes = coalesce($6, notes),
               updated_at = $7
         where id = $1
        returning *
        "#,
    )
    .bind(id)
    .bind(next.map(|s| s.as_str()))
    .bind(upd.agent_id)
    .bind(upd.scheduled_time)
    .bind(completion_time)
    .bind(&upd.notes)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err("service_requests.update"))?;

    let fanout = notify::service_request_updated(&ServiceChange {
        request_id: id,
        customer_id: current.customer_id,
        new_status: next,
        assigned_agent: upd.agent_id,
        scheduled_time: upd.scheduled_time,
    });
    notifications::insert_all(&mut tx, &fanout.critical, now).await?;

    tx.commit().await.map_err(db_err("service_requests.update"))?;

    tracing::info!(
        service_request_id = id,
        from = current.status.as_str(),
        to = updated.status.as_str(),
        agent_id = ?updated.service_agent_id,
        actor = actor.user_id,
        "service request updated"
    );
    Ok(updated)
}

/// Customer cancellation before the visit starts.
pub async fn cancel(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    now: DateTime<Utc>,
) -> RentalResult<ServiceRequest> {
    let mut tx = pool.begin().await.map_err(db_err("service_requests.cancel"))?;

    let current = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &current).await?;
    authorize(actor, &Resource::Owned(owner), Action::ActAsCustomer)?;
    service::check_transition(current.status, ServiceStatus::Cancelled)?;

    let updated = set_status(&mut tx, id, ServiceStatus::Cancelled, now).await?;
    let fanout = notify::service_request_cancelled(current.customer_id, current.service_agent_id, id);
    notifications::insert_all(&mut tx, &fanout.critical, now).await?;

    tx.commit().await.map_err(db_err("service_requests.cancel"))?;

    tracing::info!(service_request_id = id, from = current.status.as_str(), "service request cancelled");
    Ok(updated)
}

/// Rating (1–5) and free-text feedback on a completed request.
pub async fn submit_feedback(
    pool: &PgPool,
    actor: &Actor,
    id: i64,
    rating: i32,
    feedback: &str,
    now: DateTime<Utc>,
) -> RentalResult<ServiceRequest> {
    validate_rating(rating)?;

    let mut tx = pool.begin().await.map_err(db_err("service_requests.feedback"))?;

    let current = lock(&mut tx, id).await?;
    let owner = ownership(&mut tx, &current).await?;
    authorize(actor, &Resource::Owned(owner), Action::ActAsCustomer)?;
    if current.status != ServiceStatus::Completed {
        return Err(RentalError::InvalidState(format!(
            "feedback requires a completed request; service request {id} is {}",
            current.status.as_str()
        )));
    }

    let updated = sqlx::query_as::<_, ServiceRequest>(
        r#"
        update service_requests
           set rating = $2, feedback = $3, updated_at = $4
         where id = $1
        returning *
        "#,
    )
    .bind(id)
    .bind(rating)
    .bind(feedback)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err("service_requests.feedback"))?;

    if let Some(agent_id) = current.service_agent_id {
        notifications::insert_all(&mut tx, &[notify::feedback_received(agent_id, id, rating)], now)
            .await?;
    }

    tx.commit().await.map_err(db_err("service_requests.feedback"))?;

    tracing::info!(service_request_id = id, rating, "service feedback recorded");
    Ok(updated)
}
