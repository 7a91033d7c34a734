//! Notification storage and delivery.
//!
//! Commit-critical drafts are inserted with [`insert_all`] on the caller's
//! transaction. Informational drafts go through a [`NotificationPublisher`]
//! after commit via [`publish_best_effort`]; failures there are logged and
//! swallowed.

use async_trait::async_trait;
use aqua_domain::{NotificationDraft, NotificationKind, RelatedEntity, RentalResult};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};

use crate::{db_err, page_limit, status_col};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub related: Option<RelatedEntity>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Notification {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let related_type: Option<String> = row.try_get("related_type")?;
        let related_id: Option<i64> = row.try_get("related_id")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            kind: status_col(row, "kind", NotificationKind::parse)?,
            related: match (related_type, related_id) {
                (Some(t), Some(id)) => RelatedEntity::from_parts(&t, id),
                _ => None,
            },
            is_read: row.try_get("is_read")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

async fn insert_one(
    conn: &mut PgConnection,
    d: &NotificationDraft,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into notifications (user_id, title, message, kind, related_type, related_id, created_at)
        values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(d.user_id)
    .bind(&d.title)
    .bind(&d.message)
    .bind(d.kind.as_str())
    .bind(d.related.map(|r| r.type_str()))
    .bind(d.related.map(|r| r.id()))
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert drafts on the caller's connection (normally an open transaction).
pub(crate) async fn insert_all(
    conn: &mut PgConnection,
    drafts: &[NotificationDraft],
    now: DateTime<Utc>,
) -> RentalResult<()> {
    for d in drafts {
        insert_one(conn, d, now)
            .await
            .map_err(db_err("notifications.insert"))?;
    }
    Ok(())
}

/// Most recent first.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: i64,
    unread_only: bool,
    limit: i64,
) -> RentalResult<Vec<Notification>> {
    let limit = page_limit(limit)?;
    sqlx::query_as::<_, Notification>(
        r#"
        select * from notifications
        where user_id = $1 and (not $2 or is_read = false)
        order by created_at desc, id desc
        limit $3
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(db_err("notifications.list"))
}

// ---------------------------------------------------------------------------
// Post-commit delivery
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, draft: &NotificationDraft) -> anyhow::Result<()>;
}

/// Publishes by inserting into the notifications table on its own connection.
#[derive(Debug, Clone)]
pub struct PgNotificationPublisher {
    pool: PgPool,
}

impl PgNotificationPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationPublisher for PgNotificationPublisher {
    async fn publish(&self, draft: &NotificationDraft) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_one(&mut *conn, draft, Utc::now()).await?;
        Ok(())
    }
}

pub async fn publish_best_effort(publisher: &dyn NotificationPublisher, drafts: &[NotificationDraft]) {
    for d in drafts {
        if let Err(err) = publisher.publish(d).await {
            tracing::warn!(
                user_id = d.user_id,
                title = %d.title,
                error = %err,
                "informational notification dropped"
            );
        }
    }
}
