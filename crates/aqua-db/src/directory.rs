//! Reference data: users, franchises, products.
//!
//! The rental operations only read these tables. The insert helpers exist
//! for seeding and for tests.

use anyhow::{Context, Result};
use aqua_domain::{RentalError, RentalResult, Role};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};

use crate::{db_err, status_col};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub franchise_id: Option<i64>,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            role: status_col(row, "role", Role::parse)?,
            franchise_id: row.try_get("franchise_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Franchise {
    pub id: i64,
    pub name: String,
    pub owner_id: Option<i64>,
    pub is_active: bool,
}

impl<'r> FromRow<'r, PgRow> for Franchise {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner_id: row.try_get("owner_id")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub monthly_rent: i64,
    pub security_deposit: i64,
    pub installation_fee: i64,
    pub is_active: bool,
}

impl<'r> FromRow<'r, PgRow> for Product {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            monthly_rent: row.try_get("monthly_rent")?,
            security_deposit: row.try_get("security_deposit")?,
            installation_fee: row.try_get("installation_fee")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Reads (inside an operation's transaction)
// ---------------------------------------------------------------------------

pub(crate) async fn user(conn: &mut PgConnection, id: i64) -> RentalResult<Option<User>> {
    sqlx::query_as::<_, User>("select * from users where id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("directory.user"))
}

pub(crate) async fn franchise(conn: &mut PgConnection, id: i64) -> RentalResult<Option<Franchise>> {
    sqlx::query_as::<_, Franchise>("select * from franchises where id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("directory.franchise"))
}

pub(crate) async fn product(conn: &mut PgConnection, id: i64) -> RentalResult<Option<Product>> {
    sqlx::query_as::<_, Product>("select * from products where id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err("directory.product"))
}

/// Owner of a franchise, if the franchise exists and has one.
pub(crate) async fn franchise_owner(
    conn: &mut PgConnection,
    franchise_id: i64,
) -> RentalResult<Option<i64>> {
    Ok(franchise(conn, franchise_id).await?.and_then(|f| f.owner_id))
}

/// Agent being assigned to work inside `franchise_id`.
///
/// `restrict_to_franchise` is set when the assigner is a franchise owner:
/// owners may only hand work to their own staff.
pub(crate) async fn require_service_agent(
    conn: &mut PgConnection,
    agent_id: i64,
    restrict_to_franchise: Option<i64>,
) -> RentalResult<User> {
    let agent = user(conn, agent_id)
        .await?
        .filter(|u| u.role == Role::ServiceAgent)
        .ok_or_else(|| RentalError::Validation(format!("user {agent_id} is not a service agent")))?;

    if let Some(fid) = restrict_to_franchise {
        if agent.franchise_id != Some(fid) {
            return Err(RentalError::Validation(format!(
                "service agent {agent_id} does not belong to franchise {fid}"
            )));
        }
    }
    Ok(agent)
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub franchise_id: Option<i64>,
}

pub async fn insert_user(pool: &PgPool, u: &NewUser) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into users (name, email, role, franchise_id)
        values ($1, $2, $3, $4)
        returning id
        "#,
    )
    .bind(&u.name)
    .bind(&u.email)
    .bind(u.role.as_str())
    .bind(u.franchise_id)
    .fetch_one(pool)
    .await
    .context("insert_user failed")?;

    Ok(row.try_get("id")?)
}

/// Attach a user (agent or owner) to a franchise.
pub async fn set_user_franchise(pool: &PgPool, user_id: i64, franchise_id: i64) -> Result<()> {
    sqlx::query("update users set franchise_id = $2, updated_at = now() where id = $1")
        .bind(user_id)
        .bind(franchise_id)
        .execute(pool)
        .await
        .context("set_user_franchise failed")?;
    Ok(())
}

pub async fn insert_franchise(
    pool: &PgPool,
    name: &str,
    owner_id: Option<i64>,
    is_active: bool,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into franchises (name, owner_id, is_active)
        values ($1, $2, $3)
        returning id
        "#,
    )
    .bind(name)
    .bind(owner_id)
    .bind(is_active)
    .fetch_one(pool)
    .await
    .context("insert_franchise failed")?;

    Ok(row.try_get("id")?)
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub monthly_rent: i64,
    pub security_deposit: i64,
    pub installation_fee: i64,
    pub is_active: bool,
}

pub async fn insert_product(pool: &PgPool, p: &NewProduct) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into products (name, monthly_rent, security_deposit, installation_fee, is_active)
        values ($1, $2, $3, $4, $5)
        returning id
        "#,
    )
    .bind(&p.name)
    .bind(p.monthly_rent)
    .bind(p.security_deposit)
    .bind(p.installation_fee)
    .bind(p.is_active)
    .fetch_one(pool)
    .await
    .context("insert_product failed")?;

    Ok(row.try_get("id")?)
}
