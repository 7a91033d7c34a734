//! `aqua db seed-demo`: one franchise with staff, a customer and a product.

use anyhow::Result;
use aqua_db::directory::{self, NewProduct, NewUser};
use aqua_domain::Role;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct DemoIds {
    pub admin_id: i64,
    pub owner_id: i64,
    pub agent_id: i64,
    pub customer_id: i64,
    pub franchise_id: i64,
    pub product_id: i64,
}

async fn demo_user(
    pool: &PgPool,
    tag: &str,
    name: &str,
    role: Role,
    franchise_id: Option<i64>,
) -> Result<i64> {
    directory::insert_user(
        pool,
        &NewUser {
            name: name.to_string(),
            email: format!("{}+{tag}@demo.aqua", role.as_str()),
            role,
            franchise_id,
        },
    )
    .await
}

pub async fn seed_demo(pool: &PgPool) -> Result<DemoIds> {
    // Emails are unique; a fresh tag lets the command run repeatedly.
    let tag = Uuid::new_v4().simple().to_string()[..8].to_string();

    let admin_id = demo_user(pool, &tag, "Demo Admin", Role::Admin, None).await?;
    let owner_id = demo_user(pool, &tag, "Demo Franchise Owner", Role::FranchiseOwner, None).await?;
    let franchise_id =
        directory::insert_franchise(pool, &format!("Demo Franchise {tag}"), Some(owner_id), true)
            .await?;
    directory::set_user_franchise(pool, owner_id, franchise_id).await?;
    let agent_id =
        demo_user(pool, &tag, "Demo Agent", Role::ServiceAgent, Some(franchise_id)).await?;
    let customer_id = demo_user(pool, &tag, "Demo Customer", Role::Customer, None).await?;

    let product_id = directory::insert_product(
        pool,
        &NewProduct {
            name: "AquaPure RO 8L".to_string(),
            monthly_rent: 49_900,
            security_deposit: 200_000,
            installation_fee: 50_000,
            is_active: true,
        },
    )
    .await?;

    tracing::info!(franchise_id, product_id, "demo data seeded");
    Ok(DemoIds {
        admin_id,
        owner_id,
        agent_id,
        customer_id,
        franchise_id,
        product_id,
    })
}
