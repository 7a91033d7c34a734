use anyhow::{Context, Result};
use aqua_db::OrderStatusChange;
use aqua_domain::OrderStatus;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "aqua")]
#[command(about = "Water purifier rental operations CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> environment overlay ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Payment gateway utilities
    Payment {
        #[command(subcommand)]
        cmd: PaymentCmd,
    },

    /// Back-office order commands
    Order {
        #[command(subcommand)]
        cmd: OrderCmd,
    },

    /// Subscription commands
    Subscription {
        #[command(subcommand)]
        cmd: SubscriptionCmd,
    },

    /// Notification inbox
    Notifications {
        #[command(subcommand)]
        cmd: NotificationsCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,

    /// Insert a demo franchise, staff, customer and product; prints their ids.
    SeedDemo,
}

#[derive(Subcommand)]
enum PaymentCmd {
    /// Compute the callback signature for an (order ref, payment ref) pair
    /// with the configured gateway secret.
    Sign {
        #[arg(long)]
        order_ref: String,

        #[arg(long)]
        payment_ref: String,

        /// Layered config paths in merge order (defaults when omitted)
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum OrderCmd {
    /// Move an order to a new status
    SetStatus {
        #[arg(long)]
        order_id: i64,

        /// pending | approved | rejected | in_transit | delivered | installed | cancelled | completed
        #[arg(long)]
        status: String,

        /// Acting user id
        #[arg(long = "as-user")]
        as_user: i64,

        /// admin | franchise_owner
        #[arg(long, default_value = "admin")]
        role: String,

        /// Service agent to attach to the order
        #[arg(long)]
        agent_id: Option<i64>,

        /// Note appended to the order
        #[arg(long)]
        note: Option<String>,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SubscriptionCmd {
    /// Pause until a future instant (RFC 3339)
    Pause {
        #[arg(long)]
        subscription_id: i64,

        #[arg(long)]
        until: String,

        #[arg(long = "as-user")]
        as_user: i64,

        #[arg(long, default_value = "admin")]
        role: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Resume a paused subscription
    Resume {
        #[arg(long)]
        subscription_id: i64,

        #[arg(long = "as-user")]
        as_user: i64,

        #[arg(long, default_value = "admin")]
        role: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum NotificationsCmd {
    /// Most recent notifications for a user
    List {
        #[arg(long)]
        user: i64,

        #[arg(long, default_value_t = false)]
        unread: bool,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience); production injects env vars.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = aqua_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = aqua_db::status(&pool).await?;
                    println!("db_ok={} has_orders_table={}", s.ok, s.has_orders_table);
                }
                DbCmd::Migrate => {
                    aqua_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
                DbCmd::SeedDemo => {
                    let ids = commands::seed::seed_demo(&pool).await?;
                    println!("admin_id={}", ids.admin_id);
                    println!("franchise_owner_id={}", ids.owner_id);
                    println!("service_agent_id={}", ids.agent_id);
                    println!("customer_id={}", ids.customer_id);
                    println!("franchise_id={}", ids.franchise_id);
                    println!("product_id={}", ids.product_id);
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = aqua_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Payment { cmd } => match cmd {
            PaymentCmd::Sign {
                order_ref,
                payment_ref,
                config_paths,
            } => {
                let (_, secrets) = commands::load_config(&config_paths)?;
                let signer = commands::signer(&secrets)?;
                println!("order_ref={}", order_ref);
                println!("payment_ref={}", payment_ref);
                println!("signature={}", signer.sign(&order_ref, &payment_ref));
            }
        },

        Commands::Order { cmd } => match cmd {
            OrderCmd::SetStatus {
                order_id,
                status,
                as_user,
                role,
                agent_id,
                note,
                config_paths,
            } => {
                let actor = commands::actor(as_user, &role)?;
                let status = OrderStatus::parse(status.trim()).context("invalid --status")?;
                let core = commands::build_core(&config_paths).await?;

                let change = OrderStatusChange {
                    status,
                    agent_id,
                    notes: note,
                };
                let o = core.update_order_status(&actor, order_id, &change).await?;
                println!("order_id={}", o.id);
                println!("status={}", o.status.as_str());
                println!(
                    "service_agent_id={}",
                    o.service_agent_id.map(|v| v.to_string()).unwrap_or_default()
                );
                println!("notes={}", o.notes.unwrap_or_default());

                if o.status == OrderStatus::Approved {
                    if let Some(s) = aqua_db::subscriptions::find_by_order(core.pool(), o.id).await? {
                        println!("subscription_id={}", s.id);
                        println!("end_date={}", s.end_date.to_rfc3339());
                    }
                }
            }
        },

        Commands::Subscription { cmd } => match cmd {
            SubscriptionCmd::Pause {
                subscription_id,
                until,
                as_user,
                role,
                config_paths,
            } => {
                let actor = commands::actor(as_user, &role)?;
                let until: DateTime<Utc> = DateTime::parse_from_rfc3339(until.trim())
                    .context("--until must be RFC 3339, e.g. 2025-07-01T00:00:00Z")?
                    .with_timezone(&Utc);
                let core = commands::build_core(&config_paths).await?;

                let s = core.pause_subscription(&actor, subscription_id, until).await?;
                println!("subscription_id={} status={}", s.id, s.status.as_str());
                println!("end_date={}", s.end_date.to_rfc3339());
            }

            SubscriptionCmd::Resume {
                subscription_id,
                as_user,
                role,
                config_paths,
            } => {
                let actor = commands::actor(as_user, &role)?;
                let core = commands::build_core(&config_paths).await?;

                let s = core.resume_subscription(&actor, subscription_id).await?;
                println!("subscription_id={} status={}", s.id, s.status.as_str());
                println!("end_date={}", s.end_date.to_rfc3339());
            }
        },

        Commands::Notifications { cmd } => match cmd {
            NotificationsCmd::List {
                user,
                unread,
                limit,
                config_paths,
            } => {
                let core = commands::build_core(&config_paths).await?;
                let items = core.notifications_for(user, unread, limit).await?;
                println!("count={}", items.len());
                for n in items {
                    let line = serde_json::json!({
                        "id": n.id,
                        "kind": n.kind.as_str(),
                        "title": n.title,
                        "message": n.message,
                        "related": n.related,
                        "is_read": n.is_read,
                        "created_at": n.created_at.to_rfc3339(),
                    });
                    println!("{}", line);
                }
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
