use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use club_treasury::authz::CATALOG;
use club_treasury::utils::hash_password;

#[derive(Parser, Debug)]
#[command(author, version, about = "club-treasury admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Create an organization administrator holding every permission
    Bootstrap {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Administrator")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may
    // differ, so fall back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::Bootstrap { email, password, name } => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            bootstrap_admin(&pool, &email, &password, &name).await?;
        }
    }

    Ok(())
}

/// Seed an "org_admin" role carrying the whole permission catalog and assign
/// it globally to a fresh user. Idempotent on the role; fails if the email is
/// already taken.
async fn bootstrap_admin(pool: &SqlitePool, email: &str, password: &str, name: &str) -> anyhow::Result<()> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        anyhow::bail!("a user with email {} already exists", email);
    }

    let now = Utc::now().to_rfc3339();
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut tx = pool.begin().await?;

    let user_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(name)
    .bind(email)
    .bind(&password_hash)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let role_id: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE name = 'org_admin'")
        .fetch_optional(&mut *tx)
        .await?;

    let role_id = match role_id {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, 'org_admin', 'Organization administrator', ?, ?)",
            )
            .bind(&id)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            for (permission, _) in CATALOG {
                sqlx::query(
                    "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) \
                     SELECT ?, id, ? FROM permissions WHERE name = ?",
                )
                .bind(&id)
                .bind(&now)
                .bind(permission)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                "INSERT INTO group_roles (role_id, group_id, is_global, created_at) VALUES (?, NULL, 1, ?)",
            )
            .bind(&id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            id
        }
    };

    sqlx::query(
        "INSERT INTO user_roles (id, user_id, role_id, group_id, is_global, created_at) VALUES (?, ?, ?, NULL, 1, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(&role_id)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    println!("Created administrator {} ({})", name, email);
    Ok(())
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    sqlx::migrate::Migrator::new(dir)
        .await
        .context("failed to load migrations")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .unwrap_or_default();

    for migration in migrator.iter() {
        let state = if applied.contains(&migration.version) { "applied" } else { "pending" };
        println!("{:>14}  {}  {}", migration.version, state, migration.description);
    }

    Ok(())
}
