//! Common test utilities for database-backed integration tests.
//!
//! `TestDatabase` creates a unique PostgreSQL database per test so tests can
//! run in parallel without interference; migrations run automatically and
//! the database is dropped when the struct goes out of scope.
//!
//! Tests using this helper are `#[ignore]`d by default: they need a running
//! PostgreSQL reachable through `TEST_DATABASE_URL`
//! (default `postgresql://localhost/vatstats_test`).

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

type PgPool = Pool<ConnectionManager<PgConnection>>;

pub struct TestDatabase {
    db_name: String,
    pool: PgPool,
    admin_url: String,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/vatstats_test".to_string());

        let (admin_url, db_name) = Self::generate_database_info(&base_url);

        Self::create_database(&admin_url, &db_name)
            .await
            .context("Failed to create test database")?;

        let test_db_url = Self::build_database_url(&base_url, &db_name);

        Self::run_migrations(&test_db_url)
            .await
            .context("Failed to run migrations")?;

        let manager = ConnectionManager::<PgConnection>::new(&test_db_url);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .with_context(|| format!("Failed to create connection pool for {}", db_name))?;

        Ok(TestDatabase {
            db_name,
            pool,
            admin_url,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.db_name
    }

    fn generate_database_info(base_url: &str) -> (String, String) {
        use rand::RngExt;
        let random_bytes: u64 = rand::rng().random();
        let db_name = format!("vatstats_test_{:016x}", random_bytes);
        let admin_url = base_url.replace("/vatstats_test", "/postgres");
        (admin_url, db_name)
    }

    fn build_database_url(base_url: &str, db_name: &str) -> String {
        base_url.replace("/vatstats_test", &format!("/{}", db_name))
    }

    async fn create_database(admin_url: &str, db_name: &str) -> Result<()> {
        let admin_url = admin_url.to_string();
        let db_name = db_name.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&admin_url).context(
                "Failed to connect to PostgreSQL for database creation. Is PostgreSQL running?",
            )?;

            // db_name is randomly generated hex, safe to interpolate
            diesel::sql_query(format!("CREATE DATABASE \"{}\"", db_name))
                .execute(&mut conn)
                .with_context(|| format!("Failed to create database '{}'", db_name))?;

            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("Database creation task panicked")?
    }

    async fn run_migrations(db_url: &str) -> Result<()> {
        let db_url = db_url.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&db_url)
                .context("Failed to connect to test database for migrations")?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("Migration task panicked")?
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let admin_url = self.admin_url.clone();
        let db_name = self.db_name.clone();

        // Best-effort cleanup; a leaked test database is noisy but harmless.
        if let Ok(mut conn) = PgConnection::establish(&admin_url) {
            let _ = diesel::sql_query(format!("DROP DATABASE \"{}\" WITH (FORCE)", db_name))
                .execute(&mut conn);
        }
    }
}
