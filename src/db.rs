use anyhow::{Context, Result};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use rand::RngExt;
use tracing::{info, warn};

use crate::config::AppConfig;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Applies the configured statement timeout to every connection handed out
/// by the pool, bounding outlier queries.
#[derive(Debug)]
struct StatementTimeout {
    millis: u64,
}

impl r2d2::CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!("SET statement_timeout = {}", self.millis))
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

pub fn build_pool(config: &AppConfig) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .max_size(config.pool_max_size())
        .connection_customizer(Box::new(StatementTimeout {
            millis: config.statement_timeout_secs * 1000,
        }))
        .build(manager)
        .context("Failed to build database connection pool")?;
    Ok(pool)
}

pub fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut conn = pool.get().context("Failed to get connection for migrations")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    if applied.is_empty() {
        info!("Database schema is up to date");
    } else {
        info!("Applied {} pending migrations", applied.len());
    }
    Ok(())
}

/// Whether a database error is worth retrying: serialization failures and
/// deadlocks resolve themselves on a re-run.
pub fn is_transient_error(error: &diesel::result::Error) -> bool {
    use diesel::result::{DatabaseErrorKind, Error};
    match error {
        Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => true,
        Error::DatabaseError(DatabaseErrorKind::Unknown, info) => {
            let message = info.message().to_ascii_lowercase();
            message.contains("deadlock") || message.contains("could not serialize")
        }
        _ => false,
    }
}

/// Run a blocking database operation, retrying transient failures with a
/// short random jitter. Non-transient errors propagate immediately.
pub fn with_transient_retry<T>(
    attempts: u32,
    label: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let transient = e
                    .downcast_ref::<diesel::result::Error>()
                    .is_some_and(is_transient_error);
                if !transient || attempt == attempts {
                    return Err(e);
                }
                let jitter_ms: u64 = rand::rng().random_range(50..500);
                warn!(
                    "Transient database error in {} (attempt {}/{}), retrying in {}ms: {}",
                    label, attempt, attempts, jitter_ms, e
                );
                metrics::counter!("db.transient_retry").increment(1);
                std::thread::sleep(std::time::Duration::from_millis(jitter_ms));
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("{} failed with no attempts run", label)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_error_is_not_transient() {
        let result: Result<()> = with_transient_retry(3, "test", || {
            Err(anyhow::anyhow!("plain failure"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_stops_after_success() {
        let mut calls = 0;
        let result = with_transient_retry(3, "test", || {
            calls += 1;
            Ok::<_, anyhow::Error>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_not_found_is_not_transient() {
        assert!(!is_transient_error(&diesel::result::Error::NotFound));
    }
}
