use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::prelude::*;

use crate::db::PgPool;
use crate::transceivers::{EntityType, Transceiver};

#[derive(Clone)]
pub struct TransceiversRepository {
    pool: PgPool,
}

impl TransceiversRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a tick's worth of transceiver samples inside the caller's
    /// transaction. Duplicate (callsign, transceiver_id, timestamp) samples
    /// are silently skipped, which makes identical snapshots idempotent.
    pub fn insert_batch(conn: &mut PgConnection, samples: &[Transceiver]) -> QueryResult<usize> {
        use crate::schema::transceivers;

        if samples.is_empty() {
            return Ok(0);
        }

        diesel::insert_into(transceivers::table)
            .values(samples)
            .on_conflict((
                transceivers::callsign,
                transceivers::transceiver_id,
                transceivers::timestamp,
            ))
            .do_nothing()
            .execute(conn)
    }

    /// A flight's transceiver samples within its window, oldest first.
    pub async fn flight_samples_in_window(
        &self,
        callsign_param: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Transceiver>> {
        use crate::schema::transceivers::dsl::*;

        let pool = self.pool.clone();
        let callsign_param = callsign_param.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers
                .filter(
                    entity_type
                        .eq(EntityType::Flight.as_str())
                        .and(callsign.eq(&callsign_param))
                        .and(timestamp.ge(window_start))
                        .and(timestamp.le(window_end)),
                )
                .order(timestamp.asc())
                .load::<Transceiver>(&mut conn)?;
            Ok::<Vec<Transceiver>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// ATC transceiver samples restricted to a pre-filtered candidate
    /// callsign set and a time window. This is the second step of the
    /// detector's two-step scan; it must never be joined against the full
    /// controllers table.
    pub async fn atc_samples_for_callsigns(
        &self,
        callsigns: &[String],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Transceiver>> {
        use crate::schema::transceivers::dsl::*;

        if callsigns.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.pool.clone();
        let callsigns = callsigns.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers
                .filter(
                    entity_type
                        .eq(EntityType::Atc.as_str())
                        .and(callsign.eq_any(&callsigns))
                        .and(timestamp.ge(window_start))
                        .and(timestamp.le(window_end)),
                )
                .order((callsign.asc(), timestamp.asc()))
                .load::<Transceiver>(&mut conn)?;
            Ok::<Vec<Transceiver>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Most recent sample per live callsign, for the read API.
    pub async fn latest_samples(&self) -> Result<Vec<Transceiver>> {
        use crate::schema::transceivers::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers
                .distinct_on((callsign, transceiver_id))
                .order((callsign.asc(), transceiver_id.asc(), timestamp.desc()))
                .load::<Transceiver>(&mut conn)?;
            Ok::<Vec<Transceiver>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Every flight-owned sample in a time window, for the controller
    /// summarizer's handled-aircraft scan.
    pub async fn flight_samples_between(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Transceiver>> {
        use crate::schema::transceivers::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers
                .filter(
                    entity_type
                        .eq(EntityType::Flight.as_str())
                        .and(timestamp.ge(window_start))
                        .and(timestamp.le(window_end)),
                )
                .order((callsign.asc(), timestamp.asc()))
                .load::<Transceiver>(&mut conn)?;
            Ok::<Vec<Transceiver>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    pub async fn count(&self) -> Result<i64> {
        use crate::schema::transceivers::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let n = transceivers.count().get_result::<i64>(&mut conn)?;
            Ok::<i64, anyhow::Error>(n)
        })
        .await??;

        Ok(result)
    }
}
