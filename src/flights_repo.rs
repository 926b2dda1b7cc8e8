use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::dsl::max;
use diesel::prelude::*;

use crate::db::PgPool;
use crate::flights::{ArchivedFlight, Flight};

#[derive(Clone)]
pub struct FlightsRepository {
    pool: PgPool,
}

impl FlightsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a tick's worth of flight samples inside the caller's
    /// transaction. The conflict target is the full sample key
    /// (callsign, logon_time, last_updated), so re-ingesting an identical
    /// snapshot changes nothing.
    pub fn upsert_batch(conn: &mut PgConnection, samples: &[Flight]) -> QueryResult<usize> {
        use crate::schema::flights;

        if samples.is_empty() {
            return Ok(0);
        }

        diesel::insert_into(flights::table)
            .values(samples)
            .on_conflict((
                flights::callsign,
                flights::logon_time,
                flights::last_updated,
            ))
            .do_nothing()
            .execute(conn)
    }

    /// Latest sample of every live connection, for the read API.
    pub async fn latest_samples(&self) -> Result<Vec<Flight>> {
        use crate::schema::flights::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flights
                .distinct_on((callsign, logon_time))
                .order((callsign.asc(), logon_time.asc(), last_updated.desc()))
                .load::<Flight>(&mut conn)?;
            Ok::<Vec<Flight>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Full sample history of one connection, oldest first.
    pub async fn samples_for_connection(
        &self,
        callsign_param: &str,
        logon_time_param: DateTime<Utc>,
    ) -> Result<Vec<Flight>> {
        use crate::schema::flights::dsl::*;

        let pool = self.pool.clone();
        let callsign_param = callsign_param.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flights
                .filter(callsign.eq(&callsign_param).and(logon_time.eq(logon_time_param)))
                .order(last_updated.asc())
                .load::<Flight>(&mut conn)?;
            Ok::<Vec<Flight>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Latest sample of one connection, inside the caller's transaction.
    pub fn latest_sample_in(
        conn: &mut PgConnection,
        callsign_param: &str,
        logon_time_param: DateTime<Utc>,
    ) -> QueryResult<Option<Flight>> {
        use crate::schema::flights::dsl::*;

        flights
            .filter(callsign.eq(callsign_param).and(logon_time.eq(logon_time_param)))
            .order(last_updated.desc())
            .first::<Flight>(conn)
            .optional()
    }

    /// Connections whose newest sample is older than the cutoff, i.e.
    /// eligible for summarization.
    pub async fn completed_connections(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>> {
        use crate::schema::flights::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let grouped = flights
                .group_by((callsign, logon_time))
                .select((callsign, logon_time, max(last_updated)))
                .load::<(String, DateTime<Utc>, Option<DateTime<Utc>>)>(&mut conn)?;
            let eligible = grouped
                .into_iter()
                .filter(|(_, _, newest)| newest.is_some_and(|t| t < cutoff))
                .map(|(cs, lt, _)| (cs, lt))
                .collect();
            Ok::<Vec<(String, DateTime<Utc>)>, anyhow::Error>(eligible)
        })
        .await??;

        Ok(result)
    }

    /// Copy one connection's sample rows to the archive and delete them from
    /// the live table, inside the caller's transaction. Returns the number
    /// of rows moved.
    pub fn archive_connection(
        conn: &mut PgConnection,
        callsign_param: &str,
        logon_time_param: DateTime<Utc>,
        archived_at: DateTime<Utc>,
    ) -> QueryResult<usize> {
        use crate::schema::{flights, flights_archive};

        let rows = flights::table
            .filter(
                flights::callsign
                    .eq(callsign_param)
                    .and(flights::logon_time.eq(logon_time_param)),
            )
            .load::<Flight>(conn)?;

        if rows.is_empty() {
            return Ok(0);
        }

        let archived: Vec<ArchivedFlight> = rows
            .into_iter()
            .map(|row| ArchivedFlight::from_flight(row, archived_at))
            .collect();
        let moved = diesel::insert_into(flights_archive::table)
            .values(&archived)
            .execute(conn)?;

        diesel::delete(
            flights::table.filter(
                flights::callsign
                    .eq(callsign_param)
                    .and(flights::logon_time.eq(logon_time_param)),
            ),
        )
        .execute(conn)?;

        Ok(moved)
    }

    pub async fn count(&self) -> Result<i64> {
        use crate::schema::flights::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let n = flights.count().get_result::<i64>(&mut conn)?;
            Ok::<i64, anyhow::Error>(n)
        })
        .await??;

        Ok(result)
    }

    pub async fn freshest_update(&self) -> Result<Option<DateTime<Utc>>> {
        use crate::schema::flights::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let newest = flights
                .select(max(last_updated))
                .first::<Option<DateTime<Utc>>>(&mut conn)?;
            Ok::<Option<DateTime<Utc>>, anyhow::Error>(newest)
        })
        .await??;

        Ok(result)
    }
}
