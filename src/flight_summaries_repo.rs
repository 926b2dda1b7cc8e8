use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::dsl::max;
use diesel::prelude::*;

use crate::db::PgPool;
use crate::flight_summaries::FlightSummary;

/// Optional filters for the read API's summary listing.
#[derive(Debug, Default, Clone)]
pub struct FlightSummaryFilter {
    pub callsign: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub completed_after: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[derive(Clone)]
pub struct FlightSummariesRepository {
    pool: PgPool,
}

impl FlightSummariesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a summary inside the caller's transaction (the same one that
    /// archives the flight's detail rows).
    pub fn insert_in(conn: &mut PgConnection, summary: &FlightSummary) -> QueryResult<usize> {
        use crate::schema::flight_summaries;

        diesel::insert_into(flight_summaries::table)
            .values(summary)
            .execute(conn)
    }

    pub async fn list(&self, filter: FlightSummaryFilter) -> Result<Vec<FlightSummary>> {
        use crate::schema::flight_summaries::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = flight_summaries.into_boxed();
            if let Some(callsign_filter) = &filter.callsign {
                query = query.filter(callsign.eq(callsign_filter.clone()));
            }
            if let Some(departure_filter) = &filter.departure {
                query = query.filter(departure.eq(departure_filter.clone()));
            }
            if let Some(arrival_filter) = &filter.arrival {
                query = query.filter(arrival.eq(arrival_filter.clone()));
            }
            if let Some(after) = filter.completed_after {
                query = query.filter(completion_time.ge(after));
            }

            let limit_rows = if filter.limit > 0 { filter.limit } else { 100 };
            let rows = query
                .order(completion_time.desc())
                .limit(limit_rows)
                .load::<FlightSummary>(&mut conn)?;
            Ok::<Vec<FlightSummary>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    pub async fn count(&self) -> Result<i64> {
        use crate::schema::flight_summaries::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let n = flight_summaries.count().get_result::<i64>(&mut conn)?;
            Ok::<i64, anyhow::Error>(n)
        })
        .await??;

        Ok(result)
    }

    pub async fn newest_completion_time(&self) -> Result<Option<DateTime<Utc>>> {
        use crate::schema::flight_summaries::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let newest = flight_summaries
                .select(max(completion_time))
                .first::<Option<DateTime<Utc>>>(&mut conn)?;
            Ok::<Option<DateTime<Utc>>, anyhow::Error>(newest)
        })
        .await??;

        Ok(result)
    }
}
