use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::dsl::max;
use diesel::prelude::*;

use crate::controller_summaries::ControllerSummary;
use crate::db::PgPool;

#[derive(Debug, Default, Clone)]
pub struct ControllerSummaryFilter {
    pub callsign: Option<String>,
    pub cid: Option<i32>,
    pub ended_after: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[derive(Clone)]
pub struct ControllerSummariesRepository {
    pool: PgPool,
}

impl ControllerSummariesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a summary inside the caller's transaction (the same one that
    /// archives the session's connection rows).
    pub fn insert_in(conn: &mut PgConnection, summary: &ControllerSummary) -> QueryResult<usize> {
        use crate::schema::controller_summaries;

        diesel::insert_into(controller_summaries::table)
            .values(summary)
            .execute(conn)
    }

    pub async fn list(&self, filter: ControllerSummaryFilter) -> Result<Vec<ControllerSummary>> {
        use crate::schema::controller_summaries::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = controller_summaries.into_boxed();
            if let Some(callsign_filter) = &filter.callsign {
                query = query.filter(callsign.eq(callsign_filter.clone()));
            }
            if let Some(cid_filter) = filter.cid {
                query = query.filter(cid.eq(cid_filter));
            }
            if let Some(after) = filter.ended_after {
                query = query.filter(session_end_time.ge(after));
            }

            let limit_rows = if filter.limit > 0 { filter.limit } else { 100 };
            let rows = query
                .order(session_end_time.desc())
                .limit(limit_rows)
                .load::<ControllerSummary>(&mut conn)?;
            Ok::<Vec<ControllerSummary>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    pub async fn count(&self) -> Result<i64> {
        use crate::schema::controller_summaries::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let n = controller_summaries.count().get_result::<i64>(&mut conn)?;
            Ok::<i64, anyhow::Error>(n)
        })
        .await??;

        Ok(result)
    }

    pub async fn newest_session_end(&self) -> Result<Option<DateTime<Utc>>> {
        use crate::schema::controller_summaries::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let newest = controller_summaries
                .select(max(session_end_time))
                .first::<Option<DateTime<Utc>>>(&mut conn)?;
            Ok::<Option<DateTime<Utc>>, anyhow::Error>(newest)
        })
        .await??;

        Ok(result)
    }
}
