use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use crate::controllers::{ArchivedController, Controller};
use crate::db::PgPool;

#[derive(Clone)]
pub struct ControllersRepository {
    pool: PgPool,
}

impl ControllersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a tick's worth of controller observations inside the caller's
    /// transaction. One row per connection: a matching (callsign, logon_time)
    /// refreshes the row, a reconnect inserts a new one.
    pub fn upsert_batch(conn: &mut PgConnection, observations: &[Controller]) -> QueryResult<usize> {
        use crate::schema::controllers;

        if observations.is_empty() {
            return Ok(0);
        }

        diesel::insert_into(controllers::table)
            .values(observations)
            .on_conflict((controllers::callsign, controllers::logon_time))
            .do_update()
            .set((
                controllers::name.eq(excluded(controllers::name)),
                controllers::rating.eq(excluded(controllers::rating)),
                controllers::facility.eq(excluded(controllers::facility)),
                controllers::visual_range.eq(excluded(controllers::visual_range)),
                controllers::text_atis.eq(excluded(controllers::text_atis)),
                controllers::frequency.eq(excluded(controllers::frequency)),
                controllers::server.eq(excluded(controllers::server)),
                controllers::last_updated.eq(excluded(controllers::last_updated)),
                controllers::updated_at.eq(excluded(controllers::updated_at)),
            ))
            .execute(conn)
    }

    /// Detector pre-filter: callsigns of controlling positions (facility != 0)
    /// observed at or after the window start. Keeping this narrow is what
    /// prevents the transceivers-to-controllers cross product.
    ///
    /// Flights are summarized hours after the controllers they talked to
    /// have been archived, so the archive is consulted alongside the live
    /// table.
    pub async fn active_controlling_callsigns_since(
        &self,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut names = {
                use crate::schema::controllers::dsl::*;
                controllers
                    .filter(facility.ne(0).and(last_updated.ge(window_start)))
                    .select(callsign)
                    .distinct()
                    .load::<String>(&mut conn)?
            };
            let archived = {
                use crate::schema::controllers_archive::dsl::*;
                controllers_archive
                    .filter(facility.ne(0).and(last_updated.ge(window_start)))
                    .select(callsign)
                    .distinct()
                    .load::<String>(&mut conn)?
            };

            names.extend(archived);
            names.sort();
            names.dedup();
            Ok::<Vec<String>, anyhow::Error>(names)
        })
        .await??;

        Ok(result)
    }

    /// Latest observation of every live connection, for the read API.
    pub async fn live_connections(&self) -> Result<Vec<Controller>> {
        use crate::schema::controllers::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = controllers
                .order(last_updated.desc())
                .load::<Controller>(&mut conn)?;
            Ok::<Vec<Controller>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Connections whose last observation is older than the threshold: their
    /// sessions have ended and may be summarized once the completion delay
    /// has also passed.
    pub async fn connections_ended_before(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<Controller>> {
        use crate::schema::controllers::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = controllers
                .filter(last_updated.lt(threshold))
                .order((callsign.asc(), logon_time.asc()))
                .load::<Controller>(&mut conn)?;
            Ok::<Vec<Controller>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Count of connections whose sessions have ended, inside the caller's
    /// transaction (sweeper reporting).
    pub fn count_ended_before_in(
        conn: &mut PgConnection,
        threshold: DateTime<Utc>,
    ) -> QueryResult<i64> {
        use crate::schema::controllers::dsl::*;

        controllers
            .filter(last_updated.lt(threshold))
            .count()
            .get_result::<i64>(conn)
    }

    /// All stored connections for one (callsign, CID), oldest logon first.
    /// The controller summarizer merges across these.
    pub async fn connections_for(
        &self,
        callsign_param: &str,
        cid_param: i32,
    ) -> Result<Vec<Controller>> {
        use crate::schema::controllers::dsl::*;

        let pool = self.pool.clone();
        let callsign_param = callsign_param.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = controllers
                .filter(callsign.eq(&callsign_param).and(cid.eq(cid_param)))
                .order(logon_time.asc())
                .load::<Controller>(&mut conn)?;
            Ok::<Vec<Controller>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Copy the given connections to the archive and delete them from the
    /// live table, inside the caller's transaction.
    pub fn archive_connections(
        conn: &mut PgConnection,
        rows: Vec<Controller>,
        archived_at: DateTime<Utc>,
    ) -> QueryResult<usize> {
        use crate::schema::{controllers, controllers_archive};

        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let archived: Vec<ArchivedController> = rows
            .into_iter()
            .map(|row| ArchivedController::from_controller(row, archived_at))
            .collect();

        let moved = diesel::insert_into(controllers_archive::table)
            .values(&archived)
            .execute(conn)?;

        diesel::delete(controllers::table.filter(controllers::id.eq_any(&ids))).execute(conn)?;

        Ok(moved)
    }

    pub async fn count(&self) -> Result<i64> {
        use crate::schema::controllers::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let n = controllers.count().get_result::<i64>(&mut conn)?;
            Ok::<i64, anyhow::Error>(n)
        })
        .await??;

        Ok(result)
    }

    pub async fn freshest_update(&self) -> Result<Option<DateTime<Utc>>> {
        use crate::schema::controllers::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let newest = controllers
                .select(max(last_updated))
                .first::<Option<DateTime<Utc>>>(&mut conn)?;
            Ok::<Option<DateTime<Utc>>, anyhow::Error>(newest)
        })
        .await??;

        Ok(result)
    }
}
