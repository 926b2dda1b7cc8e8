use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::PgPool;
use crate::sector_occupancy::SectorOccupancy;

#[derive(Clone)]
pub struct SectorOccupancyRepository {
    pool: PgPool,
}

impl SectorOccupancyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a newly-opened interval inside the caller's transaction. The
    /// partial unique index guarantees at most one open row per
    /// (callsign, logon_time, sector_name).
    pub fn insert_open(conn: &mut PgConnection, row: &SectorOccupancy) -> QueryResult<usize> {
        use crate::schema::flight_sector_occupancy;

        diesel::insert_into(flight_sector_occupancy::table)
            .values(row)
            .execute(conn)
    }

    /// Close an open interval inside the caller's transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn close_row(
        conn: &mut PgConnection,
        row_id: Uuid,
        exit_time_param: DateTime<Utc>,
        exit_position: Option<(f64, f64)>,
        exit_altitude_param: Option<i32>,
        duration_seconds_param: i32,
    ) -> QueryResult<usize> {
        use crate::schema::flight_sector_occupancy::dsl::*;

        let (exit_lat, exit_lon) = match exit_position {
            Some((lat, lon)) => (Some(lat), Some(lon)),
            None => (None, None),
        };

        diesel::update(flight_sector_occupancy.filter(id.eq(row_id)))
            .set((
                exit_time.eq(exit_time_param),
                exit_latitude.eq(exit_lat),
                exit_longitude.eq(exit_lon),
                exit_altitude.eq(exit_altitude_param),
                duration_seconds.eq(duration_seconds_param),
                updated_at.eq(exit_time_param),
            ))
            .execute(conn)
    }

    /// All open intervals, used to rebuild the in-memory tracker state on
    /// startup.
    pub async fn open_rows(&self) -> Result<Vec<SectorOccupancy>> {
        use crate::schema::flight_sector_occupancy::dsl::*;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flight_sector_occupancy
                .filter(exit_time.is_null())
                .order(entry_time.asc())
                .load::<SectorOccupancy>(&mut conn)?;
            Ok::<Vec<SectorOccupancy>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Open intervals, inside the caller's transaction (sweeper scan).
    pub fn open_rows_in(conn: &mut PgConnection) -> QueryResult<Vec<SectorOccupancy>> {
        use crate::schema::flight_sector_occupancy::dsl::*;

        flight_sector_occupancy
            .filter(exit_time.is_null())
            .order(entry_time.asc())
            .load::<SectorOccupancy>(conn)
    }

    /// Every interval of one connection, inside the caller's transaction
    /// (flight summarization reads these before deleting them).
    pub fn rows_for_connection_in(
        conn: &mut PgConnection,
        callsign_param: &str,
        logon_time_param: DateTime<Utc>,
    ) -> QueryResult<Vec<SectorOccupancy>> {
        use crate::schema::flight_sector_occupancy::dsl::*;

        flight_sector_occupancy
            .filter(callsign.eq(callsign_param).and(logon_time.eq(logon_time_param)))
            .order(entry_time.asc())
            .load::<SectorOccupancy>(conn)
    }

    /// Every interval of one connection, for the read API.
    pub async fn rows_for_connection(
        &self,
        callsign_param: &str,
        logon_time_param: DateTime<Utc>,
    ) -> Result<Vec<SectorOccupancy>> {
        use crate::schema::flight_sector_occupancy::dsl::*;

        let pool = self.pool.clone();
        let callsign_param = callsign_param.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flight_sector_occupancy
                .filter(callsign.eq(&callsign_param).and(logon_time.eq(logon_time_param)))
                .order(entry_time.asc())
                .load::<SectorOccupancy>(&mut conn)?;
            Ok::<Vec<SectorOccupancy>, anyhow::Error>(rows)
        })
        .await??;

        Ok(result)
    }

    /// Delete every interval of one connection inside the caller's
    /// transaction (after summarization).
    pub fn delete_for_connection(
        conn: &mut PgConnection,
        callsign_param: &str,
        logon_time_param: DateTime<Utc>,
    ) -> QueryResult<usize> {
        use crate::schema::flight_sector_occupancy::dsl::*;

        diesel::delete(
            flight_sector_occupancy
                .filter(callsign.eq(callsign_param).and(logon_time.eq(logon_time_param))),
        )
        .execute(conn)
    }
}
