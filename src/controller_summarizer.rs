use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use diesel::Connection;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::atc_detector::{MatchCriteria, correlate};
use crate::config::AppConfig;
use crate::controller_summaries::ControllerSummary;
use crate::controller_summaries_repo::ControllerSummariesRepository;
use crate::controllers::Controller;
use crate::controllers_repo::ControllersRepository;
use crate::db::{self, PgPool};
use crate::transceivers::Transceiver;
use crate::transceivers_repo::TransceiversRepository;

/// A maximal run of connection rows for one (callsign, CID) whose gaps are
/// all within the merge window.
#[derive(Debug)]
pub struct MergedSession {
    pub rows: Vec<Controller>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Merge a controller's connection rows (sorted by logon time) into
/// sessions. Two adjacent connections belong to the same session when the
/// gap between one's last observation and the next's logon is at most the
/// merge window; merging is transitive.
pub fn merge_connection_spans(
    connections: Vec<Controller>,
    merge_window: chrono::Duration,
) -> Vec<MergedSession> {
    let mut sessions: Vec<MergedSession> = Vec::new();

    for row in connections {
        match sessions.last_mut() {
            Some(session) if row.logon_time - session.end <= merge_window => {
                session.end = session.end.max(row.last_updated);
                session.rows.push(row);
            }
            _ => {
                sessions.push(MergedSession {
                    start: row.logon_time,
                    end: row.last_updated,
                    rows: vec![row],
                });
            }
        }
    }

    sessions
}

pub struct SessionInputs<'a> {
    pub session: &'a MergedSession,
    /// All flight-owned transceiver samples in the session window.
    pub flight_samples: &'a [Transceiver],
    /// This controller's own transceiver samples in the session window.
    pub atc_samples: &'a [Transceiver],
    pub criteria: &'a MatchCriteria,
    pub summarized_at: DateTime<Utc>,
}

/// Aggregate one merged session into its summary row. Pure: all inputs are
/// in memory.
pub fn build_controller_summary(inputs: &SessionInputs<'_>) -> Option<ControllerSummary> {
    let session = inputs.session;
    let first = session.rows.first()?;
    let latest = session.rows.last()?;

    // Handled aircraft: group the window's flight samples per flight and
    // correlate each group against this controller's samples.
    let mut samples_by_flight: BTreeMap<&str, Vec<Transceiver>> = BTreeMap::new();
    for sample in inputs.flight_samples {
        samples_by_flight
            .entry(sample.callsign.as_str())
            .or_default()
            .push(sample.clone());
    }

    struct Handled {
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
        matched_times: Vec<DateTime<Utc>>,
    }
    let mut handled: BTreeMap<String, Handled> = BTreeMap::new();

    for (flight_callsign, group) in samples_by_flight {
        let report = correlate(&group, inputs.atc_samples, inputs.criteria);
        if let Some(contact) = report.contacts.get(&latest.callsign) {
            handled.insert(
                flight_callsign.to_string(),
                Handled {
                    first_seen: contact.first_match,
                    last_seen: contact.last_match,
                    matched_times: contact.matched_sample_times.clone(),
                },
            );
        }
    }

    // Peak concurrency over one-minute buckets, and the hourly breakdown
    // over UTC hour of day.
    let mut minute_buckets: HashMap<i64, BTreeSet<&str>> = HashMap::new();
    let mut hourly: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for (flight_callsign, entry) in &handled {
        for t in &entry.matched_times {
            minute_buckets
                .entry(t.timestamp() / 60)
                .or_default()
                .insert(flight_callsign);
            hourly
                .entry(t.hour().to_string())
                .or_default()
                .insert(flight_callsign);
        }
    }
    let peak_aircraft_count = minute_buckets.values().map(BTreeSet::len).max().unwrap_or(0);
    let hourly_breakdown: BTreeMap<&String, usize> =
        hourly.iter().map(|(hour, set)| (hour, set.len())).collect();

    let frequencies_used: BTreeSet<i64> =
        inputs.atc_samples.iter().map(|s| s.frequency).collect();

    let aircraft_details: Vec<serde_json::Value> = handled
        .iter()
        .map(|(flight_callsign, entry)| {
            json!({
                "callsign": flight_callsign,
                "first_seen": entry.first_seen,
                "last_seen": entry.last_seen,
            })
        })
        .collect();

    // The summary table requires session_end_time > session_start_time; a
    // session observed on a single poll is bumped by one second.
    let session_end = if session.end > session.start {
        session.end
    } else {
        session.start + chrono::Duration::seconds(1)
    };

    let now = inputs.summarized_at;
    Some(ControllerSummary {
        id: Uuid::now_v7(),
        callsign: latest.callsign.clone(),
        cid: first.cid,
        name: latest.name.clone(),
        rating: latest.rating,
        facility: latest.facility,
        server: latest.server.clone(),
        session_start_time: session.start,
        session_end_time: session_end,
        session_duration_minutes: (session_end - session.start).num_seconds() as f64 / 60.0,
        total_aircraft_handled: handled.len() as i32,
        peak_aircraft_count: peak_aircraft_count as i32,
        hourly_aircraft_breakdown: json!(hourly_breakdown),
        frequencies_used: json!(frequencies_used),
        aircraft_details: serde_json::Value::Array(aircraft_details),
        created_at: now,
        updated_at: now,
    })
}

/// Periodic job that turns ended controller sessions into summary rows and
/// archives their connection detail.
pub struct ControllerSummarizer {
    pool: PgPool,
    controllers_repo: ControllersRepository,
    transceivers_repo: TransceiversRepository,
    criteria: MatchCriteria,
    merge_window: chrono::Duration,
    completion_window: chrono::Duration,
    retry_attempts: u32,
}

impl ControllerSummarizer {
    pub fn new(pool: PgPool, criteria: MatchCriteria, config: &AppConfig) -> Self {
        Self {
            controllers_repo: ControllersRepository::new(pool.clone()),
            transceivers_repo: TransceiversRepository::new(pool.clone()),
            pool,
            criteria,
            merge_window: config.controller_merge_window(),
            completion_window: config.controller_completion_window(),
            retry_attempts: config.db_retry_attempts,
        }
    }

    /// Summarize every eligible session. Per-session failures are logged and
    /// skipped; the session stays eligible for the next run.
    pub async fn run_once(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<usize> {
        let ended = self
            .controllers_repo
            .connections_ended_before(now - self.merge_window)
            .await?;
        if ended.is_empty() {
            return Ok(0);
        }

        let mut identities: Vec<(String, i32)> = ended
            .into_iter()
            .map(|row| (row.callsign, row.cid))
            .collect();
        identities.sort();
        identities.dedup();

        let mut summarized = 0usize;
        for (callsign, cid) in identities {
            if cancel.is_cancelled() {
                warn!(
                    "Controller summarizer cancelled mid-run after {} sessions",
                    summarized
                );
                break;
            }
            match self.summarize_identity(&callsign, cid, now).await {
                Ok(count) => summarized += count,
                Err(e) => {
                    error!(
                        "Failed to summarize controller {} (cid {}): {:#}",
                        callsign, cid, e
                    );
                    metrics::counter!("controller_summarizer.failures").increment(1);
                }
            }
        }

        if summarized > 0 {
            info!(
                "Controller summarizer completed: {} sessions summarized",
                summarized
            );
        }
        metrics::counter!("controller_summarizer.summarized").increment(summarized as u64);
        Ok(summarized)
    }

    async fn summarize_identity(
        &self,
        callsign: &str,
        cid: i32,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let connections = self.controllers_repo.connections_for(callsign, cid).await?;
        let sessions = merge_connection_spans(connections, self.merge_window);

        let mut summarized = 0usize;
        for session in sessions {
            // A session is only final once no future reconnect can merge into
            // it, and only eligible once the completion delay has passed.
            if now - session.end <= self.merge_window
                || now - session.end < self.completion_window
            {
                continue;
            }
            self.summarize_session(session, now).await?;
            summarized += 1;
        }
        Ok(summarized)
    }

    async fn summarize_session(&self, session: MergedSession, now: DateTime<Utc>) -> Result<()> {
        let callsign = session
            .rows
            .first()
            .map(|row| row.callsign.clone())
            .unwrap_or_default();

        let atc_samples = self
            .transceivers_repo
            .atc_samples_for_callsigns(&[callsign.clone()], session.start, session.end)
            .await?;
        let flight_samples = self
            .transceivers_repo
            .flight_samples_between(session.start, session.end)
            .await?;

        let Some(summary) = build_controller_summary(&SessionInputs {
            session: &session,
            flight_samples: &flight_samples,
            atc_samples: &atc_samples,
            criteria: &self.criteria,
            summarized_at: now,
        }) else {
            return Ok(());
        };

        let pool = self.pool.clone();
        let retry_attempts = self.retry_attempts;
        let rows = session.rows;
        tokio::task::spawn_blocking(move || {
            db::with_transient_retry(retry_attempts, "controller finalize", || {
                let mut conn = pool.get()?;
                conn.transaction::<_, anyhow::Error, _>(|conn| {
                    ControllerSummariesRepository::insert_in(conn, &summary)?;
                    ControllersRepository::archive_connections(conn, rows.clone(), now)?;
                    Ok(())
                })?;
                Ok(())
            })
        })
        .await??;

        Ok(())
    }
}
