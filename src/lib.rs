//! vatstats - live VATSIM activity tracking and analytics for Australian
//! airspace.
//!
//! The ingestion pipeline polls the public VATSIM snapshot once a minute,
//! filters it down to Australian-airspace activity, tracks per-flight sector
//! occupancy in real time, and distills completed flights and controller
//! sessions into summary rows.

pub mod actions;
pub mod atc_detector;
pub mod boundary;
pub mod config;
pub mod controller_summaries;
pub mod controller_summaries_repo;
pub mod controller_summarizer;
pub mod controllers;
pub mod controllers_repo;
pub mod db;
pub mod flight_plan;
pub mod flight_summaries;
pub mod flight_summaries_repo;
pub mod flight_summarizer;
pub mod flights;
pub mod flights_repo;
pub mod geojson;
pub mod ingest;
pub mod instance_lock;
pub mod metrics_server;
pub mod reference_data;
pub mod scheduler;
pub mod schema;
pub mod sector_index;
pub mod sector_occupancy;
pub mod sector_occupancy_repo;
pub mod sector_tracker;
pub mod sweeper;
pub mod transceivers;
pub mod transceivers_repo;
pub mod vatsim_client;
pub mod web;

pub use boundary::FirBoundary;
pub use config::AppConfig;
pub use flights::Flight;
pub use sector_index::SectorIndex;
pub use sector_tracker::SectorTracker;
pub use vatsim_client::{VatsimClient, VatsimSnapshot};
