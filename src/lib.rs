//! glidepath - approach alerting for a single airport
//!
//! This library polls live traffic feeds, classifies each aircraft against
//! the configured airport's approach criteria, and drives an alert lifecycle
//! (alerting, acknowledged, landed) that observers follow over HTTP and
//! WebSocket.

pub mod alert_store;
pub mod classifier;
pub mod config;
pub mod events;
pub mod geo;
pub mod metrics;
pub mod notify;
pub mod poller;
pub mod snapshot;
pub mod traffic;
pub mod web;

pub use alert_store::{AckOutcome, AlertRecord, AlertStore};
pub use events::{AlertEvent, AlertSummary};
pub use snapshot::{AircraftSnapshot, FlightKey};
