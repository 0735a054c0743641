//! `feed-tail`: follows one live feed from the command line and exposes its reconciled view.

pub mod config;
pub mod metrics;
pub mod observer;
pub mod routes;
pub mod state;
pub mod telemetry;
