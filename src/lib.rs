//! Real-time fleet event broker.
//!
//! Vehicles report positions, passengers check in by scanning a
//! time-limited QR token, and anyone on board can raise an SOS. Every one
//! of those is fanned out over WebSocket topics to the dashboards that
//! care: the vehicle's own topic, its watchers, and the admin broadcast.
//!
//! - [`broker`] routes events to connections.
//! - [`processor`] holds the location, attendance, emergency and trip logic.
//! - [`store`] persists vehicles, attendance and alerts (memory or Postgres).
//! - [`client`] and [`dashboard`] are the consuming side.
//! - [`kafka`] ingests raw device payloads.

pub mod broker;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod kafka;
pub mod models;
pub mod processor;
pub mod server;
pub mod state;
pub mod store;
