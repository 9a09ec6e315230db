//! cron-fleet: multi-tenant cron coordination.
//!
//! Persists scheduled jobs with dedup-on-identity, gates execution through
//! optimistic per-job locks, and partitions tenants across a fleet of hosts
//! discovered by heartbeat.

pub mod config;
pub mod coordinator;
pub mod database;
pub mod errors;
pub mod events;
pub mod models;
pub mod store;
pub mod web;
