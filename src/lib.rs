//! Field Box Sync
//!
//! Server and box-side client for a fleet of field boxes. The server keeps
//! account and job status in a shared store and processes registrations
//! through a deduplicating job queue; boxes pull task snapshots on a
//! background, network-gated sync.

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
