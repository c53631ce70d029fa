//! Serial telemetry bridge.
//!
//! Reads line-delimited JSON from a serial sensor, appends every decoded
//! record to a CSV log and pushes it to all connected WebSocket subscribers.

pub mod broadcast;
pub mod config;
pub mod decode;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod port;
pub mod registry;
pub mod rest;
pub mod serial;
pub mod shutdown;
pub mod storage;
pub mod ws;
