//! chainbridge-ogmios: chain-sync feed over WebSocket JSON-RPC.
//!
//! # Features
//! - `findIntersection` with every candidate point in one request
//! - Pipelined `nextBlock` requests
//! - Raw frames handed to the sync loop for strict decoding
//! - Closable from outside the reading task

pub mod client;

pub use client::{OgmiosConfig, OgmiosFeed};
