//! otosync: idempotent synchronization of rhythm-game play data.
//!
//! Pulls play results and map metadata from export files and the osu! v2
//! API, resolves entities by natural key, and upserts facts into a canonical
//! document store so repeated runs never duplicate data.

pub mod app;
pub mod cli;
pub mod config;
pub mod engine;
pub mod logging;
pub mod osu;
pub mod sources;
pub mod store;
