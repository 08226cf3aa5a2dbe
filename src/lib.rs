//! Photo culling: index a photo tree into a SQLite catalog, fold
//! near-duplicates and visually similar shots into clusters with one
//! representative each, and export the starred selection.

pub mod cluster;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod export;
pub mod logging;
pub mod pipeline;
pub mod scanner;
pub mod tasks;
