//! Shared types for the Storegame downloader: data model, errors,
//! configuration and session bookkeeping.
pub mod config;
pub mod errors;
pub mod models;
pub mod session;
