// Library root; exposes the modules to the binary and to `tests/`.

pub mod alerts;
pub mod api;
pub mod cursor;
pub mod db;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod fetcher;
pub mod inspector;
pub mod metrics;
pub mod reconciler;
pub mod repository;
pub mod retention;
pub mod scheduler;
pub mod services;
pub mod snapshot;
pub mod types;
pub mod validation;

// Only the binary needs these.
pub mod cli;
pub mod config;
pub mod logging;
