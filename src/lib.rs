// Public API - the runner for the CLI, the engine for embedding
pub mod coordination;
pub mod db;
pub mod error;
pub mod formats;
pub mod mapping;
pub mod preview;
pub mod runner;

// Internal modules
mod config;
mod io;
mod telemetry;

#[cfg(test)]
mod integ_tests;
