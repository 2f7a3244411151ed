#![allow(clippy::result_large_err)]
// Library entrypoint for the binaries and integration tests: parse
// multiple-choice documents, resolve answers through a cache-first
// multi-provider cascade, and persist the enriched quiz durably.
pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod file_storage;
pub mod hashing;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod providers;
pub mod queue;
pub mod storage;
