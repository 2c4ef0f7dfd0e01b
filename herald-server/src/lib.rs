//! # Herald Server
//!
//! Process wiring for the herald delivery pipeline: configuration loading,
//! tracing, connection bootstrap and signal handling. The pipeline itself
//! lives in `herald-core`.

pub mod infra;
