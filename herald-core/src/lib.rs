//! # Herald Core
//!
//! Durable, at-least-once delivery of outbound messages.
//!
//! ## Overview
//!
//! Rows are claimed from a durable store, fanned out over an in-process bus
//! to a pool of workers, delivered through a retrying notifier and moved
//! through their status lifecycle:
//!
//! - **Bus**: typed, bounded topics shared by producers and workers
//! - **Retry**: bounded retries with capped exponential backoff
//! - **Producer**: periodic claim (`FOR UPDATE SKIP LOCKED`) and publish
//! - **Consumer**: fixed-size worker pool draining a topic
//! - **Scheduler**: owns the bus, runs and stops the whole pipeline
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL store and Redis audit cache adapters
//! - `http`: reqwest-backed notifier
//! - `postgres-tests`: database-backed integration tests

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Audit cache port and adapters
pub mod cache;

/// Delivery port and adapters
pub mod delivery;

/// Error types and error handling utilities
pub mod error;

/// Bus, producer, consumer and scheduler
pub mod orchestration;

/// Bounded retry with exponential backoff
pub mod retry;

/// Message store port and adapters
pub mod store;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{HeraldError, Result};
pub use herald_model as model;
