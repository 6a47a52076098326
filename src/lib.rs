//! Nutrition analysis job queue
//!
//! Core of the meal image analysis backend: the producer that queues
//! analysis requests, the Redis-backed job store, the bounded worker pool
//! that calls the vision model with retries, and the status surface clients
//! poll for results.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
