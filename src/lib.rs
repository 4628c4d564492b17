//! Lot allocation and reservation engine
//!
//! Decides which physical lots satisfy a demand (FEFO/FIFO with single-lot fit), earmarks them
//! through a reservation lifecycle with an audit trail, preempts lower-priority soft holds for
//! hard demand, and gates confirmation on ERP registration.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod migrator;
pub mod quantity;
pub mod repositories;
pub mod services;

pub use errors::ServiceError;
pub use services::allocation::{AllocationPlan, AllocationService, CommitOptions, CommitResult};
