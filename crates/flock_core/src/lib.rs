//! `flock_core`
//!
//! Core library behind Flock's book data pipelines. It resolves book and author metadata from
//! third-party providers, classifies subjects into Flock's taxonomy, decides whether incoming
//! records are new, duplicates or updates of stored rows, and commits the result. The
//! `flock_worker` binary only wires these pipelines to queues, schedules and AWS clients.

pub mod config;

pub mod covers;

pub mod database;

pub mod pipeline;

pub mod providers;

pub mod reconcile;

pub mod sanitize;

pub mod subjects;
