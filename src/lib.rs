//! Client-side state reconciliation for a collaborative task tracker.
//!
//! Records live in per-kind [`store::EntityStore`]s. User intents go through
//! the [`mutation::MutationManager`] (apply now, confirm or roll back later),
//! pushed change events go through the [`realtime::Reconciler`], and comment
//! threads are rebuilt by [`comments::build_forest`]. [`tracker::Tracker`]
//! drives all of it against a [`remote::DocumentStore`].

pub mod commands;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod mutation;
pub mod realtime;
pub mod remote;
pub mod store;
pub mod tracker;

pub use error::{RemoteError, TrackerError};
pub use tracker::Tracker;
