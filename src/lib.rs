//! Offline-aware fetch / persist / observe engine for a Canvas-style REST API.
//!
//! [`cache::AsyncStore`] runs a [`cache::UseCase`] against a
//! [`cache::RecordStore`]: it decides between the network and the local
//! store, writes fetched pages through the use case, and hands back the
//! result set either once or as a live [`cache::EntityStream`].

pub mod api;
pub mod cache;
pub mod config;
