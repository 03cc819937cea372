//! SWAMP viewer instance proxy.
//!
//! Relays browser traffic for `/proxy-<id>/...` to the viewer VM the HTCondor
//! collector reports for that id, after checking project membership.

pub mod api;
pub mod auth;
pub mod collector;
pub mod db;
pub mod directory;
pub mod proxy;
pub mod settings;
