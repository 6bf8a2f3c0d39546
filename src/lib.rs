//! Client library for the Articat service on the Helix platform.
//!
//! - [`auth`] turns a long-lived API token into short-lived bearer tokens.
//! - [`http`] sends requests with the current token and retries transient
//!   failures.
//! - [`articat`] implements the Articat task endpoints on top of [`http`].

pub mod articat;
pub mod auth;
pub mod commands;
pub mod config;
pub mod http;
