//! Core domain + application logic for the OTP relay.
//!
//! This crate is framework-agnostic. HTTP and Telegram live behind ports
//! (traits) implemented in the adapter crates.

pub mod auth;
pub mod config;
pub mod domain;
pub mod env_file;
pub mod errors;
pub mod fetcher;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod notifier;
pub mod otp;
pub mod persist;
pub mod phone;
pub mod platform;
pub mod poller;
pub mod session;
pub mod settings;
pub mod state;
pub mod subscribers;
pub mod transport;

pub use errors::{Error, Result};
