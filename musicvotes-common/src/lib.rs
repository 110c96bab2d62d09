//! # musicvotes common library
//!
//! Shared code for the musicvotes services:
//! - Error type used across crates
//! - Bootstrap configuration loading (TOML)
//! - Database initialization and the song store

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
