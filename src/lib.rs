pub mod api;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod job;
pub mod repo;
pub mod service;
pub mod shutdown;
pub mod transport;

pub use error::{RelayError, Result};
