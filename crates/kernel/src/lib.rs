//! Formwork Kernel Library
//!
//! Form submission and validation engine plus the HTTP surface that hosts
//! it. The main entry point for running the server is the `formwork` binary.

pub mod config;
pub mod error;
pub mod form;
pub mod routes;
pub mod session;
pub mod state;

pub use config::{Config, FormDefaults};
pub use error::{FormError, FormResult};
pub use state::AppState;
