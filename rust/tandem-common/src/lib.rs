//! Core definitions (error taxonomy, result helpers and configuration), relied upon by all
//! tandem-* crates.

pub mod config;
pub mod error;
pub mod result;

pub use config::Configuration;
pub use error::{Error, ErrorKind};
pub use result::Result;
