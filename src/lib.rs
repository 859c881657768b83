//! Library interface for ipatool
//!
//! Exposes the App Store protocol client, the package repackager and the CLI
//! commands, so the binary stays a thin argument parser and tests can drive
//! the protocol against scripted transports.

pub mod appstore;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod keychain;
pub mod machine;
pub mod package;
pub mod progress;

pub use appstore::{Account, App, AppStore, Endpoints};
pub use error::{Result, StoreError};
pub use package::{Sinf, replicate_sinf};
