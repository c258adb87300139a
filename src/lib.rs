#![forbid(unsafe_code)]

//! `lsp-tcp-bridge` relays a `Content-Length` framed JSON-RPC stream
//! between stdio and a TCP language server that may restart at any time.

pub mod config;
pub mod errors;
pub mod relay;
pub mod transform;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
