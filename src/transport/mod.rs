//! Transport layer for the MCP server.
//!
//! MCP clients spawn the gate as a subprocess and talk JSON-RPC over its
//! standard input/output, so stdio is the only transport.

pub mod stdio;

pub use stdio::StdioTransport;

use crate::error::StartupError;
use std::future::Future;

/// Trait for MCP transport implementations.
///
/// Transports handle the low-level communication between the MCP server
/// and clients, abstracting away the protocol details.
pub trait Transport: Send + Sync {
    /// Start the transport and begin handling requests.
    ///
    /// This method should block until the transport is shut down.
    fn run(&self) -> impl Future<Output = Result<(), StartupError>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
