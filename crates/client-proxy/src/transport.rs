//! Transport trait definition
//!
//! Defines the async request/response channel a client proxy talks over.

use async_trait::async_trait;
use bytes::Bytes;
use fed_core::TransportError;

/// Async request/response channel to one client
///
/// Implementors carry opaque frames; encoding is done by [`crate::codec`].
/// A dropped connection must be reported as
/// [`TransportError::Disconnected`], never as an empty or garbled reply.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request frame and wait for the matching response frame
    ///
    /// # Arguments
    /// * `request` - Encoded instruction
    ///
    /// # Returns
    /// The encoded reply
    ///
    /// # Errors
    /// Returns `Disconnected` if the client is gone, `Malformed` if the
    /// channel delivered something that is not a frame
    async fn send(&self, request: Bytes) -> Result<Bytes, TransportError>;
}
