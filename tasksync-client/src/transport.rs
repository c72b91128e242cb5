//! Transport seam between a client and its host.
//!
//! The client hands one [`SyncRequest`] per cycle to the transport and
//! awaits the matching [`SyncResponse`]. Codecs and connections (HTTP,
//! WebSocket, in-process) are the transport's business.

use crate::error::TransportError;
use async_trait::async_trait;
use tasksync_protocol::{SyncRequest, SyncResponse};

/// Delivers sync requests to a host.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends `request` and waits for its response.
    async fn execute(&self, request: SyncRequest) -> Result<SyncResponse, TransportError>;
}
