use async_trait::async_trait;

use crate::{
    domain::{TargetChannel, TargetMessageId},
    messaging::types::{OutgoingMessage, TargetCapabilities},
    Result,
};

/// Port to the platform conversations are reconstructed on.
///
/// Implementations report throttling as [`Error::Throttled`](crate::Error::Throttled)
/// with the server's retry hint, and an unreachable service as
/// [`Error::Connection`](crate::Error::Connection). Other failures are treated
/// as affecting only the one request.
#[async_trait]
pub trait TargetPort: Send + Sync {
    fn capabilities(&self) -> TargetCapabilities;

    /// Find a conversation by exact name, creating it when absent.
    async fn ensure_channel(&self, name: &str, description: &str) -> Result<TargetChannel>;

    /// Send one unit and return its target-side id.
    async fn send_message(
        &self,
        channel: &TargetChannel,
        message: &OutgoingMessage,
    ) -> Result<TargetMessageId>;
}
