use async_trait::async_trait;

use crate::message::{ChannelKind, ProviderKind};

/// One outbound integration: a (provider, channel) pair that can deliver
/// text to a recipient. `send` returns the provider-assigned message id so
/// delivery receipts can be correlated later.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn channel(&self) -> ChannelKind;

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<String>;
}
