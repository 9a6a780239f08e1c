//! Uniform outbound facade. The decision pipeline and the rule engine pick
//! a (provider, channel) pair and a recipient; wire formats stay inside the
//! channel modules.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;

use crate::channels::OutboundSender;
use crate::message::{ChannelKind, ProviderKind};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no sender registered for {provider}/{channel}")]
    Unsupported {
        provider: ProviderKind,
        channel: ChannelKind,
    },

    #[error("send via {provider} failed: {source}")]
    Send {
        provider: ProviderKind,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub struct DispatchReceipt {
    pub provider: ProviderKind,
    pub channel: ChannelKind,
    pub recipient: String,
    pub provider_message_id: String,
}

#[derive(Default)]
pub struct Dispatcher {
    senders: HashMap<(ProviderKind, ChannelKind), Arc<dyn OutboundSender>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sender: Arc<dyn OutboundSender>) {
        self.senders
            .insert((sender.provider(), sender.channel()), sender);
    }

    pub fn supports(&self, provider: ProviderKind, channel: ChannelKind) -> bool {
        self.senders.contains_key(&(provider, channel))
    }

    /// Registered (provider, channel) pairs, for diagnostics endpoints.
    pub fn registered(&self) -> Vec<(ProviderKind, ChannelKind)> {
        let mut pairs: Vec<_> = self.senders.keys().copied().collect();
        pairs.sort_by_key(|(p, c)| (p.as_str(), c.as_str()));
        pairs
    }

    pub async fn send(
        &self,
        provider: ProviderKind,
        channel: ChannelKind,
        recipient: &str,
        text: &str,
    ) -> Result<DispatchReceipt, DispatchError> {
        let sender = self
            .senders
            .get(&(provider, channel))
            .ok_or(DispatchError::Unsupported { provider, channel })?;

        let provider_message_id = sender
            .send(recipient, text)
            .await
            .map_err(|source| DispatchError::Send { provider, source })?;

        tracing::info!(
            %provider,
            %channel,
            recipient,
            provider_message_id,
            "message dispatched"
        );

        Ok(DispatchReceipt {
            provider,
            channel,
            recipient: recipient.to_string(),
            provider_message_id,
        })
    }

    /// Fan the same text out to many recipients concurrently. One failing
    /// recipient never blocks or fails the others; each outcome is returned
    /// in recipient order.
    pub async fn send_all(
        &self,
        provider: ProviderKind,
        channel: ChannelKind,
        recipients: &[String],
        text: &str,
    ) -> Vec<Result<DispatchReceipt, DispatchError>> {
        join_all(
            recipients
                .iter()
                .map(|recipient| self.send(provider, channel, recipient, text)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSender {
        provider: ProviderKind,
        channel: ChannelKind,
        calls: AtomicUsize,
        fail_recipient: Option<String>,
    }

    impl StubSender {
        fn new(provider: ProviderKind, channel: ChannelKind) -> Self {
            Self {
                provider,
                channel,
                calls: AtomicUsize::new(0),
                fail_recipient: None,
            }
        }

        fn failing_for(mut self, recipient: &str) -> Self {
            self.fail_recipient = Some(recipient.to_string());
            self
        }
    }

    #[async_trait]
    impl OutboundSender for StubSender {
        fn provider(&self) -> ProviderKind {
            self.provider
        }

        fn channel(&self) -> ChannelKind {
            self.channel
        }

        async fn send(&self, recipient: &str, _text: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_recipient.as_deref() == Some(recipient) {
                anyhow::bail!("provider rejected {recipient}");
            }
            Ok(format!("id-{recipient}"))
        }
    }

    #[tokio::test]
    async fn unregistered_pair_is_unsupported() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .send(ProviderKind::Twilio, ChannelKind::Whatsapp, "+39333", "ciao")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn registered_sender_receives_the_call() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(StubSender::new(
            ProviderKind::Skebby,
            ChannelKind::Sms,
        )));

        let receipt = dispatcher
            .send(ProviderKind::Skebby, ChannelKind::Sms, "+39333", "ciao")
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id, "id-+39333");
        assert!(dispatcher.supports(ProviderKind::Skebby, ChannelKind::Sms));
        assert!(!dispatcher.supports(ProviderKind::Skebby, ChannelKind::Whatsapp));
    }

    #[tokio::test]
    async fn send_all_isolates_failures() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(
            StubSender::new(ProviderKind::Twilio, ChannelKind::Whatsapp).failing_for("+392"),
        ));

        let recipients = vec!["+391".to_string(), "+392".to_string(), "+393".to_string()];
        let results = dispatcher
            .send_all(
                ProviderKind::Twilio,
                ChannelKind::Whatsapp,
                &recipients,
                "avviso",
            )
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn registered_lists_pairs_sorted() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(StubSender::new(
            ProviderKind::Twilio,
            ChannelKind::Whatsapp,
        )));
        dispatcher.register(Arc::new(StubSender::new(
            ProviderKind::Skebby,
            ChannelKind::Sms,
        )));

        let pairs = dispatcher.registered();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, ProviderKind::Skebby);
    }
}
