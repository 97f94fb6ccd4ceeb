//! Channel sender adapters.

mod sms;
pub mod transport;
mod whatsapp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::domain::{Channel, DeliveryOutcome, RenderedMessage};

pub use sms::{sms_segments, SmsSender};
pub use transport::{
    CarrierRequest, CarrierResponse, CarrierTransport, DryRunTransport, HttpCarrierTransport,
    TransportError,
};
pub use whatsapp::{WhatsAppSender, WHATSAPP_MAX_BODY_CHARS};

/// Delivers rendered messages over one channel.
///
/// Implementations never return errors: every transport problem is reported as a `failed`
/// outcome so the dispatcher can carry on with the remaining recipients.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Largest number of messages the carrier accepts in one request.
    fn max_batch_size(&self) -> usize {
        1
    }

    fn supports_bulk(&self) -> bool {
        false
    }

    async fn send(&self, message: &RenderedMessage) -> DeliveryOutcome;

    /// Deliver several messages, returning outcomes in input order.
    async fn send_many(&self, messages: &[RenderedMessage]) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            outcomes.push(self.send(message).await);
        }
        outcomes
    }
}

/// Channel to adapter lookup handed to the dispatcher.
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn register(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.senders.keys().copied().collect();
        channels.sort_by_key(|channel| channel.label());
        channels
    }
}
