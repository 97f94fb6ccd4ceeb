use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::debug;

use super::transport::{error_message, CarrierRequest, CarrierTransport};
use super::ChannelSender;
use crate::campaigns::domain::{Channel, DeliveryOutcome, RenderedMessage};
use crate::campaigns::phone;

/// Longest text body the WhatsApp Business API accepts.
pub const WHATSAPP_MAX_BODY_CHARS: usize = 4096;

/// WhatsApp Business (Cloud API) text message adapter. One message per request, flat tariff.
pub struct WhatsAppSender {
    transport: Arc<dyn CarrierTransport>,
    phone_number_id: String,
    cost_per_message: Decimal,
}

impl WhatsAppSender {
    pub fn new(
        transport: Arc<dyn CarrierTransport>,
        phone_number_id: impl Into<String>,
        cost_per_message: Decimal,
    ) -> Self {
        Self {
            transport,
            phone_number_id: phone_number_id.into(),
            cost_per_message,
        }
    }

    fn validate(message: &RenderedMessage) -> Result<String, String> {
        if !phone::is_e164(&message.recipient.phone) {
            return Err(format!(
                "invalid phone number for WhatsApp: '{}'",
                message.recipient.phone
            ));
        }
        if message.body.trim().is_empty() {
            return Err("message body is empty".to_string());
        }
        let length = message.body.chars().count();
        if length > WHATSAPP_MAX_BODY_CHARS {
            return Err(format!(
                "message body is {length} characters; WhatsApp allows {WHATSAPP_MAX_BODY_CHARS}"
            ));
        }
        // the Cloud API addresses recipients by digits only
        Ok(message.recipient.phone.trim_start_matches('+').to_string())
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    async fn send(&self, message: &RenderedMessage) -> DeliveryOutcome {
        let to = match Self::validate(message) {
            Ok(to) => to,
            Err(reason) => return DeliveryOutcome::failed(message, reason),
        };

        let request = CarrierRequest {
            path: format!("{}/messages", self.phone_number_id),
            payload: json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": { "preview_url": false, "body": message.body },
            }),
        };

        match self.transport.submit(&request).await {
            Ok(response) if response.is_success() => {
                let provider_message_id = response
                    .body
                    .pointer("/messages/0/id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match provider_message_id {
                    Some(id) => DeliveryOutcome::sent(message, self.cost_per_message, 1, Some(id)),
                    None => DeliveryOutcome::failed(
                        message,
                        "unexpected carrier response: missing message id",
                    ),
                }
            }
            Ok(response) => DeliveryOutcome::failed(message, error_message(&response)),
            Err(err) => {
                debug!(recipient = %message.recipient.phone, error = %err, "whatsapp send failed");
                DeliveryOutcome::failed(message, err.to_string())
            }
        }
    }
}
