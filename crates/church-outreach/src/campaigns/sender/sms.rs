use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::transport::{error_message, CarrierRequest, CarrierTransport};
use super::ChannelSender;
use crate::campaigns::domain::{Channel, DeliveryOutcome, RenderedMessage};
use crate::campaigns::phone;

const GSM7_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";
const GSM7_EXTENDED: &str = "^{}\\[~]|€\u{c}";

const GSM7_SINGLE: usize = 160;
const GSM7_CONCATENATED: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_CONCATENATED: usize = 67;

/// Number of billable SMS segments for `body`.
///
/// GSM-7 bodies fit 160 septets (153 per part once concatenated, extension characters take
/// two); anything outside the GSM alphabet is sent as UCS-2 at 70 / 67 code units.
pub fn sms_segments(body: &str) -> u32 {
    let gsm_units = body.chars().try_fold(0usize, |units, c| {
        if GSM7_BASIC.contains(c) {
            Some(units + 1)
        } else if GSM7_EXTENDED.contains(c) {
            Some(units + 2)
        } else {
            None
        }
    });

    let (units, single, concatenated) = match gsm_units {
        Some(units) => (units, GSM7_SINGLE, GSM7_CONCATENATED),
        None => (body.encode_utf16().count(), UCS2_SINGLE, UCS2_CONCATENATED),
    };

    if units <= single {
        1
    } else {
        units.div_ceil(concatenated) as u32
    }
}

/// SMS gateway adapter.
///
/// Single messages go to `POST messages` as `{from, to, text}`; bulk requests go to
/// `POST messages/bulk` as `{from, messages: [{to, text}]}` and are answered with a `results`
/// array in request order. A reply may carry its own `cost`; otherwise the tariff per segment
/// applies.
pub struct SmsSender {
    transport: Arc<dyn CarrierTransport>,
    sender_id: String,
    cost_per_segment: Decimal,
    max_batch_size: usize,
}

impl SmsSender {
    pub fn new(
        transport: Arc<dyn CarrierTransport>,
        sender_id: impl Into<String>,
        cost_per_segment: Decimal,
        max_batch_size: usize,
    ) -> Self {
        Self {
            transport,
            sender_id: sender_id.into(),
            cost_per_segment,
            max_batch_size: max_batch_size.max(1),
        }
    }

    fn validate(&self, message: &RenderedMessage) -> Result<(), String> {
        if !phone::is_e164(&message.recipient.phone) {
            return Err(format!(
                "invalid phone number for SMS: '{}'",
                message.recipient.phone
            ));
        }
        if message.body.trim().is_empty() {
            return Err("message body is empty".to_string());
        }
        Ok(())
    }

    fn accepted(&self, message: &RenderedMessage, result: &Value) -> DeliveryOutcome {
        let segments = sms_segments(&message.body);
        let cost = result
            .get("cost")
            .and_then(parse_cost)
            .unwrap_or_else(|| self.cost_per_segment * Decimal::from(segments));
        let provider_message_id = result
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        DeliveryOutcome::sent(message, cost, segments, provider_message_id)
    }

    fn interpret_result(&self, message: &RenderedMessage, result: &Value) -> DeliveryOutcome {
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("accepted");
        if status.eq_ignore_ascii_case("accepted") || status.eq_ignore_ascii_case("sent") {
            self.accepted(message, result)
        } else {
            let reason = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or(status);
            DeliveryOutcome::failed(message, format!("carrier rejected message: {reason}"))
        }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn supports_bulk(&self) -> bool {
        self.max_batch_size > 1
    }

    async fn send(&self, message: &RenderedMessage) -> DeliveryOutcome {
        if let Err(reason) = self.validate(message) {
            return DeliveryOutcome::failed(message, reason);
        }

        let request = CarrierRequest {
            path: "messages".to_string(),
            payload: json!({
                "from": self.sender_id,
                "to": message.recipient.phone,
                "text": message.body,
            }),
        };

        match self.transport.submit(&request).await {
            Ok(response) if response.is_success() => {
                self.interpret_result(message, &response.body)
            }
            Ok(response) => DeliveryOutcome::failed(message, error_message(&response)),
            Err(err) => {
                debug!(recipient = %message.recipient.phone, error = %err, "sms send failed");
                DeliveryOutcome::failed(message, err.to_string())
            }
        }
    }

    async fn send_many(&self, messages: &[RenderedMessage]) -> Vec<DeliveryOutcome> {
        let mut outcomes: Vec<Option<DeliveryOutcome>> = vec![None; messages.len()];
        let mut submitted = Vec::new();

        for (index, message) in messages.iter().enumerate() {
            match self.validate(message) {
                Ok(()) => submitted.push(index),
                Err(reason) => outcomes[index] = Some(DeliveryOutcome::failed(message, reason)),
            }
        }

        if !submitted.is_empty() {
            let entries: Vec<Value> = submitted
                .iter()
                .map(|&index| {
                    json!({
                        "to": messages[index].recipient.phone,
                        "text": messages[index].body,
                    })
                })
                .collect();
            let request = CarrierRequest {
                path: "messages/bulk".to_string(),
                payload: json!({ "from": self.sender_id, "messages": entries }),
            };

            let failure = match self.transport.submit(&request).await {
                Ok(response) if response.is_success() => {
                    let results = response
                        .body
                        .get("results")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    if results.len() != submitted.len() {
                        warn!(
                            expected = submitted.len(),
                            received = results.len(),
                            "sms gateway returned a partial bulk result"
                        );
                    }
                    for (position, &index) in submitted.iter().enumerate() {
                        outcomes[index] = Some(match results.get(position) {
                            Some(result) => self.interpret_result(&messages[index], result),
                            None => DeliveryOutcome::failed(
                                &messages[index],
                                "carrier returned no result for this recipient",
                            ),
                        });
                    }
                    None
                }
                Ok(response) => Some(error_message(&response)),
                Err(err) => Some(err.to_string()),
            };

            if let Some(reason) = failure {
                warn!(messages = submitted.len(), error = %reason, "sms bulk request failed");
                for &index in &submitted {
                    outcomes[index] = Some(DeliveryOutcome::failed(&messages[index], reason.clone()));
                }
            }
        }

        outcomes
            .into_iter()
            .zip(messages)
            .map(|(outcome, message)| {
                outcome.unwrap_or_else(|| DeliveryOutcome::failed(message, "not submitted"))
            })
            .collect()
    }
}

fn parse_cost(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(raw) => Decimal::from_str(raw.trim()).ok(),
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        _ => None,
    }
}
