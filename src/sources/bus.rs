//! Message-bus source: subscribes to the live document stream.
//!
//! The acquisition engine publishes each emitted document as a JSON
//! `[kind, payload]` pair on a bus subject. This adapter subscribes to that
//! subject and enqueues every document it can decode, in bus order.
//! Undecodable messages are logged and skipped; they never stop the
//! subscription.

use futures::StreamExt;
use tracing::{info, warn};

use crate::error::{RelayError, RelayResult};
use crate::relay::DocumentSender;
use crate::sources::decode_pair;

/// Push-delivery adapter over a NATS subject.
#[derive(Debug, Clone)]
pub struct BusSource {
    url: String,
    subject: String,
}

impl BusSource {
    /// Create a source for the given bus URL and subject.
    pub fn new(url: &str, subject: &str) -> Self {
        Self {
            url: url.to_string(),
            subject: subject.to_string(),
        }
    }

    /// Connect and forward documents until the subscription ends or the
    /// relay's queue closes.
    pub async fn run(self, sender: DocumentSender) -> RelayResult<()> {
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| RelayError::Bus(format!("failed to connect to `{}`: {e}", self.url)))?;
        let mut subscription = client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| RelayError::Bus(format!("failed to subscribe to `{}`: {e}", self.subject)))?;
        info!(url = %self.url, subject = %self.subject, "listening for documents on the bus");

        while let Some(message) = subscription.next().await {
            match decode_pair(&message.payload) {
                Ok(document) => {
                    if sender.send(document).is_err() {
                        info!("relay queue closed, ending bus subscription");
                        break;
                    }
                }
                Err(error) => {
                    warn!(subject = %message.subject, %error, "skipping undecodable bus message");
                }
            }
        }

        Ok(())
    }
}
