//! Document source adapters.
//!
//! A source adapter produces typed documents and feeds them into the relay's
//! queue through a [`DocumentSender`](crate::relay::DocumentSender). Two
//! adapters are provided:
//!
//! - [`BusSource`]: subscribes to the acquisition engine's live document
//!   stream on a message bus (push delivery).
//! - [`CatalogSource`]: polls a catalog service for newly recorded runs and
//!   replays their documents (pull delivery).
//!
//! Both preserve the order in which documents are observed; the relay
//! guarantees FIFO dispatch per source.

pub mod bus;
pub mod catalog;

pub use bus::BusSource;
pub use catalog::CatalogSource;

use crate::document::{Document, DocumentKind};
use crate::error::{RelayError, RelayResult};
use serde_json::Value;

/// Decode one `[kind, payload]` wire pair into a typed document.
///
/// This is the on-the-wire shape the acquisition engine publishes: a JSON
/// two-element array of the kind name and the document payload.
pub fn decode_pair(bytes: &[u8]) -> RelayResult<Document> {
    let (name, payload): (String, Value) = serde_json::from_slice(bytes)?;
    let kind = DocumentKind::parse(&name).ok_or(RelayError::UnknownKind(name))?;
    Ok(Document::from_parts(kind, payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pair() {
        let wire = br#"["start", {"uid": "a1", "time": 1.0}]"#;
        let document = decode_pair(wire).expect("decode");
        assert_eq!(document.kind(), DocumentKind::RunStart);
        assert_eq!(document.uid(), Some("a1"));
    }

    #[test]
    fn test_decode_pair_rejects_unknown_kind() {
        let wire = br#"["telemetry", {}]"#;
        assert!(matches!(
            decode_pair(wire),
            Err(RelayError::UnknownKind(name)) if name == "telemetry"
        ));
    }

    #[test]
    fn test_decode_pair_rejects_malformed_json() {
        assert!(matches!(
            decode_pair(b"not json"),
            Err(RelayError::Payload(_))
        ));
    }
}
