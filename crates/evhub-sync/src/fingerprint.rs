//! Content hash used as the identity of events that carry no URL.

use evhub_core::CanonicalEvent;
use sha2::{Digest, Sha256};

/// Lowercase SHA-256 hex over `title|start|venue|city|category`.
///
/// `start` is the RFC 3339 UTC rendering of the start date, or empty when
/// the event is undated. Events agreeing on all five fields collide.
pub fn fingerprint(event: &CanonicalEvent) -> String {
    let start = event
        .start_date
        .map(|start| start.to_rfc3339())
        .unwrap_or_default();
    let material = [
        event.title.as_str(),
        start.as_str(),
        event.venue_name.as_str(),
        event.city.as_str(),
        event.category.as_str(),
    ]
    .join("|");
    hex::encode(Sha256::digest(material.as_bytes()))
}
