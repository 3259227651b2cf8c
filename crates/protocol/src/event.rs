use std::fmt;

use {bytes::Bytes, serde::Deserialize};

/// Identifier of an auction, as stored by the CRUD side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct AuctionId(pub i64);

impl fmt::Display for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a viewer connection subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Every update, regardless of auction (the `/ws` ticker).
    All,
    /// Updates for a single auction page.
    Auction(AuctionId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Auction(id) => write!(f, "auction:{id}"),
        }
    }
}

/// One price/bid change on its way to viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    payload: Bytes,
    auction_id: Option<AuctionId>,
}

impl UpdateEvent {
    pub fn new(payload: impl Into<Bytes>, auction_id: Option<AuctionId>) -> Self {
        Self {
            payload: payload.into(),
            auction_id,
        }
    }

    /// Wrap a payload read from the upstream topic.
    ///
    /// The payload is kept verbatim; the auction id is only read from its
    /// `auctionID` field so the event can be routed.
    pub fn from_upstream(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let auction_id = peek_auction_id(&payload);
        Self {
            payload,
            auction_id,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn auction_id(&self) -> Option<AuctionId> {
        self.auction_id
    }

    /// Whether a subscriber of `topic` should receive this event.
    pub fn reaches(&self, topic: &Topic) -> bool {
        match topic {
            Topic::All => true,
            Topic::Auction(id) => self.auction_id == Some(*id),
        }
    }
}

#[derive(Deserialize)]
struct RoutingFields {
    #[serde(rename = "auctionID", alias = "auctionId", default)]
    auction_id: Option<AuctionId>,
}

fn peek_auction_id(payload: &[u8]) -> Option<AuctionId> {
    serde_json::from_slice::<RoutingFields>(payload)
        .ok()
        .and_then(|p| p.auction_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_payload_is_kept_verbatim() {
        let raw = br#"{"auctionID": 7, "highestPrice": 12.5, "bidder": "x"}"#;
        let event = UpdateEvent::from_upstream(Bytes::from_static(raw));
        assert_eq!(event.payload().as_ref(), raw);
        assert_eq!(event.auction_id(), Some(AuctionId(7)));
    }

    #[test]
    fn camel_case_alias_is_recognised() {
        let event = UpdateEvent::from_upstream(r#"{"auctionId":3}"#);
        assert_eq!(event.auction_id(), Some(AuctionId(3)));
    }

    #[test]
    fn non_json_payload_has_no_route() {
        let event = UpdateEvent::from_upstream("not json");
        assert_eq!(event.auction_id(), None);
        assert!(event.reaches(&Topic::All));
        assert!(!event.reaches(&Topic::Auction(AuctionId(1))));
    }

    #[test]
    fn auction_topic_only_matches_its_id() {
        let event = UpdateEvent::new("x", Some(AuctionId(2)));
        assert!(event.reaches(&Topic::Auction(AuctionId(2))));
        assert!(!event.reaches(&Topic::Auction(AuctionId(9))));
        assert!(event.reaches(&Topic::All));
    }

    #[test]
    fn topic_display() {
        assert_eq!(Topic::All.to_string(), "all");
        assert_eq!(Topic::Auction(AuctionId(42)).to_string(), "auction:42");
    }
}
