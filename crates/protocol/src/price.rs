use bytes::Bytes;

use crate::event::{AuctionId, UpdateEvent};

/// Highest-price notice sent to viewers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceUpdate {
    pub auction_id: AuctionId,
    pub highest_price: f64,
}

impl PriceUpdate {
    pub fn new(auction_id: AuctionId, highest_price: f64) -> Self {
        Self {
            auction_id,
            highest_price,
        }
    }

    /// Encode with the price fixed at two decimals (`450.00`, not `450.0`).
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!(
            r#"{{"auctionID":{},"highestPrice":{:.2}}}"#,
            self.auction_id, self.highest_price
        ))
    }

    pub fn into_event(self) -> UpdateEvent {
        UpdateEvent::new(self.encode(), Some(self.auction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_two_decimals() {
        let update = PriceUpdate::new(AuctionId(2), 450.0);
        assert_eq!(
            update.encode().as_ref(),
            br#"{"auctionID":2,"highestPrice":450.00}"#
        );
    }

    #[test]
    fn rounds_to_cents() {
        let update = PriceUpdate::new(AuctionId(5), 19.999);
        assert_eq!(
            update.encode().as_ref(),
            br#"{"auctionID":5,"highestPrice":20.00}"#
        );
    }

    #[test]
    fn encoded_form_is_valid_json() {
        let update = PriceUpdate::new(AuctionId(11), 1234.5);
        let parsed: serde_json::Value = serde_json::from_slice(&update.encode()).unwrap();
        assert_eq!(parsed["auctionID"], 11);
        assert_eq!(parsed["highestPrice"], 1234.5);
    }

    #[test]
    fn event_routes_to_its_auction() {
        let event = PriceUpdate::new(AuctionId(2), 1.0).into_event();
        assert_eq!(event.auction_id(), Some(AuctionId(2)));
    }
}
