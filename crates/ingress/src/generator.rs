//! Synthetic price ticker for running the gateway without an upstream.

use std::time::Duration;

use {
    rand::Rng,
    tokio::time::MissedTickBehavior,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    bidfeed_config::GeneratorConfig,
    bidfeed_protocol::{AuctionId, PriceUpdate},
};

use crate::{EventSink, ForwardError, IngestStats};

/// Emits a random highest price for one auction on a fixed period.
#[derive(Debug, Clone)]
pub struct PriceGenerator {
    auction_id: AuctionId,
    min_price: u64,
    max_price: u64,
    interval: Duration,
}

impl PriceGenerator {
    pub fn new(auction_id: AuctionId, min_price: u64, max_price: u64, interval: Duration) -> Self {
        // Swap an inverted range rather than panic inside `random_range`.
        let (min_price, max_price) = if min_price <= max_price {
            (min_price, max_price)
        } else {
            (max_price, min_price)
        };
        Self {
            auction_id,
            min_price,
            max_price,
            interval,
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            AuctionId(config.auction_id),
            config.min_price,
            config.max_price,
            config.interval(),
        )
    }

    pub fn auction_id(&self) -> AuctionId {
        self.auction_id
    }

    /// Draw the next price.
    pub fn next_update(&self) -> PriceUpdate {
        let price = rand::rng().random_range(self.min_price..=self.max_price);
        PriceUpdate::new(self.auction_id, price as f64)
    }

    /// Tick until `cancel` fires or the sink closes.
    pub async fn run<S: EventSink + ?Sized>(
        &self,
        sink: &S,
        cancel: CancellationToken,
    ) -> IngestStats {
        let mut stats = IngestStats::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let update = self.next_update();
            debug!(auction_id = %update.auction_id, price = update.highest_price, "generated price");
            match sink.forward(update.into_event()) {
                Ok(()) => stats.forwarded += 1,
                Err(ForwardError::Full) => {
                    stats.dropped += 1;
                    warn!("hub queue full, dropping generated price");
                },
                Err(ForwardError::Closed) => break,
            }
        }

        info!(forwarded = stats.forwarded, "price generator stopped");
        stats
    }
}
