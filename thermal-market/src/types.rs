use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

// === UNITS ===

/// Durations and timestamps, in seconds.
pub type Seconds = u64;
/// Thermal energy in kWh.
pub type Energy = f64;
/// Price per kWh.
pub type Price = f64;

/// Flat physical-layer readings keyed by signal path.
pub type Observation = HashMap<String, f64>;
/// Flat actuation values keyed by signal path. Ordered so merged outputs are deterministic.
pub type Actions = BTreeMap<String, f64>;

// === IDS ===

new_key_type! {
    pub struct TraderKey;
    pub struct MarketKey;
}

/// Order identifier, unique within one order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === PRODUCTS ===

/// A tradable delivery contract: delivery window length and how far ahead of delivery it clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Product {
    pub product_type: Seconds,
    pub lead_time: Seconds,
}

impl Product {
    pub fn new(product_type: Seconds, lead_time: Seconds) -> Self {
        Self {
            product_type,
            lead_time,
        }
    }

    /// Trading-table slots covered by this product: `[lead, lead + type)` in units of
    /// `trading_time`.
    pub fn slots(&self, trading_time: Seconds) -> Range<usize> {
        let first = (self.lead_time / trading_time) as usize;
        let last = ((self.lead_time + self.product_type) / trading_time) as usize;
        first..last
    }

    /// Delivery window in elapsed time, given the current time.
    pub fn delivery_window(&self, now: Seconds) -> (Seconds, Seconds) {
        let start = now + self.lead_time;
        (start, start + self.product_type)
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s@{}s", self.product_type, self.lead_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cover_lead_time_and_duration() {
        let product = Product::new(3600, 900);
        assert_eq!(product.slots(900), 1..5);
        assert_eq!(Product::new(900, 0).slots(900), 0..1);
    }

    #[test]
    fn delivery_window_starts_after_lead_time() {
        assert_eq!(Product::new(3600, 900).delivery_window(1800), (2700, 6300));
    }
}
