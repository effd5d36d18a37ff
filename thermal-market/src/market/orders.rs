use serde::Serialize;

use crate::types::{Energy, OrderId, Price, Product};

// === ORDERS & TRADES ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// A bid placed by a trader on a market.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub sender_id: String,
    pub receiver_id: String,
    pub side: Side,
    pub product: Product,
    pub quantity: Energy,
    pub price: Price,
    /// Smallest fraction of `quantity` that must clear for the order to stand.
    pub min_acceptance_ratio: f64,
    /// Sibling orders that leave the book once this one clears.
    pub coupled_orders: Vec<OrderId>,
}

impl Order {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        side: Side,
        product: Product,
        quantity: Energy,
        price: Price,
    ) -> Self {
        Self {
            id: OrderId(0),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            side,
            product,
            quantity,
            price,
            min_acceptance_ratio: 0.0,
            coupled_orders: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = OrderId(id);
        self
    }

    pub fn with_acceptance(mut self, min_acceptance_ratio: f64) -> Self {
        self.min_acceptance_ratio = min_acceptance_ratio;
        self
    }

    pub fn coupled_with(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.coupled_orders = ids.into_iter().map(OrderId).collect();
        self
    }

    /// Shift this order's id and its coupled ids by `base`. Pricing models number their orders
    /// from zero; the orchestrator rebases them into its own id space.
    pub fn rebase(&mut self, base: u64) {
        self.id = OrderId(self.id.0 + base);
        for id in &mut self.coupled_orders {
            *id = OrderId(id.0 + base);
        }
    }
}

/// Cleared quantity reported by a market to one side of a match.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Market name.
    pub sender_id: String,
    /// Trader name.
    pub receiver_id: String,
    pub side: Side,
    pub product: Product,
    pub quantity: Energy,
    pub price: Price,
}
