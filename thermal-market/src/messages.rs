use crate::market::{Order, Trade};
use crate::types::Price;

/// Balancing-energy prices a system operator issues for the period just traded.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancingPrice {
    pub sender_id: String,
    pub receiver_id: String,
    /// Network the prices apply to.
    pub system_id: String,
    /// Price for producing less or consuming more than cleared.
    pub price_pos: Price,
    /// Price for producing more or consuming less than cleared.
    pub price_neg: Price,
}

/// Everything agents and markets exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Order(Order),
    Trade(Trade),
    Balancing(BalancingPrice),
}

impl Message {
    pub fn receiver_id(&self) -> &str {
        match self {
            Message::Order(order) => &order.receiver_id,
            Message::Trade(trade) => &trade.receiver_id,
            Message::Balancing(price) => &price.receiver_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Order(_) => "order",
            Message::Trade(_) => "trade",
            Message::Balancing(_) => "balancing",
        }
    }
}

impl From<Order> for Message {
    fn from(order: Order) -> Self {
        Message::Order(order)
    }
}

impl From<Trade> for Message {
    fn from(trade: Trade) -> Self {
        Message::Trade(trade)
    }
}

impl From<BalancingPrice> for Message {
    fn from(price: BalancingPrice) -> Self {
        Message::Balancing(price)
    }
}
