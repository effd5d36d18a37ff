pub mod clearing;
pub mod orders;

use std::collections::BTreeMap;

pub use clearing::*;
pub use orders::*;

use crate::ledger::{LedgerRow, MarketLogRow};
use crate::types::{Product, Seconds};

// === MARKET ===

/// A venue clearing one book per listed product.
#[derive(Debug, Clone)]
pub struct Market {
    pub name: String,
    pub rule: ClearingRule,
    /// product_type -> lead_time -> resting orders
    order_books: BTreeMap<Seconds, BTreeMap<Seconds, Vec<Order>>>,
    pub log: Vec<MarketLogRow>,
}

impl Market {
    pub fn new(name: impl Into<String>, rule: ClearingRule, products: &[Product]) -> Self {
        let mut order_books: BTreeMap<Seconds, BTreeMap<Seconds, Vec<Order>>> = BTreeMap::new();
        for product in products {
            order_books
                .entry(product.product_type)
                .or_default()
                .insert(product.lead_time, Vec::new());
        }
        Self {
            name: name.into(),
            rule,
            order_books,
            log: Vec::new(),
        }
    }

    pub fn book(&self, product: Product) -> &[Order] {
        self.order_books
            .get(&product.product_type)
            .and_then(|by_lead| by_lead.get(&product.lead_time))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Accept an order into its book. Zero quantities are ignored; unlisted products are
    /// reported and dropped.
    pub fn process_msg(&mut self, order: Order) {
        if order.quantity == 0.0 {
            return;
        }
        let Some(book) = self
            .order_books
            .get_mut(&order.product.product_type)
            .and_then(|by_lead| by_lead.get_mut(&order.product.lead_time))
        else {
            #[cfg(feature = "instrument")]
            tracing::warn!(
                target: "routing",
                receiver = self.name.as_str(),
                sender = order.sender_id.as_str(),
                product_type = order.product.product_type,
                lead_time = order.product.lead_time,
                "order for unlisted product dropped"
            );
            return;
        };

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "order",
            market = self.name.as_str(),
            sender = order.sender_id.as_str(),
            side = order.side.as_str(),
            product_type = order.product.product_type,
            lead_time = order.product.lead_time,
            quantity = order.quantity,
            price = order.price,
            min_acceptance_ratio = order.min_acceptance_ratio,
        );

        book.push(order);
    }

    /// Clear the book of `product`, empty it and log the settlement.
    pub fn clear(&mut self, product: Product, time: Seconds) -> Vec<Trade> {
        let book = self
            .order_books
            .get_mut(&product.product_type)
            .and_then(|by_lead| by_lead.get_mut(&product.lead_time))
            .map(std::mem::take)
            .unwrap_or_default();

        let outcome = self.rule.clear(&self.name, &book);

        let (quantity, turnover) = outcome
            .trades
            .iter()
            .filter(|t| t.side == Side::Buy)
            .fold((0.0, 0.0), |(q, v), t| (q + t.quantity, v + t.quantity * t.price));
        let price = (quantity != 0.0).then(|| turnover / quantity);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "clearing",
            market = self.name.as_str(),
            time,
            product_type = product.product_type,
            lead_time = product.lead_time,
            orders = book.len() as u64,
            iterations = outcome.iterations as u64,
            quantity,
            price = price.unwrap_or(f64::NAN),
        );

        self.log.push(MarketLogRow {
            time,
            product,
            quantity,
            price,
        });

        outcome.trades
    }

    pub fn to_rows(&self) -> Vec<LedgerRow> {
        self.log.iter().map(MarketLogRow::to_row).collect()
    }
}
