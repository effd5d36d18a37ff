use std::collections::HashSet;

use crate::types::{Energy, OrderId, Price};

use super::orders::{Order, Side, Trade};

// === CLEARING RULES ===

/// How a market turns a book into trades.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClearingRule {
    /// Pay-as-bid at the mean of the matched buy and sell prices.
    #[default]
    DoubleAuction,
    /// Same matching, every trade settles at the last matched price.
    DoubleAuctionUniform,
}

impl ClearingRule {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "double_auction" => Some(Self::DoubleAuction),
            "double_auction_uniform_pricing" => Some(Self::DoubleAuctionUniform),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DoubleAuction => "double_auction",
            Self::DoubleAuctionUniform => "double_auction_uniform_pricing",
        }
    }

    pub fn clear(self, market: &str, book: &[Order]) -> AuctionOutcome {
        match self {
            Self::DoubleAuction => double_auction(market, book),
            Self::DoubleAuctionUniform => double_auction_uniform(market, book),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuctionOutcome {
    pub trades: Vec<Trade>,
    /// Matching passes run, including the accepted one.
    pub iterations: u32,
    /// Price of the accepted pass's last crossing, counting a crossing that moved no energy.
    pub marginal_price: Option<Price>,
}

// === SINGLE PASS ===

struct PassResult {
    trades: Vec<Trade>,
    marginal_price: Option<Price>,
    buy_rest: Vec<Energy>,
    sell_rest: Vec<Energy>,
    buy_live: Vec<bool>,
    sell_live: Vec<bool>,
}

/// Mark `idx` and every order it is coupled with as gone from the live side.
fn withdraw(side: &[&Order], live: &mut [bool], idx: usize) {
    live[idx] = false;
    let coupled: HashSet<OrderId> = side[idx].coupled_orders.iter().copied().collect();
    if coupled.is_empty() {
        return;
    }
    for (j, order) in side.iter().enumerate() {
        if coupled.contains(&order.id) {
            live[j] = false;
        }
    }
}

fn trade_pair(market: &str, buy: &Order, sell: &Order, quantity: Energy) -> [Trade; 2] {
    let price = (buy.price + sell.price) / 2.0;
    let trade = |order: &Order, side: Side| Trade {
        sender_id: market.to_string(),
        receiver_id: order.sender_id.clone(),
        side,
        product: order.product,
        quantity,
        price,
    };
    [trade(buy, Side::Buy), trade(sell, Side::Sell)]
}

/// Walk sells cheapest first against buys dearest first. `buys` and `sells` are already sorted.
///
/// A sell exhausted by a buy stays live until the next crossing buy retires it, matching the
/// book's removal order; that retirement moves no energy and emits no trade, but its price
/// still sets the marginal price.
fn match_pass(market: &str, buys: &[&Order], sells: &[&Order]) -> PassResult {
    let mut buy_rest: Vec<Energy> = buys.iter().map(|o| o.quantity).collect();
    let mut sell_rest: Vec<Energy> = sells.iter().map(|o| o.quantity).collect();
    let mut buy_live = vec![true; buys.len()];
    let mut sell_live = vec![true; sells.len()];
    let mut trades = Vec::new();
    let mut marginal_price = None;

    for s in 0..sells.len() {
        if !sell_live[s] {
            continue;
        }
        for b in 0..buys.len() {
            if !buy_live[b] {
                continue;
            }
            if buys[b].price < sells[s].price {
                break;
            }
            let sell_filled = buy_rest[b] > sell_rest[s];
            let quantity = if sell_filled { sell_rest[s] } else { buy_rest[b] };
            buy_rest[b] -= quantity;
            sell_rest[s] -= quantity;
            marginal_price = Some((buys[b].price + sells[s].price) / 2.0);
            if quantity != 0.0 {
                trades.extend(trade_pair(market, buys[b], sells[s], quantity));
            }
            if sell_filled {
                withdraw(sells, &mut sell_live, s);
                break;
            }
            withdraw(buys, &mut buy_live, b);
        }
    }

    PassResult {
        trades,
        marginal_price,
        buy_rest,
        sell_rest,
        buy_live,
        sell_live,
    }
}

/// The first live order of a side passes if it is untouched or filled to at least its
/// acceptance ratio. Returns the offending position otherwise.
fn first_rejected(side: &[&Order], rest: &[Energy], live: &[bool]) -> Option<usize> {
    let idx = live.iter().position(|&l| l)?;
    let order = side[idx];
    let fill = 1.0 - rest[idx] / order.quantity;
    if fill >= order.min_acceptance_ratio || fill == 0.0 {
        None
    } else {
        Some(idx)
    }
}

// === DOUBLE AUCTION ===

/// Pay-as-bid double auction with minimum acceptance ratios.
///
/// After each pass the first order still live on each side is checked against its acceptance
/// ratio. A failing pass drops the offending order of each failing side from the book and
/// re-runs the match, so the loop runs at most `buys + sells` times. A book that runs dry
/// yields no trades.
pub fn double_auction(market: &str, book: &[Order]) -> AuctionOutcome {
    let mut buys: Vec<&Order> = book.iter().filter(|o| o.side == Side::Buy).collect();
    let mut sells: Vec<&Order> = book.iter().filter(|o| o.side == Side::Sell).collect();

    if buys.is_empty() || sells.is_empty() {
        return AuctionOutcome::default();
    }

    // stable: equal prices keep submission order
    buys.sort_by(|a, b| b.price.total_cmp(&a.price));
    sells.sort_by(|a, b| a.price.total_cmp(&b.price));

    let mut iterations = 0;
    while !buys.is_empty() || !sells.is_empty() {
        iterations += 1;
        let pass = match_pass(market, &buys, &sells);

        let rejected_buy = first_rejected(&buys, &pass.buy_rest, &pass.buy_live);
        let rejected_sell = first_rejected(&sells, &pass.sell_rest, &pass.sell_live);
        if rejected_buy.is_none() && rejected_sell.is_none() {
            return AuctionOutcome {
                trades: pass.trades,
                iterations,
                marginal_price: pass.marginal_price,
            };
        }
        if let Some(idx) = rejected_buy {
            buys.remove(idx);
        }
        if let Some(idx) = rejected_sell {
            sells.remove(idx);
        }
    }

    AuctionOutcome {
        trades: Vec::new(),
        iterations,
        marginal_price: None,
    }
}

/// Double auction where every trade settles at the price of the last crossing, including a
/// crossing buy that found the sell already exhausted.
pub fn double_auction_uniform(market: &str, book: &[Order]) -> AuctionOutcome {
    let mut outcome = double_auction(market, book);
    if let Some(uniform) = outcome.marginal_price {
        for trade in &mut outcome.trades {
            trade.price = uniform;
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Product;

    const PRODUCT: Product = Product {
        product_type: 900,
        lead_time: 0,
    };

    fn make_buy(id: u64, sender: &str, qty: f64, price: f64) -> Order {
        Order::new(sender, "heat", Side::Buy, PRODUCT, qty, price).with_id(id)
    }

    fn make_sell(id: u64, sender: &str, qty: f64, price: f64) -> Order {
        Order::new(sender, "heat", Side::Sell, PRODUCT, qty, price).with_id(id)
    }

    fn cleared(trades: &[Trade], side: Side) -> f64 {
        trades
            .iter()
            .filter(|t| t.side == side)
            .map(|t| t.quantity)
            .sum()
    }

    #[test]
    fn mean_price_matches_two_buyers_against_one_seller() {
        let book = vec![
            make_buy(1, "a", 5.0, 0.10),
            make_buy(2, "b", 5.0, 0.08),
            make_sell(3, "s", 8.0, 0.09),
        ];

        let outcome = double_auction("heat", &book);

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.iterations, 1);
        let first = &outcome.trades[0];
        assert!((first.quantity - 5.0).abs() < 1e-9);
        assert!(
            (first.price - 0.095).abs() < 1e-9,
            "first match should settle at 0.095, got {:.4}",
            first.price
        );
        // buyer b bids below the remaining ask, so only one match happens
        assert!(
            (cleared(&outcome.trades, Side::Buy) - 5.0).abs() < 1e-9,
            "buys cleared {:.2}",
            cleared(&outcome.trades, Side::Buy)
        );
    }

    #[test]
    fn crossing_book_fills_sell_across_buyers() {
        let book = vec![
            make_buy(1, "a", 5.0, 0.10),
            make_buy(2, "b", 5.0, 0.09),
            make_sell(3, "s", 8.0, 0.08),
        ];

        let outcome = double_auction("heat", &book);

        let prices: Vec<f64> = outcome.trades.iter().map(|t| t.price).collect();
        assert!((prices[0] - 0.09).abs() < 1e-9);
        assert!((prices[2] - 0.085).abs() < 1e-9);
        assert!((outcome.trades[2].quantity - 3.0).abs() < 1e-9);
        assert!((cleared(&outcome.trades, Side::Sell) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn uniform_variant_uses_last_price() {
        let book = vec![
            make_buy(1, "a", 5.0, 0.10),
            make_buy(2, "b", 5.0, 0.09),
            make_sell(3, "s", 8.0, 0.08),
        ];

        let outcome = double_auction_uniform("heat", &book);

        for trade in &outcome.trades {
            assert!(
                (trade.price - 0.085).abs() < 1e-9,
                "uniform price should be 0.085, got {:.4}",
                trade.price
            );
        }
    }

    #[test]
    fn uniform_price_counts_a_crossing_buy_left_without_energy() {
        // a exhausts s exactly; b still crosses s and sets the marginal price
        let book = vec![
            make_buy(1, "a", 5.0, 0.10),
            make_buy(2, "b", 5.0, 0.09),
            make_sell(3, "s", 5.0, 0.08),
        ];

        let outcome = double_auction_uniform("heat", &book);

        assert_eq!(outcome.trades.len(), 2);
        assert!((cleared(&outcome.trades, Side::Buy) - 5.0).abs() < 1e-9);
        assert_eq!(outcome.marginal_price, Some((0.09 + 0.08) / 2.0));
        for trade in &outcome.trades {
            assert!(
                (trade.price - 0.085).abs() < 1e-9,
                "uniform price should be 0.085, got {:.4}",
                trade.price
            );
        }
    }

    #[test]
    fn one_sided_book_clears_nothing() {
        let only_buys = vec![make_buy(1, "a", 5.0, 0.10)];
        assert!(double_auction("heat", &only_buys).trades.is_empty());
        assert!(double_auction("heat", &[]).trades.is_empty());
    }

    #[test]
    fn rejected_partial_fill_is_dropped_and_rematched() {
        // a wants all 10 or nothing, but only 4 are offered; b takes the 4 instead
        let book = vec![
            make_buy(1, "a", 10.0, 0.12).with_acceptance(1.0),
            make_buy(2, "b", 4.0, 0.10),
            make_sell(3, "s", 4.0, 0.05),
        ];

        let outcome = double_auction("heat", &book);

        assert_eq!(outcome.iterations, 2);
        assert!(outcome.trades.iter().all(|t| t.receiver_id != "a"));
        assert!((cleared(&outcome.trades, Side::Buy) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn coupled_siblings_leave_with_the_filled_order() {
        // two alternative bids of one producer: once the smaller clears, the larger is void
        let book = vec![
            make_buy(1, "c", 6.0, 0.10),
            make_sell(10, "p", 3.0, 0.02).coupled_with([11]),
            make_sell(11, "p", 6.0, 0.04).coupled_with([10]),
        ];

        let outcome = double_auction("heat", &book);

        assert!((cleared(&outcome.trades, Side::Sell) - 3.0).abs() < 1e-9);
        assert_eq!(outcome.trades.len(), 2);
    }

    #[test]
    fn unsatisfiable_ratios_end_with_no_trades() {
        let book = vec![
            make_buy(1, "a", 10.0, 0.12).with_acceptance(1.0),
            make_sell(2, "s", 4.0, 0.05).with_acceptance(1.0),
            make_sell(3, "t", 9.0, 0.06).with_acceptance(1.0),
        ];

        let outcome = double_auction("heat", &book);

        assert!(outcome.trades.is_empty());
        assert!(outcome.iterations <= 3, "took {} passes", outcome.iterations);
    }

    #[test]
    fn rule_names_round_trip() {
        for rule in [ClearingRule::DoubleAuction, ClearingRule::DoubleAuctionUniform] {
            assert_eq!(ClearingRule::from_name(rule.name()), Some(rule));
        }
        assert_eq!(ClearingRule::from_name("pro_rata"), None);
    }
}
