//! Properties of the double auction over randomized order books.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thermal_market::market::{ClearingRule, Market, Order, Side, Trade, double_auction};
use thermal_market::types::Product;

const PRODUCT: Product = Product {
    product_type: 900,
    lead_time: 0,
};

fn random_book(rng: &mut StdRng, n: usize) -> Vec<Order> {
    (0..n)
        .map(|i| {
            let side = if rng.random_bool(0.5) { Side::Buy } else { Side::Sell };
            let quantity = rng.random_range(0.5..20.0);
            let price = rng.random_range(-0.2..0.4);
            let acceptance = if rng.random_bool(0.3) {
                rng.random_range(0.1..1.0)
            } else {
                0.0
            };
            Order::new(format!("t{i}"), "heat", side, PRODUCT, quantity, price)
                .with_id(i as u64)
                .with_acceptance(acceptance)
        })
        .collect()
}

fn filled_by_sender(trades: &[Trade]) -> HashMap<(String, Side), f64> {
    let mut filled = HashMap::new();
    for trade in trades {
        *filled
            .entry((trade.receiver_id.clone(), trade.side))
            .or_insert(0.0) += trade.quantity;
    }
    filled
}

#[test]
fn trades_come_in_matching_pairs() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let n = rng.random_range(0..12);
        let book = random_book(&mut rng, n);
        let outcome = double_auction("heat", &book);

        assert_eq!(outcome.trades.len() % 2, 0);
        for pair in outcome.trades.chunks(2) {
            assert_eq!(pair[0].side, Side::Buy);
            assert_eq!(pair[1].side, Side::Sell);
            assert_eq!(pair[0].quantity, pair[1].quantity);
            assert_eq!(pair[0].price, pair[1].price);
            assert!(pair[0].quantity > 0.0, "zero-quantity trades are never emitted");
        }
    }
}

#[test]
fn no_order_is_overfilled_and_passes_are_bounded() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..200 {
        let n = rng.random_range(1..12);
        let book = random_book(&mut rng, n);
        let outcome = double_auction("heat", &book);

        assert!(
            outcome.iterations as usize <= book.len(),
            "{} passes for {} orders",
            outcome.iterations,
            book.len()
        );
        let filled = filled_by_sender(&outcome.trades);
        for order in &book {
            let got = filled
                .get(&(order.sender_id.clone(), order.side))
                .copied()
                .unwrap_or(0.0);
            assert!(
                got <= order.quantity + 1e-9,
                "{} filled {:.3} of {:.3}",
                order.sender_id,
                got,
                order.quantity
            );
        }
    }
}

#[test]
fn uniform_rule_settles_everything_at_the_last_price() {
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..100 {
        let n = rng.random_range(2..10);
        let book = random_book(&mut rng, n);
        let outcome = ClearingRule::DoubleAuctionUniform.clear("heat", &book);
        if let Some(last) = outcome.trades.last() {
            assert!(outcome.trades.iter().all(|t| t.price == last.price));
        }
    }
}

#[test]
fn uniform_example_settles_at_marginal_price() {
    let book = vec![
        Order::new("a", "heat", Side::Buy, PRODUCT, 5.0, 0.10).with_id(0),
        Order::new("b", "heat", Side::Buy, PRODUCT, 5.0, 0.08).with_id(1),
        Order::new("s", "heat", Side::Sell, PRODUCT, 8.0, 0.07).with_id(2),
    ];
    let outcome = ClearingRule::DoubleAuctionUniform.clear("heat", &book);
    let prices: Vec<f64> = outcome.trades.iter().map(|t| t.price).collect();
    assert_eq!(prices.len(), 4);
    assert!(prices.iter().all(|p| (p - 0.075).abs() < 1e-12), "prices {prices:?}");
}

#[test]
fn uniform_price_includes_a_crossing_buy_that_got_nothing() {
    let book = vec![
        Order::new("a", "heat", Side::Buy, PRODUCT, 5.0, 0.10).with_id(0),
        Order::new("b", "heat", Side::Buy, PRODUCT, 5.0, 0.09).with_id(1),
        Order::new("s", "heat", Side::Sell, PRODUCT, 5.0, 0.08).with_id(2),
    ];
    let outcome = ClearingRule::DoubleAuctionUniform.clear("heat", &book);
    let fills: Vec<(&str, f64)> = outcome
        .trades
        .iter()
        .map(|t| (t.receiver_id.as_str(), t.quantity))
        .collect();
    assert_eq!(fills, [("a", 5.0), ("s", 5.0)]);
    assert!(
        outcome.trades.iter().all(|t| (t.price - 0.085).abs() < 1e-12),
        "prices {:?}",
        outcome.trades.iter().map(|t| t.price).collect::<Vec<_>>()
    );
}

#[test]
fn market_book_is_empty_after_clearing() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut market = Market::new("heat", ClearingRule::DoubleAuction, &[PRODUCT]);
    for order in random_book(&mut rng, 10) {
        market.process_msg(order);
    }
    market.process_msg(Order::new("idle", "heat", Side::Sell, PRODUCT, 0.0, 0.0));
    assert!(market.book(PRODUCT).iter().all(|o| o.quantity > 0.0));

    market.clear(PRODUCT, 900);
    assert!(market.book(PRODUCT).is_empty());
    assert_eq!(market.log.len(), 1);
}

#[test]
fn coupled_siblings_leave_with_the_cleared_bid() {
    // two alternatives of one unit: the big block clears, the small one must not
    let book = vec![
        Order::new("chp", "heat", Side::Sell, PRODUCT, 10.0, 0.02)
            .with_id(0)
            .coupled_with([1]),
        Order::new("chp", "heat", Side::Sell, PRODUCT, 4.0, 0.03)
            .with_id(1)
            .coupled_with([0]),
        Order::new("office", "heat", Side::Buy, PRODUCT, 20.0, 0.5).with_id(2),
    ];
    let outcome = double_auction("heat", &book);
    let sold: f64 = outcome
        .trades
        .iter()
        .filter(|t| t.side == Side::Sell)
        .map(|t| t.quantity)
        .sum();
    assert!((sold - 10.0).abs() < 1e-12, "sold {sold:.2}");
}
