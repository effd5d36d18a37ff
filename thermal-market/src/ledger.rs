use std::collections::BTreeMap;

use serde::Serialize;

use crate::market::{Side, Trade};
use crate::types::{Energy, Price, Product, Seconds};

// === ACCUMULATORS ===

/// Cleared quantity with its volume-weighted average price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Accumulator {
    pub quantity: Energy,
    pub price: Price,
}

/// Identifies the per-market accumulator of one product type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MarketSlot {
    pub product_type: Seconds,
    pub market: String,
}

/// Weighted mean of two price/quantity pairs; the new price alone when no weight exists yet.
fn weighted(held: Energy, held_price: Price, quantity: Energy, price: Price) -> Price {
    let total = held + quantity;
    if total == 0.0 {
        price
    } else {
        (held * held_price + quantity * price) / total
    }
}

// === PERIOD RECORD ===

/// Everything a trader knows about one delivery period.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodRecord {
    pub cleared_energy_pos: Energy,
    pub cleared_energy_neg: Energy,
    pub real_energy_pos: Energy,
    pub real_energy_neg: Energy,
    pub price_pos: Price,
    pub price_neg: Price,
    pub markets: BTreeMap<MarketSlot, Accumulator>,
}

impl PeriodRecord {
    /// Empty record with an accumulator for every market/product pair.
    pub fn with_markets<'a>(
        markets: impl IntoIterator<Item = &'a str>,
        product_types: &[Seconds],
    ) -> Self {
        let mut record = Self::default();
        for market in markets {
            for &product_type in product_types {
                record.markets.insert(
                    MarketSlot {
                        product_type,
                        market: market.to_string(),
                    },
                    Accumulator::default(),
                );
            }
        }
        record
    }

    /// Zero every value, keeping the market accumulators in place.
    pub fn reset(&mut self) {
        self.cleared_energy_pos = 0.0;
        self.cleared_energy_neg = 0.0;
        self.real_energy_pos = 0.0;
        self.real_energy_neg = 0.0;
        self.price_pos = 0.0;
        self.price_neg = 0.0;
        for acc in self.markets.values_mut() {
            *acc = Accumulator::default();
        }
    }

    /// Net cleared energy, positive when selling.
    pub fn cleared(&self) -> Energy {
        self.cleared_energy_pos - self.cleared_energy_neg
    }

    /// Net metered energy, positive when delivering.
    pub fn real(&self) -> Energy {
        self.real_energy_pos - self.real_energy_neg
    }

    /// Book `quantity` bought (`Buy`, into `_neg`) or sold (`Sell`, into `_pos`) at `price` on
    /// `market`.
    ///
    /// The side price is a running VWAP. The market accumulator is shared by both sides and
    /// restarts at `price` whenever the side had nothing cleared yet.
    pub fn book(
        &mut self,
        side: Side,
        product_type: Seconds,
        market: &str,
        quantity: Energy,
        price: Price,
    ) {
        let (cleared, side_price) = match side {
            Side::Buy => (&mut self.cleared_energy_neg, &mut self.price_neg),
            Side::Sell => (&mut self.cleared_energy_pos, &mut self.price_pos),
        };
        let acc = self
            .markets
            .entry(MarketSlot {
                product_type,
                market: market.to_string(),
            })
            .or_default();

        if *cleared != 0.0 {
            *side_price = weighted(*cleared, *side_price, quantity, price);
            acc.price = weighted(acc.quantity, acc.price, quantity, price);
        } else {
            *side_price = price;
            acc.price = price;
        }
        *cleared += quantity;
        acc.quantity += quantity;
    }
}

// === TRADING TABLE ===

/// Fixed ring of period records. Logical index 0 is the period currently delivering.
#[derive(Debug, Clone)]
pub struct TradingTable {
    slots: Vec<PeriodRecord>,
    head: usize,
}

impl TradingTable {
    pub fn new(horizon: usize, template: PeriodRecord) -> Self {
        Self {
            slots: vec![template; horizon.max(1)],
            head: 0,
        }
    }

    pub fn horizon(&self) -> usize {
        self.slots.len()
    }

    fn physical(&self, idx: usize) -> usize {
        (self.head + idx) % self.slots.len()
    }

    pub fn get(&self, idx: usize) -> Option<&PeriodRecord> {
        (idx < self.slots.len()).then(|| &self.slots[self.physical(idx)])
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut PeriodRecord> {
        if idx < self.slots.len() {
            let at = self.physical(idx);
            Some(&mut self.slots[at])
        } else {
            None
        }
    }

    pub fn current(&self) -> &PeriodRecord {
        &self.slots[self.head]
    }

    pub fn current_mut(&mut self) -> &mut PeriodRecord {
        &mut self.slots[self.head]
    }

    /// Records in logical order.
    pub fn iter(&self) -> impl Iterator<Item = &PeriodRecord> {
        (0..self.slots.len()).map(move |i| &self.slots[self.physical(i)])
    }

    /// One value per logical slot in `range`, clipped to the horizon.
    pub fn column(
        &self,
        range: std::ops::Range<usize>,
        f: impl Fn(&PeriodRecord) -> f64,
    ) -> Vec<f64> {
        let end = range.end.min(self.slots.len());
        (range.start.min(end)..end)
            .map(|i| f(&self.slots[self.physical(i)]))
            .collect()
    }

    /// Hand out the current period and recycle its slot as the new tail.
    pub fn close_period(&mut self) -> PeriodRecord {
        let closed = self.slots[self.head].clone();
        self.slots[self.head].reset();
        self.head = (self.head + 1) % self.slots.len();
        closed
    }
}

// === LONGTIME LOG ===

/// Imbalance billed against one network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BalancingEntry {
    pub energy: Energy,
    /// Cost per unit of imbalance, zero when balanced.
    pub cost: Price,
}

impl BalancingEntry {
    /// Price an imbalance: surplus at `price_pos`, shortfall at `price_neg`.
    pub fn settle(energy: Energy, price_pos: Price, price_neg: Price) -> Self {
        let total = if energy >= 0.0 {
            energy * price_pos
        } else {
            energy * price_neg
        };
        let cost = if energy != 0.0 { total / energy } else { 0.0 };
        Self { energy, cost }
    }
}

/// An archived period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongtimeRow {
    pub time: Seconds,
    pub scenario_time: Seconds,
    pub record: PeriodRecord,
    /// Keyed by network (system) name.
    pub balancing: BTreeMap<String, BalancingEntry>,
}

/// One value of an exported ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Int(u64),
    Float(f64),
    Null,
}

pub type LedgerRow = BTreeMap<String, Cell>;

impl LongtimeRow {
    pub fn to_row(&self) -> LedgerRow {
        let r = &self.record;
        let mut row = LedgerRow::new();
        row.insert("time".into(), Cell::Int(self.time));
        row.insert("scenario_time".into(), Cell::Int(self.scenario_time));
        for (name, value) in [
            ("cleared_energy_pos", r.cleared_energy_pos),
            ("cleared_energy_neg", r.cleared_energy_neg),
            ("real_energy_pos", r.real_energy_pos),
            ("real_energy_neg", r.real_energy_neg),
            ("price_pos", r.price_pos),
            ("price_neg", r.price_neg),
        ] {
            row.insert(name.into(), Cell::Float(value));
        }
        for (slot, acc) in &r.markets {
            let key = format!("{}_{}", slot.product_type, slot.market);
            row.insert(format!("price_{key}"), Cell::Float(acc.price));
            row.insert(key, Cell::Float(acc.quantity));
        }
        for (system, entry) in &self.balancing {
            row.insert(format!("balancing_energy_{system}"), Cell::Float(entry.energy));
            row.insert(format!("cost_balancing_energy_{system}"), Cell::Float(entry.cost));
        }
        row
    }
}

/// A trader's full history: the live window and everything already delivered.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub table: TradingTable,
    pub longtime: Vec<LongtimeRow>,
}

impl Ledger {
    pub fn new(horizon: usize, template: PeriodRecord) -> Self {
        Self {
            table: TradingTable::new(horizon, template),
            longtime: Vec::new(),
        }
    }

    /// Archive the current period at `time`.
    pub fn close_period(&mut self, time: Seconds, scenario_time: Seconds) {
        let record = self.table.close_period();
        self.longtime.push(LongtimeRow {
            time,
            scenario_time,
            record,
            balancing: BTreeMap::new(),
        });
    }

    /// Spread a trade evenly across the slots its product delivers into.
    pub fn book_trade(&mut self, trade: &Trade, trading_time: Seconds) {
        let slots = trade.product.slots(trading_time);
        if slots.is_empty() {
            return;
        }
        let share = trade.quantity / slots.len() as f64;
        for idx in slots {
            if let Some(record) = self.table.get_mut(idx) {
                record.book(
                    trade.side,
                    trade.product.product_type,
                    &trade.sender_id,
                    share,
                    trade.price,
                );
            }
        }
    }

    pub fn last_row(&self) -> Option<&LongtimeRow> {
        self.longtime.last()
    }

    pub fn last_row_mut(&mut self) -> Option<&mut LongtimeRow> {
        self.longtime.last_mut()
    }

    pub fn to_rows(&self) -> Vec<LedgerRow> {
        self.longtime.iter().map(LongtimeRow::to_row).collect()
    }
}

// === MARKET LOG ===

/// Settlement summary of one clearing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketLogRow {
    pub time: Seconds,
    pub product: Product,
    pub quantity: Energy,
    /// Volume-weighted buy price, `None` when nothing cleared.
    pub price: Option<Price>,
}

impl MarketLogRow {
    pub fn to_row(&self) -> LedgerRow {
        let mut row = LedgerRow::new();
        row.insert("time".into(), Cell::Int(self.time));
        row.insert("product_type".into(), Cell::Int(self.product.product_type));
        row.insert("lead_time".into(), Cell::Int(self.product.lead_time));
        row.insert("quantity".into(), Cell::Float(self.quantity));
        row.insert(
            "price".into(),
            self.price.map(Cell::Float).unwrap_or(Cell::Null),
        );
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(side: Side, product: Product, quantity: f64, price: f64) -> Trade {
        Trade {
            sender_id: "heat".into(),
            receiver_id: "chp".into(),
            side,
            product,
            quantity,
            price,
        }
    }

    #[test]
    fn ring_keeps_horizon_and_archives_in_order() {
        let mut ledger = Ledger::new(4, PeriodRecord::with_markets(["heat"], &[900]));
        for step in 0..6u64 {
            ledger.table.current_mut().real_energy_pos = step as f64;
            ledger.close_period(step * 900, step * 900);
        }

        assert_eq!(ledger.longtime.len(), 6);
        assert_eq!(ledger.table.horizon(), 4);
        let archived: Vec<f64> = ledger
            .longtime
            .iter()
            .map(|r| r.record.real_energy_pos)
            .collect();
        assert_eq!(archived, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        // recycled slots come back zeroed
        assert!(ledger.table.iter().all(|r| r.real_energy_pos == 0.0));
    }

    #[test]
    fn long_product_trade_spreads_over_its_slots() {
        let mut ledger = Ledger::new(5, PeriodRecord::default());
        ledger.book_trade(&trade(Side::Sell, Product::new(3600, 900), 8.0, 0.05), 900);

        let cleared = ledger.table.column(0..5, |r| r.cleared_energy_pos);
        assert_eq!(cleared, vec![0.0, 2.0, 2.0, 2.0, 2.0]);
        let acc = ledger.table.get(1).map(|r| r.markets.clone()).unwrap_or_default();
        let slot = MarketSlot {
            product_type: 3600,
            market: "heat".into(),
        };
        assert!((acc[&slot].quantity - 2.0).abs() < 1e-9);
    }

    #[test]
    fn side_price_is_volume_weighted() {
        let mut record = PeriodRecord::default();
        record.book(Side::Buy, 900, "heat", 2.0, 0.10);
        record.book(Side::Buy, 900, "heat", 6.0, 0.06);

        assert!((record.cleared_energy_neg - 8.0).abs() < 1e-9);
        assert!(
            (record.price_neg - 0.07).abs() < 1e-9,
            "vwap should be 0.07, got {:.4}",
            record.price_neg
        );
        assert_eq!(record.cleared_energy_pos, 0.0);
    }

    #[test]
    fn balancing_surplus_uses_positive_price() {
        let entry = BalancingEntry::settle(3.0, 0.2, 0.1);
        assert!((entry.energy - 3.0).abs() < 1e-9);
        assert!((entry.cost - 0.2).abs() < 1e-9);

        let short = BalancingEntry::settle(-2.0, 0.2, 0.1);
        assert!((short.cost - 0.1).abs() < 1e-9);

        assert_eq!(BalancingEntry::settle(0.0, 0.2, 0.1).cost, 0.0);
    }

    #[test]
    fn exported_row_names_market_and_balancing_columns() {
        let mut ledger = Ledger::new(2, PeriodRecord::with_markets(["heat"], &[900]));
        ledger.close_period(900, 3600);
        if let Some(row) = ledger.last_row_mut() {
            row.balancing
                .insert("heat".into(), BalancingEntry::settle(1.0, 0.3, 0.1));
        }

        let row = ledger.to_rows().remove(0);
        assert_eq!(row["scenario_time"], Cell::Int(3600));
        assert_eq!(row["900_heat"], Cell::Float(0.0));
        assert_eq!(row["price_900_heat"], Cell::Float(0.0));
        assert_eq!(row["balancing_energy_heat"], Cell::Float(1.0));
    }
}
