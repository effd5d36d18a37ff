//! The control loop: one `step` per physical-layer sample.
//!
//! At the start of every shortest-product period all traders bid on every product due for
//! trading, every market clears, and cleared trades flow back before any set-point is written.
//! Between periods the traders only track their meters and steer towards what they cleared.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::config::{AgentKind, ExperimentConfig, SystemConfig};
use crate::context::RunContext;
use crate::error::{ConfigError, ConfigResult, RunError};
use crate::market::{ClearingRule, Market};
use crate::messages::{BalancingPrice, Message};
use crate::signal::Signals;
use crate::sink::{LedgerSink, LedgerSnapshot, LedgerTable, NullSink};
use crate::traders::Trader;
use crate::types::{Actions, MarketKey, Observation, Product, Seconds, TraderKey};

/// Actuation keys written in W while traders think in kW.
const SET_POINT_SUFFIX: &str = "fSetPointAlgorithm";
const STATUS_SUFFIX: &str = "bSetStatusOnAlgorithm";
const CELSIUS_TO_KELVIN: f64 = 273.15;

pub struct Orchestrator<S: LedgerSink = NullSink> {
    config: SystemConfig,
    run: RunContext,
    sink: S,
    signals: Signals,

    traders: SlotMap<TraderKey, Trader>,
    /// Configuration order; every trader-wide pass follows it.
    trader_order: Vec<TraderKey>,
    trader_index: HashMap<String, TraderKey>,
    markets: SlotMap<MarketKey, Market>,
    market_order: Vec<MarketKey>,
    market_index: HashMap<String, MarketKey>,
    skipped_agents: Vec<String>,

    time: Seconds,
    scenario_time: Seconds,
    control_step: u64,
    trading_step: u64,
    next_order_id: u64,
}

impl<S: LedgerSink> Orchestrator<S> {
    /// Build every market and trader. Agents of unknown type are skipped and reported.
    pub fn new(config: SystemConfig, run: RunContext, sink: S) -> ConfigResult<Self> {
        config.validate()?;
        let products = config.experiment.all_products();

        let mut traders = SlotMap::with_key();
        let mut trader_order = Vec::new();
        let mut trader_index = HashMap::new();
        let mut markets = SlotMap::with_key();
        let mut market_order = Vec::new();
        let mut market_index = HashMap::new();
        let mut skipped_agents = Vec::new();

        for agent in &config.agents {
            match agent.kind() {
                None => {
                    #[cfg(feature = "instrument")]
                    tracing::warn!(
                        target: "setup",
                        agent = agent.name.as_str(),
                        agent_type = agent.agent_type.as_str(),
                        "unknown agent type, skipped"
                    );
                    skipped_agents.push(agent.name.clone());
                }
                Some(AgentKind::Market) => {
                    let rule = match &agent.model.clearing_model {
                        None => ClearingRule::default(),
                        Some(name) => ClearingRule::from_name(name).ok_or_else(|| {
                            ConfigError::UnknownClearing {
                                agent: agent.name.clone(),
                                name: name.clone(),
                            }
                        })?,
                    };
                    let key = markets.insert(Market::new(agent.name.clone(), rule, &products));
                    market_order.push(key);
                    market_index.insert(agent.name.clone(), key);
                }
                Some(kind) => {
                    let key = traders.insert(Trader::from_config(agent, kind, &config.experiment)?);
                    trader_order.push(key);
                    trader_index.insert(agent.name.clone(), key);
                }
            }
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "setup",
            traders = trader_order.len() as u64,
            markets = market_order.len() as u64,
            skipped = skipped_agents.len() as u64,
            horizon = config.experiment.horizon() as u64,
            control_steps = config.experiment.num_control_steps(),
            trading_steps = config.experiment.num_trading_steps(),
        );

        Ok(Self {
            signals: Signals::from_experiment(&config.experiment),
            scenario_time: config.experiment.scenario_time_begin,
            config,
            run,
            sink,
            traders,
            trader_order,
            trader_index,
            markets,
            market_order,
            market_index,
            skipped_agents,
            time: 0,
            control_step: 0,
            trading_step: 0,
            next_order_id: 0,
        })
    }

    fn experiment(&self) -> &ExperimentConfig {
        &self.config.experiment
    }

    // === STEP ===

    /// Advance one sampling interval: ingest `observation`, trade if a period starts, and
    /// return the actuation map.
    pub fn step(&mut self, observation: &Observation) -> Result<Actions, RunError> {
        let observation = self.prepare_observation(observation);
        let mut actions = self.global_actions(&observation)?;

        if !self.experiment().is_benchmark_scenario {
            self.run_traders(&observation, &mut actions)?;
        }

        let sampling_time = self.experiment().sampling_time;
        self.time += sampling_time;
        self.scenario_time += sampling_time;
        if self.scenario_time == self.experiment().scenario_time_end {
            self.finish()?;
        }
        Ok(actions)
    }

    fn run_traders(&mut self, observation: &Observation, actions: &mut Actions) -> Result<(), RunError> {
        let control_step = self.control_step;
        for &key in &self.trader_order {
            self.traders[key].get_state(observation, control_step)?;
        }

        if control_step == 0 {
            for product in self.tradable_products() {
                self.trade_product(product)?;
            }
            self.route_balancing_prices();
            self.trading_step += 1;
        }

        let live = self.experiment().is_live_env;
        for &key in &self.trader_order {
            let trader_actions = self.traders[key].set_actions()?;
            merge_actions(actions, trader_actions, live);
        }

        self.control_step += 1;
        if self.control_step >= self.experiment().num_control_steps() {
            self.control_step = 0;
            if live {
                self.flush()?;
            }
        }
        if self.trading_step >= self.experiment().num_trading_steps() {
            self.trading_step = 0;
        }
        Ok(())
    }

    /// Products due at the current trading step, longest product and lead time first.
    fn tradable_products(&self) -> Vec<Product> {
        let shortest = self.experiment().trading_time().max(1);
        let mut due: Vec<Product> = self
            .experiment()
            .all_products()
            .into_iter()
            .filter(|p| self.trading_step % (p.product_type / shortest).max(1) == 0)
            .collect();
        due.sort_by(|a, b| b.cmp(a));
        due
    }

    fn trade_product(&mut self, product: Product) -> Result<(), RunError> {
        let mut orders = Vec::new();
        for &key in &self.trader_order {
            let mut batch = self.traders[key].trade(product, &self.signals)?;
            let span = batch.iter().map(|o| o.id.0 + 1).max().unwrap_or(0);
            for order in &mut batch {
                order.rebase(self.next_order_id);
            }
            self.next_order_id += span;
            orders.extend(batch);
        }
        for order in orders {
            self.route(Message::Order(order));
        }

        let mut trades = Vec::new();
        for &key in &self.market_order {
            trades.extend(self.markets[key].clear(product, self.scenario_time));
        }
        for trade in trades {
            self.route(Message::Trade(trade));
        }
        Ok(())
    }

    fn route_balancing_prices(&mut self) {
        let prices: Vec<BalancingPrice> = self
            .trader_order
            .iter()
            .map(|&key| &self.traders[key])
            .filter(|t| t.kind() == AgentKind::SystemOperator)
            .flat_map(Trader::balancing_prices)
            .collect();
        for price in prices {
            self.route(Message::Balancing(price));
        }
    }

    /// Deliver a message by receiver name: orders go to markets, everything else to traders.
    fn route(&mut self, msg: Message) {
        let receiver = match &msg {
            Message::Order(order) => self.market_index.get(&order.receiver_id).copied().map(Receiver::Market),
            other => self.trader_index.get(other.receiver_id()).copied().map(Receiver::Trader),
        };
        match (receiver, msg) {
            (Some(Receiver::Market(key)), Message::Order(order)) => self.markets[key].process_msg(order),
            (Some(Receiver::Trader(key)), msg) => self.traders[key].process_msg(msg),
            (_, msg) => {
                #[cfg(feature = "instrument")]
                tracing::warn!(
                    target: "routing",
                    receiver = msg.receiver_id(),
                    kind = msg.kind(),
                    "no such receiver, message dropped"
                );
                let _ = msg;
            }
        }
    }

    /// Close out the scenario: archive a just-completed period, bill the last balancing prices
    /// and flush.
    fn finish(&mut self) -> Result<(), RunError> {
        if !self.experiment().is_benchmark_scenario {
            if self.control_step == 0 {
                let (time, scenario_time) = (self.time, self.scenario_time);
                for &key in &self.trader_order {
                    self.traders[key].close_period(time, scenario_time);
                }
            }
            self.route_balancing_prices();
        }
        self.flush()
    }

    // === PHYSICAL LAYER ===

    fn prepare_observation(&self, raw: &Observation) -> Observation {
        let adjust = &self.config.observation_adjustments;
        let mut observation = raw.clone();
        for (key, value) in &adjust.constants {
            observation.insert(key.clone(), *value);
        }
        for key in &adjust.negate {
            if let Some(value) = observation.get_mut(key) {
                *value = -*value;
            }
        }
        if self.experiment().is_live_env {
            for (key, divisor) in adjust.live_scale.iter().filter(|(_, d)| **d != 0.0) {
                if let Some(value) = observation.get_mut(key) {
                    *value /= divisor;
                }
            }
        }
        observation.insert("time".into(), self.time as f64);
        observation.insert("scenario_time".into(), self.scenario_time as f64);
        observation
    }

    /// Actions the physical layer needs regardless of what was traded.
    fn global_actions(&self, observation: &Observation) -> Result<Actions, RunError> {
        let e = self.experiment();
        let g = &self.config.global_actions;
        let flag = |on: bool| if on { 1.0 } else { 0.0 };

        let mut actions: Actions = g.action_names.iter().map(|name| (name.clone(), 0.0)).collect();
        if !e.is_live_env {
            if let Some(name) = &g.ambient_temperature {
                let ambient = self
                    .signals
                    .ambient_temperature
                    .mean(self.time, self.time + e.trading_time());
                actions.insert(name.clone(), ambient);
            }
            if let Some(name) = &g.heating_mode {
                actions.insert(name.clone(), flag(e.heating_mode));
            }
        }
        if let Some(name) = &g.production_mode {
            actions.insert(name.clone(), flag(e.production_mode));
        }
        if e.is_benchmark_scenario {
            return Ok(actions);
        }

        for (name, value) in &g.static_actions {
            actions.insert(name.clone(), *value);
        }
        for (name, key) in &g.feed_temperature_setpoints {
            let feed = observation
                .get(key)
                .copied()
                .ok_or_else(|| RunError::MissingObservation {
                    agent: "global_actions".into(),
                    key: key.clone(),
                })?;
            let feed = if e.is_live_env { feed } else { feed + CELSIUS_TO_KELVIN };
            actions.insert(name.clone(), feed);
        }
        Ok(actions)
    }

    // === LEDGERS ===

    /// Current ledgers of every trader and market, in configuration order.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let traders = self.trader_order.iter().map(|&key| {
            let trader = &self.traders[key];
            LedgerTable {
                agent: trader.name().to_string(),
                rows: trader.ledger().to_rows(),
            }
        });
        let markets = self.market_order.iter().map(|&key| {
            let market = &self.markets[key];
            LedgerTable {
                agent: market.name.clone(),
                rows: market.to_rows(),
            }
        });
        LedgerSnapshot {
            tables: traders.chain(markets).collect(),
        }
    }

    pub fn flush(&mut self) -> Result<(), RunError> {
        let snapshot = self.snapshot();
        self.sink.flush(&self.run, &snapshot)?;
        Ok(())
    }

    // === ACCESSORS ===

    pub fn trader(&self, name: &str) -> Option<&Trader> {
        self.trader_index.get(name).map(|&key| &self.traders[key])
    }

    pub fn market(&self, name: &str) -> Option<&Market> {
        self.market_index.get(name).map(|&key| &self.markets[key])
    }

    pub fn traders(&self) -> impl Iterator<Item = &Trader> {
        self.trader_order.iter().map(|&key| &self.traders[key])
    }

    pub fn skipped_agents(&self) -> &[String] {
        &self.skipped_agents
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn time(&self) -> Seconds {
        self.time
    }

    pub fn scenario_time(&self) -> Seconds {
        self.scenario_time
    }

    pub fn control_step(&self) -> u64 {
        self.control_step
    }

    pub fn trading_step(&self) -> u64 {
        self.trading_step
    }
}

#[derive(Clone, Copy)]
enum Receiver {
    Market(MarketKey),
    Trader(TraderKey),
}

/// Fold one trader's actions into the actuation map.
fn merge_actions(actions: &mut Actions, trader_actions: Actions, live: bool) {
    for (key, value) in trader_actions {
        let last = key.rsplit('.').next().unwrap_or("");
        if last == STATUS_SUFFIX {
            let mut parts = key.splitn(3, '.');
            if let (Some(a), Some(b), Some(_)) = (parts.next(), parts.next(), parts.next()) {
                actions.insert(format!("{a}.{b}.control.{STATUS_SUFFIX}"), value);
            }
        }
        // kW to W
        let value = if last == SET_POINT_SUFFIX && !live { value * 1000.0 } else { value };
        actions.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use serde_json::json;

    fn config(extra: serde_json::Value) -> SystemConfig {
        let mut value = json!({
            "experiment": {
                "products": [
                    {"product_type": 900, "lead_times": [0]},
                    {"product_type": 1800, "lead_times": [0]}
                ],
                "sampling_time": 300,
                "scenario_time_end": 3600,
                "ambient_temperature": 8.0
            },
            "agents": [
                {"name": "heat", "type": "market"},
                {"name": "pv", "type": "photovoltaic"}
            ],
            "global_actions": {
                "action_names": ["T_ambient", "mode.bProductionModeActivated"],
                "ambient_temperature": "T_ambient",
                "production_mode": "mode.bProductionModeActivated",
                "static_actions": {"valve.fSetPointAlgorithm": 100.0},
                "feed_temperature_setpoints": {"chp.setSetPoint.fSetPointAlgorithm": "fFeedTemperature"}
            },
            "observation_adjustments": {"constants": {"fFeedTemperature": 65.0}}
        });
        if let serde_json::Value::Object(extra) = extra {
            for (k, v) in extra {
                value["experiment"][k] = v;
            }
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unknown_agents_are_skipped() {
        let orch = Orchestrator::new(config(json!({})), RunContext::default(), NullSink).unwrap();
        assert_eq!(orch.skipped_agents(), ["pv".to_string()]);
        assert!(orch.market("heat").is_some());
        assert!(orch.trader("pv").is_none());
    }

    #[test]
    fn global_actions_cover_modes_and_feed_set_points() {
        let mut orch = Orchestrator::new(config(json!({})), RunContext::default(), NullSink).unwrap();
        let actions = orch.step(&Observation::new()).unwrap();
        assert_eq!(actions["T_ambient"], 8.0);
        assert_eq!(actions["mode.bProductionModeActivated"], 1.0);
        assert_eq!(actions["valve.fSetPointAlgorithm"], 100.0);
        assert!((actions["chp.setSetPoint.fSetPointAlgorithm"] - 338.15).abs() < 1e-9);
    }

    #[test]
    fn benchmark_mode_only_sets_mode_flags() {
        let mut orch = Orchestrator::new(
            config(json!({"is_benchmark_scenario": true})),
            RunContext::default(),
            NullSink,
        )
        .unwrap();
        let actions = orch.step(&Observation::new()).unwrap();
        assert!(!actions.contains_key("valve.fSetPointAlgorithm"));
        assert_eq!(orch.control_step(), 0);
        assert_eq!(orch.time(), 300);
    }

    #[test]
    fn counters_wrap_and_scenario_end_flushes() {
        let mut orch =
            Orchestrator::new(config(json!({})), RunContext::default(), MemorySink::default()).unwrap();
        let mut trading_steps = Vec::new();
        for _ in 0..12 {
            orch.step(&Observation::new()).unwrap();
            trading_steps.push(orch.trading_step());
        }
        assert_eq!(orch.control_step(), 0);
        assert_eq!(trading_steps[..6], [1, 1, 1, 0, 0, 0]);
        assert_eq!(orch.sink().flushes, 1);
        assert_eq!(orch.scenario_time(), 3600);
    }

    #[test]
    fn due_products_run_longest_first() {
        let orch = Orchestrator::new(config(json!({})), RunContext::default(), NullSink).unwrap();
        assert_eq!(
            orch.tradable_products(),
            vec![Product::new(1800, 0), Product::new(900, 0)]
        );
    }

    #[test]
    fn merge_scales_set_points_and_mirrors_status() {
        let mut actions = Actions::new();
        let mut trader = Actions::new();
        trader.insert("HNHT.CHP1System.setSetPoint.fSetPointAlgorithm".into(), 12.5);
        trader.insert("HNHT.CHP1System.setStatus.bSetStatusOnAlgorithm".into(), 1.0);
        merge_actions(&mut actions, trader, false);

        assert_eq!(actions["HNHT.CHP1System.setSetPoint.fSetPointAlgorithm"], 12500.0);
        assert_eq!(actions["HNHT.CHP1System.control.bSetStatusOnAlgorithm"], 1.0);
        assert_eq!(actions["HNHT.CHP1System.setStatus.bSetStatusOnAlgorithm"], 1.0);
    }
}
