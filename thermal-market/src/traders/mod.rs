//! Market participants. Every trader runs the same assess -> price -> settle pipeline; a
//! [`TraderRole`] supplies what differs per kind of unit.

mod consumer;
mod converter;
mod heat_exchanger;
mod heat_pump;
mod storage;
mod system_operator;

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;

pub use consumer::Consumer;
pub use converter::Converter;
pub use heat_exchanger::{HeatExchanger, UseCase};
pub use heat_pump::HeatPump;
pub use storage::Storage;
pub use system_operator::SystemOperator;

use crate::config::{AgentConfig, AgentKind, ExperimentConfig};
use crate::error::{ConfigError, ConfigResult, ModelError, RunError};
use crate::ledger::{BalancingEntry, Ledger, PeriodRecord};
use crate::market::Order;
use crate::messages::{BalancingPrice, Message};
use crate::models::{
    Allocation, PricingExtras, PricingInputs, PricingModel, Quantities, QuantityInputs,
    QuantityModel, resolve_pricing_model, resolve_quantity_model,
};
use crate::signal::Signals;
use crate::types::{Actions, Energy, Observation, Price, Product, Seconds};

// === SETTINGS ===

/// Experiment-wide values every trader needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraderSettings {
    /// Shortest product; one trading-table slot.
    pub trading_time: Seconds,
    pub sampling_time: Seconds,
    pub num_control_steps: u64,
    pub is_power_controlled: bool,
    pub positive_market_limit: Price,
    pub negative_market_limit: Price,
    pub chp_renumeration: Price,
    pub heat_energy_scale: f64,
}

impl TraderSettings {
    pub fn from_experiment(e: &ExperimentConfig) -> Self {
        Self {
            trading_time: e.trading_time(),
            sampling_time: e.sampling_time,
            num_control_steps: e.num_control_steps(),
            is_power_controlled: e.is_power_controlled,
            positive_market_limit: e.positive_market_limit,
            negative_market_limit: e.negative_market_limit,
            chp_renumeration: e.chp_renumeration,
            heat_energy_scale: e.heat_energy_scale,
        }
    }
}

/// Names the status flag and set-point are written to.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutputs {
    pub status: String,
    pub set_point: String,
}

// === ROLE ===

/// Behavior that differs between kinds of trader.
pub trait TraderRole: Debug {
    fn kind(&self) -> AgentKind;

    /// Write the real energy of the open period from the readings at its start and now.
    fn record_real_energy(
        &mut self,
        start: &Observation,
        now: &Observation,
        period: &mut PeriodRecord,
    ) -> Result<(), ModelError>;

    /// Runs after every state update.
    fn after_state(&mut self, _core: &mut TraderCore) {}

    /// Mean prescribed demand over a delivery window.
    fn demand(&self, _window: (Seconds, Seconds)) -> Option<f64> {
        None
    }

    fn after_assessment(&mut self, _shorttime: bool, _quantities: &Quantities) {}

    fn pricing_extras(
        &self,
        _core: &TraderCore,
        _window: (Seconds, Seconds),
        _signals: &Signals,
    ) -> PricingExtras {
        PricingExtras::default()
    }

    /// Energy billed as imbalance for a closed period.
    fn imbalance(&self, _markets: &[String], record: &PeriodRecord, _msg: &BalancingPrice) -> Energy {
        record.cleared() - record.real()
    }

    fn after_billing(&mut self, _record: &PeriodRecord) {}

    fn set_actions(&self, core: &TraderCore) -> Result<Actions, ModelError> {
        let current = core.ledger.table.current();
        Ok(core.control_actions(current.cleared(), current.real(), true))
    }

    /// Balancing prices for the current period. Only system operators issue them.
    fn balancing_prices(&self, _core: &TraderCore) -> Vec<BalancingPrice> {
        Vec::new()
    }
}

fn build_role(agent: &AgentConfig, kind: AgentKind) -> ConfigResult<Box<dyn TraderRole>> {
    Ok(match kind {
        AgentKind::Converter => Box::new(Converter),
        AgentKind::Consumer => Box::new(Consumer::from_config(agent)?),
        AgentKind::Storage => Box::new(Storage::from_config(agent)?),
        AgentKind::HeatExchanger => Box::new(HeatExchanger::from_config(agent)?),
        AgentKind::HeatPump => Box::new(HeatPump::from_config(agent)?),
        AgentKind::SystemOperator => Box::new(SystemOperator::from_config(agent)?),
        AgentKind::Market => {
            return Err(ConfigError::UnknownTrader {
                agent: agent.name.clone(),
                trader: agent.name.clone(),
            });
        }
    })
}

// === CORE ===

/// State shared by every kind of trader.
#[derive(Debug)]
pub struct TraderCore {
    pub name: String,
    pub markets: Vec<String>,
    pub traders: Vec<String>,
    /// (local name, global key)
    inputs: Vec<(String, String)>,
    pub outputs: Option<ControlOutputs>,
    allocations: BTreeMap<Product, Allocation>,
    quantity_model: Box<dyn QuantityModel>,
    pricing_model: Box<dyn PricingModel>,
    pub ledger: Ledger,
    /// Local observations since the current period opened, newest last.
    history: VecDeque<Observation>,
    pub time: Seconds,
    pub scenario_time: Seconds,
    pub control_step: u64,
    pub settings: TraderSettings,
}

impl TraderCore {
    /// Latest local observation.
    pub fn observation(&self) -> Option<&Observation> {
        self.history.back()
    }

    /// Observation taken when the current period opened.
    fn period_start(&self) -> Option<&Observation> {
        let back = self.control_step as usize;
        let idx = self.history.len().checked_sub(back + 1).unwrap_or(0);
        self.history.get(idx)
    }

    pub fn observed(&self, key: &str) -> Result<f64, ModelError> {
        self.observation()
            .and_then(|o| o.get(key))
            .copied()
            .ok_or_else(|| ModelError::MissingInput(key.to_string()))
    }

    /// Status flag and set-point for a cleared and a realized energy.
    ///
    /// Power control holds the cleared mean power. Energy control spreads what is still missing
    /// over the rest of the period, or holds a token `0.01` once the period is overfulfilled and
    /// `floor` is set.
    pub fn setpoint(&self, cleared: Energy, real: Energy, floor: bool) -> (f64, f64) {
        let s = &self.settings;
        if s.is_power_controlled {
            let on = if cleared != 0.0 { 1.0 } else { 0.0 };
            return (on, cleared.abs() * 3600.0 / s.trading_time as f64);
        }
        let diff = if floor && real.abs() > cleared.abs() {
            0.01
        } else {
            cleared - real
        };
        let steps_left = (s.trading_time / s.sampling_time).saturating_sub(self.control_step);
        let time_left = (steps_left * s.sampling_time) as f64;
        let on = if diff != 0.0 && cleared != 0.0 { 1.0 } else { 0.0 };
        let set_point = if time_left > 0.0 {
            diff.abs() * 3600.0 / time_left
        } else {
            0.0
        };
        (on, set_point)
    }

    pub fn control_actions(&self, cleared: Energy, real: Energy, floor: bool) -> Actions {
        let mut actions = Actions::new();
        if let Some(outputs) = &self.outputs {
            let (on, set_point) = self.setpoint(cleared, real, floor);
            actions.insert(outputs.status.clone(), on);
            actions.insert(outputs.set_point.clone(), set_point);
        }
        actions
    }
}

// === TRADER ===

#[derive(Debug)]
pub struct Trader {
    pub core: TraderCore,
    role: Box<dyn TraderRole>,
}

impl Trader {
    pub fn from_config(
        agent: &AgentConfig,
        kind: AgentKind,
        experiment: &ExperimentConfig,
    ) -> ConfigResult<Self> {
        let model_name = |name: &Option<String>, kind: &'static str| {
            name.clone().ok_or_else(|| ConfigError::MissingModel {
                agent: agent.name.clone(),
                kind,
            })
        };
        let capacity = model_name(&agent.model.capacity_model, "capacity")?;
        let pricing = model_name(&agent.model.pricing_model, "pricing")?;
        let params = &agent.model.model_parameters;
        let quantity_model = resolve_quantity_model(&agent.name, &capacity, params)?;
        let pricing_model = resolve_pricing_model(&agent.name, &pricing, params)?;

        let outputs = match (&agent.env_outputs.set_status_on, &agent.env_outputs.set_point) {
            (Some(status), Some(set_point)) => Some(ControlOutputs {
                status: status.clone(),
                set_point: set_point.clone(),
            }),
            _ => None,
        };
        if outputs.is_none() && kind != AgentKind::SystemOperator {
            return Err(ConfigError::MissingOutput {
                agent: agent.name.clone(),
                output: "fSetPoint",
            });
        }

        let template = PeriodRecord::with_markets(
            agent.connections_markets.iter().map(String::as_str),
            &experiment.product_types(),
        );
        let settings = TraderSettings::from_experiment(experiment);

        let core = TraderCore {
            name: agent.name.clone(),
            markets: agent.connections_markets.clone(),
            traders: agent.connections_traders.clone(),
            inputs: agent
                .env_inputs
                .iter()
                .map(|(local, global)| (local.clone(), global.clone()))
                .collect(),
            outputs,
            allocations: agent.allocations(experiment)?,
            quantity_model,
            pricing_model,
            ledger: Ledger::new(experiment.horizon(), template),
            history: VecDeque::with_capacity(settings.num_control_steps as usize),
            time: 0,
            scenario_time: 0,
            control_step: 0,
            settings,
        };

        Ok(Self {
            core,
            role: build_role(agent, kind)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn kind(&self) -> AgentKind {
        self.role.kind()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.core.ledger
    }

    fn model_error(&self, source: ModelError) -> RunError {
        RunError::Model {
            agent: self.core.name.clone(),
            source,
        }
    }

    /// Ingest one observation. Opens a new period on control step 0.
    pub fn get_state(&mut self, observation: &Observation, control_step: u64) -> Result<(), RunError> {
        let core = &mut self.core;
        let mut local = Observation::with_capacity(core.inputs.len());
        for (name, key) in &core.inputs {
            let value = observation
                .get(key)
                .copied()
                .ok_or_else(|| RunError::MissingObservation {
                    agent: core.name.clone(),
                    key: key.clone(),
                })?;
            let value = if name == "fHeatEnergy" {
                value * core.settings.heat_energy_scale
            } else {
                value
            };
            local.insert(name.clone(), value);
        }

        core.time = observation.get("time").copied().unwrap_or(0.0) as Seconds;
        core.scenario_time = observation.get("scenario_time").copied().unwrap_or(0.0) as Seconds;
        core.control_step = control_step;
        core.history.push_back(local);
        while core.history.len() > core.settings.num_control_steps.max(1) as usize {
            core.history.pop_front();
        }

        if control_step == 0 {
            core.ledger.close_period(core.time, core.scenario_time);
        }

        if let (Some(start), Some(now)) = (core.period_start(), core.observation()) {
            let (start, now) = (start.clone(), now.clone());
            self.role
                .record_real_energy(&start, &now, core.ledger.table.current_mut())
                .map_err(|e| RunError::Model {
                    agent: core.name.clone(),
                    source: e,
                })?;
        }
        self.role.after_state(&mut self.core);
        Ok(())
    }

    /// Assess and price one product.
    pub fn trade(&mut self, product: Product, signals: &Signals) -> Result<Vec<Order>, RunError> {
        let core = &self.core;
        let Some(observation) = core.observation() else {
            return Ok(Vec::new());
        };
        let trading_time = core.settings.trading_time;
        let shorttime = product.product_type == trading_time;
        let slots = product.slots(trading_time);
        let table = &core.ledger.table;
        let cleared_pos = table.column(slots.clone(), |r| r.cleared_energy_pos);
        let cleared_neg = table.column(slots.clone(), |r| r.cleared_energy_neg);
        let price_pos = table.column(slots.clone(), |r| r.price_pos);
        let price_neg = table.column(slots, |r| r.price_neg);

        let window = product.delivery_window(core.time);
        let allocation = core
            .allocations
            .get(&product)
            .copied()
            .ok_or_else(|| self.model_error(ModelError::MissingInput(format!("allocation for {product}"))))?;

        let quantities = core
            .quantity_model
            .assess(&QuantityInputs {
                observation,
                cleared_energy_pos: &cleared_pos,
                cleared_energy_neg: &cleared_neg,
                trading_time,
                product_type: product.product_type,
                shorttime_product: shorttime,
                ambient_temperature: signals.ambient_temperature.mean(window.0, window.1),
                allocation,
                demand: self.role.demand(window),
            })
            .map_err(|e| self.model_error(e))?;

        let extras = self.role.pricing_extras(core, window, signals);
        let orders = core
            .pricing_model
            .price(&PricingInputs {
                name: &core.name,
                markets: &core.markets,
                observation,
                quantities: &quantities,
                product,
                positive_market_limit: core.settings.positive_market_limit,
                negative_market_limit: core.settings.negative_market_limit,
                shorttime_product: shorttime,
                cleared_energy_pos: &cleared_pos,
                cleared_energy_neg: &cleared_neg,
                price_pos: &price_pos,
                price_neg: &price_neg,
                extras,
            })
            .map_err(|e| self.model_error(e))?;

        self.role.after_assessment(shorttime, &quantities);
        Ok(orders)
    }

    /// Book a trade or bill a balancing price. Anything else is reported and dropped.
    pub fn process_msg(&mut self, msg: Message) {
        match msg {
            Message::Trade(trade) => {
                #[cfg(feature = "instrument")]
                tracing::info!(
                    target: "trade",
                    trader = self.core.name.as_str(),
                    market = trade.sender_id.as_str(),
                    side = trade.side.as_str(),
                    product_type = trade.product.product_type,
                    lead_time = trade.product.lead_time,
                    quantity = trade.quantity,
                    price = trade.price,
                );
                let trading_time = self.core.settings.trading_time;
                self.core.ledger.book_trade(&trade, trading_time);
            }
            Message::Balancing(price) => self.bill(&price),
            other => {
                #[cfg(feature = "instrument")]
                tracing::warn!(
                    target: "routing",
                    receiver = self.core.name.as_str(),
                    kind = other.kind(),
                    "unhandled message dropped"
                );
                let _ = other;
            }
        }
    }

    /// Attach the balancing cost to the last archived period.
    fn bill(&mut self, msg: &BalancingPrice) {
        let Some(record) = self.core.ledger.last_row().map(|row| row.record.clone()) else {
            return;
        };
        let energy = self.role.imbalance(&self.core.markets, &record, msg);
        let entry = BalancingEntry::settle(energy, msg.price_pos, msg.price_neg);
        if let Some(row) = self.core.ledger.last_row_mut() {
            row.balancing.insert(msg.system_id.clone(), entry);
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "balancing",
            trader = self.core.name.as_str(),
            system = msg.system_id.as_str(),
            energy = entry.energy,
            cost = entry.cost,
        );

        self.role.after_billing(&record);
    }

    pub fn set_actions(&self) -> Result<Actions, RunError> {
        self.role
            .set_actions(&self.core)
            .map_err(|e| self.model_error(e))
    }

    pub fn balancing_prices(&self) -> Vec<BalancingPrice> {
        self.role.balancing_prices(&self.core)
    }

    /// Archive the open period outside the regular loop.
    pub fn close_period(&mut self, time: Seconds, scenario_time: Seconds) {
        self.core.ledger.close_period(time, scenario_time);
    }
}

/// Counter delta of `key` between two observations.
fn delta(start: &Observation, now: &Observation, key: &str) -> Result<f64, ModelError> {
    let get = |o: &Observation| {
        o.get(key)
            .copied()
            .ok_or_else(|| ModelError::MissingInput(key.to_string()))
    };
    Ok(get(now)? - get(start)?)
}

/// Mean layer temperature of a stratified tank.
fn layer_temperature(o: &Observation) -> Result<f64, ModelError> {
    let get = |key: &str| {
        o.get(key)
            .copied()
            .ok_or_else(|| ModelError::MissingInput(key.to_string()))
    };
    Ok((get("fUpperTemperature")? + get("fLowerTemperature")?) / 2.0)
}
