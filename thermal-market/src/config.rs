//! System configuration, read once at startup from a JSON document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::models::Allocation;
use crate::signal::Signal;
use crate::types::{Price, Product, Seconds};

// === AGENT KINDS ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Market,
    Converter,
    Consumer,
    Storage,
    HeatExchanger,
    HeatPump,
    SystemOperator,
}

impl AgentKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "market" => AgentKind::Market,
            "converter" => AgentKind::Converter,
            "consumer" => AgentKind::Consumer,
            "storage" => AgentKind::Storage,
            "heat_exchanger" => AgentKind::HeatExchanger,
            "heat_pump" => AgentKind::HeatPump,
            "system_operator" => AgentKind::SystemOperator,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Market => "market",
            AgentKind::Converter => "converter",
            AgentKind::Consumer => "consumer",
            AgentKind::Storage => "storage",
            AgentKind::HeatExchanger => "heat_exchanger",
            AgentKind::HeatPump => "heat_pump",
            AgentKind::SystemOperator => "system_operator",
        }
    }

    /// Traders that buy and sell on the same network carry separate buy/sell shares.
    pub fn has_split_allocation(self) -> bool {
        matches!(self, AgentKind::Storage | AgentKind::SystemOperator)
    }
}

// === EXPERIMENT ===

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductConfig {
    pub product_type: Seconds,
    pub lead_times: Vec<Seconds>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub products: Vec<ProductConfig>,
    pub sampling_time: Seconds,
    pub scenario_time_begin: Seconds,
    pub scenario_time_end: Seconds,
    pub positive_market_limit: Price,
    pub negative_market_limit: Price,
    pub is_power_controlled: bool,
    pub is_live_env: bool,
    pub is_benchmark_scenario: bool,
    pub heating_mode: bool,
    pub production_mode: bool,
    pub chp_renumeration: Price,
    pub ambient_temperature: Signal,
    pub cost_electricity: Signal,
    pub cost_fuel: Signal,
    pub electricity_demand: Signal,
    /// Factor applied to `fHeatEnergy` readings (MWh counters to kWh).
    pub heat_energy_scale: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            products: Vec::new(),
            sampling_time: 60,
            scenario_time_begin: 0,
            scenario_time_end: 0,
            positive_market_limit: 1.0,
            negative_market_limit: -1.0,
            is_power_controlled: false,
            is_live_env: false,
            is_benchmark_scenario: false,
            heating_mode: true,
            production_mode: true,
            chp_renumeration: 0.0,
            ambient_temperature: Signal::default(),
            cost_electricity: Signal::default(),
            cost_fuel: Signal::default(),
            electricity_demand: Signal::default(),
            heat_energy_scale: 1000.0,
        }
    }
}

impl ExperimentConfig {
    /// Shortest product type; the resolution of every trading table.
    pub fn trading_time(&self) -> Seconds {
        self.products
            .iter()
            .map(|p| p.product_type)
            .min()
            .unwrap_or(0)
    }

    pub fn longest_product(&self) -> Seconds {
        self.products
            .iter()
            .map(|p| p.product_type)
            .max()
            .unwrap_or(0)
    }

    /// Seconds covered by the trading table: longest product plus its longest lead time.
    pub fn horizon_time(&self) -> Seconds {
        let longest = self.longest_product();
        let lead = self
            .products
            .iter()
            .filter(|p| p.product_type == longest)
            .flat_map(|p| p.lead_times.iter().copied())
            .max()
            .unwrap_or(0);
        longest + lead
    }

    /// Trading-table length in slots.
    pub fn horizon(&self) -> usize {
        match self.trading_time() {
            0 => 0,
            t => (self.horizon_time() / t) as usize,
        }
    }

    pub fn num_control_steps(&self) -> u64 {
        self.trading_time() / self.sampling_time.max(1)
    }

    pub fn num_trading_steps(&self) -> u64 {
        self.longest_product() / self.trading_time().max(1)
    }

    /// Every configured product, in configuration order.
    pub fn all_products(&self) -> Vec<Product> {
        self.products
            .iter()
            .flat_map(|p| p.lead_times.iter().map(|&lead| Product::new(p.product_type, lead)))
            .collect()
    }

    pub fn product_types(&self) -> Vec<Seconds> {
        let set: BTreeSet<Seconds> = self.products.iter().map(|p| p.product_type).collect();
        set.into_iter().collect()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.products.is_empty() || self.products.iter().any(|p| p.lead_times.is_empty()) {
            return Err(ConfigError::NoProducts);
        }
        let shortest = self.trading_time();
        for p in &self.products {
            if shortest == 0 || p.product_type % shortest != 0 {
                return Err(ConfigError::ProductNotMultiple {
                    product_type: p.product_type,
                    shortest,
                });
            }
        }
        if self.sampling_time == 0 || shortest % self.sampling_time != 0 {
            return Err(ConfigError::SamplingTime {
                sampling_time: self.sampling_time,
                shortest,
            });
        }
        let horizon = self.horizon_time();
        for product in self.all_products() {
            if product.lead_time + product.product_type > horizon {
                return Err(ConfigError::BeyondHorizon {
                    product_type: product.product_type,
                    lead_time: product.lead_time,
                    horizon,
                });
            }
        }
        for (name, signal) in [
            ("ambient_temperature", &self.ambient_temperature),
            ("cost_electricity", &self.cost_electricity),
            ("cost_fuel", &self.cost_fuel),
            ("electricity_demand", &self.electricity_demand),
        ] {
            if signal.is_empty() {
                return Err(ConfigError::EmptySignal(name.to_string()));
            }
        }
        Ok(())
    }
}

// === AGENTS ===

/// Physical-layer names a trader writes its set-points to.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvOutputs {
    #[serde(rename = "bSetStatusOn")]
    pub set_status_on: Option<String>,
    #[serde(rename = "fSetPoint")]
    pub set_point: Option<String>,
    #[serde(rename = "bLoading")]
    pub loading: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub capacity_model: Option<String>,
    #[serde(default)]
    pub pricing_model: Option<String>,
    #[serde(default)]
    pub clearing_model: Option<String>,
    #[serde(default = "empty_object")]
    pub model_parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            capacity_model: None,
            pricing_model: None,
            clearing_model: None,
            model_parameters: empty_object(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub connections_markets: Vec<String>,
    #[serde(default)]
    pub connections_traders: Vec<String>,
    /// Local input name -> global observation key.
    #[serde(default)]
    pub env_inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub env_outputs: EnvOutputs,
    #[serde(default)]
    pub model: ModelConfig,
}

impl AgentConfig {
    pub fn kind(&self) -> Option<AgentKind> {
        AgentKind::from_name(&self.agent_type)
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.model.model_parameters.get(key)
    }

    /// Parse a typed view of the model parameters.
    pub fn parameters<T: serde::de::DeserializeOwned>(&self, model: &str) -> ConfigResult<T> {
        serde_json::from_value(self.model.model_parameters.clone()).map_err(|source| {
            ConfigError::ModelParameters {
                agent: self.name.clone(),
                model: model.to_string(),
                source,
            }
        })
    }

    /// Allocation share per product. Missing tables allocate everything.
    pub fn allocations(&self, experiment: &ExperimentConfig) -> ConfigResult<BTreeMap<Product, Allocation>> {
        let split = self.kind().is_some_and(AgentKind::has_split_allocation);
        let mut out = BTreeMap::new();
        if split {
            let buy = self.allocation_table("buy_product_allocation", experiment)?;
            let sell = self.allocation_table("sell_product_allocation", experiment)?;
            for ((product, buy), (_, sell)) in buy.into_iter().zip(sell) {
                out.insert(product, Allocation::Split { buy, sell });
            }
        } else {
            for (product, share) in self.allocation_table("product_allocation", experiment)? {
                out.insert(product, Allocation::Single(share));
            }
        }
        Ok(out)
    }

    fn allocation_table(
        &self,
        field: &'static str,
        experiment: &ExperimentConfig,
    ) -> ConfigResult<Vec<(Product, f64)>> {
        let shape_error = || ConfigError::AllocationShape {
            agent: self.name.clone(),
            field,
        };
        let table: Option<Vec<Vec<f64>>> = match self.parameter(field) {
            None => None,
            Some(value) => Some(serde_json::from_value(value.clone()).map_err(|_| shape_error())?),
        };
        if let Some(table) = &table {
            let fits = table.len() == experiment.products.len()
                && table
                    .iter()
                    .zip(&experiment.products)
                    .all(|(row, p)| row.len() == p.lead_times.len());
            if !fits {
                return Err(shape_error());
            }
        }

        let mut out = Vec::new();
        for (i, p) in experiment.products.iter().enumerate() {
            for (j, &lead) in p.lead_times.iter().enumerate() {
                let share = table.as_ref().map_or(1.0, |t| t[i][j]);
                out.push((Product::new(p.product_type, lead), share));
            }
        }
        Ok(out)
    }
}

// === PHYSICAL LAYER ===

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GlobalActionsConfig {
    /// Every action the physical layer expects, zeroed each step.
    pub action_names: Vec<String>,
    pub static_actions: BTreeMap<String, f64>,
    /// Action receiving the mean ambient temperature (simulation only).
    pub ambient_temperature: Option<String>,
    pub production_mode: Option<String>,
    /// Written in simulation only.
    pub heating_mode: Option<String>,
    /// Action key -> observation key of the feed temperature it follows.
    pub feed_temperature_setpoints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObservationAdjustments {
    /// Injected into every observation.
    pub constants: BTreeMap<String, f64>,
    /// Counters installed with the opposite orientation.
    pub negate: Vec<String>,
    /// Divisors applied in live mode.
    pub live_scale: BTreeMap<String, f64>,
}

// === SYSTEM ===

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub experiment: ExperimentConfig,
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub global_actions: GlobalActionsConfig,
    #[serde(default)]
    pub observation_adjustments: ObservationAdjustments,
}

impl SystemConfig {
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn markets(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents
            .iter()
            .filter(|a| a.kind() == Some(AgentKind::Market))
    }

    pub fn traders(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents
            .iter()
            .filter(|a| matches!(a.kind(), Some(k) if k != AgentKind::Market))
    }

    /// Structural checks. Model names and parameters are checked when agents are built.
    pub fn validate(&self) -> ConfigResult<()> {
        self.experiment.validate()?;

        let mut names = BTreeSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.name.clone()));
            }
        }

        let markets: BTreeSet<&str> = self.markets().map(|m| m.name.as_str()).collect();
        let traders: BTreeSet<&str> = self.traders().map(|t| t.name.as_str()).collect();
        for agent in self.traders() {
            if agent.connections_markets.is_empty() {
                return Err(ConfigError::NoMarket {
                    agent: agent.name.clone(),
                });
            }
            if let Some(market) = agent
                .connections_markets
                .iter()
                .find(|m| !markets.contains(m.as_str()))
            {
                return Err(ConfigError::UnknownMarket {
                    agent: agent.name.clone(),
                    market: market.clone(),
                });
            }
            if let Some(trader) = agent
                .connections_traders
                .iter()
                .find(|t| !traders.contains(t.as_str()))
            {
                return Err(ConfigError::UnknownTrader {
                    agent: agent.name.clone(),
                    trader: trader.clone(),
                });
            }
            self.check_outputs(agent)?;
        }
        Ok(())
    }

    fn check_outputs(&self, agent: &AgentConfig) -> ConfigResult<()> {
        let Some(kind) = agent.kind() else {
            return Ok(());
        };
        let o = &agent.env_outputs;
        let missing = |output| ConfigError::MissingOutput {
            agent: agent.name.clone(),
            output,
        };
        if kind == AgentKind::SystemOperator {
            return Ok(());
        }
        if o.set_status_on.is_none() {
            return Err(missing("bSetStatusOn"));
        }
        if o.set_point.is_none() {
            return Err(missing("fSetPoint"));
        }
        if kind == AgentKind::Storage && o.loading.is_none() {
            return Err(missing("bLoading"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "experiment": {
                "products": [
                    {"product_type": 900, "lead_times": [0]},
                    {"product_type": 3600, "lead_times": [0, 3600]}
                ],
                "sampling_time": 60,
                "scenario_time_end": 7200
            },
            "agents": [
                {"name": "heat", "type": "market"},
                {
                    "name": "boiler",
                    "type": "converter",
                    "connections_markets": ["heat"],
                    "env_outputs": {"bSetStatusOn": "boiler.on", "fSetPoint": "boiler.sp"},
                    "model": {"model_parameters": {"product_allocation": [[1.0], [0.5, 0.25]]}}
                }
            ]
        })
    }

    fn parse(value: Value) -> ConfigResult<SystemConfig> {
        SystemConfig::from_json_str(&value.to_string())
    }

    #[test]
    fn derives_time_grid() {
        let config = parse(base()).unwrap();
        let e = &config.experiment;
        assert_eq!(e.trading_time(), 900);
        assert_eq!(e.horizon(), 8);
        assert_eq!(e.num_control_steps(), 15);
        assert_eq!(e.num_trading_steps(), 4);
        assert_eq!(e.heat_energy_scale, 1000.0);
        assert_eq!(e.all_products().len(), 3);
    }

    #[test]
    fn allocation_table_follows_products() {
        let config = parse(base()).unwrap();
        let boiler = config.traders().next().unwrap();
        let allocations = boiler.allocations(&config.experiment).unwrap();
        assert_eq!(allocations[&Product::new(3600, 3600)], Allocation::Single(0.25));
        assert_eq!(allocations[&Product::new(900, 0)], Allocation::Single(1.0));
    }

    #[test]
    fn missing_allocation_defaults_to_everything() {
        let mut value = base();
        value["agents"][1]["model"]["model_parameters"] = json!({});
        value["agents"][1]["type"] = json!("storage");
        value["agents"][1]["env_outputs"]["bLoading"] = json!("boiler.loading");
        let config = parse(value).unwrap();
        let storage = config.traders().next().unwrap();
        let allocations = storage.allocations(&config.experiment).unwrap();
        assert!(
            allocations
                .values()
                .all(|a| *a == Allocation::Split { buy: 1.0, sell: 1.0 })
        );
    }

    #[test]
    fn ragged_allocation_is_rejected() {
        let mut value = base();
        value["agents"][1]["model"]["model_parameters"]["product_allocation"] = json!([[1.0], [1.0]]);
        let config = parse(value).unwrap();
        let boiler = config.traders().next().unwrap();
        assert!(matches!(
            boiler.allocations(&config.experiment),
            Err(ConfigError::AllocationShape { field: "product_allocation", .. })
        ));
    }

    #[test]
    fn rejects_bad_time_grids() {
        let mut value = base();
        value["experiment"]["products"][1]["product_type"] = json!(1000);
        assert!(matches!(parse(value), Err(ConfigError::ProductNotMultiple { .. })));

        let mut value = base();
        value["experiment"]["sampling_time"] = json!(7);
        assert!(matches!(parse(value), Err(ConfigError::SamplingTime { .. })));

        let mut value = base();
        value["experiment"]["products"][0]["lead_times"] = json!([7200]);
        assert!(matches!(parse(value), Err(ConfigError::BeyondHorizon { .. })));

        let mut value = base();
        value["experiment"]["products"] = json!([]);
        assert!(matches!(parse(value), Err(ConfigError::NoProducts)));
    }

    #[test]
    fn rejects_dangling_references() {
        let mut value = base();
        value["agents"][1]["connections_markets"] = json!(["steam"]);
        assert!(matches!(parse(value), Err(ConfigError::UnknownMarket { .. })));

        let mut value = base();
        value["agents"][1]["connections_traders"] = json!(["ghost"]);
        assert!(matches!(parse(value), Err(ConfigError::UnknownTrader { .. })));

        let mut value = base();
        value["agents"][1]["name"] = json!("heat");
        assert!(matches!(parse(value), Err(ConfigError::DuplicateAgent(_))));

        let mut value = base();
        value["agents"][1]["env_outputs"] = json!({"bSetStatusOn": "x"});
        assert!(matches!(
            parse(value),
            Err(ConfigError::MissingOutput { output: "fSetPoint", .. })
        ));
    }

    #[test]
    fn unknown_agent_types_are_left_for_setup() {
        let mut value = base();
        value["agents"]
            .as_array_mut()
            .unwrap()
            .push(json!({"name": "pv", "type": "photovoltaic"}));
        let config = parse(value).unwrap();
        assert_eq!(config.traders().count(), 1);
        assert_eq!(config.agents[2].kind(), None);
    }
}
