//! Quantity-assessment and pricing strategies, resolved by name once at startup.
//!
//! A quantity model turns a trader's observed state into tradable energies for one product. A
//! pricing model turns those energies into orders.

pub mod pricing;
pub mod quantity;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, ModelError};
use crate::market::{Order, Side};
use crate::types::{Energy, Observation, Price, Product, Seconds};

// === INPUTS & OUTPUTS ===

/// Share of the assessed energy offered for one product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allocation {
    Single(f64),
    /// Separate shares for buying and selling, used by traders on both sides of one network.
    Split { buy: f64, sell: f64 },
}

impl Allocation {
    pub fn product(&self) -> Result<f64, ModelError> {
        match self {
            Allocation::Single(share) => Ok(*share),
            Allocation::Split { .. } => Err(ModelError::MissingInput("product_allocation".into())),
        }
    }

    pub fn buy(&self) -> Result<f64, ModelError> {
        match self {
            Allocation::Split { buy, .. } => Ok(*buy),
            Allocation::Single(_) => Err(ModelError::MissingInput("buy_product_allocation".into())),
        }
    }

    pub fn sell(&self) -> Result<f64, ModelError> {
        match self {
            Allocation::Split { sell, .. } => Ok(*sell),
            Allocation::Single(_) => {
                Err(ModelError::MissingInput("sell_product_allocation".into()))
            }
        }
    }
}

/// Observed readings by local input name.
fn observed(observation: &Observation, key: &str) -> Result<f64, ModelError> {
    observation
        .get(key)
        .copied()
        .ok_or_else(|| ModelError::MissingInput(key.to_string()))
}

#[derive(Debug, Clone)]
pub struct QuantityInputs<'a> {
    pub observation: &'a Observation,
    /// Cleared energy over the product's slots.
    pub cleared_energy_pos: &'a [Energy],
    pub cleared_energy_neg: &'a [Energy],
    pub trading_time: Seconds,
    pub product_type: Seconds,
    pub shorttime_product: bool,
    /// Mean over the delivery window.
    pub ambient_temperature: f64,
    pub allocation: Allocation,
    /// Prescribed mean demand over the delivery window, when the trader has one.
    pub demand: Option<f64>,
}

impl QuantityInputs<'_> {
    pub fn observed(&self, key: &str) -> Result<f64, ModelError> {
        observed(self.observation, key)
    }

    /// Product duration in hours.
    fn hours(&self) -> f64 {
        self.product_type as f64 / 3600.0
    }

    /// Largest cleared power over the window from a per-slot energy series.
    fn peak_power(&self, energies: impl Iterator<Item = Energy>) -> f64 {
        max_of(energies) / (self.trading_time as f64 / 3600.0)
    }

    fn peak_power_pos(&self) -> f64 {
        self.peak_power(self.cleared_energy_pos.iter().copied())
    }

    fn peak_power_neg(&self) -> f64 {
        self.peak_power(self.cleared_energy_neg.iter().copied())
    }

    fn peak_power_net(&self) -> f64 {
        self.peak_power(
            self.cleared_energy_pos
                .iter()
                .zip(self.cleared_energy_neg)
                .map(|(p, n)| p - n),
        )
    }
}

/// Tradable energies for one product. Vectors hold one entry per bid alternative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quantities {
    pub thermal_energy: Vec<Energy>,
    pub thermal_energy_heat: Vec<Energy>,
    pub thermal_energy_cool: Vec<Energy>,
    pub electric_energy: Vec<Energy>,
    pub fuel_energy: Vec<Energy>,
    pub thermal_energy_min: Option<Energy>,
    pub stored_energy: Option<Energy>,
    pub soc: Option<f64>,
}

impl Quantities {
    pub fn soc(&self) -> Result<f64, ModelError> {
        self.soc.ok_or(ModelError::MissingOutput("soc"))
    }

    pub fn stored_energy(&self) -> Result<Energy, ModelError> {
        self.stored_energy.ok_or(ModelError::MissingOutput("stored_energy"))
    }

    pub fn first_thermal(&self) -> Result<Energy, ModelError> {
        self.thermal_energy
            .first()
            .copied()
            .ok_or(ModelError::MissingOutput("thermal_energy"))
    }
}

/// Per-trader values the pricing models may need beyond the assessment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PricingExtras {
    pub is_running: bool,
    pub electricity_price: Price,
    pub fuel_price: Price,
    pub electricity_demand: f64,
    pub chp_renumeration: Price,
    pub energy_costs: f64,
}

#[derive(Debug, Clone)]
pub struct PricingInputs<'a> {
    pub name: &'a str,
    pub markets: &'a [String],
    pub observation: &'a Observation,
    pub quantities: &'a Quantities,
    pub product: Product,
    pub positive_market_limit: Price,
    pub negative_market_limit: Price,
    pub shorttime_product: bool,
    pub cleared_energy_pos: &'a [Energy],
    pub cleared_energy_neg: &'a [Energy],
    pub price_pos: &'a [Price],
    pub price_neg: &'a [Price],
    pub extras: PricingExtras,
}

impl PricingInputs<'_> {
    pub fn observed(&self, key: &str) -> Result<f64, ModelError> {
        observed(self.observation, key)
    }

    pub fn market(&self, idx: usize) -> Result<&str, ModelError> {
        self.markets
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| ModelError::MissingInput(format!("connections_markets[{idx}]")))
    }

    fn hours(&self) -> f64 {
        self.product.product_type as f64 / 3600.0
    }

    /// Order from this trader numbered locally by `id`.
    pub fn order(&self, id: u64, market: &str, side: Side, quantity: Energy, price: Price) -> Order {
        Order::new(self.name, market, side, self.product, quantity, price).with_id(id)
    }
}

// === STRATEGY TRAITS ===

pub trait QuantityModel: Debug {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError>;
}

pub trait PricingModel: Debug {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError>;
}

// === NUMERICS ===

/// Piecewise-linear interpolation with end clamping. `xp` must be ascending.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return 0.0;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    let hi = xp[..n].partition_point(|&v| v <= x).min(n - 1);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span == 0.0 {
        return fp[hi];
    }
    fp[lo] + (x - xp[lo]) / span * (fp[hi] - fp[lo])
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

pub(crate) fn max_of(values: impl Iterator<Item = f64>) -> f64 {
    values
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .unwrap_or(0.0)
}

/// `num / den`, zero when `den` is zero.
pub(crate) fn ratio(num: f64, den: f64) -> f64 {
    if den != 0.0 { num / den } else { 0.0 }
}

// === REGISTRY ===

type QuantityCtor = fn(&Value) -> Result<Box<dyn QuantityModel>, serde_json::Error>;
type PricingCtor = fn(&Value) -> Result<Box<dyn PricingModel>, serde_json::Error>;

fn quantity<M: QuantityModel + DeserializeOwned + 'static>(
    params: &Value,
) -> Result<Box<dyn QuantityModel>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<M>(params.clone())?))
}

fn pricing<M: PricingModel + DeserializeOwned + 'static>(
    params: &Value,
) -> Result<Box<dyn PricingModel>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<M>(params.clone())?))
}

fn no_pricing(_: &Value) -> Result<Box<dyn PricingModel>, serde_json::Error> {
    Ok(Box::new(pricing::NoPricing))
}

const QUANTITY_MODELS: &[(&str, QuantityCtor)] = &[
    ("cooling_utility", quantity::<quantity::CoolingUtility>),
    ("heating_utility", quantity::<quantity::HeatingUtility>),
    ("demand_prescribed", quantity::<quantity::DemandPrescribed>),
    ("demand_building", quantity::<quantity::DemandBuilding>),
    ("demand_building_one_product", quantity::<quantity::DemandBuildingOneProduct>),
    ("thermal_network", quantity::<quantity::ThermalNetwork>),
    ("storage", quantity::<quantity::Storage>),
    ("storage_one_product", quantity::<quantity::StorageOneProduct>),
    ("heat_exchanger", quantity::<quantity::HeatExchanger>),
    ("heat_pump", quantity::<quantity::HeatPump>),
];

const PRICING_MODELS: &[(&str, PricingCtor)] = &[
    ("cool_producer_pricing", pricing::<pricing::CoolProducerPricing>),
    ("heat_producer_pricing", pricing::<pricing::HeatProducerPricing>),
    ("inherent_storage_pricing", pricing::<pricing::InherentStoragePricing>),
    (
        "inherent_storage_pricing_one_product",
        pricing::<pricing::InherentStoragePricingOneProduct>,
    ),
    ("demand_pricing", pricing::<pricing::DemandPricing>),
    ("thermal_network_pricing", pricing::<pricing::ThermalNetworkPricing>),
    ("no_pricing", no_pricing),
    ("storage_pricing", pricing::<pricing::StoragePricing>),
    ("storage_pricing_one_product", pricing::<pricing::StoragePricingOneProduct>),
    ("heat_exchanger_pricing", pricing::<pricing::HeatExchangerPricing>),
    ("heat_pump_pricing", pricing::<pricing::HeatPumpPricing>),
];

pub fn quantity_model_names() -> impl Iterator<Item = &'static str> {
    QUANTITY_MODELS.iter().map(|(name, _)| *name)
}

pub fn pricing_model_names() -> impl Iterator<Item = &'static str> {
    PRICING_MODELS.iter().map(|(name, _)| *name)
}

/// Look up a quantity model by name and parse its parameters.
pub fn resolve_quantity_model(
    agent: &str,
    name: &str,
    params: &Value,
) -> Result<Box<dyn QuantityModel>, ConfigError> {
    let (_, ctor) = QUANTITY_MODELS
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| ConfigError::UnknownModel {
            agent: agent.to_string(),
            kind: "capacity",
            name: name.to_string(),
        })?;
    ctor(params).map_err(|source| ConfigError::ModelParameters {
        agent: agent.to_string(),
        model: name.to_string(),
        source,
    })
}

/// Look up a pricing model by name and parse its parameters.
pub fn resolve_pricing_model(
    agent: &str,
    name: &str,
    params: &Value,
) -> Result<Box<dyn PricingModel>, ConfigError> {
    let (_, ctor) = PRICING_MODELS
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| ConfigError::UnknownModel {
            agent: agent.to_string(),
            kind: "pricing",
            name: name.to_string(),
        })?;
    ctor(params).map_err(|source| ConfigError::ModelParameters {
        agent: agent.to_string(),
        model: name.to_string(),
        source,
    })
}
