use serde::Deserialize;

use crate::error::ModelError;
use crate::market::{Order, Side};
use crate::types::{Energy, Price};

use super::{PricingInputs, PricingModel, interp, max_of, ratio};

fn one() -> f64 {
    1.0
}

// === SHARED PRODUCER RULES ===

/// Acceptance ratio per bid so that no partial fill drops below the minimal load.
fn acceptance_ratios(quantities: &[Energy], min_acceptance_ratio: f64, minimal_load: f64) -> Vec<f64> {
    let max_quantity = max_of(quantities.iter().copied());
    quantities
        .iter()
        .map(|&q| {
            if q * min_acceptance_ratio >= max_quantity * minimal_load {
                min_acceptance_ratio
            } else if q != 0.0 {
                (minimal_load * max_quantity / q).min(1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// For bid `i`, the local ids of every other bid that no longer fits once `i` clears.
fn coupled_orders(quantities: &[Energy]) -> Vec<Vec<u64>> {
    let max_quantity = max_of(quantities.iter().copied());
    quantities
        .iter()
        .enumerate()
        .map(|(i, &qi)| {
            quantities
                .iter()
                .enumerate()
                .filter(|&(j, &qj)| j != i && qi + qj > max_quantity)
                .map(|(j, _)| j as u64)
                .collect()
        })
        .collect()
}

fn unit_price(cost: f64, quantity: Energy, inputs: &PricingInputs<'_>) -> Price {
    ratio(cost, quantity)
        .min(inputs.positive_market_limit)
        .max(inputs.negative_market_limit)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerParams {
    #[serde(default)]
    pub cost_operating_hours: f64,
    #[serde(default)]
    pub cost_ramp_up: f64,
    #[serde(default)]
    pub min_acceptance_ratio: f64,
    #[serde(default)]
    pub minimal_load: f64,
}

impl ProducerParams {
    /// Running cost independent of the bid size.
    fn fixed_costs(&self, inputs: &PricingInputs<'_>) -> f64 {
        let ramp_up = if inputs.extras.is_running {
            0.0
        } else {
            self.cost_ramp_up
        };
        self.cost_operating_hours * inputs.hours() + ramp_up
    }

    /// One order per bid alternative with acceptance ratios and coupling.
    fn orders(
        &self,
        inputs: &PricingInputs<'_>,
        market: &str,
        side: Side,
        quantities: &[Energy],
        prices: &[Price],
    ) -> Vec<Order> {
        let acceptance = acceptance_ratios(quantities, self.min_acceptance_ratio, self.minimal_load);
        let coupled = coupled_orders(quantities);
        quantities
            .iter()
            .zip(prices)
            .zip(acceptance.into_iter().zip(coupled))
            .enumerate()
            .map(|(i, ((&q, &p), (mar, siblings)))| {
                inputs
                    .order(i as u64, market, side, q.abs(), p)
                    .with_acceptance(mar)
                    .coupled_with(siblings)
            })
            .collect()
    }
}

// === PRODUCERS ===

/// Chiller buying cooling demand at its electricity cost, quoted as a negative price.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct CoolProducerPricing(pub ProducerParams);

impl PricingModel for CoolProducerPricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let q = inputs.quantities;
        let fixed = self.0.fixed_costs(inputs);
        let prices: Vec<Price> = q
            .thermal_energy
            .iter()
            .zip(&q.electric_energy)
            .map(|(&thermal, &electric)| {
                let cost = -(electric * inputs.extras.electricity_price) - fixed;
                unit_price(cost, thermal, inputs)
            })
            .collect();
        Ok(self
            .0
            .orders(inputs, inputs.market(0)?, Side::Buy, &q.thermal_energy, &prices))
    }
}

/// Boiler or combined heat and power unit selling heat at fuel cost, netting electricity.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct HeatProducerPricing(pub ProducerParams);

impl HeatProducerPricing {
    fn electricity_costs(&self, inputs: &PricingInputs<'_>) -> Vec<f64> {
        let electric = &inputs.quantities.electric_energy;
        if electric.iter().sum::<f64>() >= 0.0 {
            return vec![0.0; electric.len()];
        }
        let x = &inputs.extras;
        electric
            .iter()
            .map(|&el| {
                let surplus = -el + x.electricity_demand * inputs.hours();
                if surplus > 0.0 {
                    x.electricity_demand * x.electricity_price - surplus * x.chp_renumeration
                } else {
                    el * x.electricity_price
                }
            })
            .collect()
    }
}

impl PricingModel for HeatProducerPricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let q = inputs.quantities;
        let fixed = self.0.fixed_costs(inputs);
        let electricity = self.electricity_costs(inputs);
        let prices: Vec<Price> = q
            .thermal_energy
            .iter()
            .enumerate()
            .map(|(i, &thermal)| {
                let fuel = q.fuel_energy.get(i).copied().unwrap_or(0.0) * inputs.extras.fuel_price;
                let cost = fuel + electricity.get(i).copied().unwrap_or(0.0) + fixed;
                unit_price(cost, thermal, inputs)
            })
            .collect();
        Ok(self
            .0
            .orders(inputs, inputs.market(0)?, Side::Sell, &q.thermal_energy, &prices))
    }
}

// === DEMANDS ===

#[derive(Debug, Clone, Deserialize)]
pub struct InherentStorageParams {
    pub soc_range: [f64; 2],
    #[serde(default)]
    pub min_acceptance_ratio: f64,
}

impl InherentStorageParams {
    /// Minimum demand at the venue limit and the flexible remainder priced by state of charge.
    fn bids(&self, inputs: &PricingInputs<'_>, with_flexible: bool) -> Result<Vec<Order>, ModelError> {
        let q = &inputs.quantities.thermal_energy;
        let minimum = q.first().copied().ok_or(ModelError::MissingOutput("thermal_energy"))?;
        let soc = inputs.quantities.soc()?;

        let (heat, cool) = if inputs.markets.len() == 2 {
            (inputs.market(0)?, inputs.market(1)?)
        } else {
            (inputs.market(0)?, inputs.market(0)?)
        };
        let (minimum_price, flexible_price, market, side) = if inputs.observed("bHeatingMode")? != 0.0 {
            (
                inputs.positive_market_limit,
                interp(soc, &self.soc_range, &[inputs.positive_market_limit, 0.0]),
                heat,
                Side::Buy,
            )
        } else {
            (
                inputs.negative_market_limit,
                interp(soc, &self.soc_range, &[0.0, inputs.negative_market_limit]),
                cool,
                Side::Sell,
            )
        };

        let mut bids = vec![(minimum, minimum_price)];
        if with_flexible {
            let flexible = q.get(1).copied().ok_or(ModelError::MissingOutput("thermal_energy"))? - minimum;
            // equal quantities collapse into one bid at the flexible price
            if flexible == minimum {
                bids[0].1 = flexible_price;
            } else {
                bids.push((flexible, flexible_price));
            }
        }

        Ok(bids
            .into_iter()
            .enumerate()
            .map(|(i, (quantity, price))| {
                inputs
                    .order(i as u64, market, side, quantity.abs(), price)
                    .with_acceptance(self.min_acceptance_ratio)
            })
            .collect())
    }
}

/// Building with thermal mass. Flexible demand is only offered on the shortest product.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct InherentStoragePricing(pub InherentStorageParams);

impl PricingModel for InherentStoragePricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        self.0.bids(inputs, inputs.shorttime_product)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct InherentStoragePricingOneProduct(pub InherentStorageParams);

impl PricingModel for InherentStoragePricingOneProduct {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        self.0.bids(inputs, true)
    }
}

/// Inflexible demand bidding at the venue limit.
#[derive(Debug, Clone, Deserialize)]
pub struct DemandPricing {
    #[serde(default)]
    pub min_acceptance_ratio: f64,
}

impl PricingModel for DemandPricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let quantity = inputs.quantities.first_thermal()?;
        // positive quantities are waste heat or cold to get rid of
        let (side, price) = if quantity > 0.0 {
            (Side::Sell, inputs.negative_market_limit)
        } else {
            (Side::Buy, inputs.positive_market_limit)
        };
        Ok(vec![
            inputs
                .order(0, inputs.market(0)?, side, quantity.abs(), price)
                .with_acceptance(self.min_acceptance_ratio),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThermalNetworkPricing {
    pub soc_range: [f64; 2],
    #[serde(default)]
    pub min_acceptance_ratio: f64,
}

impl PricingModel for ThermalNetworkPricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let quantity = inputs.quantities.first_thermal()?;
        let price = interp(
            inputs.quantities.soc()?,
            &self.soc_range,
            &[inputs.positive_market_limit, inputs.negative_market_limit],
        );
        let side = if quantity > 0.0 { Side::Buy } else { Side::Sell };
        Ok(vec![
            inputs
                .order(0, inputs.market(0)?, side, quantity.abs(), price)
                .with_acceptance(self.min_acceptance_ratio),
        ])
    }
}

/// Passive participants that never bid.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NoPricing;

impl PricingModel for NoPricing {
    fn price(&self, _: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        Ok(Vec::new())
    }
}

// === STORAGES ===

#[derive(Debug, Clone, Deserialize)]
pub struct StoragePricingParams {
    pub is_heat_storage: bool,
    pub soc_range: [f64; 2],
    #[serde(default = "one")]
    pub market_limit_ratio: f64,
    #[serde(default)]
    pub min_acceptance_ratio: f64,
}

impl StoragePricingParams {
    /// Charging bid over the free capacity, priced down as the storage fills.
    fn charging(&self, inputs: &PricingInputs<'_>) -> Result<Order, ModelError> {
        let soc = inputs.quantities.soc()?;
        let (side, price) = if self.is_heat_storage {
            let limit = inputs.positive_market_limit * self.market_limit_ratio;
            (Side::Buy, interp(soc, &self.soc_range, &[limit, 0.0]))
        } else {
            let limit = inputs.negative_market_limit * self.market_limit_ratio;
            (Side::Sell, interp(soc, &self.soc_range, &[0.0, limit]))
        };
        let quantity: Energy = inputs.quantities.thermal_energy.iter().sum();
        Ok(inputs
            .order(0, inputs.market(0)?, side, quantity.abs(), price)
            .with_acceptance(self.min_acceptance_ratio))
    }

    /// Discharging side: heat storages sell, cold storages buy, never past the venue limit.
    fn discharging(&self, inputs: &PricingInputs<'_>, quantity: Energy, price: Price) -> Result<Order, ModelError> {
        let (side, price) = if self.is_heat_storage {
            (Side::Sell, price.min(inputs.positive_market_limit))
        } else {
            (Side::Buy, price.max(inputs.negative_market_limit))
        };
        Ok(inputs
            .order(0, inputs.market(0)?, side, quantity.abs(), price)
            .with_acceptance(self.min_acceptance_ratio))
    }

    /// Average purchase price of the stored energy.
    fn stored_price(&self, inputs: &PricingInputs<'_>) -> Result<(Energy, Price), ModelError> {
        let stored = inputs.quantities.stored_energy()?;
        Ok((stored, ratio(inputs.extras.energy_costs, stored)))
    }
}

/// Active storage charging on long products and reselling on the shortest one.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct StoragePricing(pub StoragePricingParams);

impl PricingModel for StoragePricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let p = &self.0;
        if !inputs.shorttime_product {
            return Ok(vec![p.charging(inputs)?]);
        }

        let (stored, stored_price) = p.stored_price(inputs)?;
        let thermal = &inputs.quantities.thermal_energy;
        let quantity = stored + thermal.iter().sum::<f64>();
        let traded_prices = if p.is_heat_storage {
            inputs.price_neg
        } else {
            inputs.price_pos
        };
        let mixed: Vec<f64> = thermal
            .iter()
            .zip(traded_prices)
            .map(|(&t, &pt)| ratio(stored_price * stored + pt * t, quantity))
            .collect();
        let price = if mixed.is_empty() {
            0.0
        } else {
            mixed.iter().sum::<f64>() / mixed.len() as f64
        };
        Ok(vec![p.discharging(inputs, quantity, price)?])
    }
}

/// Active storage quoting charging and discharging on the same product.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct StoragePricingOneProduct(pub StoragePricingParams);

impl PricingModel for StoragePricingOneProduct {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let p = &self.0;
        let charging = p.charging(inputs)?;
        let (stored, stored_price) = p.stored_price(inputs)?;
        let discharging = p.discharging(inputs, stored, stored_price)?.with_id(1);
        Ok(vec![charging, discharging])
    }
}

// === COUPLING UNITS ===

#[derive(Debug, Clone, Deserialize)]
pub struct HeatExchangerPricing {
    pub heating_use_case: bool,
    #[serde(default)]
    pub additional_producer: bool,
    #[serde(default)]
    pub min_acceptance_ratio: f64,
}

impl PricingModel for HeatExchangerPricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let quantity = inputs.quantities.first_thermal()?.abs();
        let bids = match (self.additional_producer, self.heating_use_case) {
            // sole cold producer
            (false, false) => vec![(inputs.market(0)?, Side::Buy, inputs.negative_market_limit)],
            // sole heat producer
            (false, true) => vec![(inputs.market(1)?, Side::Sell, inputs.positive_market_limit)],
            (true, _) => vec![
                (inputs.market(0)?, Side::Buy, 0.0),
                (inputs.market(1)?, Side::Sell, 0.0),
            ],
        };
        Ok(bids
            .into_iter()
            .enumerate()
            .map(|(i, (market, side, price))| {
                inputs
                    .order(i as u64, market, side, quantity, price)
                    .with_acceptance(self.min_acceptance_ratio)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeatPumpPricing {
    pub heating_use_case: bool,
    #[serde(default)]
    pub additional_producer: bool,
    #[serde(flatten)]
    pub producer: ProducerParams,
}

impl PricingModel for HeatPumpPricing {
    fn price(&self, inputs: &PricingInputs<'_>) -> Result<Vec<Order>, ModelError> {
        let q = inputs.quantities;
        let heat = &q.thermal_energy_heat;
        let cool = &q.thermal_energy_cool;
        let p = &self.producer;

        match (self.additional_producer, self.heating_use_case) {
            // sole heat producer
            (false, true) => {
                let prices = vec![inputs.positive_market_limit; heat.len()];
                Ok(p.orders(inputs, inputs.market(0)?, Side::Sell, heat, &prices))
            }
            // sole cold producer
            (false, false) => {
                let prices = vec![inputs.negative_market_limit; heat.len()];
                let acceptance = acceptance_ratios(heat, p.min_acceptance_ratio, p.minimal_load);
                let coupled = coupled_orders(heat);
                let market = inputs.market(1)?;
                Ok(cool
                    .iter()
                    .zip(prices)
                    .zip(acceptance.into_iter().zip(coupled))
                    .enumerate()
                    .map(|(i, ((&c, price), (mar, siblings)))| {
                        inputs
                            .order(i as u64, market, Side::Buy, c.abs(), price)
                            .with_acceptance(mar)
                            .coupled_with(siblings)
                    })
                    .collect())
            }
            // alongside other producers: sell heat at electricity cost and take the cold for free
            (true, _) => {
                let fixed = p.fixed_costs(inputs);
                let prices: Vec<Price> = heat
                    .iter()
                    .zip(&q.electric_energy)
                    .map(|(&h, &el)| unit_price(el * inputs.extras.electricity_price + fixed, h, inputs))
                    .collect();
                let heat_orders = p.orders(inputs, inputs.market(0)?, Side::Sell, heat, &prices);
                let zeros = vec![0.0; cool.len()];
                let mut cool_orders = p.orders(inputs, inputs.market(1)?, Side::Buy, cool, &zeros);
                // acceptance and coupling follow the heat side
                for (cool_order, heat_order) in cool_orders.iter_mut().zip(&heat_orders) {
                    cool_order.min_acceptance_ratio = heat_order.min_acceptance_ratio;
                    cool_order.coupled_orders = heat_order.coupled_orders.clone();
                }
                Ok(heat_orders.into_iter().zip(cool_orders).flat_map(|(h, c)| [h, c]).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PricingExtras, Quantities};
    use crate::types::{Observation, OrderId, Product};

    fn inputs<'a>(
        markets: &'a [String],
        observation: &'a Observation,
        quantities: &'a Quantities,
        shorttime: bool,
    ) -> PricingInputs<'a> {
        PricingInputs {
            name: "unit",
            markets,
            observation,
            quantities,
            product: Product::new(3600, 0),
            positive_market_limit: 0.5,
            negative_market_limit: -0.5,
            shorttime_product: shorttime,
            cleared_energy_pos: &[],
            cleared_energy_neg: &[],
            price_pos: &[],
            price_neg: &[],
            extras: PricingExtras::default(),
        }
    }

    fn markets(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn producer_acceptance_respects_minimal_load() {
        let ratios = acceptance_ratios(&[20.0, 60.0, 100.0], 0.1, 0.5);
        assert_eq!(ratios[2], 0.5);
        assert_eq!(ratios[1], 50.0 / 60.0);
        assert_eq!(ratios[0], 1.0);
        assert_eq!(acceptance_ratios(&[0.0, 10.0], 0.0, 0.5)[0], 0.0);
    }

    #[test]
    fn bids_exceeding_capacity_together_are_coupled() {
        let coupled = coupled_orders(&[20.0, 60.0, 100.0]);
        assert_eq!(coupled[0], vec![2]);
        assert_eq!(coupled[1], vec![2]);
        assert_eq!(coupled[2], vec![0, 1]);
    }

    #[test]
    fn heat_producer_prices_fuel_cost_within_limits() {
        let q = Quantities {
            thermal_energy: vec![10.0, 20.0],
            fuel_energy: vec![12.0, 24.0],
            electric_energy: vec![0.0, 0.0],
            ..Default::default()
        };
        let m = markets(&["heat"]);
        let o = Observation::new();
        let mut i = inputs(&m, &o, &q, true);
        i.extras.fuel_price = 0.05;
        i.extras.is_running = true;
        let model = HeatProducerPricing(ProducerParams {
            cost_operating_hours: 0.0,
            cost_ramp_up: 100.0,
            min_acceptance_ratio: 0.0,
            minimal_load: 0.0,
        });

        let orders = model.price(&i).unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.side == Side::Sell && o.receiver_id == "heat"));
        assert!((orders[0].price - 0.06).abs() < 1e-12);
        assert_eq!(orders[0].coupled_orders, vec![OrderId(1)]);

        // a cold start adds the ramp-up cost and hits the venue cap
        i.extras.is_running = false;
        let orders = model.price(&i).unwrap();
        assert_eq!(orders[0].price, 0.5);
    }

    #[test]
    fn cool_producer_bids_negative_prices() {
        let q = Quantities {
            thermal_energy: vec![40.0],
            electric_energy: vec![10.0],
            ..Default::default()
        };
        let m = markets(&["cold"]);
        let o = Observation::new();
        let mut i = inputs(&m, &o, &q, true);
        i.extras.electricity_price = 0.2;
        i.extras.is_running = true;
        let orders = CoolProducerPricing(ProducerParams {
            cost_operating_hours: 0.0,
            cost_ramp_up: 0.0,
            min_acceptance_ratio: 0.0,
            minimal_load: 0.0,
        })
        .price(&i)
        .unwrap();

        assert_eq!(orders[0].side, Side::Buy);
        assert!((orders[0].price + 0.05).abs() < 1e-12);
    }

    #[test]
    fn inherent_storage_offers_flexibility_only_short_term() {
        let q = Quantities {
            thermal_energy: vec![4.0, 10.0],
            soc: Some(0.5),
            ..Default::default()
        };
        let m = markets(&["heat", "cold"]);
        let o: Observation = [("bHeatingMode".to_string(), 1.0)].into_iter().collect();
        let model = InherentStoragePricing(InherentStorageParams {
            soc_range: [0.0, 1.0],
            min_acceptance_ratio: 0.0,
        });

        let orders = model.price(&inputs(&m, &o, &q, true)).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!((orders[0].quantity, orders[0].price), (4.0, 0.5));
        assert_eq!((orders[1].quantity, orders[1].price), (6.0, 0.25));
        assert_eq!(orders[1].id, OrderId(1));

        let orders = model.price(&inputs(&m, &o, &q, false)).unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn equal_minimum_and_flexible_quantities_collapse() {
        let q = Quantities {
            thermal_energy: vec![5.0, 10.0],
            soc: Some(0.0),
            ..Default::default()
        };
        let m = markets(&["heat"]);
        let o: Observation = [("bHeatingMode".to_string(), 0.0)].into_iter().collect();
        let orders = InherentStoragePricingOneProduct(InherentStorageParams {
            soc_range: [0.0, 1.0],
            min_acceptance_ratio: 0.0,
        })
        .price(&inputs(&m, &o, &q, false))
        .unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::Sell);
        assert_eq!(orders[0].price, 0.0);
    }

    #[test]
    fn storage_resells_at_mixed_cost_on_shortest_product() {
        let q = Quantities {
            thermal_energy: vec![2.0, 2.0],
            stored_energy: Some(6.0),
            soc: Some(0.5),
            ..Default::default()
        };
        let m = markets(&["heat"]);
        let o = Observation::new();
        let mut i = inputs(&m, &o, &q, true);
        i.price_neg = &[0.1, 0.3];
        i.extras.energy_costs = 1.2;
        let model = StoragePricing(StoragePricingParams {
            is_heat_storage: true,
            soc_range: [0.0, 1.0],
            market_limit_ratio: 1.0,
            min_acceptance_ratio: 0.0,
        });

        let orders = model.price(&i).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::Sell);
        assert!((orders[0].quantity - 10.0).abs() < 1e-12);
        // stored at 0.2: ((1.2 + 0.2) / 10 + (1.2 + 0.6) / 10) / 2
        assert!((orders[0].price - 0.16).abs() < 1e-12, "price {:.4}", orders[0].price);

        let orders = model.price(&inputs(&m, &o, &q, false)).unwrap();
        assert_eq!(orders[0].side, Side::Buy);
        assert!((orders[0].quantity - 4.0).abs() < 1e-12);
        assert!((orders[0].price - 0.25).abs() < 1e-12);
    }

    #[test]
    fn one_product_storage_quotes_both_directions() {
        let q = Quantities {
            thermal_energy: vec![3.0],
            stored_energy: Some(0.0),
            soc: Some(1.0),
            ..Default::default()
        };
        let m = markets(&["cold"]);
        let o = Observation::new();
        let orders = StoragePricingOneProduct(StoragePricingParams {
            is_heat_storage: false,
            soc_range: [0.0, 1.0],
            market_limit_ratio: 0.5,
            min_acceptance_ratio: 0.0,
        })
        .price(&inputs(&m, &o, &q, true))
        .unwrap();

        assert_eq!(orders[0].side, Side::Sell);
        assert!((orders[0].price + 0.25).abs() < 1e-12);
        assert_eq!(orders[1].side, Side::Buy);
        assert_eq!(orders[1].price, 0.0);
        assert_ne!(orders[0].id, orders[1].id);
    }

    #[test]
    fn heat_exchanger_use_cases_pick_venues() {
        let q = Quantities {
            thermal_energy: vec![-8.0],
            ..Default::default()
        };
        let m = markets(&["cold", "heat"]);
        let o = Observation::new();
        let i = inputs(&m, &o, &q, true);

        let sole_cold = HeatExchangerPricing {
            heating_use_case: false,
            additional_producer: false,
            min_acceptance_ratio: 0.0,
        };
        let orders = sole_cold.price(&i).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!((orders[0].receiver_id.as_str(), orders[0].price), ("cold", -0.5));
        assert_eq!(orders[0].quantity, 8.0);

        let shared = HeatExchangerPricing {
            additional_producer: true,
            ..sole_cold
        };
        let orders = shared.price(&i).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].receiver_id, "heat");
        assert_eq!(orders[1].side, Side::Sell);
    }

    #[test]
    fn shared_heat_pump_pairs_heat_and_cold_orders() {
        let q = Quantities {
            thermal_energy_heat: vec![10.0, 20.0],
            thermal_energy_cool: vec![7.0, 14.0],
            electric_energy: vec![3.0, 6.0],
            ..Default::default()
        };
        let m = markets(&["heat", "cold"]);
        let o = Observation::new();
        let mut i = inputs(&m, &o, &q, true);
        i.extras.electricity_price = 0.2;
        i.extras.is_running = true;
        let model = HeatPumpPricing {
            heating_use_case: true,
            additional_producer: true,
            producer: ProducerParams {
                cost_operating_hours: 0.0,
                cost_ramp_up: 0.0,
                min_acceptance_ratio: 0.0,
                minimal_load: 0.0,
            },
        };

        let orders = model.price(&i).unwrap();
        assert_eq!(orders.len(), 4);
        let (heat, cold) = (&orders[0], &orders[1]);
        assert_eq!((heat.receiver_id.as_str(), heat.side), ("heat", Side::Sell));
        assert_eq!((cold.receiver_id.as_str(), cold.side), ("cold", Side::Buy));
        assert_eq!(heat.id, cold.id);
        assert!((heat.price - 0.06).abs() < 1e-12);
        assert_eq!(cold.price, 0.0);
        assert_eq!(cold.coupled_orders, heat.coupled_orders);
    }
}
