use serde::Deserialize;

use crate::error::ModelError;

use super::{Quantities, QuantityInputs, QuantityModel, interp, linspace, ratio};

/// Sampled curve as `[[x...], [y...]]`.
pub type Curve = (Vec<f64>, Vec<f64>);

fn curve_at(curve: &Curve, x: f64) -> f64 {
    interp(x, &curve.0, &curve.1)
}

/// Bid alternatives between `min` and `max`: `n` evenly spaced, or just `max` when `n == 1`.
fn discretize(min: f64, max: f64, n: usize) -> Vec<f64> {
    if n != 1 {
        linspace(min, max, n)
    } else {
        vec![max]
    }
}

fn one() -> usize {
    1
}

// === UTILITIES ===

#[derive(Debug, Clone, Deserialize)]
pub struct CoolingUtility {
    /// Thermal efficiency over ambient temperature.
    pub thermal_efficiencies: Curve,
    /// Electric efficiency over operating point.
    pub electric_efficiencies: Curve,
    pub nominal_electric_power: f64,
    #[serde(default)]
    pub minimal_load: f64,
    #[serde(default = "one")]
    pub bid_discretization: usize,
}

impl QuantityModel for CoolingUtility {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let efficiency = curve_at(&self.thermal_efficiencies, inputs.ambient_temperature);
        let nominal = efficiency * self.nominal_electric_power;
        let cleared = inputs.peak_power_neg();

        let power_max = (nominal - cleared).max(0.0).min(nominal);
        let power_min = if self.minimal_load * nominal > cleared {
            self.minimal_load * nominal
        } else {
            0.0
        };
        let allocation = inputs.allocation.product()?;
        let thermal: Vec<f64> = discretize(power_min, power_max, self.bid_discretization)
            .into_iter()
            .map(|p| p * allocation)
            .collect();

        let electric = thermal.iter().map(|&p| {
            let op = ratio(p, nominal);
            op * curve_at(&self.electric_efficiencies, op) * self.nominal_electric_power
        });

        let hours = inputs.hours();
        Ok(Quantities {
            electric_energy: electric.map(|p| p * hours).collect(),
            thermal_energy: thermal.iter().map(|p| p * hours).collect(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeatingUtility {
    /// Thermal efficiency over return temperature.
    pub thermal_efficiencies: Curve,
    /// Electric efficiency over operating point, for combined heat and power units.
    pub electric_efficiencies: Curve,
    pub nominal_fuel_power: f64,
    #[serde(default)]
    pub minimal_load: f64,
    #[serde(default = "one")]
    pub bid_discretization: usize,
}

impl QuantityModel for HeatingUtility {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let efficiency = curve_at(
            &self.thermal_efficiencies,
            inputs.observed("fReturnTemperature")?,
        );
        let nominal = efficiency * self.nominal_fuel_power;
        let cleared = inputs.peak_power_pos();

        let power_max = (nominal - cleared).max(0.0).min(nominal);
        let power_min = if self.minimal_load * nominal > cleared {
            self.minimal_load * nominal
        } else {
            0.0
        };
        let allocation = inputs.allocation.product()?;
        let thermal: Vec<f64> = discretize(power_min, power_max, self.bid_discretization)
            .into_iter()
            .map(|p| p * allocation)
            .collect();

        let hours = inputs.hours();
        let mut q = Quantities::default();
        for &p in &thermal {
            let op = ratio(p, nominal);
            // produced electricity counts negative
            let electric = -op * curve_at(&self.electric_efficiencies, op) * self.nominal_fuel_power;
            q.thermal_energy.push(p * hours);
            q.fuel_energy.push(ratio(p, efficiency) * hours);
            q.electric_energy.push(electric * hours);
        }
        Ok(q)
    }
}

// === DEMANDS ===

/// Demand given as an exogenous series: negative for heat demand, positive for waste heat or cold.
#[derive(Debug, Clone, Deserialize)]
pub struct DemandPrescribed {}

impl QuantityModel for DemandPrescribed {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let demand = inputs
            .demand
            .ok_or_else(|| ModelError::MissingInput("demand".into()))?;
        let cleared = inputs.peak_power_net();
        let power = if demand > 0.0 {
            (demand - cleared).max(0.0)
        } else {
            (demand - cleared).min(0.0)
        };
        let minimum = power * inputs.hours();
        Ok(Quantities {
            thermal_energy: vec![minimum * inputs.allocation.product()?],
            thermal_energy_min: Some(minimum),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildingParams {
    pub target_temperature: f64,
    /// Thermal capacity in kJ/K.
    pub heat_capacity: f64,
    pub thermal_resistance_to_ambient: f64,
    /// Comfort band `[low, high]`.
    pub temperature_limits: [f64; 2],
}

impl BuildingParams {
    fn soc(&self, temperature: f64) -> f64 {
        let [low, high] = self.temperature_limits;
        ratio(
            self.heat_capacity * (temperature - low),
            self.heat_capacity * (high - low),
        )
    }

    /// Power needed to reach the target over `seconds` plus the loss to ambient.
    fn demand(&self, temperature: f64, ambient: f64, seconds: f64) -> f64 {
        let mean = (self.target_temperature + temperature) / 2.0;
        self.heat_capacity * (self.target_temperature - temperature) / seconds
            + (mean - ambient) / self.thermal_resistance_to_ambient
    }

    fn finish(&self, powers: [f64; 2], temperature: f64, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let hours = inputs.hours();
        let allocation = inputs.allocation.product()?;
        Ok(Quantities {
            thermal_energy: powers.iter().map(|p| p * hours * allocation).collect(),
            thermal_energy_min: Some((powers[0] * hours).max(0.0)),
            soc: Some(self.soc(temperature)),
            ..Default::default()
        })
    }
}

/// Building whose thermal mass buffers demand within a comfort band.
///
/// Long products may use the band around the target; the shortest product trades the bare demand.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct DemandBuilding(pub BuildingParams);

impl QuantityModel for DemandBuilding {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let b = &self.0;
        let temperature = inputs.observed("fRoomTemperature")?;
        let seconds = inputs.product_type as f64;
        let demand = b.demand(temperature, inputs.ambient_temperature, seconds);
        let cleared = inputs.peak_power_net();

        let [low, high] = b.temperature_limits;
        let (below, above) = if inputs.shorttime_product {
            (0.0, 0.0)
        } else {
            (
                b.heat_capacity * (b.target_temperature - low) / seconds,
                b.heat_capacity * (high - b.target_temperature) / seconds,
            )
        };

        let powers = if inputs.observed("bHeatingMode")? == 1.0 {
            [
                (demand - below + cleared).max(0.0),
                (demand + above + cleared).max(0.0),
            ]
        } else {
            [
                (demand + above - cleared).min(0.0),
                (demand - below - cleared).min(0.0),
            ]
        };
        b.finish(powers, temperature, inputs)
    }
}

/// Building variant trading a single product, with the band measured from the current temperature.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct DemandBuildingOneProduct(pub BuildingParams);

impl QuantityModel for DemandBuildingOneProduct {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let b = &self.0;
        let temperature = inputs.observed("fRoomTemperature")?;
        let seconds = inputs.product_type as f64;
        let demand = b.demand(temperature, inputs.ambient_temperature, seconds);
        let cleared = inputs.peak_power_net();

        let [low, high] = b.temperature_limits;
        let below = b.heat_capacity * (temperature - low) / seconds;
        let above = b.heat_capacity * (high - temperature) / seconds;

        let powers = if inputs.observed("bHeatingMode")? == 1.0 {
            [
                (demand - below).max(0.0) + cleared,
                (demand + above).max(0.0) + cleared,
            ]
        } else {
            [
                (demand + above).min(0.0) - cleared,
                (demand - below).min(0.0) - cleared,
            ]
        };
        b.finish(powers, temperature, inputs)
    }
}

// === NETWORKS & STORAGES ===

/// Mean of the upper and lower layer temperatures.
fn layer_temperature(inputs: &QuantityInputs<'_>) -> Result<f64, ModelError> {
    Ok((inputs.observed("fUpperTemperature")? + inputs.observed("fLowerTemperature")?) / 2.0)
}

/// Hydraulic network that buys when below target temperature and sells above it.
#[derive(Debug, Clone, Deserialize)]
pub struct ThermalNetwork {
    pub target_temperature: f64,
    pub heat_capacity: f64,
    pub temperature_limits: [f64; 2],
}

impl QuantityModel for ThermalNetwork {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let temperature = layer_temperature(inputs)?;
        let [low, high] = self.temperature_limits;
        let demand = self.heat_capacity * (self.target_temperature - temperature)
            / inputs.product_type as f64;
        let soc = ratio(
            self.heat_capacity * (temperature - low),
            self.heat_capacity * (high - low),
        );
        let allocation = if demand > 0.0 {
            inputs.allocation.buy()?
        } else {
            inputs.allocation.sell()?
        };
        Ok(Quantities {
            thermal_energy: vec![demand * inputs.hours() * allocation],
            soc: Some(soc),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageParams {
    pub heat_capacity: f64,
    pub temperature_limits: [f64; 2],
    pub is_heat_storage: bool,
}

struct StorageState {
    /// Usable capacity in kJ.
    capacity: f64,
    /// kWh above the lower limit.
    stored: f64,
    soc: f64,
    /// Net cleared energy per slot, unsigned.
    cleared: Vec<f64>,
}

impl StorageParams {
    fn state(&self, inputs: &QuantityInputs<'_>) -> Result<StorageState, ModelError> {
        let temperature = layer_temperature(inputs)?;
        let [low, high] = self.temperature_limits;
        let capacity = self.heat_capacity * (high - low);
        let stored = (self.heat_capacity * (temperature - low)).max(0.0);
        Ok(StorageState {
            capacity,
            stored: stored / 3600.0,
            soc: ratio(stored, capacity),
            cleared: inputs
                .cleared_energy_pos
                .iter()
                .zip(inputs.cleared_energy_neg)
                .map(|(p, n)| (p - n).abs())
                .collect(),
        })
    }

    /// Free capacity per slot after what is already cleared.
    fn headroom(&self, state: &StorageState, allocation: f64) -> Vec<f64> {
        let per_slot = state.capacity / 3600.0 / state.cleared.len().max(1) as f64;
        state
            .cleared
            .iter()
            .map(|c| (per_slot - c) * allocation)
            .collect()
    }

    fn charging_allocation(&self, inputs: &QuantityInputs<'_>) -> Result<f64, ModelError> {
        if self.is_heat_storage {
            inputs.allocation.buy()
        } else {
            inputs.allocation.sell()
        }
    }
}

/// Active storage. Long products reserve headroom; the shortest product unwinds what was cleared.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Storage(pub StorageParams);

impl QuantityModel for Storage {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let p = &self.0;
        let state = p.state(inputs)?;
        let thermal_energy = if !inputs.shorttime_product {
            p.headroom(&state, p.charging_allocation(inputs)?)
        } else {
            let allocation = if p.is_heat_storage {
                inputs.allocation.sell()?
            } else {
                inputs.allocation.buy()?
            };
            state.cleared.iter().map(|c| c * allocation).collect()
        };
        Ok(Quantities {
            thermal_energy,
            stored_energy: Some(state.stored),
            soc: Some(state.soc),
            ..Default::default()
        })
    }
}

/// Active storage trading its headroom and its content on the same product.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct StorageOneProduct(pub StorageParams);

impl QuantityModel for StorageOneProduct {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let p = &self.0;
        let state = p.state(inputs)?;
        Ok(Quantities {
            thermal_energy: p.headroom(&state, p.charging_allocation(inputs)?),
            stored_energy: Some(state.stored),
            soc: Some(state.soc),
            ..Default::default()
        })
    }
}

// === COUPLING UNITS ===

/// Counter-flow heat exchanger rated with the effectiveness-NTU method.
#[derive(Debug, Clone, Deserialize)]
pub struct HeatExchanger {
    /// kW/K.
    pub max_capacity_flow_hot: f64,
    pub max_capacity_flow_cold: f64,
    pub heat_transfer_coefficient: f64,
    pub heat_exchanger_area: f64,
    pub heating_use_case: bool,
}

impl HeatExchanger {
    fn effectiveness(&self) -> f64 {
        let c_min = self.max_capacity_flow_hot.min(self.max_capacity_flow_cold);
        let c_max = self.max_capacity_flow_hot.max(self.max_capacity_flow_cold);
        if c_min == 0.0 {
            return 0.0;
        }
        let ntu = self.heat_transfer_coefficient * self.heat_exchanger_area / c_min;
        let cr = c_min / c_max;
        if cr == 1.0 {
            ntu / (1.0 + ntu)
        } else {
            let e = (-(1.0 - cr) * ntu).exp();
            (1.0 - e) / (1.0 - cr * e)
        }
    }
}

impl QuantityModel for HeatExchanger {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let c_min = self.max_capacity_flow_hot.min(self.max_capacity_flow_cold);
        let power_max = c_min
            * (inputs.observed("fFeedTemperature_hot")? - inputs.observed("fReturnTemperature_cold")?);
        let cleared = if self.heating_use_case {
            inputs.peak_power_pos()
        } else {
            inputs.peak_power_neg()
        };
        let power = (power_max * self.effectiveness() - cleared).max(0.0);
        Ok(Quantities {
            thermal_energy: vec![power * inputs.hours() * inputs.allocation.product()?],
            ..Default::default()
        })
    }
}

/// Efficiency table over (hot return temperature, cold return temperature).
///
/// JSON layout: the first row is `[_, hot_1, ..., hot_n]`, each following row is
/// `[cold_j, v_j1, ..., v_jn]`.
///
/// Lookups interpolate bilinearly within a grid cell and snap to the nearest grid point outside
/// the grid. A triangulated linear interpolation would agree on the grid points but can differ
/// inside a cell.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "Vec<Vec<f64>>")]
pub struct EfficiencyGrid {
    hot: Vec<f64>,
    cold: Vec<f64>,
    values: Vec<Vec<f64>>,
}

impl From<Vec<Vec<f64>>> for EfficiencyGrid {
    fn from(rows: Vec<Vec<f64>>) -> Self {
        let mut rows = rows.into_iter();
        let hot = rows
            .next()
            .map(|header| header.into_iter().skip(1).collect())
            .unwrap_or_default();
        let (cold, values) = rows
            .filter(|row| !row.is_empty())
            .map(|row| (row[0], row[1..].to_vec()))
            .unzip();
        Self { hot, cold, values }
    }
}

/// Bracketing indices of `x` in an ascending axis, or `None` outside it.
fn bracket(axis: &[f64], x: f64) -> Option<(usize, usize)> {
    if axis.is_empty() || x < axis[0] || x > axis[axis.len() - 1] {
        return None;
    }
    if axis.len() == 1 {
        return Some((0, 0));
    }
    let hi = axis.partition_point(|&v| v < x).clamp(1, axis.len() - 1);
    Some((hi - 1, hi))
}

impl EfficiencyGrid {
    fn value(&self, j: usize, i: usize) -> f64 {
        self.values
            .get(j)
            .and_then(|row| row.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    /// Bilinear inside the grid, nearest grid point outside it.
    pub fn at(&self, hot: f64, cold: f64) -> f64 {
        match (bracket(&self.hot, hot), bracket(&self.cold, cold)) {
            (Some((i0, i1)), Some((j0, j1))) => {
                let tx = ratio(hot - self.hot[i0], self.hot[i1] - self.hot[i0]);
                let ty = ratio(cold - self.cold[j0], self.cold[j1] - self.cold[j0]);
                let low = self.value(j0, i0) * (1.0 - tx) + self.value(j0, i1) * tx;
                let high = self.value(j1, i0) * (1.0 - tx) + self.value(j1, i1) * tx;
                low * (1.0 - ty) + high * ty
            }
            _ => self.nearest(hot, cold),
        }
    }

    fn nearest(&self, hot: f64, cold: f64) -> f64 {
        let mut best = (f64::INFINITY, 0.0);
        for (j, c) in self.cold.iter().enumerate() {
            for (i, h) in self.hot.iter().enumerate() {
                let d = (h - hot).powi(2) + (c - cold).powi(2);
                if d < best.0 {
                    best = (d, self.value(j, i));
                }
            }
        }
        best.1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeatPump {
    pub thermal_efficiencies: EfficiencyGrid,
    pub electric_efficiencies: EfficiencyGrid,
    pub nominal_cooling_power: f64,
    pub nominal_electric_power: f64,
    pub heating_use_case: bool,
    #[serde(default)]
    pub minimal_load: f64,
    #[serde(default = "one")]
    pub bid_discretization: usize,
}

impl QuantityModel for HeatPump {
    fn assess(&self, inputs: &QuantityInputs<'_>) -> Result<Quantities, ModelError> {
        let hot = inputs.observed("fReturnTemperature_hot")?;
        let cold = inputs.observed("fReturnTemperature_cold")?;
        let nominal_cool = self.thermal_efficiencies.at(hot, cold) * self.nominal_cooling_power;
        let nominal_electric = self.electric_efficiencies.at(hot, cold) * self.nominal_electric_power;
        let nominal_heat = nominal_cool + nominal_electric;

        let (max_heat, max_cool, max_electric, min_op);
        if self.heating_use_case {
            let cleared = inputs.peak_power_pos();
            max_heat = (nominal_heat - cleared).max(0.0).min(nominal_heat);
            max_electric = ratio(max_heat, nominal_heat) * nominal_electric;
            max_cool = max_heat - max_electric;
            min_op = if self.minimal_load * max_heat > cleared {
                self.minimal_load
            } else {
                0.0
            };
        } else {
            let cleared = inputs.peak_power_neg();
            max_cool = (nominal_cool - cleared).max(0.0).min(nominal_cool);
            max_electric = ratio(max_cool, nominal_cool) * nominal_electric;
            max_heat = max_cool + max_electric;
            min_op = if self.minimal_load > ratio(cleared, max_cool) {
                self.minimal_load
            } else {
                0.0
            };
        }

        let factor = inputs.hours() * inputs.allocation.product()?;
        let series = |max: f64| -> Vec<f64> {
            discretize(min_op * max, max, self.bid_discretization)
                .into_iter()
                .map(|p| p * factor)
                .collect()
        };
        Ok(Quantities {
            thermal_energy_heat: series(max_heat),
            thermal_energy_cool: series(max_cool),
            electric_energy: series(max_electric),
            ..Default::default()
        })
    }
}
