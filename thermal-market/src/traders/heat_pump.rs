use crate::config::{AgentConfig, AgentKind};
use crate::error::{ConfigResult, ModelError};
use crate::ledger::PeriodRecord;
use crate::messages::BalancingPrice;
use crate::models::{PricingExtras, ratio};
use crate::signal::Signals;
use crate::types::{Actions, Energy, Observation, Seconds};

use super::{TraderCore, TraderRole, UseCase, delta};

/// Below this, power readings count as standstill.
const RUNNING_THRESHOLD: f64 = 0.01;

/// Heat pump lifting heat from the cold network into the hot one.
#[derive(Debug, Clone, Copy)]
pub struct HeatPump {
    use_case: UseCase,
    /// Measured coefficient of performance, 1 at standstill.
    cop: f64,
}

impl HeatPump {
    pub fn from_config(agent: &AgentConfig) -> ConfigResult<Self> {
        Ok(Self {
            use_case: agent.parameters("heat_pump")?,
            cop: 1.0,
        })
    }

    pub fn cop(&self) -> f64 {
        self.cop
    }

    /// Heat delivered per unit of cold cleared, from the Carnot COP of the current temperatures.
    fn cold_to_heat(core: &TraderCore) -> Result<f64, ModelError> {
        let hot = core.observed("fReturnTemperature_hot")?;
        let cold = core.observed("fReturnTemperature_cold")?;
        let ideal = ratio(hot, hot - cold);
        Ok(ratio(ideal, ideal - 1.0))
    }
}

impl TraderRole for HeatPump {
    fn kind(&self) -> AgentKind {
        AgentKind::HeatPump
    }

    fn record_real_energy(
        &mut self,
        start: &Observation,
        now: &Observation,
        period: &mut PeriodRecord,
    ) -> Result<(), ModelError> {
        let d = delta(start, now, "fHeatEnergy")?.abs();
        let electric = now.get("fElectricPower").copied().unwrap_or(0.0);
        let heat_flow = now.get("fHeatFlowRate").copied().unwrap_or(0.0);
        self.cop = if electric > RUNNING_THRESHOLD && heat_flow > RUNNING_THRESHOLD {
            heat_flow / electric
        } else {
            1.0
        };
        period.real_energy_pos = d;
        period.real_energy_neg = d * (1.0 - 1.0 / self.cop);
        Ok(())
    }

    fn pricing_extras(
        &self,
        core: &TraderCore,
        (start, end): (Seconds, Seconds),
        signals: &Signals,
    ) -> PricingExtras {
        PricingExtras {
            is_running: core.ledger.last_row().is_some_and(|row| {
                row.record.cleared_energy_pos != 0.0 || row.record.cleared_energy_neg != 0.0
            }),
            electricity_price: signals.electricity_price.mean(start, end),
            ..Default::default()
        }
    }

    fn imbalance(&self, markets: &[String], record: &PeriodRecord, msg: &BalancingPrice) -> Energy {
        let heat = record.cleared_energy_pos - record.real_energy_pos;
        if markets.first() == Some(&msg.system_id) {
            heat
        } else {
            -(heat * (1.0 - 1.0 / self.cop))
        }
    }

    fn set_actions(&self, core: &TraderCore) -> Result<Actions, ModelError> {
        let current = core.ledger.table.current();
        let cleared = if self.use_case.heat_only() {
            current.cleared_energy_pos
        } else if !self.use_case.cold_only() && current.cleared_energy_pos <= current.cleared_energy_neg {
            current.cleared_energy_pos
        } else {
            current.cleared_energy_neg * Self::cold_to_heat(core)?
        };
        Ok(core.control_actions(cleared, current.real_energy_pos, true))
    }
}
