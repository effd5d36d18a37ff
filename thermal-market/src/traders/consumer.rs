use serde::Deserialize;

use crate::config::{AgentConfig, AgentKind};
use crate::error::{ConfigResult, ModelError};
use crate::ledger::PeriodRecord;
use crate::messages::BalancingPrice;
use crate::models::Quantities;
use crate::signal::Signal;
use crate::types::{Actions, Energy, Observation, Seconds};

use super::{TraderCore, TraderRole, delta};

#[derive(Debug, Default, Deserialize)]
struct ConsumerParams {
    #[serde(default)]
    demand: Option<Signal>,
}

/// Building or process load. Always served at least its forecast minimum demand.
#[derive(Debug, Clone, Default)]
pub struct Consumer {
    /// Prescribed demand, for loads the ambient temperature cannot forecast.
    demand: Option<Signal>,
    /// Minimum energy of the current short-term product, negative for heat demand.
    min_demand: Energy,
}

impl Consumer {
    pub fn from_config(agent: &AgentConfig) -> ConfigResult<Self> {
        let params: ConsumerParams = agent.parameters("consumer")?;
        Ok(Self {
            demand: params.demand,
            min_demand: 0.0,
        })
    }

    pub fn min_demand(&self) -> Energy {
        self.min_demand
    }
}

impl TraderRole for Consumer {
    fn kind(&self) -> AgentKind {
        AgentKind::Consumer
    }

    fn record_real_energy(
        &mut self,
        start: &Observation,
        now: &Observation,
        period: &mut PeriodRecord,
    ) -> Result<(), ModelError> {
        let d = delta(start, now, "fHeatEnergy")?;
        if d > 0.0 {
            period.real_energy_neg = d.abs();
        } else {
            period.real_energy_pos = d.abs();
        }
        Ok(())
    }

    fn demand(&self, (start, end): (Seconds, Seconds)) -> Option<f64> {
        self.demand.as_ref().map(|s| s.mean(start, end))
    }

    fn after_assessment(&mut self, shorttime: bool, quantities: &Quantities) {
        if shorttime {
            self.min_demand = quantities.thermal_energy_min.unwrap_or(0.0);
        }
    }

    fn imbalance(&self, markets: &[String], record: &PeriodRecord, msg: &BalancingPrice) -> Energy {
        if markets.len() > 1 {
            if markets.first() == Some(&msg.sender_id) {
                record.cleared_energy_neg - record.real_energy_neg
            } else {
                record.cleared_energy_pos - record.real_energy_pos
            }
        } else {
            record.cleared() - record.real()
        }
    }

    fn set_actions(&self, core: &TraderCore) -> Result<Actions, ModelError> {
        let current = core.ledger.table.current();
        let cleared = current.cleared();
        // a failed clearing still serves the minimum demand
        if self.min_demand.abs() > cleared.abs() {
            return Ok(core.control_actions(-self.min_demand, current.real(), false));
        }
        Ok(core.control_actions(cleared, current.real(), true))
    }
}
