use serde::Deserialize;

use crate::config::{AgentConfig, AgentKind};
use crate::error::{ConfigError, ConfigResult, ModelError};
use crate::ledger::PeriodRecord;
use crate::models::PricingExtras;
use crate::signal::Signals;
use crate::types::{Actions, Energy, Observation, Seconds};

use super::{TraderCore, TraderRole, layer_temperature};

#[derive(Debug, Clone, Copy, Deserialize)]
pub(super) struct TankParams {
    /// kJ/K.
    pub heat_capacity: f64,
    #[serde(default)]
    pub is_heat_storage: bool,
}

impl TankParams {
    /// Energy taken up by the tank between two readings, positive when charging.
    pub fn stored_delta(&self, start: &Observation, now: &Observation) -> Result<Energy, ModelError> {
        Ok(self.heat_capacity / 3600.0 * (layer_temperature(now)? - layer_temperature(start)?))
    }

    /// A charging tank consumes from its network.
    pub fn book(&self, energy: Energy, period: &mut PeriodRecord) {
        if energy > 0.0 {
            period.real_energy_neg = energy.abs();
        } else {
            period.real_energy_pos = energy.abs();
        }
    }
}

/// Actively charged stratified tank.
#[derive(Debug, Clone)]
pub struct Storage {
    tank: TankParams,
    loading: String,
    /// Running cost of everything bought minus everything sold.
    energy_costs: f64,
}

impl Storage {
    pub fn from_config(agent: &AgentConfig) -> ConfigResult<Self> {
        let loading = agent
            .env_outputs
            .loading
            .clone()
            .ok_or_else(|| ConfigError::MissingOutput {
                agent: agent.name.clone(),
                output: "bLoading",
            })?;
        Ok(Self {
            tank: agent.parameters("storage")?,
            loading,
            energy_costs: 0.0,
        })
    }

    pub fn energy_costs(&self) -> f64 {
        self.energy_costs
    }
}

impl TraderRole for Storage {
    fn kind(&self) -> AgentKind {
        AgentKind::Storage
    }

    fn record_real_energy(
        &mut self,
        start: &Observation,
        now: &Observation,
        period: &mut PeriodRecord,
    ) -> Result<(), ModelError> {
        let energy = self.tank.stored_delta(start, now)?;
        self.tank.book(energy, period);
        Ok(())
    }

    fn pricing_extras(&self, _core: &TraderCore, _window: (Seconds, Seconds), _signals: &Signals) -> PricingExtras {
        PricingExtras {
            energy_costs: self.energy_costs,
            ..Default::default()
        }
    }

    fn after_billing(&mut self, record: &PeriodRecord) {
        self.energy_costs +=
            record.cleared_energy_neg * record.price_neg - record.cleared_energy_pos * record.price_pos;
    }

    fn set_actions(&self, core: &TraderCore) -> Result<Actions, ModelError> {
        let current = core.ledger.table.current();
        let mut actions = core.control_actions(current.cleared(), current.real(), true);
        // net selling discharges a heat tank and charges a cold one
        let selling = current.cleared() >= 0.0;
        let loading = if selling != self.tank.is_heat_storage { 1.0 } else { 0.0 };
        actions.insert(self.loading.clone(), loading);
        Ok(actions)
    }
}
