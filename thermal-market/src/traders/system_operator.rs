use crate::config::{AgentConfig, AgentKind};
use crate::error::{ConfigResult, ModelError};
use crate::ledger::{BalancingEntry, PeriodRecord};
use crate::messages::BalancingPrice;
use crate::types::{Actions, Observation};

use super::storage::TankParams;
use super::{TraderCore, TraderRole};

/// Owner of a network's buffer tank. Absorbs every imbalance and prices it for the other traders.
#[derive(Debug, Clone, Copy)]
pub struct SystemOperator {
    tank: TankParams,
}

impl SystemOperator {
    pub fn from_config(agent: &AgentConfig) -> ConfigResult<Self> {
        Ok(Self {
            tank: agent.parameters("system_operator")?,
        })
    }
}

impl TraderRole for SystemOperator {
    fn kind(&self) -> AgentKind {
        AgentKind::SystemOperator
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

    fn after_state(&mut self, core: &mut TraderCore) {
        let Some(system) = core.markets.first().cloned() else {
            return;
        };
        if let Some(row) = core.ledger.last_row_mut() {
            // the operator never bills itself for its own network
            row.balancing.insert(system, BalancingEntry::default());
        }
    }

    fn set_actions(&self, _core: &TraderCore) -> Result<Actions, ModelError> {
        Ok(Actions::new())
    }

    /// Surplus delivered into the tank is bought back above the going buy price; shortfall drawn
    /// from it is sold above the going sell price.
    fn balancing_prices(&self, core: &TraderCore) -> Vec<BalancingPrice> {
        let Some(system) = core.markets.first() else {
            return Vec::new();
        };
        let record = core.ledger.table.current();
        let limit = core.settings.positive_market_limit;
        core.traders
            .iter()
            .map(|trader| BalancingPrice {
                sender_id: core.name.clone(),
                receiver_id: trader.clone(),
                system_id: system.clone(),
                price_pos: record.price_neg.max(0.0) + limit,
                price_neg: record.price_pos.max(0.0) + limit,
            })
            .collect()
    }
}
