use serde::Deserialize;

use crate::config::{AgentConfig, AgentKind};
use crate::error::{ConfigResult, ModelError};
use crate::ledger::PeriodRecord;
use crate::messages::BalancingPrice;
use crate::models::PricingExtras;
use crate::signal::Signals;
use crate::types::{Actions, Energy, Observation, Seconds};

use super::{TraderCore, TraderRole, delta};

/// Which side of a coupling unit the networks pay for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UseCase {
    pub heating_use_case: bool,
    #[serde(default)]
    pub additional_producer: bool,
}

impl UseCase {
    /// Sole cold producer: only the cold side trades.
    pub fn cold_only(self) -> bool {
        !self.heating_use_case && !self.additional_producer
    }

    /// Sole heat producer: only the hot side trades.
    pub fn heat_only(self) -> bool {
        self.heating_use_case && !self.additional_producer
    }
}

/// Passive coupling between a hot and a cold network.
#[derive(Debug, Clone, Copy)]
pub struct HeatExchanger {
    use_case: UseCase,
}

impl HeatExchanger {
    pub fn from_config(agent: &AgentConfig) -> ConfigResult<Self> {
        Ok(Self {
            use_case: agent.parameters("heat_exchanger")?,
        })
    }
}

impl TraderRole for HeatExchanger {
    fn kind(&self) -> AgentKind {
        AgentKind::HeatExchanger
    }

    fn record_real_energy(
        &mut self,
        start: &Observation,
        now: &Observation,
        period: &mut PeriodRecord,
    ) -> Result<(), ModelError> {
        let d = delta(start, now, "fHeatEnergy")?.abs();
        period.real_energy_pos = d;
        period.real_energy_neg = d;
        Ok(())
    }

    fn pricing_extras(&self, core: &TraderCore, _window: (Seconds, Seconds), _signals: &Signals) -> PricingExtras {
        PricingExtras {
            is_running: core
                .ledger
                .last_row()
                .is_some_and(|row| row.record.cleared() != 0.0),
            ..Default::default()
        }
    }

    fn imbalance(&self, markets: &[String], record: &PeriodRecord, msg: &BalancingPrice) -> Energy {
        if markets.first() == Some(&msg.system_id) {
            -(record.cleared_energy_neg - record.real_energy_pos)
        } else {
            record.cleared_energy_pos - record.real_energy_pos
        }
    }

    fn set_actions(&self, core: &TraderCore) -> Result<Actions, ModelError> {
        let current = core.ledger.table.current();
        let cleared = if self.use_case.cold_only() {
            current.cleared_energy_neg
        } else if self.use_case.heat_only() {
            current.cleared_energy_pos
        } else {
            current.cleared_energy_pos.min(current.cleared_energy_neg)
        };
        Ok(core.control_actions(cleared, current.real_energy_pos, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PeriodRecord {
        PeriodRecord {
            cleared_energy_pos: 6.0,
            cleared_energy_neg: 4.0,
            real_energy_pos: 5.0,
            real_energy_neg: 5.0,
            ..Default::default()
        }
    }

    fn msg(system: &str) -> BalancingPrice {
        BalancingPrice {
            sender_id: "so".into(),
            receiver_id: "hx".into(),
            system_id: system.into(),
            price_pos: 0.2,
            price_neg: 0.1,
        }
    }

    #[test]
    fn each_network_bills_its_own_side() {
        let hx = HeatExchanger {
            use_case: UseCase {
                heating_use_case: true,
                additional_producer: true,
            },
        };
        let markets = vec!["heat".to_string(), "cold".to_string()];
        assert_eq!(hx.imbalance(&markets, &record(), &msg("heat")), 1.0);
        assert_eq!(hx.imbalance(&markets, &record(), &msg("cold")), 1.0);
    }

    #[test]
    fn use_case_parses_with_default_producer_flag() {
        let use_case: UseCase = serde_json::from_value(serde_json::json!({"heating_use_case": false})).unwrap();
        assert!(use_case.cold_only());
        assert!(!use_case.heat_only());
    }
}
