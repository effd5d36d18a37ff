use crate::config::AgentKind;
use crate::error::ModelError;
use crate::ledger::PeriodRecord;
use crate::models::PricingExtras;
use crate::signal::Signals;
use crate::types::{Observation, Seconds};

use super::{TraderCore, TraderRole, delta};

/// Boiler, chiller or CHP unit feeding one network.
#[derive(Debug, Clone, Copy, Default)]
pub struct Converter;

impl TraderRole for Converter {
    fn kind(&self) -> AgentKind {
        AgentKind::Converter
    }

    fn record_real_energy(
        &mut self,
        start: &Observation,
        now: &Observation,
        period: &mut PeriodRecord,
    ) -> Result<(), ModelError> {
        let d = delta(start, now, "fHeatEnergy")?;
        // falling counter: heat consumed, cold produced
        if d < 0.0 {
            period.real_energy_neg = d.abs();
        } else {
            period.real_energy_pos = d.abs();
        }
        Ok(())
    }

    fn pricing_extras(
        &self,
        core: &TraderCore,
        (start, end): (Seconds, Seconds),
        signals: &Signals,
    ) -> PricingExtras {
        PricingExtras {
            is_running: core
                .ledger
                .last_row()
                .is_some_and(|row| row.record.cleared_energy_pos != 0.0),
            electricity_price: signals.electricity_price.mean(start, end),
            fuel_price: signals.fuel_price.mean(start, end),
            electricity_demand: signals.electricity_demand.mean(start, end),
            chp_renumeration: core.settings.chp_renumeration,
            energy_costs: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traders::tests::obs;

    #[test]
    fn falling_counter_books_negative_energy() {
        let mut period = PeriodRecord::default();
        Converter
            .record_real_energy(&obs(&[("fHeatEnergy", 10.0)]), &obs(&[("fHeatEnergy", 7.5)]), &mut period)
            .unwrap();
        assert_eq!(period.real_energy_neg, 2.5);
        assert_eq!(period.real_energy_pos, 0.0);
    }
}
