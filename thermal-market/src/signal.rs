use serde::{Deserialize, Serialize};

use crate::types::Seconds;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub seconds: Seconds,
    pub value: f64,
}

/// An exogenous time series such as ambient temperature or electricity price.
///
/// Deserializes from a bare number or from an array of `{seconds, value}` samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    Static(f64),
    Series(Vec<Sample>),
}

impl Default for Signal {
    fn default() -> Self {
        Signal::Static(0.0)
    }
}

impl Signal {
    pub fn is_empty(&self) -> bool {
        matches!(self, Signal::Series(samples) if samples.is_empty())
    }

    /// Mean over `start <= seconds < end`.
    ///
    /// A window with no samples falls back to the latest sample at or before `start`, or to the
    /// earliest sample when the window lies before the series.
    pub fn mean(&self, start: Seconds, end: Seconds) -> f64 {
        let samples = match self {
            Signal::Static(value) => return *value,
            Signal::Series(samples) => samples,
        };

        let (sum, n) = samples
            .iter()
            .filter(|s| s.seconds >= start && s.seconds < end)
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.value, n + 1));
        if n > 0 {
            return sum / n as f64;
        }

        samples
            .iter()
            .filter(|s| s.seconds <= start)
            .max_by_key(|s| s.seconds)
            .or_else(|| samples.iter().min_by_key(|s| s.seconds))
            .map(|s| s.value)
            .unwrap_or(0.0)
    }
}

/// Exogenous series every trader may consult.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub ambient_temperature: Signal,
    pub electricity_price: Signal,
    pub fuel_price: Signal,
    pub electricity_demand: Signal,
}

impl Signals {
    pub fn from_experiment(experiment: &crate::config::ExperimentConfig) -> Self {
        Self {
            ambient_temperature: experiment.ambient_temperature.clone(),
            electricity_price: experiment.cost_electricity.clone(),
            fuel_price: experiment.cost_fuel.clone(),
            electricity_demand: experiment.electricity_demand.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> Signal {
        Signal::Series(vec![
            Sample {
                seconds: 0,
                value: 10.0,
            },
            Sample {
                seconds: 900,
                value: 14.0,
            },
            Sample {
                seconds: 1800,
                value: 18.0,
            },
        ])
    }

    #[test]
    fn static_signal_ignores_window() {
        assert_eq!(Signal::Static(21.5).mean(0, 10), 21.5);
    }

    #[test]
    fn window_mean_covers_half_open_interval() {
        assert!((series().mean(0, 1800) - 12.0).abs() < 1e-9);
        assert!((series().mean(900, 2700) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn empty_window_holds_last_value() {
        assert!((series().mean(1000, 1100) - 14.0).abs() < 1e-9);
        assert!((series().mean(5000, 6000) - 18.0).abs() < 1e-9);
    }

    #[test]
    fn parses_number_or_samples() {
        let fixed: Signal = serde_json::from_str("0.3").unwrap();
        assert_eq!(fixed, Signal::Static(0.3));
        let table: Signal =
            serde_json::from_str(r#"[{"seconds": 0, "value": 1.0}, {"seconds": 60, "value": 3.0}]"#)
                .unwrap();
        assert!((table.mean(0, 120) - 2.0).abs() < 1e-9);
    }
}
