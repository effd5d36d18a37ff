use std::path::PathBuf;

use thiserror::Error;

use crate::types::Seconds;

/// Startup failures: the configuration cannot describe a runnable system.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no products configured")]
    NoProducts,

    #[error("product type {product_type}s is not a multiple of the shortest product {shortest}s")]
    ProductNotMultiple { product_type: Seconds, shortest: Seconds },

    #[error("sampling time {sampling_time}s does not divide the shortest product {shortest}s")]
    SamplingTime { sampling_time: Seconds, shortest: Seconds },

    #[error("product {product_type}s with lead time {lead_time}s ends beyond the {horizon}s horizon")]
    BeyondHorizon {
        product_type: Seconds,
        lead_time: Seconds,
        horizon: Seconds,
    },

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("agent {agent}: unknown {kind} model {name:?}")]
    UnknownModel {
        agent: String,
        kind: &'static str,
        name: String,
    },

    #[error("agent {agent}: no {kind} model configured")]
    MissingModel { agent: String, kind: &'static str },

    #[error("agent {agent}: bad parameters for {model}: {source}")]
    ModelParameters {
        agent: String,
        model: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("agent {agent}: {field} has the wrong shape for this agent type")]
    AllocationShape { agent: String, field: &'static str },

    #[error("agent {agent}: unknown market {market:?}")]
    UnknownMarket { agent: String, market: String },

    #[error("agent {agent}: unknown trader {trader:?}")]
    UnknownTrader { agent: String, trader: String },

    #[error("agent {agent}: missing env output {output:?}")]
    MissingOutput { agent: String, output: &'static str },

    #[error("agent {agent}: connected to no market")]
    NoMarket { agent: String },

    #[error("signal {0} has no samples")]
    EmptySignal(String),

    #[error("agent {agent}: unknown clearing model {name:?}")]
    UnknownClearing { agent: String, name: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A quantity or pricing model could not run on the inputs it was given.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("missing model input {0:?}")]
    MissingInput(String),

    #[error("model produced no {0:?}")]
    MissingOutput(&'static str),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("ledger sink io: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger sink json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ledger sink parquet: {0}")]
    Parquet(String),
}

/// Failures during a running step. All are contract violations; the run cannot continue.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("agent {agent}: observation has no key {key:?}")]
    MissingObservation { agent: String, key: String },

    #[error("agent {agent}: {source}")]
    Model {
        agent: String,
        #[source]
        source: ModelError,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_agent() {
        let err = ConfigError::UnknownMarket {
            agent: "chp".into(),
            market: "steam".into(),
        };
        assert_eq!(err.to_string(), "agent chp: unknown market \"steam\"");

        let err = RunError::Model {
            agent: "hp".into(),
            source: ModelError::MissingOutput("soc"),
        };
        assert_eq!(err.to_string(), "agent hp: model produced no \"soc\"");
    }

    #[test]
    fn json_errors_convert() {
        let err: ConfigError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
