//! Transactive trading engine for thermal networks.
//!
//! Producers, consumers, storages, heat pumps and heat exchangers turn plant
//! observations into orders, double-auction markets clear them per product,
//! and a system operator settles every deviation between cleared and measured
//! energy. [`Orchestrator::step`] drives one sampling interval and returns the
//! control actions for the plant.

pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod market;
pub mod messages;
pub mod models;
pub mod orchestrator;
pub mod signal;
pub mod sink;
pub mod traders;
pub mod types;

pub use config::{AgentConfig, AgentKind, ExperimentConfig, SystemConfig};
pub use context::RunContext;
pub use error::{ConfigError, ConfigResult, ModelError, RunError, SinkError};
pub use orchestrator::Orchestrator;
#[cfg(feature = "instrument")]
pub use sink::ParquetSink;
pub use sink::{LedgerSink, LedgerSnapshot, LedgerTable, MemorySink, NullSink};
pub use types::{Actions, Observation, Product};

#[cfg(feature = "instrument")]
pub use instrument;
