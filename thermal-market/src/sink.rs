//! Destinations for settled ledgers.

use crate::context::RunContext;
use crate::error::SinkError;
use crate::ledger::LedgerRow;

/// Rows of one agent's ledger (a trader's archived periods or a market's clearings).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerTable {
    pub agent: String,
    pub rows: Vec<LedgerRow>,
}

/// Every ledger of a run at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub tables: Vec<LedgerTable>,
}

impl LedgerSnapshot {
    pub fn table(&self, agent: &str) -> Option<&LedgerTable> {
        self.tables.iter().find(|t| t.agent == agent)
    }
}

pub trait LedgerSink {
    /// Persist `snapshot`. Called repeatedly; each call supersedes the last.
    fn flush(&mut self, run: &RunContext, snapshot: &LedgerSnapshot) -> Result<(), SinkError>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LedgerSink for NullSink {
    fn flush(&mut self, _run: &RunContext, _snapshot: &LedgerSnapshot) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps the latest snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub last: Option<LedgerSnapshot>,
    pub flushes: usize,
}

impl LedgerSink for MemorySink {
    fn flush(&mut self, _run: &RunContext, snapshot: &LedgerSnapshot) -> Result<(), SinkError> {
        self.last = Some(snapshot.clone());
        self.flushes += 1;
        Ok(())
    }
}

/// Writes `<run_dir>/<agent>.parquet` per ledger.
#[cfg(feature = "instrument")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetSink;

#[cfg(feature = "instrument")]
impl LedgerSink for ParquetSink {
    fn flush(&mut self, run: &RunContext, snapshot: &LedgerSnapshot) -> Result<(), SinkError> {
        use std::collections::HashMap;

        use instrument::{DynamicTable, FieldValue};

        use crate::ledger::Cell;

        let mut frames = HashMap::new();
        for table in &snapshot.tables {
            let mut dynamic = DynamicTable::default();
            for row in &table.rows {
                dynamic.push_row(row.iter().map(|(name, cell)| {
                    let value = match *cell {
                        Cell::Int(v) => FieldValue::U64(v),
                        Cell::Float(v) => FieldValue::F64(v),
                        Cell::Null => FieldValue::F64(f64::NAN),
                    };
                    (name.as_str(), value)
                }));
            }
            let df = dynamic
                .to_dataframe()
                .map_err(|e| SinkError::Parquet(e.to_string()))?;
            frames.insert(table.agent.clone(), df);
        }
        instrument::save_parquet(&mut frames, &run.run_dir()).map_err(|e| SinkError::Parquet(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Cell;

    fn snapshot() -> LedgerSnapshot {
        let mut row = LedgerRow::new();
        row.insert("time".into(), Cell::Int(900));
        row.insert("price".into(), Cell::Null);
        LedgerSnapshot {
            tables: vec![LedgerTable {
                agent: "heat".into(),
                rows: vec![row],
            }],
        }
    }

    #[test]
    fn memory_sink_keeps_latest() {
        let mut sink = MemorySink::default();
        let run = RunContext::default();
        sink.flush(&run, &LedgerSnapshot::default()).unwrap();
        sink.flush(&run, &snapshot()).unwrap();
        assert_eq!(sink.flushes, 2);
        let last = sink.last.unwrap();
        assert_eq!(last.table("heat").map(|t| t.rows.len()), Some(1));
    }

    #[cfg(feature = "instrument")]
    #[test]
    fn parquet_sink_writes_one_file_per_agent() {
        let dir = std::env::temp_dir().join(format!("thermal-market-sink-{}", std::process::id()));
        let run = RunContext::new("series", "run", &dir);
        ParquetSink.flush(&run, &snapshot()).unwrap();
        assert!(run.run_dir().join("heat.parquet").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
