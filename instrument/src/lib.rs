//! Column-oriented recording for the trading engine.
//!
//! Two ways in:
//! - `tracing` events picked up by [`DataFrameSubscriber`]; each event target becomes a table
//!   and the schema emerges from the recorded fields.
//! - explicit rows pushed with [`DynamicTable::push_row`], used to export settlement ledgers.
//!
//! Tables convert to polars DataFrames and can be written as parquet.
//!
//! ```ignore
//! // engine code:
//! tracing::info!(target: "clearing", market = "heat", quantity, price);
//!
//! // test:
//! tracing::subscriber::with_default(instrument::DataFrameSubscriber, || run());
//! let recorder = instrument::drain();
//! let clearings = &recorder.tables["clearing"];
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

/// A column of typed values.
#[derive(Debug, Clone)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TypedColumn {
    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty column of the same type as `value`, padded to `rows`.
    fn padded_for(value: &FieldValue, rows: usize) -> Self {
        match value {
            FieldValue::U64(_) => TypedColumn::U64(vec![0; rows]),
            FieldValue::I64(_) => TypedColumn::I64(vec![0; rows]),
            FieldValue::F64(_) => TypedColumn::F64(vec![0.0; rows]),
            FieldValue::Bool(_) => TypedColumn::Bool(vec![false; rows]),
            FieldValue::Str(_) => TypedColumn::Str(vec![String::new(); rows]),
        }
    }

    /// Append a value. A value whose type does not match the column is dropped and the row
    /// gets padded instead.
    fn push(&mut self, value: FieldValue) {
        match (self, value) {
            (TypedColumn::U64(v), FieldValue::U64(x)) => v.push(x),
            (TypedColumn::I64(v), FieldValue::I64(x)) => v.push(x),
            (TypedColumn::F64(v), FieldValue::F64(x)) => v.push(x),
            (TypedColumn::Bool(v), FieldValue::Bool(x)) => v.push(x),
            (TypedColumn::Str(v), FieldValue::Str(x)) => v.push(x),
            _ => {}
        }
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// A table with dynamically-typed columns.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    pub columns: HashMap<String, TypedColumn>,
    pub row_count: usize,
}

impl DynamicTable {
    /// Pad all columns to the current row count with default values.
    fn pad_columns_to_row_count(&mut self) {
        for col in self.columns.values_mut() {
            let current_len = col.len();
            if current_len < self.row_count {
                let padding = self.row_count - current_len;
                match col {
                    TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, padding)),
                    TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, padding)),
                    TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, padding)),
                    TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, padding)),
                    TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), padding)),
                }
            }
        }
    }

    /// Set one cell of the row currently being written (row index `row_count`).
    /// New columns are pre-padded for all earlier rows.
    fn put(&mut self, name: &str, value: FieldValue) {
        let rows = self.row_count;
        let col = self
            .columns
            .entry(name.to_string())
            .or_insert_with(|| TypedColumn::padded_for(&value, rows));
        // a second value for the same cell in one row is ignored
        if col.len() == rows {
            col.push(value);
        }
    }

    /// Append one row. Columns missing from `fields` are padded with defaults.
    pub fn push_row<K, I>(&mut self, fields: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        self.pad_columns_to_row_count();
        for (name, value) in fields {
            self.put(name.as_ref(), value);
        }
        self.row_count += 1;
        self.pad_columns_to_row_count();
    }

    /// Names of all columns, sorted.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Collection of tables, keyed by tracing target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: HashMap<String, DynamicTable>,
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

/// Visitor that writes event fields into the open row of a table.
struct ColumnVisitor<'a> {
    table: &'a mut DynamicTable,
}

impl Visit for ColumnVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.table.put(field.name(), FieldValue::U64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.table.put(field.name(), FieldValue::I64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.table.put(field.name(), FieldValue::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.table.put(field.name(), FieldValue::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.table.put(field.name(), FieldValue::Str(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{:?}", value));
    }
}

/// Tracing subscriber that collects events into column-oriented tables.
///
/// INFO, WARN and ERROR events are recorded; spans are ignored. WARN and ERROR events also get
/// a `level` column so they can be told apart within one target.
pub struct DataFrameSubscriber;

impl Subscriber for DataFrameSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let metadata = event.metadata();
        let target = metadata.target().to_string();

        RECORDER.with(|r| {
            let mut recorder = r.borrow_mut();
            let table = recorder.tables.entry(target).or_default();

            table.pad_columns_to_row_count();
            if *metadata.level() < tracing::Level::INFO {
                table.put("level", FieldValue::Str(metadata.level().to_string()));
            }
            event.record(&mut ColumnVisitor {
                table: &mut *table,
            });
            table.row_count += 1;
            table.pad_columns_to_row_count();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install the DataFrameSubscriber as the global default.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(DataFrameSubscriber);
}

/// Take all recorded tables out of the thread-local recorder.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

/// Clear all recorded data without returning it.
pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

// === Polars Integration ===

use polars::prelude::*;

impl DynamicTable {
    /// Convert this table to a polars DataFrame. Columns come out sorted by name.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(self.columns.len());

        for name in self.column_names() {
            let column = match &self.columns[name] {
                TypedColumn::U64(v) => Column::new(name.into(), v),
                TypedColumn::I64(v) => Column::new(name.into(), v),
                TypedColumn::F64(v) => Column::new(name.into(), v),
                TypedColumn::Bool(v) => Column::new(name.into(), v),
                TypedColumn::Str(v) => Column::new(name.into(), v),
            };
            columns.push(column);
        }

        DataFrame::new(columns)
    }
}

impl Recorder {
    /// Convert all tables to polars DataFrames.
    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

/// Drain all recorded data and convert to polars DataFrames.
pub fn drain_to_dataframes() -> HashMap<String, DataFrame> {
    drain().to_dataframes()
}

fn io_error(e: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: e.into(),
        msg: None,
    }
}

/// Save all DataFrames as parquet files in the given directory.
/// Each table becomes `{dir}/{name}.parquet`.
pub fn save_parquet(dfs: &mut HashMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    for (name, df) in dfs.iter_mut() {
        let path = dir.join(format!("{}.parquet", sanitize(name)));
        let file = std::fs::File::create(&path).map_err(io_error)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Replace non-alphanumeric chars with `_` and truncate for use in file and directory names.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(60)
        .collect()
}

/// RAII guard that clears recorded events on creation and writes them as parquet on drop.
///
/// Output goes to `{parent}/{name}/`, followed by a `_ready` sentinel once every table is
/// written. Call `.get()` to drain and inspect the DataFrames before the guard drops.
pub struct ScopedRecorder {
    run_dir: PathBuf,
    dfs: Option<HashMap<String, DataFrame>>,
}

impl ScopedRecorder {
    pub fn new(parent: impl Into<PathBuf>, name: &str) -> Self {
        let run_dir = parent.into().join(sanitize(name));
        clear();
        install_subscriber();
        Self { run_dir, dfs: None }
    }

    /// Drain recorded data on first call; later calls return the cached frames.
    pub fn get(&mut self) -> &HashMap<String, DataFrame> {
        self.dfs.get_or_insert_with(drain_to_dataframes)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(drain_to_dataframes);
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!("ScopedRecorder({}): failed to write parquet: {}", self.run_dir.display(), e);
            return;
        }
        if let Err(e) = std::fs::File::create(self.run_dir.join("_ready")) {
            eprintln!("ScopedRecorder({}): failed to write _ready sentinel: {}", self.run_dir.display(), e);
        }
    }
}
