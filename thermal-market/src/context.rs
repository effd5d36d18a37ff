use std::path::PathBuf;

/// Where a run's ledgers end up. Runs of one series share a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub series_name: String,
    pub run_name: String,
    pub output_dir: PathBuf,
}

impl RunContext {
    pub fn new(
        series_name: impl Into<String>,
        run_name: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            series_name: series_name.into(),
            run_name: run_name.into(),
            output_dir: output_dir.into(),
        }
    }

    /// `<output_dir>/<series>/<run>`
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.series_name).join(&self.run_name)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new("series", "run", "results")
    }
}
