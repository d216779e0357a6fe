use std::env;
use std::fs::{self, File};
use std::path::PathBuf;

use polars::error::PolarsResult;
use polars::frame::DataFrame;
use polars::prelude::{CsvReadOptions, CsvWriter, SerReader, SerWriter};

/// Resolve the project root from `PROJECT_ROOT`, falling back to the current
/// directory. All default data paths hang off this.
pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

pub fn read_csv(file_path: &str) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

/// Write a DataFrame as CSV, creating parent directories as needed.
pub fn dataframe_to_csv(df: &mut DataFrame, file_path: &str) -> PolarsResult<()> {
    let path = PathBuf::from(file_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| polars::error::PolarsError::ComputeError(format!("{e}").into()))?;
    }
    let mut file = File::create(&path)
        .map_err(|e| polars::error::PolarsError::ComputeError(format!("{e}").into()))?;
    CsvWriter::new(&mut file).finish(df)?;
    Ok(())
}
