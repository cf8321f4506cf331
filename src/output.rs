//! Writing query results: GeoJSON for maps, CSV for history dumps.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;
use geojson::FeatureCollection;
use tracing::debug;

use crate::error::Result;
use crate::model::TripUpdateRecord;

/// Appends history rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_records(path: &str, records: &[TripUpdateRecord]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = records.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes a feature collection as JSON to `path`, or to stdout when `None`.
pub fn write_geojson(path: Option<&str>, collection: &FeatureCollection) -> Result<()> {
    let json = serde_json::to_string(collection)?;

    match path {
        Some(path) => {
            std::fs::write(path, json)?;
            debug!(path, features = collection.features.len(), "GeoJSON written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}
