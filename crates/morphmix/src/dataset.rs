use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array1;

use morphmix_core::ObservationTable;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// The label column every dataset must carry.
pub const TAXON_COLUMN: &str = "taxon";
/// Measurement columns that must be present and strictly positive
/// (they get log-transformed downstream).
pub const MEASUREMENT_COLUMNS: [&str; 2] = ["wing_length_mm", "beak_height_mm"];

/// Load an observation table from a CSV file, read wholesale.
///
/// Expected layout: a header row with a `taxon` column plus numeric
/// columns, among them `wing_length_mm` and `beak_height_mm`. Any other
/// column is parsed as numeric and carried through. Every failure - a
/// missing file, a missing column, a value that is not a finite number, a
/// non-positive measurement - is fatal, with the offending row in the
/// error message.
pub fn load_csv(path: &Path) -> Result<ObservationTable> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening dataset {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let taxon_idx = headers
        .iter()
        .position(|h| h == TAXON_COLUMN)
        .with_context(|| format!("dataset is missing the '{}' column", TAXON_COLUMN))?;
    for required in MEASUREMENT_COLUMNS {
        if !headers.iter().any(|h| h == required) {
            bail!("dataset is missing the '{}' column", required);
        }
    }

    let numeric_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != taxon_idx)
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let mut labels: Vec<String> = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); numeric_columns.len()];

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reading CSV row {}", row_no + 1))?;

        let taxon = record
            .get(taxon_idx)
            .map(str::trim)
            .unwrap_or_default();
        if taxon.is_empty() {
            bail!("row {}: empty taxon label", row_no + 1);
        }
        labels.push(taxon.to_string());

        for (slot, (col_idx, name)) in numeric_columns.iter().enumerate() {
            let raw = record.get(*col_idx).unwrap_or("").trim();
            let value: f64 = raw.parse().with_context(|| {
                format!("row {}, column '{}': '{}' is not a number", row_no + 1, name, raw)
            })?;
            if !value.is_finite() {
                bail!("row {}, column '{}': value is not finite", row_no + 1, name);
            }
            if MEASUREMENT_COLUMNS.contains(&name.as_str()) && value <= 0.0 {
                bail!(
                    "row {}, column '{}': measurement must be positive, got {}",
                    row_no + 1,
                    name,
                    value
                );
            }
            values[slot].push(value);
        }
    }

    let mut table = ObservationTable::new(labels).context("building observation table")?;
    for ((_, name), column) in numeric_columns.iter().zip(values) {
        table
            .push_column(name, Array1::from_vec(column))
            .with_context(|| format!("adding column '{}'", name))?;
    }

    log::info!(
        "loaded {} observations across {} taxa from {}",
        table.n_rows(),
        table.groups().n_levels(),
        path.display()
    );
    Ok(table)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write a table (labels plus all numeric columns, derived ones included)
/// back to CSV. This is the workflow's one intermediate save.
pub fn write_csv(table: &ObservationTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let names = table.column_names();
    let mut header = vec![TAXON_COLUMN.to_string()];
    header.extend(names.iter().map(|n| n.to_string()));
    writer.write_record(&header).context("writing CSV header")?;

    let columns: Vec<&Array1<f64>> = names
        .iter()
        .map(|n| table.column(n).expect("column names come from the table"))
        .collect();

    for row in 0..table.n_rows() {
        let mut record = vec![table.labels()[row].clone()];
        for column in &columns {
            record.push(format!("{}", column[row]));
        }
        writer
            .write_record(&record)
            .with_context(|| format!("writing row {}", row + 1))?;
    }

    writer.flush().context("flushing CSV writer")?;
    log::info!("wrote augmented dataset to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_dataset() {
        let file = write_temp(
            "taxon,wing_length_mm,beak_height_mm\n\
             fortis,67.5,9.6\n\
             fortis,70.1,10.2\n\
             scandens,64.2,8.4\n",
        );
        let table = load_csv(file.path()).unwrap();
        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.groups().n_levels(), 2);
        assert!(table.has_column("wing_length_mm"));
        assert!(table.has_column("beak_height_mm"));
    }

    #[test]
    fn test_extra_numeric_columns_carried_through() {
        let file = write_temp(
            "taxon,wing_length_mm,beak_height_mm,tarsus_mm\n\
             fortis,67.5,9.6,19.1\n\
             scandens,64.2,8.4,18.2\n",
        );
        let table = load_csv(file.path()).unwrap();
        assert!(table.has_column("tarsus_mm"));
    }

    #[test]
    fn test_missing_measurement_column() {
        let file = write_temp("taxon,wing_length_mm\nfortis,67.5\n");
        let err = load_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("beak_height_mm"));
    }

    #[test]
    fn test_non_numeric_value_has_row_context() {
        let file = write_temp(
            "taxon,wing_length_mm,beak_height_mm\n\
             fortis,67.5,9.6\n\
             fortis,oops,10.2\n",
        );
        let err = load_csv(file.path()).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("row 2"), "got: {}", message);
        assert!(message.contains("wing_length_mm"), "got: {}", message);
    }

    #[test]
    fn test_non_positive_measurement_rejected() {
        let file = write_temp(
            "taxon,wing_length_mm,beak_height_mm\n\
             fortis,0.0,9.6\n",
        );
        let err = load_csv(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("positive"));
    }

    #[test]
    fn test_empty_taxon_rejected() {
        let file = write_temp(
            "taxon,wing_length_mm,beak_height_mm\n\
             ,67.5,9.6\n",
        );
        assert!(load_csv(file.path()).is_err());
    }

    #[test]
    fn test_write_then_reload_roundtrip() {
        let file = write_temp(
            "taxon,wing_length_mm,beak_height_mm\n\
             fortis,67.5,9.6\n\
             scandens,64.2,8.4\n",
        );
        let mut table = load_csv(file.path()).unwrap();
        table.append_log("wing_length_mm", "log_wing").unwrap();

        let out = tempfile::NamedTempFile::new().unwrap();
        write_csv(&table, out.path()).unwrap();

        let reloaded = load_csv(out.path()).unwrap();
        assert_eq!(reloaded.n_rows(), 2);
        assert!(reloaded.has_column("log_wing"));
        let original = table.column("log_wing").unwrap();
        let restored = reloaded.column("log_wing").unwrap();
        for i in 0..2 {
            assert!((original[i] - restored[i]).abs() < 1e-12);
        }
    }
}
