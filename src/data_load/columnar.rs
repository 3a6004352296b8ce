use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{Array, StringArray, UInt64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use log::debug;
use methylome::normalize_chromosome;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use std::{fs::File, path::Path};

use crate::data::reference::ReferenceSite;

pub const PARQUET_EXTENSIONS: [&str; 2] = ["parquet", "pq"];

pub fn is_parquet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PARQUET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn open_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open parquet file: {:?}", path))?;
    ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("Not a readable parquet file: {:?}", path))
}

/// Column `name` cast to UTF-8. Nulls are refused.
fn string_column(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("Missing column '{}'", name))?;
    let column = cast(column, &DataType::Utf8)
        .with_context(|| format!("Column '{}' cannot be read as text", name))?;
    if column.null_count() > 0 {
        bail!("Column '{}' contains {} null values", name, column.null_count());
    }
    column
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| anyhow!("Column '{}' is not text", name))
}

/// Column `name` cast to u64. Values that do not fit, such as negative
/// starts, become nulls in the cast and are refused.
fn u64_column(batch: &RecordBatch, name: &str) -> Result<UInt64Array> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("Missing column '{}'", name))?;
    let column = cast(column, &DataType::UInt64)
        .with_context(|| format!("Column '{}' cannot be read as an unsigned integer", name))?;
    if column.null_count() > 0 {
        bail!(
            "Column '{}' contains {} null or negative values",
            name,
            column.null_count()
        );
    }
    column
        .as_any()
        .downcast_ref::<UInt64Array>()
        .cloned()
        .ok_or_else(|| anyhow!("Column '{}' is not an unsigned integer", name))
}

/// Reads every row group of `path` on the rayon pool and concatenates the
/// rows `extract` pulls out of each record batch, in row group order.
fn scan_row_groups<T, F>(path: &Path, what: &str, extract: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&RecordBatch) -> Result<Vec<T>> + Sync,
{
    let row_groups = open_builder(path)?.metadata().num_row_groups();
    debug!("Scanning {} row groups of {} {:?}", row_groups, what, path);

    let chunks = (0..row_groups)
        .into_par_iter()
        .map(|row_group| {
            let reader = open_builder(path)?
                .with_row_groups(vec![row_group])
                .build()
                .with_context(|| format!("Could not read row group {} of {:?}", row_group, path))?;

            let mut rows = Vec::new();
            for batch in reader {
                let batch = batch.with_context(|| format!("Error reading {}: {:?}", what, path))?;
                rows.extend(
                    extract(&batch)
                        .with_context(|| format!("Invalid {} in row group {}", what, row_group))?,
                );
            }
            Ok(rows)
        })
        .collect::<Result<Vec<Vec<T>>>>()?;

    Ok(chunks.into_iter().flatten().collect())
}

/// Reference sites from a parquet table with columns `chr`, `start`, `end`.
pub fn read_reference_sites(path: &Path) -> Result<Vec<(String, ReferenceSite)>> {
    scan_row_groups(path, "reference catalog", |batch| {
        let chromosomes = string_column(batch, "chr")?;
        let starts = u64_column(batch, "start")?;
        let ends = u64_column(batch, "end")?;

        Ok((0..batch.num_rows())
            .map(|row| {
                (
                    normalize_chromosome(chromosomes.value(row)),
                    ReferenceSite {
                        start: starts.value(row),
                        end: ends.value(row),
                    },
                )
            })
            .collect())
    })
}

/// Excluded coordinates from a parquet table with columns `chr`, `start`.
pub fn read_exclusion_sites(path: &Path) -> Result<Vec<(String, u64)>> {
    scan_row_groups(path, "exclusion set", |batch| {
        let chromosomes = string_column(batch, "chr")?;
        let starts = u64_column(batch, "start")?;

        Ok((0..batch.num_rows())
            .map(|row| (normalize_chromosome(chromosomes.value(row)), starts.value(row)))
            .collect())
    })
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Writes `columns` to `path` with two rows per row group.
    pub fn write_parquet(path: &Path, columns: Vec<(&str, ArrayRef)>) -> Result<()> {
        let schema = Arc::new(Schema::new(
            columns
                .iter()
                .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
                .collect::<Vec<_>>(),
        ));
        let batch = RecordBatch::try_new(
            schema.clone(),
            columns.into_iter().map(|(_, array)| array).collect(),
        )?;

        let properties = WriterProperties::builder().set_max_row_group_size(2).build();
        let mut writer = ArrowWriter::try_new(File::create(path)?, schema, Some(properties))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    #[test]
    fn test_read_reference_across_row_groups() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("reference.parquet");
        write_parquet(
            &path,
            vec![
                ("chr", Arc::new(StringArray::from(vec!["chr1", "chr1", "chr2", "chr1", "chrX"])) as ArrayRef),
                ("start", Arc::new(Int64Array::from(vec![100, 300, 5, 200, 7])) as ArrayRef),
                ("end", Arc::new(Int64Array::from(vec![102, 302, 7, 202, 9])) as ArrayRef),
            ],
        )?;

        assert_eq!(open_builder(&path)?.metadata().num_row_groups(), 3);

        let sites = read_reference_sites(&path)?;
        let starts: Vec<(&str, u64)> = sites.iter().map(|(c, s)| (c.as_str(), s.start)).collect();
        assert_eq!(
            starts,
            vec![("1", 100), ("1", 300), ("2", 5), ("1", 200), ("X", 7)]
        );
        assert_eq!(sites[3].1.end, 202);
        Ok(())
    }

    #[test]
    fn test_missing_column_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("reference.parquet");
        write_parquet(
            &path,
            vec![
                ("chr", Arc::new(StringArray::from(vec!["chr1"])) as ArrayRef),
                ("start", Arc::new(UInt64Array::from(vec![100u64])) as ArrayRef),
            ],
        )?;

        assert!(read_reference_sites(&path).is_err());
        assert_eq!(read_exclusion_sites(&path)?, vec![("1".to_string(), 100)]);
        Ok(())
    }

    #[test]
    fn test_negative_start_is_refused() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("exclude.parquet");
        write_parquet(
            &path,
            vec![
                ("chr", Arc::new(StringArray::from(vec!["chr1", "chr1"])) as ArrayRef),
                ("start", Arc::new(Int64Array::from(vec![100, -1])) as ArrayRef),
            ],
        )?;

        assert!(read_exclusion_sites(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_tab_separated_file_is_not_parquet() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("reference.parquet");
        std::fs::write(&path, "chr1\t100\t102\n")?;

        assert!(read_reference_sites(&path).is_err());
        assert!(is_parquet(&path));
        assert!(is_parquet(Path::new("ref.PQ")));
        assert!(!is_parquet(Path::new("ref.bed")));
        Ok(())
    }
}
