use ahash::{AHashMap, AHashSet};
use anyhow::{anyhow, Context, Result};
use bytesize::ByteSize;
use csv::{ReaderBuilder, StringRecord};
use log::{debug, info, warn};
use methylome::normalize_chromosome;
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use crate::data::{
    coverage::CoverageRecord,
    methylation::MethylationCall,
    reference::{ExclusionSet, ReferenceCatalog, ReferenceSite},
    MethylationSite, SampleTable,
};
use crate::error::ImputeError;

mod columnar;

/// Extensions picked up when an input path is a directory.
pub const COVERAGE_EXTENSIONS: [&str; 4] = ["cov", "bed", "txt", "tsv"];

const MALFORMED_WARNINGS: usize = 5;

/// Sample label used for output naming: the file name without its last
/// extension.
pub fn sample_name<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.as_ref().to_string_lossy().into_owned())
}

/// Expands directories into the coverage files they contain. Output names
/// are derived from file stems, so two inputs with the same stem are refused.
pub fn discover_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("Could not list input directory: {:?}", input))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .is_some_and(|ext| COVERAGE_EXTENSIONS.contains(&ext))
                })
                .collect();
            found.sort();
            debug!("Found {} coverage files in {:?}", found.len(), input);
            files.append(&mut found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            warn!("Input path does not exist: {:?}", input);
        }
    }

    if files.is_empty() {
        let searched = inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ImputeError::NoInputFilesFound(searched).into());
    }

    let mut names = AHashSet::new();
    for file in &files {
        let name = sample_name(file);
        if !names.insert(name.clone()) {
            return Err(ImputeError::config(format!(
                "two input files share the sample name '{}'",
                name
            ))
            .into());
        }
    }

    Ok(files)
}

fn parse_coverage_record(record: &StringRecord) -> Result<MethylationSite> {
    let row: CoverageRecord = record.deserialize(None)?;

    if row.end < row.start {
        anyhow::bail!("end ({}) lies before start ({})", row.end, row.start);
    }
    let call = MethylationCall::new(row.coverage, row.percent_methylated)?;

    Ok(MethylationSite::new(
        normalize_chromosome(&row.chromosome),
        row.start,
        row.end,
        row.strand,
        call,
    ))
}

/// Reads one coverage file. The first line is a header and is skipped. Rows
/// that fail to parse are counted and skipped; they never abort the sample.
pub fn load_coverage_file<P: AsRef<Path>>(path: P) -> Result<SampleTable> {
    let path = path.as_ref();
    let name = sample_name(path);

    let file = File::open(path).with_context(|| format!("Failed to open coverage file: {:?}", path))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    info!("Scanning {} ({})", name, ByteSize::b(size));

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(b'\t')
        .from_reader(BufReader::new(file));
    let mut record = StringRecord::new();

    let mut sites = Vec::new();
    let mut malformed = 0usize;

    loop {
        let line = rdr.position().line() + 1;
        match rdr.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_io_error() => {
                return Err(e).with_context(|| format!("Error reading coverage file: {:?}", path))
            }
            Err(e) => {
                malformed += 1;
                if malformed <= MALFORMED_WARNINGS {
                    warn!(
                        "{}: {}",
                        name,
                        ImputeError::MalformedRecord {
                            line,
                            reason: e.to_string()
                        }
                    );
                }
                continue;
            }
        }

        match parse_coverage_record(&record) {
            Ok(site) => sites.push(site),
            Err(e) => {
                malformed += 1;
                if malformed <= MALFORMED_WARNINGS {
                    let line = record.position().map(|p| p.line()).unwrap_or(line);
                    warn!(
                        "{}: {}",
                        name,
                        ImputeError::MalformedRecord {
                            line,
                            reason: e.to_string()
                        }
                    );
                }
            }
        }
    }

    if malformed > 0 {
        warn!("{}: skipped {} malformed records in total", name, malformed);
    }
    debug!("{}: parsed {} records", name, sites.len());

    let mut table = SampleTable::new(name, sites);
    table.malformed_records = malformed;
    Ok(table)
}

fn is_track_line(record: &StringRecord) -> bool {
    record
        .get(0)
        .is_some_and(|field| field.starts_with("track") || field.starts_with("browser"))
}

fn parse_field<T: std::str::FromStr>(record: &StringRecord, index: usize, field: &str) -> Result<T> {
    let raw = record
        .get(index)
        .ok_or_else(|| anyhow!("Missing {} field", field))?;
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: '{}'", field, raw))
}

/// Iterates the data rows of a BED-like file, tolerating a column header on
/// the first line. `parse` turns a record into a value.
fn read_bed_like<T, F>(path: &Path, what: &str, mut parse: F) -> Result<Vec<T>>
where
    F: FnMut(&StringRecord) -> Result<T>,
{
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open {} at: {:?}", what, path))?;

    let mut rows = Vec::new();
    let mut record = StringRecord::new();
    let mut first = true;

    while rdr
        .read_record(&mut record)
        .with_context(|| format!("Error reading {}: {:?}", what, path))?
    {
        if is_track_line(&record) {
            continue;
        }
        match parse(&record) {
            Ok(row) => rows.push(row),
            Err(_) if first => debug!("Treating first line of {:?} as a header", path),
            Err(e) => {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                return Err(e).with_context(|| format!("Invalid {} row at line {}", what, line));
            }
        }
        first = false;
    }

    Ok(rows)
}

/// Loads the reference CpG catalog: a parquet table with `chr`, `start` and
/// `end` columns, or a tab-separated file with `chromosome start end` rows.
pub fn load_reference<P: AsRef<Path>>(path: P) -> Result<ReferenceCatalog> {
    let path = path.as_ref();

    let rows = if columnar::is_parquet(path) {
        columnar::read_reference_sites(path)?
    } else {
        read_bed_like(path, "reference catalog", |record| {
            let chromosome = normalize_chromosome(record.get(0).unwrap_or_default());
            let start: u64 = parse_field(record, 1, "start")?;
            let end: u64 = parse_field(record, 2, "end")?;
            Ok((chromosome, ReferenceSite { start, end }))
        })?
    };

    let mut chromosomes: AHashMap<String, Vec<ReferenceSite>> = AHashMap::new();
    for (chromosome, site) in rows {
        chromosomes.entry(chromosome).or_default().push(site);
    }

    let catalog = ReferenceCatalog::from_chromosomes(chromosomes)
        .with_context(|| format!("Invalid reference catalog: {:?}", path))?;
    info!(
        "Reference catalog: {} sites on {} chromosomes",
        catalog.site_count(),
        catalog.iter().count()
    );
    Ok(catalog)
}

/// Loads an exclusion set: a parquet table with `chr` and `start` columns, or
/// tab-separated `chromosome start` rows. Extra columns are ignored.
pub fn load_exclusions<P: AsRef<Path>>(path: P) -> Result<ExclusionSet> {
    let path = path.as_ref();

    let rows = if columnar::is_parquet(path) {
        columnar::read_exclusion_sites(path)?
    } else {
        read_bed_like(path, "exclusion set", |record| {
            let chromosome = normalize_chromosome(record.get(0).unwrap_or_default());
            let start: u64 = parse_field(record, 1, "start")?;
            Ok((chromosome, start))
        })?
    };

    let mut exclusions = ExclusionSet::new();
    for (chromosome, start) in rows {
        exclusions.insert(chromosome, start);
    }
    info!("Exclusion set: {} sites", exclusions.len());
    Ok(exclusions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use methylome::Strand;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    const HEADER: &str = "chrom\tstart\tend\tname\tscore\tstrand\ttstart\ttend\trgb\tcoverage\tpct";

    #[test]
    fn test_load_coverage_file() -> Result<()> {
        let mut coverage_file = NamedTempFile::new()?;
        writeln!(coverage_file, "{}", HEADER)?;
        writeln!(coverage_file, "chr1\t100\t101\t.\t0\t+\t100\t101\t0,0,0\t20\t50")?;
        writeln!(coverage_file, "Chr1\t101\t102\t.\t0\t-\t101\t102\t0,0,0\t10\t80")?;

        let table = load_coverage_file(coverage_file.path())?;

        assert_eq!(table.sites.len(), 2);
        assert_eq!(table.malformed_records, 0);
        assert_eq!(table.sites[0].chromosome, "1");
        assert_eq!(table.sites[1].chromosome, "1");
        assert_eq!(table.sites[1].strand, Strand::Negative);
        assert_eq!(table.sites[1].call.coverage(), 10);
        Ok(())
    }

    #[test]
    fn test_malformed_rows_are_skipped() -> Result<()> {
        let mut coverage_file = NamedTempFile::new()?;
        writeln!(coverage_file, "{}", HEADER)?;
        writeln!(coverage_file, "chr1\t100\t101\t.\t0\t+\t100\t101\t0,0,0\t20\t50")?;
        writeln!(coverage_file, "chr1\tabc\t101\t.\t0\t+\t100\t101\t0,0,0\t20\t50")?;
        writeln!(coverage_file, "chr1\t300\t301\t.\t0\t+\t300\t301\t0,0,0\t20\t150")?;
        writeln!(coverage_file, "chr1\t400\t401\t.\t0\t?\t400\t401\t0,0,0\t20\t50")?;
        writeln!(coverage_file, "chr1\t500")?;
        writeln!(coverage_file, "chr1\t600\t601\t.\t0\t+\t600\t601\t0,0,0\t7\t0")?;

        let table = load_coverage_file(coverage_file.path())?;

        let starts: Vec<u64> = table.sites.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![100, 600]);
        assert_eq!(table.malformed_records, 4);
        Ok(())
    }

    #[test]
    fn test_load_reference_with_header_and_comments() -> Result<()> {
        let mut reference_file = NamedTempFile::new()?;
        writeln!(reference_file, "chr\tstart\tend")?;
        writeln!(reference_file, "# generated")?;
        writeln!(reference_file, "chr1\t300\t302")?;
        writeln!(reference_file, "chr1\t100\t102")?;
        writeln!(reference_file, "chr2\t5\t7")?;

        let catalog = load_reference(reference_file.path())?;

        assert_eq!(catalog.site_count(), 3);
        let starts: Vec<u64> = catalog.chromosome("1").iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![100, 300]);
        Ok(())
    }

    #[test]
    fn test_reference_bad_row_is_an_error() -> Result<()> {
        let mut reference_file = NamedTempFile::new()?;
        writeln!(reference_file, "chr1\t100\t102")?;
        writeln!(reference_file, "chr1\tx\t102")?;

        assert!(load_reference(reference_file.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_reference_duplicates_rejected() -> Result<()> {
        let mut reference_file = NamedTempFile::new()?;
        writeln!(reference_file, "chr1\t100\t102")?;
        writeln!(reference_file, "1\t100\t102")?;

        let err = load_reference(reference_file.path()).unwrap_err();
        assert_eq!(crate::error::error_kind(&err), "DuplicateSite");
        Ok(())
    }

    #[test]
    fn test_load_parquet_reference_and_exclusions() -> Result<()> {
        use arrow::array::{ArrayRef, StringArray, UInt64Array};
        use super::columnar::tests::write_parquet;
        use std::sync::Arc;

        let dir = tempdir()?;
        let reference_path = dir.path().join("reference.parquet");
        write_parquet(
            &reference_path,
            vec![
                ("chr", Arc::new(StringArray::from(vec!["chr1", "chr1", "chr1", "chr2"])) as ArrayRef),
                ("start", Arc::new(UInt64Array::from(vec![300u64, 100, 200, 5])) as ArrayRef),
                ("end", Arc::new(UInt64Array::from(vec![302u64, 102, 202, 7])) as ArrayRef),
            ],
        )?;
        let exclusion_path = dir.path().join("exclude.parquet");
        write_parquet(
            &exclusion_path,
            vec![
                ("chr", Arc::new(StringArray::from(vec!["chr1"])) as ArrayRef),
                ("start", Arc::new(UInt64Array::from(vec![200u64])) as ArrayRef),
            ],
        )?;

        let catalog = load_reference(&reference_path)?;
        assert_eq!(catalog.site_count(), 4);

        let catalog = catalog.without(&load_exclusions(&exclusion_path)?);
        let starts: Vec<u64> = catalog.chromosome("1").iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![100, 300]);
        Ok(())
    }

    #[test]
    fn test_parquet_reference_duplicates_rejected() -> Result<()> {
        use arrow::array::{ArrayRef, StringArray, UInt64Array};
        use super::columnar::tests::write_parquet;
        use std::sync::Arc;

        let dir = tempdir()?;
        let path = dir.path().join("reference.parquet");
        write_parquet(
            &path,
            vec![
                ("chr", Arc::new(StringArray::from(vec!["chr1", "chr2", "1"])) as ArrayRef),
                ("start", Arc::new(UInt64Array::from(vec![100u64, 5, 100])) as ArrayRef),
                ("end", Arc::new(UInt64Array::from(vec![102u64, 7, 102])) as ArrayRef),
            ],
        )?;

        let err = load_reference(&path).unwrap_err();
        assert_eq!(crate::error::error_kind(&err), "DuplicateSite");
        Ok(())
    }

    #[test]
    fn test_load_exclusions() -> Result<()> {
        let mut exclusion_file = NamedTempFile::new()?;
        writeln!(exclusion_file, "chr1\t100\tblacklisted")?;
        writeln!(exclusion_file, "chr2\t5")?;

        let exclusions = load_exclusions(exclusion_file.path())?;
        assert_eq!(exclusions.len(), 2);
        assert!(exclusions.chromosome("1").unwrap().contains(&100));
        Ok(())
    }

    #[test]
    fn test_discover_inputs() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b.cov"), "")?;
        fs::write(dir.path().join("a.bed"), "")?;
        fs::write(dir.path().join("notes.md"), "")?;

        let files = discover_inputs(&[dir.path().to_path_buf()])?;
        let names: Vec<String> = files.iter().map(sample_name).collect();
        assert_eq!(names, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_no_inputs_found() -> Result<()> {
        let dir = tempdir()?;
        let err = discover_inputs(&[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(crate::error::error_kind(&err), "NoInputFilesFound");
        Ok(())
    }

    #[test]
    fn test_duplicate_sample_names_rejected() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("s1.cov"), "")?;
        fs::write(dir.path().join("s1.bed"), "")?;

        let err = discover_inputs(&[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(crate::error::error_kind(&err), "InvalidConfig");
        Ok(())
    }
}
