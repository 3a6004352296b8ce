use anyhow::Result;
use log::debug;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::error::ImputeError;
use crate::processing::assemble::AssembledChromosome;

pub const OUTPUT_HEADER: &str = "chr\tstart\tend\tstrand\tsample\tavg";

pub fn output_path(output_dir: &Path, sample: &str) -> PathBuf {
    output_dir.join(format!("imputed_{}.bed", sample))
}

/// Name rows are written under until the sample has succeeded.
pub fn partial_output_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Tab-separated writer for one sample's output file. Accepts assembled
/// chromosomes one at a time so that streaming mode never holds a whole
/// sample in memory.
///
/// Rows go to a `.partial` file that is renamed by `finish`. A writer dropped
/// without finishing removes its partial file, so a failed sample leaves no
/// output behind.
pub struct ImputedWriter {
    path: PathBuf,
    partial_path: PathBuf,
    sample: String,
    writer: Option<BufWriter<File>>,
    rows_written: usize,
    finished: bool,
}

impl ImputedWriter {
    pub fn create(output_dir: &Path, sample: &str) -> Result<Self> {
        let path = output_path(output_dir, sample);
        let partial_path = partial_output_path(&path);
        let file = File::create(&partial_path).map_err(|e| ImputeError::output(&partial_path, e))?;

        let mut writer = Self {
            path,
            partial_path,
            sample: sample.to_string(),
            writer: Some(BufWriter::new(file)),
            rows_written: 0,
            finished: false,
        };
        let header = writeln!(writer.stream()?, "{}", OUTPUT_HEADER);
        header.map_err(|e| ImputeError::output(&writer.partial_path, e))?;
        Ok(writer)
    }

    fn stream(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "output already finished"))
    }

    pub fn write_chromosome(&mut self, chromosome: &AssembledChromosome) -> Result<()> {
        for row in &chromosome.rows {
            let strand = row.strand.map(|s| s.as_str()).unwrap_or(".");
            let label = row.label(&self.sample).to_string();
            let written = self.stream().and_then(|writer| {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    chromosome.chromosome, row.start, row.end, strand, label, row.avg
                )
            });
            written.map_err(|e| ImputeError::output(&self.partial_path, e))?;
        }
        self.rows_written += chromosome.rows.len();
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flushes the rows and moves them to the final output path.
    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| ImputeError::output(&self.partial_path, e))?;
        }
        fs::rename(&self.partial_path, &self.path).map_err(|e| ImputeError::output(&self.path, e))?;
        self.finished = true;
        Ok(self.path.clone())
    }
}

impl Drop for ImputedWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.writer.take();
        match fs::remove_file(&self.partial_path) {
            Ok(()) => debug!("Removed unfinished output {:?}", self.partial_path),
            Err(e) => debug!("Could not remove {:?}: {}", self.partial_path, e),
        }
    }
}
