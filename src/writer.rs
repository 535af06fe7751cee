use crate::{utils::check_and_reformat_dir, BatchArrays, ExportError, Result};
use hdf5::{types::VarLenUnicode, File};
use log::{info, warn};
use ndarray::Array2;
use std::path::{Path, PathBuf};

pub const DEFAULT_EXPORT_DIR: &str = "./cw-export/";

/// Files written for one batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportPaths {
    pub trace: PathBuf,
    pub key: PathBuf,
    pub textin: PathBuf,
    pub textout: PathBuf,
}

/// Writes batch arrays as HDF5 files under the export directory.
#[derive(Clone, Debug)]
pub struct Exporter {
    export_dir: String,
    compression_level: u8,
}

impl Default for Exporter {
    fn default() -> Self {
        Self {
            export_dir: DEFAULT_EXPORT_DIR.to_string(),
            compression_level: 0,
        }
    }
}

impl Exporter {
    pub fn new(export_dir: &str) -> Result<Self> {
        Ok(Self {
            export_dir: check_and_reformat_dir(export_dir)?,
            ..Default::default()
        })
    }

    /// Deflate level for the trace matrix, 0 disables compression.
    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn export_dir(&self) -> &str {
        &self.export_dir
    }

    /// Validates, creates and switches to a new export directory.
    pub fn change_export_path(&mut self, export_dir: &str) -> Result<()> {
        self.export_dir = check_and_reformat_dir(export_dir)?;
        info!("Export path set to {}", self.export_dir);
        Ok(())
    }

    /// `{dir}{identifier}-{timestamp}-{kind}.h5` for every artifact kind.
    pub fn paths_for(&self, identifier: &str, timestamp: &str) -> ExportPaths {
        let path = |kind: &str| {
            PathBuf::from(format!(
                "{}{}-{}-{}.h5",
                self.export_dir, identifier, timestamp, kind
            ))
        };
        ExportPaths {
            trace: path("trace"),
            key: path("key"),
            textin: path("textin"),
            textout: path("textout"),
        }
    }

    pub fn export(
        &self,
        identifier: &str,
        timestamp: &str,
        arrays: &BatchArrays,
    ) -> Result<ExportPaths> {
        // The directory may have been removed since it was configured.
        check_and_reformat_dir(&self.export_dir)?;

        let paths = self.paths_for(identifier, timestamp);
        let mut written: Vec<&Path> = Vec::with_capacity(4);
        let outcome = self
            .write_traces(&paths.trace, &arrays.traces)
            .inspect(|_| written.push(&paths.trace))
            .and_then(|_| write_hex_list(&paths.key, "key", &arrays.keys))
            .inspect(|_| written.push(&paths.key))
            .and_then(|_| write_hex_list(&paths.textin, "textin", &arrays.textins))
            .inspect(|_| written.push(&paths.textin))
            .and_then(|_| write_hex_list(&paths.textout, "textout", &arrays.textouts));
        if let Err(e) = outcome {
            for path in written {
                if let Err(rm) = std::fs::remove_file(path) {
                    warn!("Could not remove partial export {}: {rm}", path.display());
                }
            }
            return Err(e.into());
        }

        info!(
            "Exported {} traces to {}{}-{}-*.h5",
            arrays.traces.nrows(),
            self.export_dir,
            identifier,
            timestamp
        );
        Ok(paths)
    }

    fn write_traces(&self, path: &Path, traces: &Array2<f64>) -> Result<(), ExportError> {
        let file = File::create(path)?;
        let builder = file.new_dataset_builder().with_data(traces);
        let (_, cols) = traces.dim();
        if self.compression_level > 0 && cols > 0 {
            builder
                .chunk((1, cols))
                .deflate(self.compression_level)
                .create("trace")?;
        } else {
            builder.create("trace")?;
        }
        Ok(())
    }
}

fn write_hex_list(path: &Path, name: &str, values: &[String]) -> Result<(), ExportError> {
    let data = values
        .iter()
        .map(|v| {
            v.parse::<VarLenUnicode>()
                .map_err(|e| ExportError::Encoding(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let file = File::create(path)?;
    file.new_dataset_builder().with_data(&data).create(name)?;
    Ok(())
}
