use crate::{
    utils::capture_timestamp, CaptureEngine, DeviceHandle, Error, ExportPaths, Exporter,
    KeyTextPattern, Result, ValidationError,
};
use log::{debug, info};
use ndarray::{Array2, ArrayView1};
use std::time::Duration;

/// Columnar batch data as exported.
///
/// `keys` and `textins` hold one entry per trace when that field is random,
/// and a single entry taken from the first trace when it is fixed.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchArrays {
    /// quantity x window samples.
    pub traces: Array2<f64>,
    pub keys: Vec<String>,
    pub textins: Vec<String>,
    pub textouts: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchResult {
    pub arrays: BatchArrays,
    pub paths: ExportPaths,
    pub timestamp: String,
}

/// Observer notified after every trace of a batch.
pub trait Progress {
    fn update(&mut self, done: usize, total: usize);

    fn finish(&mut self) {}
}

/// Discards progress.
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&mut self, _done: usize, _total: usize) {}
}

/// Logs progress at debug level, one line per trace.
pub struct LogProgress;

impl Progress for LogProgress {
    fn update(&mut self, done: usize, total: usize) {
        debug!(
            "Measuring... {:.2}% ({}/{})",
            done as f64 / total as f64 * 100.0,
            done,
            total
        );
    }
}

/// Captures a run of traces with the session's pattern and exports them.
pub struct BatchCapture<'a> {
    handle: &'a mut dyn DeviceHandle,
    ktp: &'a mut KeyTextPattern,
    exporter: &'a Exporter,
    timeout: Duration,
}

impl<'a> BatchCapture<'a> {
    pub fn new(
        handle: &'a mut dyn DeviceHandle,
        ktp: &'a mut KeyTextPattern,
        exporter: &'a Exporter,
        timeout: Duration,
    ) -> Self {
        Self {
            handle,
            ktp,
            exporter,
            timeout,
        }
    }

    /// Captures `quantity` traces, crops them to `poi` (`start..end`) and
    /// writes the four arrays under the export directory.
    ///
    /// Any failed trace aborts the batch and nothing is exported.
    pub fn run(
        &mut self,
        quantity: usize,
        identifier: &str,
        poi: Option<(usize, usize)>,
        progress: &mut dyn Progress,
    ) -> Result<BatchResult> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ValidationError::Empty("identifier").into());
        }
        if quantity == 0 {
            return Err(ValidationError::OutOfRange {
                field: "quantity",
                min: 1,
                max: u32::MAX as i64,
                value: 0,
            }
            .into());
        }

        let samples = self.handle.samples();
        let (start, end) = resolve_window(poi, samples)?;
        let timestamp = capture_timestamp();
        let random_key = !self.ktp.key_mode().is_fixed();
        let random_text = !self.ktp.text_mode().is_fixed();

        info!(
            "Capturing {quantity} traces '{identifier}' window {start}..{end} (random key: {random_key}, random textin: {random_text})"
        );

        let mut traces = Array2::<f64>::zeros((quantity, end - start));
        let mut keys = Vec::new();
        let mut textins = Vec::new();
        let mut textouts = Vec::with_capacity(quantity);

        for i in 0..quantity {
            let pair = self.ktp.next_pair();
            let trace = CaptureEngine::new(&mut *self.handle, self.timeout).capture_once(&pair)?;

            traces
                .row_mut(i)
                .assign(&ArrayView1::from(&trace.wave()[start..end]));
            textouts.push(trace.textout_hex());
            if random_text || i == 0 {
                textins.push(trace.textin_hex());
            }
            if random_key || i == 0 {
                keys.push(trace.key_hex());
            }

            progress.update(i + 1, quantity);
        }
        progress.finish();

        let arrays = BatchArrays {
            traces,
            keys,
            textins,
            textouts,
        };
        let paths = self.exporter.export(identifier, &timestamp, &arrays)?;

        Ok(BatchResult {
            arrays,
            paths,
            timestamp,
        })
    }
}

fn resolve_window(poi: Option<(usize, usize)>, samples: usize) -> Result<(usize, usize), Error> {
    match poi {
        None => Ok((0, samples)),
        Some((start, end)) if start < end && end <= samples => Ok((start, end)),
        Some((start, end)) => Err(ValidationError::InvalidPoi {
            start,
            end,
            samples,
        }
        .into()),
    }
}
