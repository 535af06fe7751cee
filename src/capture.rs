use crate::{DeviceHandle, Error, KeyTextPair, Result, Trace};
use log::{debug, warn};
use std::time::Duration;

/// One initial try plus three retries.
pub const CAPTURE_ATTEMPTS: usize = 4;

/// Runs single captures against an open device and validates what comes back.
pub struct CaptureEngine<'a> {
    handle: &'a mut dyn DeviceHandle,
    timeout: Duration,
}

impl<'a> CaptureEngine<'a> {
    pub fn new(handle: &'a mut dyn DeviceHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// Captures one trace for `pair`.
    ///
    /// Missing captures and captures whose waveform length differs from the
    /// configured sample count are retried with the same pair, up to
    /// [`CAPTURE_ATTEMPTS`] in total. Device errors are returned at once.
    pub fn capture_once(&mut self, pair: &KeyTextPair) -> Result<Trace> {
        let expected = self.handle.samples();

        for attempt in 1..=CAPTURE_ATTEMPTS {
            let raw = self.handle.capture(&pair.text, &pair.key, self.timeout)?;
            match raw {
                Some(raw) if raw.wave.len() == expected => {
                    debug!("Captured trace on attempt {attempt}");
                    return Ok(Trace::from_raw(raw));
                }
                Some(raw) => warn!(
                    "Attempt {attempt}/{CAPTURE_ATTEMPTS}: got {} samples, expected {expected}",
                    raw.wave.len()
                ),
                None => warn!("Attempt {attempt}/{CAPTURE_ATTEMPTS}: device returned no trace"),
            }
        }

        Err(Error::CaptureExhausted {
            attempts: CAPTURE_ATTEMPTS,
        })
    }
}
