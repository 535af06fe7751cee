use crate::{
    ClockScale, DeviceError, DeviceHandle, DeviceOpener, RawCapture, SimSettings, TriggerMode,
};
use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{path::Path, thread, time::Duration};

/// Samples between the trigger and the first leaking operation at x1.
const LEAK_START: usize = 40;
/// Samples per processed byte at x1.
const LEAK_STRIDE: usize = 12;

/// Opens [`SimDevice`]s.
pub struct SimOpener {
    settings: SimSettings,
}

impl SimOpener {
    pub fn new(settings: SimSettings) -> Self {
        Self { settings }
    }
}

impl SimSettings {
    /// Noise and leakage must be finite and non-negative, dropout a
    /// probability.
    pub fn validate(&self) -> Result<(), DeviceError> {
        for (field, value) in [("noise", self.noise), ("leakage", self.leakage)] {
            if !value.is_finite() || value < 0.0 {
                return Err(DeviceError::InvalidSettings(format!(
                    "sim.{field} must be a finite value >= 0, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.dropout_rate) {
            return Err(DeviceError::InvalidSettings(format!(
                "sim.dropout_rate must be within [0, 1], got {}",
                self.dropout_rate
            )));
        }
        Ok(())
    }
}

impl DeviceOpener for SimOpener {
    fn open(&mut self) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        if !self.settings.present {
            return Err(DeviceError::NotFound);
        }
        self.settings.validate()?;
        let rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        debug!("Opened simulated device '{}'", self.settings.name);
        Ok(Box::new(SimDevice {
            settings: self.settings.clone(),
            rng,
            open: true,
            samples: 0,
            trigger_mode: TriggerMode::RisingEdge,
            offset: 0,
            pre_samples: 0,
            clock_scale: ClockScale::ClkgenX4,
            trig_count: 0,
        }))
    }
}

/// Scope/target pair that synthesises power traces.
///
/// The target mixes key and plaintext with a toy byte function, and every
/// processed byte leaks its Hamming weight into the waveform on top of
/// uniform noise. Offset and pre-samples shift the leak positions; the x4
/// clock stretches them.
pub struct SimDevice {
    settings: SimSettings,
    rng: StdRng,
    open: bool,
    samples: usize,
    trigger_mode: TriggerMode,
    offset: u32,
    pre_samples: u32,
    clock_scale: ClockScale,
    trig_count: u64,
}

impl SimDevice {
    fn target_output(plaintext: &[u8], key: &[u8]) -> Vec<u8> {
        plaintext
            .iter()
            .zip(key.iter().cycle())
            .map(|(p, k)| (p ^ k).rotate_left(3).wrapping_add(0x5A))
            .collect()
    }

    fn synthesise(&mut self, intermediate: &[u8]) -> Vec<f64> {
        let stretch = match self.clock_scale {
            ClockScale::ClkgenX1 => 1,
            ClockScale::ClkgenX4 => 4,
        };
        let mut wave: Vec<f64> = (0..self.samples)
            .map(|i| {
                let clock = if (i / stretch) % 2 == 0 { 0.01 } else { -0.01 };
                clock + self.rng.random_range(-self.settings.noise..=self.settings.noise)
            })
            .collect();

        let shift = self.pre_samples as isize - self.offset as isize;
        for (n, byte) in intermediate.iter().enumerate() {
            let pos = ((LEAK_START + n * LEAK_STRIDE) * stretch) as isize + shift;
            if pos >= 0 && (pos as usize) < wave.len() {
                wave[pos as usize] -= self.settings.leakage * byte.count_ones() as f64;
            }
        }
        wave
    }
}

impl DeviceHandle for SimDevice {
    fn is_alive(&self) -> bool {
        self.open
    }

    fn name(&self) -> String {
        self.settings.name.clone()
    }

    fn apply_default_setup(&mut self) -> Result<(), DeviceError> {
        self.samples = 5000;
        self.trigger_mode = TriggerMode::RisingEdge;
        self.offset = 0;
        self.pre_samples = 0;
        self.clock_scale = ClockScale::ClkgenX4;
        Ok(())
    }

    fn samples(&self) -> usize {
        self.samples
    }

    fn set_samples(&mut self, samples: usize) -> Result<(), DeviceError> {
        self.samples = samples;
        Ok(())
    }

    fn trigger_mode(&self) -> TriggerMode {
        self.trigger_mode
    }

    fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<(), DeviceError> {
        self.trigger_mode = mode;
        Ok(())
    }

    fn offset(&self) -> u32 {
        self.offset
    }

    fn set_offset(&mut self, offset: u32) -> Result<(), DeviceError> {
        self.offset = offset;
        Ok(())
    }

    fn pre_samples(&self) -> u32 {
        self.pre_samples
    }

    fn set_pre_samples(&mut self, pre_samples: u32) -> Result<(), DeviceError> {
        self.pre_samples = pre_samples;
        Ok(())
    }

    fn clock_scale(&self) -> ClockScale {
        self.clock_scale
    }

    fn set_clock_scale(&mut self, scale: ClockScale) -> Result<(), DeviceError> {
        self.clock_scale = scale;
        Ok(())
    }

    fn trigger_count(&self) -> u64 {
        self.trig_count
    }

    fn capture(
        &mut self,
        plaintext: &[u8],
        key: &[u8],
        timeout: Duration,
    ) -> Result<Option<RawCapture>, DeviceError> {
        if !self.open {
            return Err(DeviceError::Comm("device is closed".into()));
        }
        let latency = Duration::from_millis(self.settings.latency_ms);
        if latency > timeout {
            thread::sleep(timeout);
            return Err(DeviceError::Timeout(timeout));
        }
        thread::sleep(latency);

        if self.rng.random_bool(self.settings.dropout_rate) {
            return Ok(None);
        }

        let intermediate: Vec<u8> = plaintext
            .iter()
            .zip(key.iter().cycle())
            .map(|(p, k)| p ^ k)
            .collect();
        let wave = self.synthesise(&intermediate);
        self.trig_count = match self.trigger_mode {
            TriggerMode::RisingEdge => intermediate.len() as u64 * 2,
            TriggerMode::FallingEdge => 0,
        };

        Ok(Some(RawCapture {
            key: key.to_vec(),
            textin: plaintext.to_vec(),
            textout: Self::target_output(plaintext, key),
            wave,
        }))
    }

    fn program_firmware(&mut self, hex_file: &Path) -> Result<(), DeviceError> {
        let contents = std::fs::read_to_string(hex_file)?;
        let records = contents.lines().filter(|l| !l.trim().is_empty()).count();
        if records == 0 || !contents.lines().all(|l| l.trim().is_empty() || l.starts_with(':')) {
            return Err(DeviceError::Comm(format!(
                "{} is not an Intel HEX file",
                hex_file.display()
            )));
        }
        info!("Simulated programming of {records} records");
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.open = false;
        Ok(())
    }
}
