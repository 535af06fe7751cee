use crate::{DeviceError, ValidationError};
use serde::Deserialize;
use std::{fmt, path::Path, str::FromStr, time::Duration};

/// Largest record the capture ADC can hold.
pub const MAX_SAMPLES: usize = 24400;

/// Acquisition trigger edge.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    RisingEdge,
    FallingEdge,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::RisingEdge => "rising_edge",
            TriggerMode::FallingEdge => "falling_edge",
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rising_edge" => Ok(TriggerMode::RisingEdge),
            "falling_edge" => Ok(TriggerMode::FallingEdge),
            _ => Err(ValidationError::UnknownVariant {
                field: "trigger mode",
                value: s.to_string(),
                available: "rising_edge, falling_edge",
            }),
        }
    }
}

/// ADC clock source relative to the target clock.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockScale {
    ClkgenX1,
    ClkgenX4,
}

impl ClockScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockScale::ClkgenX1 => "clkgen_x1",
            ClockScale::ClkgenX4 => "clkgen_x4",
        }
    }
}

impl fmt::Display for ClockScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockScale {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clkgen_x1" => Ok(ClockScale::ClkgenX1),
            "clkgen_x4" => Ok(ClockScale::ClkgenX4),
            _ => Err(ValidationError::UnknownVariant {
                field: "scale mode",
                value: s.to_string(),
                available: "clkgen_x1, clkgen_x4",
            }),
        }
    }
}

/// A capture as handed back by the driver, before validation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawCapture {
    pub key: Vec<u8>,
    pub textin: Vec<u8>,
    pub textout: Vec<u8>,
    pub wave: Vec<f64>,
}

/// Opens a connection to a scope/target pair.
pub trait DeviceOpener {
    fn open(&mut self) -> Result<Box<dyn DeviceHandle>, DeviceError>;
}

/// An open scope/target pair.
///
/// Every call blocks until the device answers. `capture` must give up after
/// `timeout` and report [`DeviceError::Timeout`].
pub trait DeviceHandle {
    fn is_alive(&self) -> bool;
    fn name(&self) -> String;

    /// Clock, ADC gain and trigger defaults for the target board.
    fn apply_default_setup(&mut self) -> Result<(), DeviceError>;

    fn samples(&self) -> usize;
    fn set_samples(&mut self, samples: usize) -> Result<(), DeviceError>;
    fn trigger_mode(&self) -> TriggerMode;
    fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<(), DeviceError>;
    fn offset(&self) -> u32;
    fn set_offset(&mut self, offset: u32) -> Result<(), DeviceError>;
    fn pre_samples(&self) -> u32;
    fn set_pre_samples(&mut self, pre_samples: u32) -> Result<(), DeviceError>;
    fn clock_scale(&self) -> ClockScale;
    fn set_clock_scale(&mut self, scale: ClockScale) -> Result<(), DeviceError>;

    /// Edge count observed during the last capture window.
    fn trigger_count(&self) -> u64;

    /// Sends `plaintext` and `key` to the target and records one trace.
    /// `Ok(None)` means the device returned no usable capture.
    fn capture(
        &mut self,
        plaintext: &[u8],
        key: &[u8],
        timeout: Duration,
    ) -> Result<Option<RawCapture>, DeviceError>;

    fn program_firmware(&mut self, hex_file: &Path) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}
