use crate::{ClockScale, ScopeOptions, TriggerMode};
use confique::Config;
use std::path::Path;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub scope: ScopeSettings,
    #[config(nested)]
    pub capture: CaptureSettings,
    #[config(nested)]
    pub export: ExportSettings,
    #[config(nested)]
    pub log: LogSettings,
    #[config(nested)]
    pub sim: SimSettings,
}

impl Conf {
    /// Loads `path` if it exists, otherwise every setting keeps its default.
    pub fn load(path: &Path) -> Result<Self, confique::Error> {
        Conf::builder().file(path).load()
    }
}

/// Scope settings applied after connecting. Unset fields keep the device
/// defaults.
#[derive(Config, Debug, Clone)]
pub struct ScopeSettings {
    pub samples: Option<usize>,
    pub trigger_mode: Option<TriggerMode>,
    pub offset: Option<i64>,
    pub pre_samples: Option<i64>,
    pub scale: Option<ClockScale>,
}

impl ScopeSettings {
    pub fn options(&self) -> ScopeOptions {
        ScopeOptions {
            samples: self.samples,
            trigger_mode: self.trigger_mode,
            offset: self.offset,
            pre_samples: self.pre_samples,
            scale: self.scale,
        }
    }
}

#[derive(Config, Debug, Clone)]
pub struct CaptureSettings {
    #[config(default = 5000)]
    pub timeout_ms: u64,
    pub seed: Option<u64>,
    #[config(default = 128)]
    pub key_bits: usize,
    #[config(default = 128)]
    pub text_bits: usize,
    /// Fixed key as hex. Unset keeps the connection default.
    pub key: Option<String>,
    #[config(default = false)]
    pub random_key: bool,
    /// Fixed plaintext as hex. Unset keeps random plaintexts.
    pub text: Option<String>,
}

#[derive(Config, Debug, Clone)]
pub struct ExportSettings {
    #[config(default = "./cw-export/")]
    pub dir: String,
    /// Deflate level for the trace matrix, 0 disables compression.
    #[config(default = 0)]
    pub compression_level: u8,
}

#[derive(Config, Debug, Clone)]
pub struct LogSettings {
    #[config(default = "info")]
    pub level: String,
    pub file: Option<String>,
}

#[derive(Config, Debug, Clone)]
pub struct SimSettings {
    #[config(default = true)]
    pub present: bool,
    #[config(default = "CW-Lite Simulator")]
    pub name: String,
    /// Peak uniform noise added to every sample.
    #[config(default = 0.02)]
    pub noise: f64,
    /// Waveform drop per set bit of a processed byte.
    #[config(default = 0.05)]
    pub leakage: f64,
    /// Chance that a capture comes back empty.
    #[config(default = 0.0)]
    pub dropout_rate: f64,
    #[config(default = 0)]
    pub latency_ms: u64,
    pub seed: Option<u64>,
}
