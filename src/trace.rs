use crate::{utils::to_hex_upper, RawCapture};
use std::fmt;

/// One validated capture. Only the capture engine builds these.
#[derive(Clone, Debug, PartialEq)]
pub struct Trace {
    key: Vec<u8>,
    textin: Vec<u8>,
    textout: Vec<u8>,
    wave: Vec<f64>,
}

impl Trace {
    pub(crate) fn from_raw(raw: RawCapture) -> Self {
        Self {
            key: raw.key,
            textin: raw.textin,
            textout: raw.textout,
            wave: raw.wave,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn textin(&self) -> &[u8] {
        &self.textin
    }

    pub fn textout(&self) -> &[u8] {
        &self.textout
    }

    pub fn wave(&self) -> &[f64] {
        &self.wave
    }

    pub fn samples(&self) -> usize {
        self.wave.len()
    }

    pub fn key_hex(&self) -> String {
        to_hex_upper(&self.key)
    }

    pub fn textin_hex(&self) -> String {
        to_hex_upper(&self.textin)
    }

    pub fn textout_hex(&self) -> String {
        to_hex_upper(&self.textout)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Trace samples: {} key: {} textin: {} textout: {}>",
            self.samples(),
            self.key_hex(),
            self.textin_hex(),
            self.textout_hex()
        )
    }
}
