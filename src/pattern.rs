use crate::{utils::to_hex_upper, ValidationError};
use log::{debug, warn};
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// Key loaded on every fresh connection (AES-128 test vector key).
pub const DEFAULT_KEY: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
];

/// Default key and text length in bytes.
pub const DEFAULT_LEN: usize = 16;

/// Whether a field repeats one value or is redrawn for each capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Fixed(Vec<u8>),
    Random,
}

impl Mode {
    pub fn is_fixed(&self) -> bool {
        matches!(self, Mode::Fixed(_))
    }

    pub fn fixed_value(&self) -> Option<&[u8]> {
        match self {
            Mode::Fixed(value) => Some(value),
            Mode::Random => None,
        }
    }

    pub fn fixed_hex(&self) -> Option<String> {
        self.fixed_value().map(to_hex_upper)
    }
}

/// One key/plaintext pair to feed the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyTextPair {
    pub key: Vec<u8>,
    pub text: Vec<u8>,
}

/// Decides which key and plaintext go into each capture.
#[derive(Debug)]
pub struct KeyTextPattern {
    key_len: usize,
    key_mode: Mode,
    text_len: usize,
    text_mode: Mode,
    rng: StdRng,
}

impl Default for KeyTextPattern {
    fn default() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }
}

impl KeyTextPattern {
    /// 128-bit random key and 128-bit random text.
    pub fn new() -> Self {
        Default::default()
    }

    /// Same as [`KeyTextPattern::new`] but with a reproducible random stream.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            key_len: DEFAULT_LEN,
            key_mode: Mode::Random,
            text_len: DEFAULT_LEN,
            text_mode: Mode::Random,
            rng,
        }
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn text_len(&self) -> usize {
        self.text_len
    }

    pub fn key_mode(&self) -> &Mode {
        &self.key_mode
    }

    pub fn text_mode(&self) -> &Mode {
        &self.text_mode
    }

    pub fn set_fixed_key(&mut self, key: &[u8]) -> Result<(), ValidationError> {
        check_len("key", self.key_len, key)?;
        self.key_mode = Mode::Fixed(key.to_vec());
        Ok(())
    }

    pub fn set_random_key(&mut self) {
        self.key_mode = Mode::Random;
    }

    pub fn set_fixed_text(&mut self, text: &[u8]) -> Result<(), ValidationError> {
        check_len("textin", self.text_len, text)?;
        self.text_mode = Mode::Fixed(text.to_vec());
        Ok(())
    }

    pub fn set_random_text(&mut self) {
        self.text_mode = Mode::Random;
    }

    /// A fixed key of the old length no longer fits and falls back to random.
    pub fn set_key_length(&mut self, bits: usize) -> Result<(), ValidationError> {
        let len = bytes_from_bits("key", bits)?;
        if len != self.key_len {
            debug!("Key length {} -> {} bytes", self.key_len, len);
            self.key_len = len;
            if self.key_mode.is_fixed() {
                warn!("Fixed key no longer matches {bits}-bit length, switching to random key");
                self.key_mode = Mode::Random;
            }
        }
        Ok(())
    }

    /// A fixed text of the old length no longer fits and falls back to random.
    pub fn set_text_length(&mut self, bits: usize) -> Result<(), ValidationError> {
        let len = bytes_from_bits("textin", bits)?;
        if len != self.text_len {
            debug!("Textin length {} -> {} bytes", self.text_len, len);
            self.text_len = len;
            if self.text_mode.is_fixed() {
                warn!("Fixed textin no longer matches {bits}-bit length, switching to random textin");
                self.text_mode = Mode::Random;
            }
        }
        Ok(())
    }

    pub fn next_pair(&mut self) -> KeyTextPair {
        let key = self.draw(true);
        let text = self.draw(false);
        KeyTextPair { key, text }
    }

    fn draw(&mut self, key: bool) -> Vec<u8> {
        let (mode, len) = if key {
            (&self.key_mode, self.key_len)
        } else {
            (&self.text_mode, self.text_len)
        };
        match mode {
            Mode::Fixed(value) => value.clone(),
            Mode::Random => {
                let mut value = vec![0u8; len];
                self.rng.fill_bytes(&mut value);
                value
            }
        }
    }
}

fn check_len(field: &'static str, expected: usize, value: &[u8]) -> Result<(), ValidationError> {
    if value.len() != expected {
        return Err(ValidationError::LengthMismatch {
            field,
            expected,
            actual: value.len(),
        });
    }
    Ok(())
}

fn bytes_from_bits(field: &'static str, bits: usize) -> Result<usize, ValidationError> {
    if bits % 8 != 0 {
        return Err(ValidationError::BitLength { field, bits });
    }
    Ok(bits / 8)
}
