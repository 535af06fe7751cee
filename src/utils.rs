use crate::{ExportError, ValidationError};
use std::{
    path::{Path, MAIN_SEPARATOR},
    time::{Duration, Instant},
};
use time::OffsetDateTime;

/// Uppercase hex, the interchange format of exported keys and texts.
pub fn to_hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parses a hex string, ignoring whitespace anywhere in it.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, ValidationError> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits).map_err(|e| ValidationError::InvalidHex(format!("'{input}': {e}")))
}

/// `Y.M.D.h.m.s` in local time, fields not zero padded.
pub fn capture_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!(
        "{}.{}.{}.{}.{}.{}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Creates `dir` if needed and returns it with a trailing separator.
pub fn check_and_reformat_dir(dir: &str) -> Result<String, crate::Error> {
    let dir = dir.trim();
    if dir.is_empty() {
        return Err(ValidationError::Empty("export path").into());
    }
    let dir: String = dir
        .chars()
        .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
        .collect();

    let path = Path::new(&dir);
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(ExportError::Io)?;
    }
    if !path.is_dir() {
        return Err(ExportError::NotADirectory(path.to_path_buf()).into());
    }

    if dir.ends_with(MAIN_SEPARATOR) {
        Ok(dir)
    } else {
        Ok(format!("{dir}{MAIN_SEPARATOR}"))
    }
}

/// Tracks captured traces for a batch, with a rate over the last second.
#[derive(Debug)]
pub struct Counter {
    pub n_traces: usize,
    pub t_begin: Instant,
    window: Duration,
    recent: Vec<Instant>,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            n_traces: 0,
            t_begin: Instant::now(),
            window: Duration::from_secs(1),
            recent: Vec::new(),
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn increment(&mut self) {
        let now = Instant::now();
        self.n_traces += 1;
        self.recent.push(now);
        let window = self.window;
        self.recent.retain(|&ts| now.duration_since(ts) <= window);
    }

    /// Traces per second over the sliding window.
    pub fn rate(&self) -> f64 {
        self.recent.len() as f64 / self.window.as_secs_f64()
    }

    /// Traces per second since the counter started.
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        self.n_traces as f64 / secs
    }

    pub fn reset(&mut self) {
        self.n_traces = 0;
        self.t_begin = Instant::now();
        self.recent.clear();
    }
}
