use crate::{ClockScale, TriggerMode};
use log::info;
use std::fmt;

pub const UNKNOWN: &str = "unknown";

/// Snapshot of the session returned by `Session::status`.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub connected: bool,
    pub name: String,
    pub samples: usize,
    pub trigger_mode: TriggerMode,
    pub offset: u32,
    pub pre_samples: u32,
    pub scale: ClockScale,
    /// Count stored by the user or by a single capture, if any.
    pub saved_trig_cnt: Option<u64>,
    /// Hardware count from the last capture. Only read in rising edge mode.
    pub last_trig_cnt: Option<u64>,
    pub key_length: usize,
    pub fixed_key: bool,
    pub fixed_key_value: Option<String>,
    pub textin_length: usize,
    pub fixed_textin: bool,
    pub fixed_textin_value: Option<String>,
}

impl SessionStatus {
    pub fn saved_trig_cnt_str(&self) -> String {
        count_or_unknown(self.saved_trig_cnt)
    }

    pub fn last_trig_cnt_str(&self) -> String {
        count_or_unknown(self.last_trig_cnt)
    }

    /// Writes every field to the log at info level.
    pub fn log(&self) {
        let fields: [(&str, String); 15] = [
            ("connected", self.connected.to_string()),
            ("name", self.name.clone()),
            ("samples", self.samples.to_string()),
            ("trig_mode", self.trigger_mode.to_string()),
            ("offset", self.offset.to_string()),
            ("pre_samples", self.pre_samples.to_string()),
            ("scale", self.scale.to_string()),
            ("saved_trig_cnt", self.saved_trig_cnt_str()),
            ("last_trig_cnt", self.last_trig_cnt_str()),
            ("key_length", self.key_length.to_string()),
            ("fixed_key", self.fixed_key.to_string()),
            ("fixed_key_value", optional(&self.fixed_key_value)),
            ("textin_length", self.textin_length.to_string()),
            ("fixed_textin", self.fixed_textin.to_string()),
            ("fixed_textin_value", optional(&self.fixed_textin_value)),
        ];

        let mut status_log = String::new();
        for (name, value) in fields {
            status_log.push_str(&format!("{}: {}\n", name, value));
        }
        if status_log.ends_with('\n') {
            status_log.pop();
        }
        info!("Session status:\n{}", status_log);
    }
}

fn count_or_unknown(count: Option<u64>) -> String {
    count.map_or_else(|| UNKNOWN.to_string(), |c| c.to_string())
}

fn optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "none".to_string())
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-------------------------------- INFO --------------------------------")?;
        writeln!(f, "Connected    : {}", self.connected)?;
        writeln!(f, "Name         : {}", self.name)?;
        writeln!(f, "samples      : {}", self.samples)?;
        writeln!(f, "trig_mode    : {}", self.trigger_mode)?;
        writeln!(f, "offset       : {}", self.offset)?;
        writeln!(f, "PreSamples   : {}", self.pre_samples)?;
        writeln!(f, "Scale        : {}", self.scale)?;
        writeln!(f, "SavedTrigCnt : {}", self.saved_trig_cnt_str())?;
        writeln!(f, "LastTrigCnt  : {}", self.last_trig_cnt_str())?;
        writeln!(f, "Key length   : {}", self.key_length)?;
        match &self.fixed_key_value {
            Some(value) => writeln!(f, "Fixed Key    : {} : {}", self.fixed_key, value)?,
            None => writeln!(f, "Fixed Key    : {}", self.fixed_key)?,
        }
        writeln!(f, "Textin_length: {}", self.textin_length)?;
        match &self.fixed_textin_value {
            Some(value) => writeln!(f, "Fixed text   : {} : {}", self.fixed_textin, value)?,
            None => writeln!(f, "Fixed text   : {}", self.fixed_textin)?,
        }
        write!(f, "----------------------------------------------------------------------")
    }
}
