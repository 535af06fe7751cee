use crate::{
    utils::parse_hex, BatchCapture, BatchResult, CaptureEngine, ClockScale, ConnectionError,
    DeviceHandle, DeviceOpener, Exporter, KeyTextPattern, LogProgress, Mode, Progress, Result,
    SessionStatus, Trace, TriggerMode, ValidationError, DEFAULT_KEY, MAX_SAMPLES,
};
use log::{info, warn};
use std::{fmt, path::Path, time::Duration};

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Partial scope update. `None` leaves the current setting alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeOptions {
    pub samples: Option<usize>,
    pub trigger_mode: Option<TriggerMode>,
    pub offset: Option<i64>,
    pub pre_samples: Option<i64>,
    pub scale: Option<ClockScale>,
}

impl ScopeOptions {
    pub fn is_empty(&self) -> bool {
        self == &ScopeOptions::default()
    }
}

/// Everything in [`ScopeOptions`] after validation.
struct ValidatedOptions {
    samples: Option<usize>,
    trigger_mode: Option<TriggerMode>,
    offset: Option<u32>,
    pre_samples: Option<u32>,
    scale: Option<ClockScale>,
}

/// Connection to one capture device and the state that goes with it.
///
/// The device traits carry no `Send` bound, so a session stays on the thread
/// that created it.
pub struct Session {
    opener: Box<dyn DeviceOpener>,
    handle: Option<Box<dyn DeviceHandle>>,
    ktp: Option<KeyTextPattern>,
    trig_cnt: Option<u64>,
    exporter: Exporter,
    capture_timeout: Duration,
    seed: Option<u64>,
}

impl Session {
    pub fn new(opener: Box<dyn DeviceOpener>) -> Self {
        Self {
            opener,
            handle: None,
            ktp: None,
            trig_cnt: None,
            exporter: Exporter::default(),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            seed: None,
        }
    }

    pub fn with_exporter(mut self, exporter: Exporter) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Seeds the random key/text stream created on the next `connect`.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_alive())
    }

    /// Opens the device, applies the default setup and loads the default
    /// pattern: fixed 128-bit key, random 128-bit text.
    pub fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(ConnectionError::AlreadyConnected.into());
        }

        let mut handle = self.opener.open()?;
        handle.apply_default_setup()?;
        handle.set_samples(MAX_SAMPLES)?;

        let mut ktp = match self.seed {
            Some(seed) => KeyTextPattern::with_seed(seed),
            None => KeyTextPattern::new(),
        };
        ktp.set_fixed_key(&DEFAULT_KEY)?;

        info!("{} Connected!", handle.name());
        info!("Default mode is '128-bit fixed key and 128-bit random textin'");
        self.handle = Some(handle);
        self.ktp = Some(ktp);
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        let mut handle = self.handle.take().ok_or(ConnectionError::NotConnected)?;
        handle.close()?;
        info!("{} disconnected", handle.name());
        Ok(())
    }

    /// Disconnects if needed and forgets the pattern and saved trigger count.
    pub fn reset(&mut self) -> Result<()> {
        let closed = if self.handle.is_some() {
            self.disconnect()
        } else {
            Ok(())
        };
        self.ktp = None;
        self.trig_cnt = None;
        closed
    }

    fn check_connection(&self) -> Result<&dyn DeviceHandle> {
        let handle = self
            .handle
            .as_deref()
            .ok_or(ConnectionError::NotConnected)?;
        if !handle.is_alive() {
            return Err(ConnectionError::LinkLost.into());
        }
        Ok(handle)
    }

    fn connected(&mut self) -> Result<(&mut dyn DeviceHandle, &mut KeyTextPattern)> {
        self.check_connection()?;
        let handle = self
            .handle
            .as_deref_mut()
            .ok_or(ConnectionError::NotConnected)?;
        let ktp = self.ktp.as_mut().ok_or(ConnectionError::NotConnected)?;
        Ok((handle, ktp))
    }

    fn pattern(&self) -> Result<&KeyTextPattern> {
        self.check_connection()?;
        Ok(self.ktp.as_ref().ok_or(ConnectionError::NotConnected)?)
    }

    pub fn status(&self) -> Result<SessionStatus> {
        let handle = self.check_connection()?;
        let ktp = self.pattern()?;
        let trigger_mode = handle.trigger_mode();

        Ok(SessionStatus {
            connected: handle.is_alive(),
            name: handle.name(),
            samples: handle.samples(),
            trigger_mode,
            offset: handle.offset(),
            pre_samples: handle.pre_samples(),
            scale: handle.clock_scale(),
            saved_trig_cnt: self.trig_cnt,
            last_trig_cnt: (trigger_mode == TriggerMode::RisingEdge)
                .then(|| handle.trigger_count()),
            key_length: ktp.key_len(),
            fixed_key: ktp.key_mode().is_fixed(),
            fixed_key_value: ktp.key_mode().fixed_hex(),
            textin_length: ktp.text_len(),
            fixed_textin: ktp.text_mode().is_fixed(),
            fixed_textin_value: ktp.text_mode().fixed_hex(),
        })
    }

    /// Applies every option in `options`, or none of them if any is invalid.
    pub fn configure(&mut self, options: &ScopeOptions) -> Result<()> {
        self.check_connection()?;
        let validated = validate_options(options)?;
        let (handle, _) = self.connected()?;

        if let Some(samples) = validated.samples {
            handle.set_samples(samples)?;
        }
        if let Some(mode) = validated.trigger_mode {
            handle.set_trigger_mode(mode)?;
        }
        if let Some(offset) = validated.offset {
            if offset != 0 {
                warn!("If the offset is not zero, you may not be able to capture it smoothly.");
            }
            handle.set_offset(offset)?;
        }
        if let Some(pre_samples) = validated.pre_samples {
            handle.set_pre_samples(pre_samples)?;
        }
        if let Some(scale) = validated.scale {
            handle.set_clock_scale(scale)?;
        }
        Ok(())
    }

    pub fn set_trigger_count_manually(&mut self, count: u64) {
        self.trig_cnt = Some(count);
    }

    pub fn saved_trigger_count(&self) -> Option<u64> {
        self.trig_cnt
    }

    pub fn set_fixed_key(&mut self, hex: &str) -> Result<()> {
        let (_, ktp) = self.connected()?;
        let key = parse_hex(hex)?;
        ktp.set_fixed_key(&key)?;
        Ok(())
    }

    pub fn set_random_key(&mut self) -> Result<()> {
        let (_, ktp) = self.connected()?;
        ktp.set_random_key();
        Ok(())
    }

    pub fn set_fixed_text(&mut self, hex: &str) -> Result<()> {
        let (_, ktp) = self.connected()?;
        let text = parse_hex(hex)?;
        ktp.set_fixed_text(&text)?;
        Ok(())
    }

    pub fn set_random_text(&mut self) -> Result<()> {
        let (_, ktp) = self.connected()?;
        ktp.set_random_text();
        Ok(())
    }

    pub fn key_mode(&self) -> Result<Mode> {
        Ok(self.pattern()?.key_mode().clone())
    }

    pub fn text_mode(&self) -> Result<Mode> {
        Ok(self.pattern()?.text_mode().clone())
    }

    pub fn set_key_length(&mut self, bits: usize) -> Result<()> {
        let (_, ktp) = self.connected()?;
        ktp.set_key_length(bits)?;
        Ok(())
    }

    pub fn set_text_length(&mut self, bits: usize) -> Result<()> {
        let (_, ktp) = self.connected()?;
        ktp.set_text_length(bits)?;
        Ok(())
    }

    /// Captures one trace with the next key/text pair. With
    /// `update_trigger_count` the hardware trigger count is saved afterwards.
    pub fn capture_single(&mut self, update_trigger_count: bool) -> Result<Trace> {
        let timeout = self.capture_timeout;
        let (handle, ktp) = self.connected()?;
        let pair = ktp.next_pair();
        let trace = CaptureEngine::new(&mut *handle, timeout).capture_once(&pair)?;
        let trig_cnt = handle.trigger_count();

        info!("key : {}", trace.key_hex());
        info!("in  : {}", trace.textin_hex());
        info!("out : {}", trace.textout_hex());

        if update_trigger_count {
            self.trig_cnt = Some(trig_cnt);
        }
        Ok(trace)
    }

    pub fn capture_batch(
        &mut self,
        quantity: usize,
        identifier: &str,
        poi: Option<(usize, usize)>,
    ) -> Result<BatchResult> {
        self.capture_batch_with_progress(quantity, identifier, poi, &mut LogProgress)
    }

    pub fn capture_batch_with_progress(
        &mut self,
        quantity: usize,
        identifier: &str,
        poi: Option<(usize, usize)>,
        progress: &mut dyn Progress,
    ) -> Result<BatchResult> {
        self.check_connection()?;
        let Session {
            handle,
            ktp,
            exporter,
            capture_timeout,
            ..
        } = self;
        let handle = handle.as_deref_mut().ok_or(ConnectionError::NotConnected)?;
        let ktp = ktp.as_mut().ok_or(ConnectionError::NotConnected)?;

        BatchCapture::new(handle, ktp, exporter, *capture_timeout).run(
            quantity, identifier, poi, progress,
        )
    }

    /// Flashes `hex_file` onto the target.
    pub fn program_firmware(&mut self, hex_file: &Path) -> Result<()> {
        let (handle, _) = self.connected()?;
        if !hex_file.exists() {
            return Err(ValidationError::MissingFile(hex_file.to_path_buf()).into());
        }
        handle.program_firmware(hex_file)?;
        info!("Programmed {}", hex_file.display());
        Ok(())
    }

    pub fn export_dir(&self) -> &str {
        self.exporter.export_dir()
    }

    pub fn change_export_path(&mut self, export_dir: &str) -> Result<()> {
        self.exporter.change_export_path(export_dir)
    }
}

fn validate_options(options: &ScopeOptions) -> Result<ValidatedOptions, ValidationError> {
    if let Some(samples) = options.samples {
        if samples > MAX_SAMPLES {
            return Err(ValidationError::OutOfRange {
                field: "samples",
                min: 0,
                max: MAX_SAMPLES as i64,
                value: samples as i64,
            });
        }
    }

    Ok(ValidatedOptions {
        samples: options.samples,
        trigger_mode: options.trigger_mode,
        offset: options.offset.map(|v| non_negative("offset", v)).transpose()?,
        pre_samples: options
            .pre_samples
            .map(|v| non_negative("pre_samples", v))
            .transpose()?,
        scale: options.scale,
    })
}

fn non_negative(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| ValidationError::OutOfRange {
        field,
        min: 0,
        max: u32::MAX as i64,
        value,
    })
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Ok(status) if status.connected => write!(
                f,
                "<CW Conn: true ({}) samples: {} last_trig_cnt: {}>",
                status.name,
                status.samples,
                status.last_trig_cnt_str()
            ),
            _ => write!(f, "<CW Conn: false>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeOpener, FakeState};
    use crate::{DeviceError, Error};
    use std::{cell::RefCell, rc::Rc};

    fn connected() -> (Session, Rc<RefCell<FakeState>>) {
        let opener = FakeOpener::new();
        let state = Rc::clone(&opener.state);
        let mut session = Session::new(Box::new(opener)).with_seed(Some(7));
        session.connect().unwrap();
        (session, state)
    }

    fn is_not_connected(err: Error) -> bool {
        matches!(err, Error::Connection(ConnectionError::NotConnected))
    }

    #[test]
    fn connect_applies_defaults() {
        let (session, state) = connected();
        assert_eq!(state.borrow().default_setups, 1);

        let status = session.status().unwrap();
        assert!(status.connected);
        assert_eq!(status.samples, MAX_SAMPLES);
        assert_eq!(status.key_length, 16);
        assert!(status.fixed_key);
        assert_eq!(
            status.fixed_key_value.as_deref(),
            Some("00112233445566778899AABBCCDDEEFF")
        );
        assert_eq!(status.textin_length, 16);
        assert!(!status.fixed_textin);
        assert_eq!(status.fixed_textin_value, None);
        assert_eq!(status.saved_trig_cnt, None);
    }

    #[test]
    fn second_connect_is_refused() {
        let (mut session, state) = connected();
        assert!(matches!(
            session.connect(),
            Err(Error::Connection(ConnectionError::AlreadyConnected))
        ));
        assert_eq!(state.borrow().default_setups, 1);
    }

    #[test]
    fn open_failure_leaves_session_disconnected() {
        let mut opener = FakeOpener::new();
        opener.fail = true;
        let mut session = Session::new(Box::new(opener));
        assert!(matches!(
            session.connect(),
            Err(Error::Connection(ConnectionError::Device(DeviceError::NotFound)))
        ));
        assert!(!session.is_connected());
    }

    #[test]
    fn operations_require_connection() {
        let mut session = Session::new(Box::new(FakeOpener::new()));
        assert!(is_not_connected(session.status().unwrap_err()));
        assert!(is_not_connected(session.disconnect().unwrap_err()));
        assert!(is_not_connected(
            session.configure(&ScopeOptions::default()).unwrap_err()
        ));
        assert!(is_not_connected(session.set_random_key().unwrap_err()));
        assert!(is_not_connected(session.capture_single(false).unwrap_err()));
        assert_eq!(session.to_string(), "<CW Conn: false>");

        session.set_trigger_count_manually(12);
        assert_eq!(session.saved_trigger_count(), Some(12));
    }

    #[test]
    fn dead_link_fails_status() {
        let (session, state) = connected();
        state.borrow_mut().alive = false;
        assert!(matches!(
            session.status(),
            Err(Error::Connection(ConnectionError::LinkLost))
        ));
    }

    #[test]
    fn configure_applies_all_options() {
        let (mut session, state) = connected();
        session
            .configure(&ScopeOptions {
                samples: Some(5000),
                trigger_mode: Some(TriggerMode::FallingEdge),
                offset: Some(300),
                pre_samples: Some(10),
                scale: Some(ClockScale::ClkgenX1),
            })
            .unwrap();

        let status = session.status().unwrap();
        assert_eq!(status.samples, 5000);
        assert_eq!(status.trigger_mode, TriggerMode::FallingEdge);
        assert_eq!(status.offset, 300);
        assert_eq!(status.pre_samples, 10);
        assert_eq!(status.scale, ClockScale::ClkgenX1);
        assert_eq!(status.last_trig_cnt, None);
        assert_eq!(state.borrow().offset, 300);
    }

    #[test]
    fn configure_is_all_or_nothing() {
        let (mut session, _) = connected();
        let before = session.status().unwrap();

        let err = session
            .configure(&ScopeOptions {
                samples: Some(30000),
                trigger_mode: Some(TriggerMode::FallingEdge),
                offset: Some(10),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::OutOfRange { field: "samples", .. })
        ));

        let err = session
            .configure(&ScopeOptions {
                samples: Some(100),
                trigger_mode: Some(TriggerMode::FallingEdge),
                pre_samples: Some(-1),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::OutOfRange { field: "pre_samples", .. })
        ));

        assert_eq!(session.status().unwrap(), before);
    }

    #[test]
    fn fixed_key_accepts_spaced_hex() {
        let (mut session, _) = connected();
        session
            .set_fixed_key(" fc2a9773 34d94a80 22883ded 4d89846e ")
            .unwrap();
        assert_eq!(
            session.key_mode().unwrap().fixed_hex().as_deref(),
            Some("FC2A977334D94A8022883DED4D89846E")
        );

        assert!(matches!(
            session.set_fixed_key("0011"),
            Err(Error::Validation(ValidationError::LengthMismatch { .. }))
        ));
        assert!(matches!(
            session.set_fixed_text("XY"),
            Err(Error::Validation(ValidationError::InvalidHex(_)))
        ));
        assert_eq!(
            session.key_mode().unwrap().fixed_hex().as_deref(),
            Some("FC2A977334D94A8022883DED4D89846E")
        );
        assert_eq!(session.text_mode().unwrap(), Mode::Random);
    }

    #[test]
    fn single_capture_saves_trigger_count_on_request() {
        let (mut session, _) = connected();
        let trace = session.capture_single(false).unwrap();
        assert_eq!(trace.samples(), MAX_SAMPLES);
        assert_eq!(trace.key(), &DEFAULT_KEY);
        assert_eq!(session.saved_trigger_count(), None);

        session.capture_single(true).unwrap();
        assert_eq!(session.saved_trigger_count(), Some(2));
        let status = session.status().unwrap();
        assert_eq!(status.saved_trig_cnt_str(), "2");
        assert_eq!(status.last_trig_cnt, Some(2));
    }

    #[test]
    fn key_length_change_reaches_captures() {
        let (mut session, _) = connected();
        session.set_key_length(256).unwrap();
        session.set_text_length(64).unwrap();
        let trace = session.capture_single(false).unwrap();
        assert_eq!(trace.key().len(), 32);
        assert_eq!(trace.textin().len(), 8);
        assert!(session.set_key_length(12).is_err());
    }

    #[test]
    fn reset_clears_everything() {
        let (mut session, state) = connected();
        session.set_trigger_count_manually(99);
        session.reset().unwrap();

        assert!(state.borrow().closed);
        assert_eq!(session.saved_trigger_count(), None);
        assert!(is_not_connected(session.status().unwrap_err()));
        assert!(is_not_connected(session.key_mode().unwrap_err()));

        // A reset session can reconnect and gets the defaults back.
        session.connect().unwrap();
        assert!(session.status().unwrap().fixed_key);
        session.reset().unwrap();
        session.reset().unwrap();
    }

    #[test]
    fn reset_clears_state_when_close_fails() {
        let (mut session, state) = connected();
        session.set_trigger_count_manually(99);
        state.borrow_mut().fail_close = true;

        assert!(matches!(
            session.reset(),
            Err(Error::Connection(ConnectionError::Device(DeviceError::Comm(_))))
        ));
        assert_eq!(session.saved_trigger_count(), None);
        assert!(!session.is_connected());
        assert!(is_not_connected(session.key_mode().unwrap_err()));
        session.reset().unwrap();
    }

    #[test]
    fn non_zero_offset_logs_warning() {
        let (mut session, _) = connected();
        testing::take_logs();

        session
            .configure(&ScopeOptions {
                offset: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert!(!testing::take_logs()
            .iter()
            .any(|(level, _)| *level == log::Level::Warn));

        session
            .configure(&ScopeOptions {
                offset: Some(300),
                ..Default::default()
            })
            .unwrap();
        let logs = testing::take_logs();
        assert!(logs
            .iter()
            .any(|(level, msg)| *level == log::Level::Warn && msg.contains("offset is not zero")));
    }

    #[test]
    fn disconnect_then_reconnect() {
        let (mut session, state) = connected();
        session.disconnect().unwrap();
        assert!(state.borrow().closed);
        assert!(!session.is_connected());
        session.connect().unwrap();
        assert!(session.is_connected());
    }

    #[test]
    fn program_firmware_checks_file() {
        let (mut session, state) = connected();
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.hex");
        assert!(matches!(
            session.program_firmware(&missing),
            Err(Error::Validation(ValidationError::MissingFile(_)))
        ));

        let hex = tmp.path().join("simpleserial-aes-CW303.hex");
        std::fs::write(&hex, ":00000001FF\n").unwrap();
        session.program_firmware(&hex).unwrap();
        assert_eq!(state.borrow().programmed, vec![hex]);
    }

    #[test]
    fn display_summarises_connection() {
        let (session, _) = connected();
        assert_eq!(
            session.to_string(),
            "<CW Conn: true (Fake CW) samples: 24400 last_trig_cnt: 0>"
        );
    }
}
