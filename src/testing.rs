//! Scripted device used by the unit tests.

use crate::{ClockScale, DeviceError, DeviceHandle, DeviceOpener, RawCapture, TriggerMode};
use log::{Level, Log, Metadata, Record};
use std::{
    cell::RefCell,
    collections::VecDeque,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Once,
    time::Duration,
};

/// What the next `capture` call should return. An empty script means `Valid`.
#[derive(Clone, Debug)]
pub enum Scripted {
    Valid,
    Missing,
    WrongLength(usize),
    Timeout,
}

#[derive(Debug)]
pub struct FakeState {
    pub alive: bool,
    pub closed: bool,
    /// Makes `close` report a communication failure.
    pub fail_close: bool,
    pub default_setups: usize,
    pub samples: usize,
    pub trigger_mode: TriggerMode,
    pub offset: u32,
    pub pre_samples: u32,
    pub clock_scale: ClockScale,
    pub trigger_count: u64,
    pub script: VecDeque<Scripted>,
    /// (plaintext, key) of every capture call.
    pub captures: Vec<(Vec<u8>, Vec<u8>)>,
    pub programmed: Vec<PathBuf>,
}

impl FakeState {
    fn new(samples: usize) -> Self {
        Self {
            alive: true,
            closed: false,
            fail_close: false,
            default_setups: 0,
            samples,
            trigger_mode: TriggerMode::RisingEdge,
            offset: 0,
            pre_samples: 0,
            clock_scale: ClockScale::ClkgenX4,
            trigger_count: 0,
            script: VecDeque::new(),
            captures: Vec::new(),
            programmed: Vec::new(),
        }
    }
}

pub struct FakeDevice {
    state: Rc<RefCell<FakeState>>,
}

impl FakeDevice {
    pub fn new(samples: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState::new(samples))),
        }
    }

    pub fn state(&self) -> Rc<RefCell<FakeState>> {
        Rc::clone(&self.state)
    }
}

/// Hands out devices that all share one [`FakeState`].
pub struct FakeOpener {
    pub state: Rc<RefCell<FakeState>>,
    pub fail: bool,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState::new(5000))),
            fail: false,
        }
    }
}

impl DeviceOpener for FakeOpener {
    fn open(&mut self) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        if self.fail {
            return Err(DeviceError::NotFound);
        }
        {
            let mut state = self.state.borrow_mut();
            state.alive = true;
            state.closed = false;
        }
        Ok(Box::new(FakeDevice {
            state: Rc::clone(&self.state),
        }))
    }
}

impl DeviceHandle for FakeDevice {
    fn is_alive(&self) -> bool {
        let state = self.state.borrow();
        state.alive && !state.closed
    }

    fn name(&self) -> String {
        "Fake CW".to_string()
    }

    fn apply_default_setup(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.default_setups += 1;
        state.samples = 5000;
        state.trigger_mode = TriggerMode::RisingEdge;
        state.offset = 0;
        state.pre_samples = 0;
        state.clock_scale = ClockScale::ClkgenX4;
        Ok(())
    }

    fn samples(&self) -> usize {
        self.state.borrow().samples
    }

    fn set_samples(&mut self, samples: usize) -> Result<(), DeviceError> {
        self.state.borrow_mut().samples = samples;
        Ok(())
    }

    fn trigger_mode(&self) -> TriggerMode {
        self.state.borrow().trigger_mode
    }

    fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<(), DeviceError> {
        self.state.borrow_mut().trigger_mode = mode;
        Ok(())
    }

    fn offset(&self) -> u32 {
        self.state.borrow().offset
    }

    fn set_offset(&mut self, offset: u32) -> Result<(), DeviceError> {
        self.state.borrow_mut().offset = offset;
        Ok(())
    }

    fn pre_samples(&self) -> u32 {
        self.state.borrow().pre_samples
    }

    fn set_pre_samples(&mut self, pre_samples: u32) -> Result<(), DeviceError> {
        self.state.borrow_mut().pre_samples = pre_samples;
        Ok(())
    }

    fn clock_scale(&self) -> ClockScale {
        self.state.borrow().clock_scale
    }

    fn set_clock_scale(&mut self, scale: ClockScale) -> Result<(), DeviceError> {
        self.state.borrow_mut().clock_scale = scale;
        Ok(())
    }

    fn trigger_count(&self) -> u64 {
        self.state.borrow().trigger_count
    }

    fn capture(
        &mut self,
        plaintext: &[u8],
        key: &[u8],
        timeout: Duration,
    ) -> Result<Option<RawCapture>, DeviceError> {
        let mut state = self.state.borrow_mut();
        state.captures.push((plaintext.to_vec(), key.to_vec()));
        state.trigger_count += 1;

        let samples = state.samples;
        let wave_len = match state.script.pop_front().unwrap_or(Scripted::Valid) {
            Scripted::Valid => samples,
            Scripted::WrongLength(len) => len,
            Scripted::Missing => return Ok(None),
            Scripted::Timeout => return Err(DeviceError::Timeout(timeout)),
        };

        let textout = plaintext.iter().zip(key).map(|(p, k)| p ^ k).collect();
        let wave = (0..wave_len).map(|i| i as f64).collect();
        Ok(Some(RawCapture {
            key: key.to_vec(),
            textin: plaintext.to_vec(),
            textout,
            wave,
        }))
    }

    fn program_firmware(&mut self, hex_file: &Path) -> Result<(), DeviceError> {
        self.state.borrow_mut().programmed.push(hex_file.to_path_buf());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        if state.fail_close {
            return Err(DeviceError::Comm("close rejected".into()));
        }
        Ok(())
    }
}

thread_local! {
    static LOGS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Collects records per thread so parallel tests only see their own output.
struct TestLogger;

impl Log for TestLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        LOGS.with(|logs| {
            logs.borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
    }

    fn flush(&self) {}
}

static LOGGER: TestLogger = TestLogger;
static INIT: Once = Once::new();

/// Returns and clears the records logged on this thread, installing the
/// collecting logger on first use.
pub fn take_logs() -> Vec<(Level, String)> {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    LOGS.with(|logs| logs.take())
}
