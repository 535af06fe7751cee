//! Capture control for side-channel power analysis.
//!
//! A [`Session`] owns the connection to a scope/target pair, the scope
//! configuration and the [`KeyTextPattern`] deciding which key and plaintext
//! feed each capture. Single traces go through the [`CaptureEngine`] with a
//! bounded retry; [`BatchCapture`] runs many of them, crops each waveform to a
//! point-of-interest window and exports the results as HDF5 files.
//!
//! Hardware is reached only through the [`DeviceOpener`] and [`DeviceHandle`]
//! traits. [`sim::SimOpener`] provides a synthetic device.

mod batch;
mod capture;
mod config;
mod device;
mod error;
mod pattern;
mod session;
pub mod sim;
mod status;
mod trace;
pub mod utils;
mod writer;

#[cfg(test)]
mod testing;

pub use batch::*;
pub use capture::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use pattern::*;
pub use session::*;
pub use status::*;
pub use trace::*;
pub use utils::Counter;
pub use writer::*;
