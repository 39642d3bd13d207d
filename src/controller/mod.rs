/*
    fluxrescue
    https://github.com/dbalsom/fluxrescue

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/controller/mod.rs

    The abstract capability set the engine consumes from a flux-capable drive
    controller. The transport wire protocol lives outside the engine; any
    implementation satisfying this contract can drive a scan or recovery job.
*/

pub mod memory;

use std::time::Duration;

use crate::{flux::capture::FluxCapture, types::chs::DiskCh, ControllerError};

pub use memory::MemoryController;

pub const DEFAULT_MOTOR_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_SEEK_TIMEOUT: Duration = Duration::from_secs(2);
/// A flux read is bounded to this factor of the expected rotation time.
pub const READ_TIMEOUT_FACTOR: f64 = 1.5;

/// Static configuration for opening a controller handle.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Drive unit select, 0 or 1.
    pub drive: u8,
    /// Controller sampling clock.
    pub sample_hz: u32,
    pub motor_timeout: Duration,
    pub seek_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            drive: 0,
            sample_hz: crate::DEFAULT_SAMPLE_HZ,
            motor_timeout: DEFAULT_MOTOR_TIMEOUT,
            seek_timeout: DEFAULT_SEEK_TIMEOUT,
        }
    }
}

/// One physical drive behind a flux controller. The handle is a serial resource: callers hold
/// it exclusively and only one operation is ever in flight. Every method is a potential
/// long-running I/O suspension point.
pub trait FloppyController: Send {
    /// Move the heads and block until the position is confirmed. Fails with `SeekError` when
    /// the drive cannot confirm the track.
    fn seek(&mut self, ch: DiskCh) -> Result<(), ControllerError>;

    /// Start or stop the spindle, returning once rotation is at steady state (within ±1.5% of
    /// nominal RPM).
    fn set_motor(&mut self, on: bool) -> Result<(), ControllerError>;

    /// Capture flux at the current track. Implementations read one extra revolution and trim it
    /// to absorb index-timing slack.
    fn read_flux(&mut self, revolutions: u8) -> Result<FluxCapture, ControllerError>;

    /// Write exactly one revolution of flux at the current track.
    fn write_flux(&mut self, capture: &FluxCapture) -> Result<(), ControllerError>;

    /// DC-erase the current track: one full revolution of steady write current.
    fn erase_track(&mut self) -> Result<(), ControllerError>;

    /// Rotation rate from index-to-index timing.
    fn measure_rpm(&mut self) -> Result<f64, ControllerError>;

    /// Release the motor and the handle.
    fn close(&mut self);
}

/// Apply the retry policy from the error table: `SeekError` and `TransportTimeout` are retried
/// once, then surfaced. Everything else surfaces immediately.
pub fn retry_once<T>(mut op: impl FnMut() -> Result<T, ControllerError>) -> Result<T, ControllerError> {
    match op() {
        Err(e @ (ControllerError::SeekError | ControllerError::TransportTimeout)) => {
            log::warn!("retry_once(): retrying after {}", e);
            op()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_once_retries_seek_and_timeout() {
        let mut calls = 0;
        let result = retry_once(|| {
            calls += 1;
            if calls == 1 {
                Err(ControllerError::SeekError)
            }
            else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_once_does_not_retry_fatal_errors() {
        let mut calls = 0;
        let result: Result<(), _> = retry_once(|| {
            calls += 1;
            Err(ControllerError::TransportLost)
        });
        assert!(matches!(result, Err(ControllerError::TransportLost)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_once_surfaces_second_failure() {
        let mut calls = 0;
        let result: Result<(), _> = retry_once(|| {
            calls += 1;
            Err(ControllerError::TransportTimeout)
        });
        assert!(matches!(result, Err(ControllerError::TransportTimeout)));
        assert_eq!(calls, 2);
    }
}
