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

    src/events.rs

    Typed progress events and the EventSink capability the orchestrators
    report through, plus the cooperative cancellation token. The sink is a
    collaborator; the engine never reaches into a UI.
*/

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::types::{
    chs::{DiskCh, DiskChs},
    enums::{RecoveryMethod, SectorStatus},
};

/// Progress events emitted by scan and recovery jobs. Events within a scan are strictly
/// monotonic in (cylinder, head); recovery passes are numbered and strictly ordered.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    TrackStarted {
        ch: DiskCh,
    },
    SectorDecoded {
        chs: DiskChs,
        status: SectorStatus,
    },
    TrackCompleted {
        ch: DiskCh,
        good: usize,
        bad: usize,
        weak: usize,
    },
    PassStarted {
        pass: u32,
        outstanding: usize,
    },
    SectorRecovered {
        chs: DiskChs,
        method: RecoveryMethod,
    },
    PassCompleted {
        pass: u32,
        bad_remaining: usize,
    },
    Converged {
        pass: u32,
    },
    Plateaued {
        pass: u32,
    },
}

/// An event consumer supplied by the caller. Implementations must tolerate being called from
/// whichever thread drives the engine.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// A sink that drops everything, for callers that don't care.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_event(&self, _event: &EngineEvent) {}
}

impl<F> EventSink for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) {
        self(event)
    }
}

/// Cooperative cancellation. Orchestrators check the token at every track boundary and before
/// every hardware operation; an in-flight operation always completes, so cancellation never
/// leaves a half-written track.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
