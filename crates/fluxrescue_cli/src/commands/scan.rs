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
*/

use std::fs::File;

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use fluxrescue::{
    events::{CancelToken, EngineEvent},
    file_formats::img::{FillPolicy, RawImage},
    quality::DiskReport,
    scan::{ScanConfig, ScanOrchestrator},
};

use crate::{args::ScanParams, util};

pub fn run(params: &ScanParams) -> Result<i32> {
    let geometry = util::resolve_geometry(&params.geometry)?;
    let mut drive = util::drive_from_scp(&params.flux, geometry)?;

    let (tx, rx) = unbounded::<EngineEvent>();
    let sink = move |event: &EngineEvent| {
        let _ = tx.send(event.clone());
    };

    let config = ScanConfig {
        mode: params.mode.0,
        revolutions: None,
        encoding: None,
    };

    // The scan runs on its own thread; the sink feeds progress back over the channel, which
    // closes when the thread drops it.
    let handle = std::thread::spawn(move || {
        let mut orchestrator = ScanOrchestrator::new(&mut drive, &sink, CancelToken::new());
        orchestrator.run(geometry, &config)
    });

    for event in rx.iter() {
        if let EngineEvent::TrackCompleted { ch, good, bad, weak } = event {
            log::info!("{}: {} good, {} bad, {} weak", ch, good, bad, weak);
        }
    }

    let result = handle.join().expect("scan thread panicked")?;

    let report = DiskReport::build(&result.table, &result.track_scores);
    println!(
        "scan {}: {} good, {} bad, {} weak, disk score {}",
        result.outcome.status,
        result.table.good_count(),
        result.table.bad_count(),
        result.table.weak_count(),
        report.disk_score
    );
    if let Some(reason) = &result.outcome.reason {
        println!("reason: {}", reason);
    }

    let mut out = File::create(&params.out).with_context(|| format!("creating {}", params.out.display()))?;
    RawImage::save_image(&result.table, Some(FillPolicy::E5), &mut out)?;

    Ok(util::exit_code(&result.outcome))
}
