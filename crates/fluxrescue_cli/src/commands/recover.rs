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
use fluxrescue::{
    file_formats::img::{FillPolicy, RawImage},
    recovery::{self, RecoveryProfile},
    scan::{self, ScanConfig},
};

use crate::{args::RecoverParams, util};

pub fn run(params: &RecoverParams) -> Result<i32> {
    let geometry = util::resolve_geometry(&params.geometry)?;
    let mut drive = util::drive_from_scp(&params.in_file, geometry)?;

    // Populate the table with a standard scan, then work the bad set.
    let scan_result = scan::scan(&mut drive, geometry, &ScanConfig::default())?;
    let mut table = scan_result.table;

    let bad = table.bad_addresses();
    log::info!("recover: scan left {} bad sector(s)", bad.len());

    let mut profile = RecoveryProfile::for_level(params.level.0);
    profile.mode = params.mode.0;

    let report = recovery::recover(&mut drive, &mut table, profile, Some(bad))?;

    println!(
        "recover {}: {} pass(es), {} recovered, {} still bad{}",
        report.outcome.status,
        report.passes,
        report.recovered.len(),
        table.bad_count(),
        if report.converged { " (converged)" } else { "" }
    );
    if let Some(reason) = &report.outcome.reason {
        println!("reason: {}", reason);
    }

    let mut out = File::create(&params.out).with_context(|| format!("creating {}", params.out.display()))?;
    RawImage::save_image(&table, Some(FillPolicy::E5), &mut out)?;

    Ok(util::exit_code(&report.outcome))
}
