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

use std::{path::PathBuf, str::FromStr};

use bpaf::{construct, long, OptionParser, Parser};
use fluxrescue::{
    recovery::RecoveryMode,
    types::enums::{RecoveryLevel, ScanMode, TrackEncoding},
};

#[derive(Copy, Clone, Debug)]
pub struct ScanModeArg(pub ScanMode);

impl FromStr for ScanModeArg {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "quick" => Ok(ScanModeArg(ScanMode::Quick)),
            "standard" => Ok(ScanModeArg(ScanMode::Standard)),
            "thorough" => Ok(ScanModeArg(ScanMode::Thorough)),
            "forensic" => Ok(ScanModeArg(ScanMode::Forensic)),
            _ => Err("expected 'quick', 'standard', 'thorough' or 'forensic'"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct LevelArg(pub RecoveryLevel);

impl FromStr for LevelArg {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "standard" => Ok(LevelArg(RecoveryLevel::Standard)),
            "aggressive" => Ok(LevelArg(RecoveryLevel::Aggressive)),
            "forensic" => Ok(LevelArg(RecoveryLevel::Forensic)),
            _ => Err("expected 'standard', 'aggressive' or 'forensic'"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct RecoveryModeArg(pub RecoveryMode);

impl FromStr for RecoveryModeArg {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let lower = input.to_lowercase();
        if lower == "convergence" {
            return Ok(RecoveryModeArg(RecoveryMode::default()));
        }
        if let Some(n) = lower.strip_prefix("fixed:") {
            let n: u32 = n.parse().map_err(|_| "expected 'fixed:N' with numeric N")?;
            return Ok(RecoveryModeArg(RecoveryMode::Fixed(n)));
        }
        Err("expected 'convergence' or 'fixed:N'")
    }
}

#[derive(Copy, Clone, Debug)]
pub struct EncodingArg(pub TrackEncoding);

impl FromStr for EncodingArg {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "mfm" => Ok(EncodingArg(TrackEncoding::Mfm)),
            "fm" => Ok(EncodingArg(TrackEncoding::Fm)),
            "amiga" => Ok(EncodingArg(TrackEncoding::AmigaMfm)),
            _ => Err("expected 'mfm', 'fm' or 'amiga'"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanParams {
    pub mode: ScanModeArg,
    pub geometry: String,
    pub flux: PathBuf,
    pub out: PathBuf,
}

#[derive(Clone, Debug)]
pub struct RecoverParams {
    pub in_file: PathBuf,
    pub geometry: String,
    pub level: LevelArg,
    pub mode: RecoveryModeArg,
    pub out: PathBuf,
}

#[derive(Clone, Debug)]
pub struct EncodeParams {
    pub in_file: PathBuf,
    pub out: PathBuf,
    pub revolutions: u8,
}

#[derive(Clone, Debug)]
pub struct DecodeParams {
    pub in_file: PathBuf,
    pub out: PathBuf,
    pub geometry: String,
    pub encoding: Option<EncodingArg>,
}

#[derive(Clone, Debug)]
pub struct AnalyzeParams {
    pub in_file: PathBuf,
    pub out: PathBuf,
}

#[derive(Clone, Debug)]
pub enum Command {
    Scan(ScanParams),
    Recover(RecoverParams),
    Encode(EncodeParams),
    Decode(DecodeParams),
    Analyze(AnalyzeParams),
}

fn geometry_parser() -> impl Parser<String> {
    long("geometry")
        .help("Geometry preset (pc360k, pc720k, pc1200k, pc1440k, amiga880k, bbc200k)")
        .argument::<String>("PRESET")
        .fallback("pc1440k".to_string())
}

fn out_parser() -> impl Parser<PathBuf> {
    long("out").help("Output file").argument::<PathBuf>("FILE")
}

fn in_parser() -> impl Parser<PathBuf> {
    long("in").help("Input file").argument::<PathBuf>("FILE")
}

fn scan_parser() -> impl Parser<ScanParams> {
    let mode = long("mode")
        .help("Scan mode: quick, standard, thorough or forensic")
        .argument::<ScanModeArg>("MODE")
        .fallback(ScanModeArg(ScanMode::Standard));
    let geometry = geometry_parser();
    let flux = long("flux")
        .help("SCP flux image standing in for the drive")
        .argument::<PathBuf>("FILE");
    let out = out_parser();
    construct!(ScanParams {
        mode,
        geometry,
        flux,
        out
    })
}

fn recover_parser() -> impl Parser<RecoverParams> {
    let in_file = in_parser();
    let geometry = geometry_parser();
    let level = long("level")
        .help("Recovery level: standard, aggressive or forensic")
        .argument::<LevelArg>("LEVEL")
        .fallback(LevelArg(RecoveryLevel::Standard));
    let mode = long("mode")
        .help("Pass policy: convergence or fixed:N")
        .argument::<RecoveryModeArg>("MODE")
        .fallback(RecoveryModeArg(RecoveryMode::default()));
    let out = out_parser();
    construct!(RecoverParams {
        in_file,
        geometry,
        level,
        mode,
        out
    })
}

fn encode_parser() -> impl Parser<EncodeParams> {
    let in_file = in_parser();
    let out = out_parser();
    let revolutions = long("revolutions")
        .help("Revolutions per track in flux output")
        .argument::<u8>("N")
        .fallback(1);
    construct!(EncodeParams {
        in_file,
        out,
        revolutions
    })
}

fn decode_parser() -> impl Parser<DecodeParams> {
    let in_file = in_parser();
    let out = out_parser();
    let geometry = geometry_parser();
    let encoding = long("encoding")
        .help("Force the track encoding: mfm, fm or amiga")
        .argument::<EncodingArg>("ENC")
        .optional();
    construct!(DecodeParams {
        in_file,
        out,
        geometry,
        encoding
    })
}

fn analyze_parser() -> impl Parser<AnalyzeParams> {
    let in_file = in_parser();
    let out = out_parser();
    construct!(AnalyzeParams { in_file, out })
}

pub fn command_parser() -> OptionParser<Command> {
    let scan = construct!(Command::Scan(scan_parser()))
        .to_options()
        .descr("Read a full disk into a sector image")
        .command("scan");
    let recover = construct!(Command::Recover(recover_parser()))
        .to_options()
        .descr("Recover bad sectors with iterative multi-strategy passes")
        .command("recover");
    let encode = construct!(Command::Encode(encode_parser()))
        .to_options()
        .descr("Encode a sector image into a flux or bitstream image")
        .command("encode");
    let decode = construct!(Command::Decode(decode_parser()))
        .to_options()
        .descr("Decode a flux or bitstream image into a sector image")
        .command("decode");
    let analyze = construct!(Command::Analyze(analyze_parser()))
        .to_options()
        .descr("Analyze flux timing and write a JSON report")
        .command("analyze");

    construct!([scan, recover, encode, decode, analyze])
        .to_options()
        .descr("fluxrescue - flux-level floppy disk reading, analysis and recovery")
}
