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

    src/codec/gcr.rs

    GCR is supported for encoding detection only. The detection itself lives
    in the flux analyzer (four or more timing peaks in a narrow band); this
    codec exists so dispatch is total over the encoding enum.
*/

use bit_vec::BitVec;

use crate::{
    bitstream::BitStream,
    codec::{DecodedTrack, TrackCodec, TrackSectorData},
    types::{chs::DiskCh, enums::TrackEncoding, geometry::DiskGeometry},
    CodecError,
};

pub struct GcrCodec;

impl TrackCodec for GcrCodec {
    fn encoding(&self) -> TrackEncoding {
        TrackEncoding::Gcr
    }

    fn decode_track(
        &self,
        _stream: &BitStream,
        _geometry: &DiskGeometry,
        ch: DiskCh,
    ) -> Result<DecodedTrack, CodecError> {
        log::debug!("GcrCodec::decode_track(): {} GCR decoding is not supported", ch);
        Err(CodecError::UnsupportedEncoding)
    }

    fn encode_track(
        &self,
        _sectors: &[TrackSectorData],
        _geometry: &DiskGeometry,
        ch: DiskCh,
    ) -> Result<BitVec, CodecError> {
        log::debug!("GcrCodec::encode_track(): {} GCR encoding is not supported", ch);
        Err(CodecError::UnsupportedEncoding)
    }
}
