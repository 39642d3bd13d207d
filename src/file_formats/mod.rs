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

    src/file_formats/mod.rs

    On-disk image format support: raw sector images (IMG/IMA), SuperCard Pro
    flux captures (SCP) and HxC bitstream images (HFE v1), with detection by
    magic bytes and by extension.
*/

pub mod hfe;
pub mod img;
pub mod scp;

use std::path::Path;

use crate::io::{ReadSeek, SeekFrom};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    /// Raw sector concatenation, no header.
    Img,
    /// SuperCard Pro flux image.
    Scp,
    /// HxC HFE v1 bitstream image.
    Hfe,
}

impl ImageFormat {
    pub fn from_extension(path: &Path) -> Option<ImageFormat> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("img") | Some("ima") | Some("adf") | Some("ssd") => Some(ImageFormat::Img),
            Some("scp") => Some(ImageFormat::Scp),
            Some("hfe") => Some(ImageFormat::Hfe),
            _ => None,
        }
    }

    /// Probe the stream's magic bytes. Raw sector images have no signature, so a stream that
    /// matches nothing else falls back to `Img`.
    pub fn detect<RS: ReadSeek>(image: &mut RS) -> ImageFormat {
        if scp::ScpImage::detect(image) {
            return ImageFormat::Scp;
        }
        let _ = image.seek(SeekFrom::Start(0));
        if hfe::HfeImage::detect(image) {
            return ImageFormat::Hfe;
        }
        let _ = image.seek(SeekFrom::Start(0));
        ImageFormat::Img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extension_mapping() {
        assert_eq!(
            ImageFormat::from_extension(&PathBuf::from("disk.IMG")),
            Some(ImageFormat::Img)
        );
        assert_eq!(
            ImageFormat::from_extension(&PathBuf::from("dump.scp")),
            Some(ImageFormat::Scp)
        );
        assert_eq!(
            ImageFormat::from_extension(&PathBuf::from("a.hfe")),
            Some(ImageFormat::Hfe)
        );
        assert_eq!(ImageFormat::from_extension(&PathBuf::from("weird.bin")), None);
    }
}
