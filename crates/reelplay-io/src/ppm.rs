// crates/reelplay-io/src/ppm.rs
//
// PPM plugin. Binary (P6) and ASCII (P3) portable pixmaps, 8- and 16-bit
// RGB. One frame per file, read through the sequence worker.

use std::io::Write as _;
use std::sync::Arc;

use reelplay_core::error::{Error, Result};
use reelplay_core::image::{Endian, Image, ImageInfo, PixelType};
use reelplay_core::log::LogSystem;
use reelplay_core::path::{MemoryRead, Path};
use reelplay_core::time::RationalTime;

use crate::cache::Cache;
use crate::plugin::{ExtensionMap, FileType, Plugin, Read, Write};
use crate::sequence::{FrameDecoder, SequenceRead};
use crate::{Info, Options};

/// Write-side data layout: "Binary" (P6, default) or "ASCII" (P3).
pub const OPTION_DATA: &str = "PPM/Data";

pub struct PpmPlugin {
    extensions: ExtensionMap,
    cache: Arc<Cache>,
    log: Arc<LogSystem>,
}

impl PpmPlugin {
    pub fn new(cache: Arc<Cache>, log: Arc<LogSystem>) -> Self {
        let mut extensions = ExtensionMap::new();
        extensions.insert(".ppm".into(), FileType::Sequence);
        Self { extensions, cache, log }
    }
}

impl Plugin for PpmPlugin {
    fn name(&self) -> &str {
        "PPM"
    }

    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }

    fn read(&self, path: &Path, memory: &[MemoryRead], options: &Options)
        -> Result<Arc<dyn Read>> {
        let read = SequenceRead::new(
            Arc::new(PpmDecoder),
            path,
            memory,
            options,
            Some(Arc::clone(&self.cache)),
            Arc::clone(&self.log),
        )?;
        Ok(read)
    }

    fn write_info(&self, info: &ImageInfo, _options: &Options) -> Result<ImageInfo> {
        let pixel_type = match info.pixel_type {
            PixelType::L_U8 | PixelType::RGB_U8 => PixelType::RGB_U8,
            PixelType::L_U16 | PixelType::RGB_U16 => PixelType::RGB_U16,
            other => {
                return Err(Error::Format(format!("PPM cannot write {other:?}")));
            }
        };
        let mut out = ImageInfo::new(info.size.w, info.size.h, pixel_type);
        out.layout_endian = Endian::Msb;
        Ok(out)
    }

    fn write(&self, path: &Path, info: &Info, options: &Options) -> Result<Box<dyn Write>> {
        let image_info = info
            .video
            .first()
            .ok_or_else(|| Error::Format("no video layer to write".into()))?;
        let image_info = self.write_info(image_info, options)?;
        let ascii = options.get(OPTION_DATA).map(String::as_str) == Some("ASCII");
        Ok(Box::new(PpmWrite { path: path.clone(), info: image_info, ascii }))
    }
}

// ── Decode ───────────────────────────────────────────────────────────────────

pub struct PpmDecoder;

impl FrameDecoder for PpmDecoder {
    fn frame_info(&self, path: &Path, memory: Option<&MemoryRead>) -> Result<ImageInfo> {
        let bytes = load(path, memory)?;
        let (info, _) = parse_header(&bytes, path)?;
        Ok(info)
    }

    fn decode(&self, path: &Path, memory: Option<&MemoryRead>) -> Result<Image> {
        let bytes = load(path, memory)?;
        let (info, header) = parse_header(&bytes, path)?;
        let byte_count = info.data_byte_count();
        let mut image = Image::new(info);
        match header.magic {
            b'6' => {
                let data = bytes
                    .get(header.data_offset..header.data_offset + byte_count)
                    .ok_or_else(|| Error::Format(format!("{}: truncated pixel data", path.get())))?;
                image.data_mut().copy_from_slice(data);
            }
            _ => {
                // P3: ASCII sample list.
                let text = std::str::from_utf8(&bytes[header.data_offset..])
                    .map_err(|_| Error::Format(format!("{}: bad ASCII data", path.get())))?;
                let mut out = image.data_mut().iter_mut();
                let wide = header.max_value > 255;
                for token in text.split_ascii_whitespace() {
                    let value: u32 = token
                        .parse()
                        .map_err(|_| Error::Format(format!("{}: bad sample {token:?}", path.get())))?;
                    if wide {
                        for byte in (value as u16).to_be_bytes() {
                            *out.next().ok_or_else(|| data_overflow(path))? = byte;
                        }
                    } else {
                        *out.next().ok_or_else(|| data_overflow(path))? = value as u8;
                    }
                }
                if out.next().is_some() {
                    return Err(Error::Format(format!("{}: truncated pixel data", path.get())));
                }
            }
        }
        Ok(image)
    }
}

fn data_overflow(path: &Path) -> Error {
    Error::Format(format!("{}: more samples than pixels", path.get()))
}

fn load(path: &Path, memory: Option<&MemoryRead>) -> Result<Vec<u8>> {
    match memory {
        Some(memory) => Ok(memory.data.as_ref().clone()),
        None => Ok(std::fs::read(path.file_name(true))?),
    }
}

struct Header {
    magic: u8,
    max_value: u32,
    data_offset: usize,
}

fn parse_header(bytes: &[u8], path: &Path) -> Result<(ImageInfo, Header)> {
    if bytes.len() < 2 || bytes[0] != b'P' || !matches!(bytes[1], b'3' | b'6') {
        return Err(Error::Format(format!("{}: not a PPM file", path.get())));
    }
    let magic = bytes[1];
    let mut pos = 2;
    let mut fields = [0u32; 3];
    for field in &mut fields {
        *field = next_field(bytes, &mut pos, path)?;
    }
    // A single whitespace byte separates the header from binary data.
    pos += 1;
    let [w, h, max_value] = fields;
    if w == 0 || h == 0 || max_value == 0 || max_value > 65535 {
        return Err(Error::Format(format!("{}: bad PPM header", path.get())));
    }
    let pixel_type = if max_value > 255 { PixelType::RGB_U16 } else { PixelType::RGB_U8 };
    let mut info = ImageInfo::new(w, h, pixel_type);
    info.layout_endian = Endian::Msb;
    Ok((info, Header { magic, max_value, data_offset: pos }))
}

/// The next whitespace-delimited integer, skipping '#' comment lines.
fn next_field(bytes: &[u8], pos: &mut usize, path: &Path) -> Result<u32> {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < bytes.len() && bytes[*pos] == b'#' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if start == *pos {
        return Err(Error::Format(format!("{}: bad PPM header", path.get())));
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Format(format!("{}: bad PPM header", path.get())))
}

// ── Encode ───────────────────────────────────────────────────────────────────

struct PpmWrite {
    path: Path,
    info: ImageInfo,
    ascii: bool,
}

impl Write for PpmWrite {
    fn write_video(&mut self, time: RationalTime, image: &Image, _options: &Options)
        -> Result<()> {
        if *image.info() != self.info {
            return Err(Error::Format("image does not match write info".into()));
        }
        let file_name = self.path.frame(time.to_frames(), true);
        let file = std::fs::File::create(&file_name)?;
        let mut out = std::io::BufWriter::new(file);
        let wide = self.info.pixel_type == PixelType::RGB_U16;
        let max_value = if wide { 65535 } else { 255 };
        let magic = if self.ascii { "P3" } else { "P6" };
        writeln!(out, "{magic}")?;
        writeln!(out, "{} {}", self.info.size.w, self.info.size.h)?;
        writeln!(out, "{max_value}")?;
        if self.ascii {
            if wide {
                for pair in image.data().chunks_exact(2) {
                    writeln!(out, "{}", u16::from_be_bytes([pair[0], pair[1]]))?;
                }
            } else {
                for byte in image.data() {
                    writeln!(out, "{byte}")?;
                }
            }
        } else {
            out.write_all(image.data())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_roundtrip(ascii: bool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/frame.0001.ppm", dir.path().display());
        let path = Path::parse(&url).unwrap();

        let mut info = ImageInfo::new(2, 2, PixelType::RGB_U8);
        info.layout_endian = Endian::Msb;
        let mut image = Image::new(info.clone());
        image
            .data_mut()
            .copy_from_slice(&[255, 0, 0, 0, 255, 0, 0, 0, 255, 9, 9, 9]);

        let mut writer = PpmWrite { path: path.clone(), info, ascii };
        writer
            .write_video(RationalTime::from_frames(1, 24.0), &image, &Options::new())
            .unwrap();

        let decoded = PpmDecoder.decode(&path, None).unwrap();
        assert_eq!(decoded.pixel_type(), PixelType::RGB_U8);
        assert_eq!(decoded.size().w, 2);
        assert_eq!(decoded.data(), image.data());
    }

    #[test]
    fn binary_write_read() {
        decoder_roundtrip(false);
    }

    #[test]
    fn ascii_write_read() {
        decoder_roundtrip(true);
    }

    #[test]
    fn header_comments_are_skipped() {
        let bytes = b"P6\n# made by hand\n2 1\n255\n\xff\x00\x00\x00\xff\x00";
        let path = Path::parse("inline.ppm").unwrap();
        let (info, header) = parse_header(bytes, &path).unwrap();
        assert_eq!(info.size.w, 2);
        assert_eq!(info.size.h, 1);
        assert_eq!(header.max_value, 255);
    }

    #[test]
    fn malformed_files_fail_with_format_error() {
        let path = Path::parse("bad.ppm").unwrap();
        let memory = MemoryRead::from_bytes(b"JUNK".to_vec());
        let err = PpmDecoder.decode(&path, Some(&memory)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        let memory = MemoryRead::from_bytes(b"P6\n2 2\n255\nxx".to_vec());
        let err = PpmDecoder.decode(&path, Some(&memory)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn write_info_promotes_and_rejects() {
        let cache = Cache::new();
        let plugin = PpmPlugin::new(cache, Arc::new(LogSystem::new()));
        let info = ImageInfo::new(4, 4, PixelType::L_U8);
        assert_eq!(plugin.write_info(&info, &Options::new()).unwrap().pixel_type, PixelType::RGB_U8);
        let info = ImageInfo::new(4, 4, PixelType::RGBA_F32);
        assert!(plugin.write_info(&info, &Options::new()).is_err());
    }

    #[test]
    fn sixteen_bit_samples_are_big_endian() {
        let bytes = b"P3\n1 1\n65535\n65535 0 256\n";
        let path = Path::parse("wide.ppm").unwrap();
        let memory = MemoryRead::from_bytes(bytes.to_vec());
        let image = PpmDecoder.decode(&path, Some(&memory)).unwrap();
        assert_eq!(image.pixel_type(), PixelType::RGB_U16);
        assert_eq!(image.data(), &[0xff, 0xff, 0, 0, 0x01, 0x00]);
    }
}
