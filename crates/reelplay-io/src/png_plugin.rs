// crates/reelplay-io/src/png_plugin.rs
//
// PNG plugin over the `png` crate. Reads L/LA/RGB/RGBA at 8 or 16 bits
// (palette images are expanded on the fly); writes 8- and 16-bit variants.
// One frame per file, read through the sequence worker.

use std::io::BufWriter;
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

pub struct PngPlugin {
    extensions: ExtensionMap,
    cache: Arc<Cache>,
    log: Arc<LogSystem>,
}

impl PngPlugin {
    pub fn new(cache: Arc<Cache>, log: Arc<LogSystem>) -> Self {
        let mut extensions = ExtensionMap::new();
        extensions.insert(".png".into(), FileType::Sequence);
        Self { extensions, cache, log }
    }
}

impl Plugin for PngPlugin {
    fn name(&self) -> &str {
        "PNG"
    }

    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }

    fn read(&self, path: &Path, memory: &[MemoryRead], options: &Options)
        -> Result<Arc<dyn Read>> {
        let read = SequenceRead::new(
            Arc::new(PngDecoder),
            path,
            memory,
            options,
            Some(Arc::clone(&self.cache)),
            Arc::clone(&self.log),
        )?;
        Ok(read)
    }

    fn write_info(&self, info: &ImageInfo, _options: &Options) -> Result<ImageInfo> {
        match info.pixel_type {
            PixelType::L_U8
            | PixelType::L_U16
            | PixelType::LA_U8
            | PixelType::LA_U16
            | PixelType::RGB_U8
            | PixelType::RGB_U16
            | PixelType::RGBA_U8
            | PixelType::RGBA_U16 => {}
            other => {
                return Err(Error::Format(format!("PNG cannot write {other:?}")));
            }
        }
        let mut out = ImageInfo::new(info.size.w, info.size.h, info.pixel_type);
        out.layout_endian = Endian::Msb;
        Ok(out)
    }

    fn write(&self, path: &Path, info: &Info, options: &Options) -> Result<Box<dyn Write>> {
        let image_info = info
            .video
            .first()
            .ok_or_else(|| Error::Format("no video layer to write".into()))?;
        let image_info = self.write_info(image_info, options)?;
        Ok(Box::new(PngWrite { path: path.clone(), info: image_info }))
    }
}

// ── Decode ───────────────────────────────────────────────────────────────────

pub struct PngDecoder;

impl PngDecoder {
    fn open<'a>(&self, path: &Path, memory: Option<&'a MemoryRead>)
        -> Result<png::Reader<Box<dyn std::io::Read + Send + 'a>>> {
        let source: Box<dyn std::io::Read + Send + 'a> = match memory {
            Some(memory) => Box::new(std::io::Cursor::new(memory.data.as_slice())),
            None => Box::new(std::fs::File::open(path.file_name(true))?),
        };
        let mut decoder = png::Decoder::new(source);
        decoder.set_transformations(png::Transformations::EXPAND);
        decoder
            .read_info()
            .map_err(|e| Error::Format(format!("{}: {e}", path.get())))
    }
}

fn map_pixel_type(color: png::ColorType, depth: png::BitDepth, path: &Path)
    -> Result<PixelType> {
    use png::BitDepth::*;
    use png::ColorType::*;
    match (color, depth) {
        (Grayscale, Eight) => Ok(PixelType::L_U8),
        (Grayscale, Sixteen) => Ok(PixelType::L_U16),
        (GrayscaleAlpha, Eight) => Ok(PixelType::LA_U8),
        (GrayscaleAlpha, Sixteen) => Ok(PixelType::LA_U16),
        (Rgb, Eight) => Ok(PixelType::RGB_U8),
        (Rgb, Sixteen) => Ok(PixelType::RGB_U16),
        (Rgba, Eight) => Ok(PixelType::RGBA_U8),
        (Rgba, Sixteen) => Ok(PixelType::RGBA_U16),
        (color, depth) => Err(Error::Format(format!(
            "{}: unsupported PNG layout {color:?}/{depth:?}",
            path.get()
        ))),
    }
}

impl FrameDecoder for PngDecoder {
    fn frame_info(&self, path: &Path, memory: Option<&MemoryRead>) -> Result<ImageInfo> {
        let reader = self.open(path, memory)?;
        let (color, depth) = reader.output_color_type();
        let info = reader.info();
        let mut out = ImageInfo::new(info.width, info.height, map_pixel_type(color, depth, path)?);
        out.layout_endian = Endian::Msb;
        Ok(out)
    }

    fn decode(&self, path: &Path, memory: Option<&MemoryRead>) -> Result<Image> {
        let mut reader = self.open(path, memory)?;
        let (color, depth) = reader.output_color_type();
        let mut buf = vec![0; reader.output_buffer_size()];
        let frame = reader
            .next_frame(&mut buf)
            .map_err(|e| Error::Format(format!("{}: {e}", path.get())))?;
        let mut info =
            ImageInfo::new(frame.width, frame.height, map_pixel_type(color, depth, path)?);
        info.layout_endian = Endian::Msb;
        buf.truncate(frame.buffer_size());
        Ok(Image::with_data(info, buf))
    }
}

// ── Encode ───────────────────────────────────────────────────────────────────

struct PngWrite {
    path: Path,
    info: ImageInfo,
}

impl Write for PngWrite {
    fn write_video(&mut self, time: RationalTime, image: &Image, _options: &Options)
        -> Result<()> {
        if *image.info() != self.info {
            return Err(Error::Format("image does not match write info".into()));
        }
        let (color, depth) = match self.info.pixel_type {
            PixelType::L_U8 => (png::ColorType::Grayscale, png::BitDepth::Eight),
            PixelType::L_U16 => (png::ColorType::Grayscale, png::BitDepth::Sixteen),
            PixelType::LA_U8 => (png::ColorType::GrayscaleAlpha, png::BitDepth::Eight),
            PixelType::LA_U16 => (png::ColorType::GrayscaleAlpha, png::BitDepth::Sixteen),
            PixelType::RGB_U8 => (png::ColorType::Rgb, png::BitDepth::Eight),
            PixelType::RGB_U16 => (png::ColorType::Rgb, png::BitDepth::Sixteen),
            PixelType::RGBA_U8 => (png::ColorType::Rgba, png::BitDepth::Eight),
            PixelType::RGBA_U16 => (png::ColorType::Rgba, png::BitDepth::Sixteen),
            other => {
                return Err(Error::Format(format!("PNG cannot write {other:?}")));
            }
        };
        let file_name = self.path.frame(time.to_frames(), true);
        let file = std::fs::File::create(&file_name)?;
        let writer = &mut BufWriter::new(file);
        let mut encoder = png::Encoder::new(writer, self.info.size.w, self.info.size.h);
        encoder.set_color(color);
        encoder.set_depth(depth);
        let mut writer = encoder
            .write_header()
            .map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        writer
            .write_image_data(image.data())
            .map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        Ok(())
    }
}
