// crates/reelplay-core/src/image.rs
//
// Image descriptions and pixel buffers. An Image is an ImageInfo plus one
// contiguous byte buffer of the computed size; decoded frames are shared as
// Arc<Image> and never mutated after the reader hands them out.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::math::{FloatRange, Vector2f};

/// Free-form key/value metadata carried on images and streams.
pub type Tags = BTreeMap<String, String>;

// ── Pixel types ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum PixelType {
    #[default]
    None,

    L_U8,
    L_U16,
    L_U32,
    L_F16,
    L_F32,

    LA_U8,
    LA_U16,
    LA_U32,
    LA_F16,
    LA_F32,

    RGB_U8,
    RGB_U10,
    RGB_U16,
    RGB_U32,
    RGB_F16,
    RGB_F32,

    RGBA_U8,
    RGBA_U16,
    RGBA_U32,
    RGBA_F16,
    RGBA_F32,

    YUV_420P_U8,
    YUV_422P_U8,
    YUV_444P_U8,
    YUV_420P_U10,
    YUV_422P_U10,
    YUV_444P_U10,
    YUV_420P_U12,
    YUV_422P_U12,
    YUV_444P_U12,
    YUV_420P_U16,
    YUV_422P_U16,
    YUV_444P_U16,

    // Network stream formats.
    BGRA_U8,
    BGRX_U8,
    UYVA_U8,
    I420_U8,
    P216_U16,
    PA16_U16,
}

impl PixelType {
    pub fn channel_count(self) -> u8 {
        use PixelType::*;
        match self {
            None => 0,
            L_U8 | L_U16 | L_U32 | L_F16 | L_F32 => 1,
            LA_U8 | LA_U16 | LA_U32 | LA_F16 | LA_F32 => 2,
            RGB_U8 | RGB_U10 | RGB_U16 | RGB_U32 | RGB_F16 | RGB_F32 => 3,
            RGBA_U8 | RGBA_U16 | RGBA_U32 | RGBA_F16 | RGBA_F32 => 4,
            YUV_420P_U8 | YUV_422P_U8 | YUV_444P_U8 | YUV_420P_U10 | YUV_422P_U10
            | YUV_444P_U10 | YUV_420P_U12 | YUV_422P_U12 | YUV_444P_U12 | YUV_420P_U16
            | YUV_422P_U16 | YUV_444P_U16 => 3,
            BGRA_U8 => 4,
            BGRX_U8 => 4,
            UYVA_U8 => 4,
            I420_U8 => 3,
            P216_U16 => 3,
            PA16_U16 => 4,
        }
    }

    pub fn bit_depth(self) -> u8 {
        use PixelType::*;
        match self {
            None => 0,
            L_U8 | LA_U8 | RGB_U8 | RGBA_U8 | YUV_420P_U8 | YUV_422P_U8 | YUV_444P_U8
            | BGRA_U8 | BGRX_U8 | UYVA_U8 | I420_U8 => 8,
            RGB_U10 | YUV_420P_U10 | YUV_422P_U10 | YUV_444P_U10 => 10,
            YUV_420P_U12 | YUV_422P_U12 | YUV_444P_U12 => 12,
            L_U16 | LA_U16 | RGB_U16 | RGBA_U16 | L_F16 | LA_F16 | RGB_F16 | RGBA_F16
            | YUV_420P_U16 | YUV_422P_U16 | YUV_444P_U16 | P216_U16 | PA16_U16 => 16,
            L_U32 | LA_U32 | RGB_U32 | RGBA_U32 | L_F32 | LA_F32 | RGB_F32 | RGBA_F32 => 32,
        }
    }

    fn is_planar_yuv(self) -> bool {
        use PixelType::*;
        matches!(
            self,
            YUV_420P_U8
                | YUV_422P_U8
                | YUV_444P_U8
                | YUV_420P_U10
                | YUV_422P_U10
                | YUV_444P_U10
                | YUV_420P_U12
                | YUV_422P_U12
                | YUV_444P_U12
                | YUV_420P_U16
                | YUV_422P_U16
                | YUV_444P_U16
                | I420_U8
        )
    }

    /// Horizontal/vertical chroma divisors for planar YUV types.
    fn chroma_divisors(self) -> (usize, usize) {
        use PixelType::*;
        match self {
            YUV_420P_U8 | YUV_420P_U10 | YUV_420P_U12 | YUV_420P_U16 | I420_U8 => (2, 2),
            YUV_422P_U8 | YUV_422P_U10 | YUV_422P_U12 | YUV_422P_U16 => (2, 1),
            _ => (1, 1),
        }
    }

    /// Bytes per sample for one plane channel.
    fn plane_sample_bytes(self) -> usize {
        // 10- and 12-bit planar formats store one sample per 16-bit word.
        if self.bit_depth() <= 8 {
            1
        } else {
            2
        }
    }
}

// ── Image info ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub w: u32,
    pub h: u32,
    pub pixel_aspect: f32,
}

impl Size {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h, pixel_aspect: 1.0 }
    }

    pub fn is_valid(&self) -> bool {
        self.w > 0 && self.h > 0
    }

    /// Display aspect, including the pixel aspect.
    pub fn aspect(&self) -> f32 {
        if self.h > 0 {
            self.w as f32 / self.h as f32 * self.pixel_aspect
        } else {
            0.0
        }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self { w: 0, h: 0, pixel_aspect: 1.0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub x: bool,
    pub y: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
    #[default]
    Lsb,
    Msb,
}

impl Endian {
    /// The endianness of the current machine.
    pub fn current() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Msb
        } else {
            Endian::Lsb
        }
    }
}

/// Legal (broadcast) vs. full range code values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoLevels {
    #[default]
    FullRange,
    LegalRange,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum YuvCoefficients {
    #[default]
    Rec709,
    Bt2020,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub size: Size,
    pub pixel_type: PixelType,
    pub mirror: Mirror,
    /// Scanline byte alignment; each row is padded to a multiple of this.
    pub layout_alignment: usize,
    pub layout_endian: Endian,
    pub video_levels: VideoLevels,
    pub yuv_coefficients: YuvCoefficients,
    #[serde(default)]
    pub tags: Tags,
}

impl ImageInfo {
    pub fn new(w: u32, h: u32, pixel_type: PixelType) -> Self {
        Self {
            size: Size::new(w, h),
            pixel_type,
            mirror: Mirror::default(),
            layout_alignment: 1,
            layout_endian: Endian::current(),
            video_levels: VideoLevels::default(),
            yuv_coefficients: YuvCoefficients::default(),
            tags: Tags::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.size.is_valid() && self.pixel_type != PixelType::None
    }

    /// Bytes for one aligned scanline of the interleaved plane (or of the
    /// luma plane for planar types).
    pub fn scanline_byte_count(&self) -> usize {
        let w = self.size.w as usize;
        let bytes = match self.pixel_type {
            PixelType::None => 0,
            PixelType::RGB_U10 => 4 * w,
            // Packed 4:2:2 with trailing planes.
            PixelType::UYVA_U8 => 2 * w,
            PixelType::P216_U16 | PixelType::PA16_U16 => 2 * w,
            t if t.is_planar_yuv() => w * t.plane_sample_bytes(),
            t => w * t.channel_count() as usize * (t.bit_depth().max(8) as usize / 8),
        };
        align(bytes, self.layout_alignment.max(1))
    }

    /// Total byte count of the pixel buffer.
    pub fn data_byte_count(&self) -> usize {
        let t = self.pixel_type;
        let w = self.size.w as usize;
        let h = self.size.h as usize;
        if t == PixelType::None || !self.size.is_valid() {
            return 0;
        }
        match t {
            // UYVY plus an alpha plane.
            PixelType::UYVA_U8 => self.scanline_byte_count() * h + w * h,
            // 16-bit luma plane plus interleaved 4:2:2 chroma.
            PixelType::P216_U16 => self.scanline_byte_count() * h * 2,
            // P216 plus a 16-bit alpha plane.
            PixelType::PA16_U16 => self.scanline_byte_count() * h * 3,
            t if t.is_planar_yuv() => {
                let (cw, ch) = t.chroma_divisors();
                let sample = t.plane_sample_bytes();
                let align_to = self.layout_alignment.max(1);
                let luma_row = align(w * sample, align_to);
                let chroma_row = align(w.div_ceil(cw) * sample, align_to);
                luma_row * h + 2 * chroma_row * h.div_ceil(ch)
            }
            _ => self.scanline_byte_count() * h,
        }
    }
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self::new(0, 0, PixelType::None)
    }
}

fn align(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

// ── HDR metadata ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eotf {
    #[default]
    Sdr,
    Hlg,
    Pq,
}

/// HDR mastering metadata, attached per-image when present in the source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HdrData {
    pub eotf: Eotf,
    /// Red, green, blue chromaticities.
    pub primaries: [Vector2f; 3],
    pub white_point: Vector2f,
    /// Mastering display luminance in cd/m².
    pub display_mastering_luminance: FloatRange,
    pub max_cll: f32,
    pub max_fall: f32,
}

impl Default for HdrData {
    fn default() -> Self {
        // Rec. 2020 primaries and D65 white.
        Self {
            eotf: Eotf::default(),
            primaries: [
                Vector2f::new(0.708, 0.292),
                Vector2f::new(0.170, 0.797),
                Vector2f::new(0.131, 0.046),
            ],
            white_point: Vector2f::new(0.3127, 0.3290),
            display_mastering_luminance: FloatRange::new(0.0, 1000.0),
            max_cll: 1000.0,
            max_fall: 400.0,
        }
    }
}

// ── Image ────────────────────────────────────────────────────────────────────

/// A decoded frame: info plus one contiguous byte buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    info: ImageInfo,
    data: Vec<u8>,
    tags: Tags,
    hdr: Option<HdrData>,
}

impl Image {
    /// Allocate a zeroed image of the computed byte count.
    pub fn new(info: ImageInfo) -> Self {
        let byte_count = info.data_byte_count();
        Self {
            info,
            data: vec![0; byte_count],
            tags: Tags::new(),
            hdr: None,
        }
    }

    pub fn with_data(info: ImageInfo, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), info.data_byte_count());
        Self { info, data, tags: Tags::new(), hdr: None }
    }

    pub fn shared(info: ImageInfo) -> Arc<Self> {
        Arc::new(Self::new(info))
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn size(&self) -> Size {
        self.info.size
    }

    pub fn pixel_type(&self) -> PixelType {
        self.info.pixel_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_count(&self) -> usize {
        self.data.len()
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }

    pub fn set_tag(&mut self, key: &str, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn hdr(&self) -> Option<&HdrData> {
        self.hdr.as_ref()
    }

    pub fn set_hdr(&mut self, hdr: Option<HdrData>) {
        self.hdr = hdr;
    }

    pub fn zero(&mut self) {
        self.data.fill(0);
    }
}
