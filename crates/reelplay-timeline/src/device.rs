// crates/reelplay-timeline/src/device.rs
//
// Output device plumbing: the pull interface BMD SDI, NDI senders, and the
// in-process viewport all consume. The core never interprets the color
// pipeline options it forwards — a device receives resolved video with
// compare boxes, the current audio, a view transform, and pass-through
// color options, and repeats its last frame whenever nothing new arrived
// in a tick.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use reelplay_core::image::{HdrData, Image, PixelType as ImagePixelType};
use reelplay_core::math::{Box2i, Size2i, Vector2i};
use reelplay_core::observer::{Observable, Subscription};
use reelplay_core::time::RationalTime;

use crate::compare::{self, CompareOptions};
use crate::options::{
    BackgroundOptions, DisplayOptions, HdrMode, ImageOptions, LutOptions, OcioOptions,
};
use crate::player::Player;
use crate::timeline::{AudioData, VideoData};

// ── Device description ───────────────────────────────────────────────────────

/// Wire pixel formats of SDI and network outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum PixelType {
    #[default]
    None,
    BGRA_8Bit,
    YUV_8Bit,
    RGB_10Bit,
    RGBX_10Bit,
    RGBXLE_10Bit,
    RGB_12Bit,
    RGBLE_12Bit,
    UYVA_8Bit,
    P216_16Bit,
    PA16_16Bit,
    I420_8Bit,
    BGRX_8Bit,
    RGBA_8Bit,
    RGBX_8Bit,
}

impl PixelType {
    /// Bytes for one row of the primary plane.
    pub fn row_byte_count(self, width: i32) -> usize {
        let width = width.max(0) as usize;
        match self {
            PixelType::None => 0,
            PixelType::BGRA_8Bit
            | PixelType::BGRX_8Bit
            | PixelType::RGBA_8Bit
            | PixelType::RGBX_8Bit => width * 4,
            PixelType::YUV_8Bit => width * 2,
            // Packed: three 10-bit samples per 32-bit word.
            PixelType::RGB_10Bit | PixelType::RGBX_10Bit | PixelType::RGBXLE_10Bit => width * 4,
            // 36 bytes carry eight 12-bit RGB pixels.
            PixelType::RGB_12Bit | PixelType::RGBLE_12Bit => width.div_ceil(8) * 36,
            PixelType::UYVA_8Bit => width * 2,
            PixelType::P216_16Bit | PixelType::PA16_16Bit => width * 2,
            PixelType::I420_8Bit => width,
        }
    }

    /// Bytes for a whole frame, all planes included.
    pub fn data_byte_count(self, size: Size2i) -> usize {
        let (w, h) = (size.w.max(0) as usize, size.h.max(0) as usize);
        let row = self.row_byte_count(size.w);
        match self {
            PixelType::None => 0,
            // UYVY plus a full alpha plane.
            PixelType::UYVA_8Bit => row * h + w * h,
            // 16-bit Y plane plus interleaved 16-bit UV at 4:2:2.
            PixelType::P216_16Bit => row * h * 2,
            // P216 plus a 16-bit alpha plane.
            PixelType::PA16_16Bit => row * h * 3,
            // 4:2:0 planar.
            PixelType::I420_8Bit => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
            _ => row * h,
        }
    }

    /// The offscreen buffer format frames are packed from.
    pub fn color_buffer(self) -> ImagePixelType {
        match self {
            PixelType::None => ImagePixelType::None,
            PixelType::RGB_10Bit | PixelType::RGBX_10Bit | PixelType::RGBXLE_10Bit => {
                ImagePixelType::RGB_U10
            }
            PixelType::RGB_12Bit | PixelType::RGBLE_12Bit => ImagePixelType::RGB_U16,
            PixelType::P216_16Bit | PixelType::PA16_16Bit => ImagePixelType::RGBA_U16,
            _ => ImagePixelType::RGBA_U8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub name: String,
    pub size: Size2i,
    pub frame_rate: RationalTime,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub display_modes: Vec<DisplayMode>,
    pub pixel_types: Vec<PixelType>,
    pub min_video_preroll: usize,
    pub hdr_metadata: bool,
    pub max_audio_channels: usize,
}

/// Device-specific boolean toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BoolOption {
    Sdi444VideoOutput,
}

pub type BoolOptions = BTreeMap<BoolOption, bool>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_index: i32,
    pub display_mode_index: i32,
    pub pixel_type: PixelType,
    pub bool_options: BoolOptions,
    pub no_audio: bool,
    pub no_metadata: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_index: -1,
            display_mode_index: -1,
            pixel_type: PixelType::None,
            bool_options: BoolOptions::new(),
            no_audio: false,
            no_metadata: false,
        }
    }
}

// ── Pull interface ───────────────────────────────────────────────────────────

/// The view transform a device applies when compositing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub viewport: Size2i,
    pub position: Vector2i,
    pub zoom: f64,
    pub rotation: f32,
    /// Auto-frame the image instead of using position/zoom.
    pub frame: bool,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            viewport: Size2i::default(),
            position: Vector2i::default(),
            zoom: 1.0,
            rotation: 0.0,
            frame: true,
        }
    }
}

/// One composed frame as a device consumes it.
#[derive(Clone, Debug, Default)]
pub struct OutputFrame {
    pub video: Vec<VideoData>,
    pub boxes: Vec<Box2i>,
    pub render_size: Size2i,
    pub hdr: Option<HdrData>,
}

/// The pull contract every sink implements. The host pushes current data
/// between ticks; the device renders on its own cadence and repeats the
/// last frame when nothing new arrived.
pub trait Output: Send {
    fn device_info(&self) -> Vec<DeviceInfo>;

    fn config(&self) -> DeviceConfig;
    fn set_config(&mut self, config: DeviceConfig);

    /// Enabled is user intent; active reports the hardware link.
    fn is_enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
    fn is_active(&self) -> bool;

    fn size(&self) -> Size2i;
    fn frame_rate(&self) -> RationalTime;

    fn set_view(&mut self, view: ViewTransform);

    // Color pipeline inputs, forwarded untouched.
    fn set_ocio_options(&mut self, options: &OcioOptions);
    fn set_lut_options(&mut self, options: &LutOptions);
    fn set_image_options(&mut self, options: &[ImageOptions]);
    fn set_display_options(&mut self, options: &[DisplayOptions]);
    fn set_hdr(&mut self, mode: HdrMode, data: &HdrData);
    fn set_compare_options(&mut self, options: &CompareOptions);
    fn set_background_options(&mut self, options: &BackgroundOptions);

    fn set_overlay(&mut self, overlay: Option<Arc<Image>>);

    fn set_volume(&mut self, volume: f32);
    fn set_mute(&mut self, mute: bool);
    fn set_audio_offset(&mut self, offset: f64);

    /// Wire a player for the pull model: each tick polls it for the
    /// current frame and audio. None detaches without disturbing the
    /// player.
    fn set_player(&mut self, player: Option<Arc<Mutex<Player>>>);

    /// Current resolved video with the compare layout, pushed by hosts
    /// that drive the device without a wired player.
    fn set_video(&mut self, video: Vec<VideoData>, boxes: Vec<Box2i>, render_size: Size2i);
    fn set_audio(&mut self, audio: Vec<AudioData>);

    /// One device-cadence step.
    fn tick(&mut self);
}

// ── In-process reference sink ────────────────────────────────────────────────

/// An offscreen sink: the in-process implementation of the pull interface,
/// also used to exercise device behavior without hardware.
pub struct OffscreenOutput {
    info: Vec<DeviceInfo>,
    config: Observable<DeviceConfig>,
    enabled: Observable<bool>,
    active: Observable<bool>,
    size: Observable<Size2i>,
    frame_rate: Observable<RationalTime>,

    view: ViewTransform,
    ocio: OcioOptions,
    lut: LutOptions,
    image_options: Vec<ImageOptions>,
    display_options: Vec<DisplayOptions>,
    hdr_mode: HdrMode,
    hdr_data: HdrData,
    compare: CompareOptions,
    background: BackgroundOptions,
    overlay: Option<Arc<Image>>,
    volume: f32,
    mute: bool,
    audio_offset: f64,

    player: Option<Arc<Mutex<Player>>>,
    /// The frame most recently pulled from the player, for new-frame
    /// detection.
    last_pulled: Option<VideoData>,
    pending: Option<OutputFrame>,
    audio: Vec<AudioData>,
    last_frame: Option<OutputFrame>,
    frames_rendered: u64,
    frames_repeated: u64,
}

impl OffscreenOutput {
    pub fn new(info: Vec<DeviceInfo>) -> Self {
        Self {
            info,
            config: Observable::new(DeviceConfig::default()),
            enabled: Observable::new(false),
            active: Observable::new(false),
            size: Observable::new(Size2i::default()),
            frame_rate: Observable::new(RationalTime::default()),
            view: ViewTransform::default(),
            ocio: OcioOptions::default(),
            lut: LutOptions::default(),
            image_options: Vec::new(),
            display_options: Vec::new(),
            hdr_mode: HdrMode::default(),
            hdr_data: HdrData::default(),
            compare: CompareOptions::default(),
            background: BackgroundOptions::default(),
            overlay: None,
            volume: 1.0,
            mute: false,
            audio_offset: 0.0,
            player: None,
            last_pulled: None,
            pending: None,
            audio: Vec::new(),
            last_frame: None,
            frames_rendered: 0,
            frames_repeated: 0,
        }
    }

    pub fn observe_config(&mut self) -> Subscription<DeviceConfig> {
        self.config.observe()
    }

    pub fn observe_enabled(&mut self) -> Subscription<bool> {
        self.enabled.observe()
    }

    pub fn observe_active(&mut self) -> Subscription<bool> {
        self.active.observe()
    }

    pub fn observe_size(&mut self) -> Subscription<Size2i> {
        self.size.observe()
    }

    pub fn observe_frame_rate(&mut self) -> Subscription<RationalTime> {
        self.frame_rate.observe()
    }

    pub fn last_frame(&self) -> Option<&OutputFrame> {
        self.last_frame.as_ref()
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn ocio_options(&self) -> &OcioOptions {
        &self.ocio
    }

    pub fn lut_options(&self) -> &LutOptions {
        &self.lut
    }

    pub fn image_options(&self) -> &[ImageOptions] {
        &self.image_options
    }

    pub fn display_options(&self) -> &[DisplayOptions] {
        &self.display_options
    }

    pub fn compare_options(&self) -> &CompareOptions {
        &self.compare
    }

    pub fn background_options(&self) -> &BackgroundOptions {
        &self.background
    }

    pub fn overlay(&self) -> Option<&Arc<Image>> {
        self.overlay.as_ref()
    }

    pub fn audio(&self) -> &[AudioData] {
        &self.audio
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn audio_offset(&self) -> f64 {
        self.audio_offset
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frames_repeated(&self) -> u64 {
        self.frames_repeated
    }

    /// The link is up when enabled and the config selects a real display
    /// mode.
    fn update_active(&mut self) {
        let config = self.config.get().clone();
        let mode = self
            .info
            .get(config.device_index.max(0) as usize)
            .filter(|_| config.device_index >= 0)
            .and_then(|device| {
                device
                    .display_modes
                    .get(config.display_mode_index.max(0) as usize)
                    .filter(|_| config.display_mode_index >= 0)
            })
            .cloned();
        let active = *self.enabled.get() && mode.is_some();
        self.active.set_if_changed(active);
        if let Some(mode) = mode {
            self.size.set_if_changed(mode.size);
            self.frame_rate.set_if_changed(mode.frame_rate);
        }
    }
}

impl Output for OffscreenOutput {
    fn device_info(&self) -> Vec<DeviceInfo> {
        self.info.clone()
    }

    fn config(&self) -> DeviceConfig {
        self.config.get().clone()
    }

    /// Hot-reconfiguration: swapping modes never disturbs the player; the
    /// device just re-derives size and rate.
    fn set_config(&mut self, config: DeviceConfig) {
        self.config.set_if_changed(config);
        self.update_active();
    }

    fn is_enabled(&self) -> bool {
        *self.enabled.get()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.set_if_changed(enabled);
        self.update_active();
    }

    fn is_active(&self) -> bool {
        *self.active.get()
    }

    fn size(&self) -> Size2i {
        *self.size.get()
    }

    fn frame_rate(&self) -> RationalTime {
        *self.frame_rate.get()
    }

    fn set_view(&mut self, view: ViewTransform) {
        self.view = view;
    }

    fn set_ocio_options(&mut self, options: &OcioOptions) {
        self.ocio = options.clone();
    }

    fn set_lut_options(&mut self, options: &LutOptions) {
        self.lut = options.clone();
    }

    fn set_image_options(&mut self, options: &[ImageOptions]) {
        self.image_options = options.to_vec();
    }

    fn set_display_options(&mut self, options: &[DisplayOptions]) {
        self.display_options = options.to_vec();
    }

    fn set_hdr(&mut self, mode: HdrMode, data: &HdrData) {
        self.hdr_mode = mode;
        self.hdr_data = data.clone();
    }

    fn set_compare_options(&mut self, options: &CompareOptions) {
        self.compare = *options;
    }

    fn set_background_options(&mut self, options: &BackgroundOptions) {
        self.background = options.clone();
    }

    fn set_overlay(&mut self, overlay: Option<Arc<Image>>) {
        self.overlay = overlay;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    fn set_audio_offset(&mut self, offset: f64) {
        self.audio_offset = offset;
    }

    fn set_video(&mut self, video: Vec<VideoData>, boxes: Vec<Box2i>, render_size: Size2i) {
        // HDR metadata rides along per-frame when the mode asks for it.
        let hdr = match self.hdr_mode {
            HdrMode::None => None,
            HdrMode::Custom => Some(self.hdr_data.clone()),
            HdrMode::FromFile => video
                .iter()
                .flat_map(|data| data.layers.iter())
                .find_map(|layer| layer.image.as_ref().and_then(|image| image.hdr().cloned())),
        };
        self.pending = Some(OutputFrame { video, boxes, render_size, hdr });
    }

    fn set_player(&mut self, player: Option<Arc<Mutex<Player>>>) {
        self.player = player;
        self.last_pulled = None;
    }

    fn set_audio(&mut self, audio: Vec<AudioData>) {
        self.audio = audio;
    }

    fn tick(&mut self) {
        if !self.is_active() {
            return;
        }
        // Pull: poll the wired player; a frame it has not shown before
        // becomes the pending render, laid out under the compare options.
        if let Some(player) = self.player.as_ref().map(Arc::clone) {
            if let Ok(player) = player.lock() {
                let video = player.current_video();
                if video.time.is_valid() && self.last_pulled.as_ref() != Some(&video) {
                    self.last_pulled = Some(video.clone());
                    let (inputs, boxes, render_size) =
                        compare::pair(&video, None, &self.compare);
                    self.set_video(inputs, boxes, render_size);
                }
                let audio = player.current_audio();
                if !audio.layers.is_empty() {
                    self.audio = vec![audio];
                }
            }
        }
        match self.pending.take() {
            Some(frame) => {
                self.last_frame = Some(frame);
                self.frames_rendered += 1;
            }
            None => {
                if self.last_frame.is_some() {
                    self.frames_repeated += 1;
                }
            }
        }
    }
}
