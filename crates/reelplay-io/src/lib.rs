// crates/reelplay-io/src/lib.rs
//
// The I/O layer: plugin traits, cancellable futures, the process-wide byte
// cache, the sequence worker helper, concrete plugins, and the registry.
// Decoded results are the types below — one image per (time, layer), one
// audio buffer per time range.

use std::collections::BTreeMap;
use std::sync::Arc;

use reelplay_core::audio::{Audio, AudioInfo};
use reelplay_core::image::{Image, ImageInfo, Tags};
use reelplay_core::time::{RationalTime, TimeRange, INVALID_TIME, INVALID_TIME_RANGE};

pub mod cache;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod future;
pub mod plugin;
pub mod png_plugin;
pub mod ppm;
pub mod sequence;
pub mod system;

pub use cache::Cache;
pub use plugin::{FileType, Plugin, Read, Write};
pub use system::System;

/// Plugin-opaque option strings, carried through the registry and into
/// cache keys.
pub type Options = BTreeMap<String, String>;

/// Merge two option maps; `over` wins on conflicts.
pub fn merge(under: &Options, over: &Options) -> Options {
    let mut out = under.clone();
    for (key, value) in over {
        out.insert(key.clone(), value.clone());
    }
    out
}

/// One resolved image for one layer at one time. A missing image is a
/// successfully-resolved gap or out-of-range read, not an error.
#[derive(Clone, Debug)]
pub struct VideoData {
    pub time: RationalTime,
    pub layer: u16,
    pub image: Option<Arc<Image>>,
}

impl VideoData {
    pub fn new(time: RationalTime, layer: u16, image: Option<Arc<Image>>) -> Self {
        Self { time, layer, image }
    }
}

impl Default for VideoData {
    fn default() -> Self {
        Self { time: INVALID_TIME, layer: 0, image: None }
    }
}

impl PartialEq for VideoData {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
            && self.layer == other.layer
            && match (&self.image, &other.image) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

/// One decoded audio span.
#[derive(Clone, Debug)]
pub struct AudioData {
    pub time: RationalTime,
    pub audio: Option<Arc<Audio>>,
}

impl AudioData {
    pub fn new(time: RationalTime, audio: Option<Arc<Audio>>) -> Self {
        Self { time, audio }
    }
}

impl Default for AudioData {
    fn default() -> Self {
        Self { time: INVALID_TIME, audio: None }
    }
}

impl PartialEq for AudioData {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
            && match (&self.audio, &other.audio) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

/// What a reader learned about its source.
#[derive(Clone, Debug, PartialEq)]
pub struct Info {
    /// One entry per video layer.
    pub video: Vec<ImageInfo>,
    pub video_time_range: TimeRange,
    pub audio: Option<AudioInfo>,
    pub audio_time_range: TimeRange,
    pub tags: Tags,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            video: Vec::new(),
            video_time_range: INVALID_TIME_RANGE,
            audio: None,
            audio_time_range: INVALID_TIME_RANGE,
            tags: Tags::new(),
        }
    }
}

impl Info {
    pub fn has_video(&self) -> bool {
        !self.video.is_empty() && self.video_time_range.is_valid()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some() && self.audio_time_range.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelplay_core::image::PixelType;

    #[test]
    fn merge_prefers_overrides() {
        let mut a = Options::new();
        a.insert("SequenceIO/ThreadCount".into(), "4".into());
        a.insert("SequenceIO/DefaultSpeed".into(), "24".into());
        let mut b = Options::new();
        b.insert("SequenceIO/ThreadCount".into(), "8".into());
        let merged = merge(&a, &b);
        assert_eq!(merged.get("SequenceIO/ThreadCount").map(String::as_str), Some("8"));
        assert_eq!(merged.get("SequenceIO/DefaultSpeed").map(String::as_str), Some("24"));
    }

    #[test]
    fn default_video_data_is_invalid() {
        let v = VideoData::default();
        assert!(!v.time.is_valid());
        assert!(v.image.is_none());
    }

    #[test]
    fn video_data_equality_is_by_shared_image() {
        let image = Image::shared(ImageInfo::new(4, 4, PixelType::RGB_U8));
        let t = RationalTime::new(1.0, 24.0);
        let a = VideoData::new(t, 0, Some(Arc::clone(&image)));
        let b = VideoData::new(t, 0, Some(image));
        assert_eq!(a, b);
        let c = VideoData::new(t, 0, Some(Image::shared(ImageInfo::new(4, 4, PixelType::RGB_U8))));
        assert_ne!(a, c);
    }
}
