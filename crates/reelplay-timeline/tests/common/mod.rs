// crates/reelplay-timeline/tests/common/mod.rs
//
// Shared fixtures: on-disk PPM sequences, a never-completing "slow" plugin
// for cancellation tests, and a synthetic audio plugin.

// Each integration binary picks the fixtures it needs.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use reelplay_core::audio::{Audio, AudioDataType, AudioInfo};
use reelplay_core::error::{Error, Result};
use reelplay_core::image::ImageInfo;
use reelplay_core::path::{MemoryRead, Path};
use reelplay_core::time::{RationalTime, TimeRange};

use reelplay_io::future::{pair, Future};
use reelplay_io::plugin::{ExtensionMap, FileType, Plugin, Read, Write};
use reelplay_io::{AudioData, Info, Options, VideoData};

/// Write a PPM sequence `frame.0001.ppm ..= frame.<count>.ppm` whose first
/// byte encodes the frame number.
pub fn write_ppm_sequence(dir: &std::path::Path, count: usize) -> String {
    for frame in 1..=count {
        let mut bytes = b"P6\n2 2\n255\n".to_vec();
        bytes.extend([frame as u8; 12]);
        std::fs::write(dir.join(format!("frame.{frame:04}.ppm")), bytes).unwrap();
    }
    format!("{}/frame.0001.ppm", dir.display())
}

// ── A reader whose decodes never finish ──────────────────────────────────────

pub struct SlowPlugin {
    extensions: ExtensionMap,
    frames: i64,
}

impl SlowPlugin {
    pub fn new(frames: i64) -> Self {
        let mut extensions = ExtensionMap::new();
        extensions.insert(".slow".into(), FileType::Movie);
        Self { extensions, frames }
    }
}

impl Plugin for SlowPlugin {
    fn name(&self) -> &str {
        "Slow"
    }

    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }

    fn read(&self, _path: &Path, _memory: &[MemoryRead], _options: &Options)
        -> Result<Arc<dyn Read>> {
        Ok(Arc::new(SlowRead {
            frames: self.frames,
            pending: Mutex::new(VecDeque::new()),
        }))
    }

    fn write_info(&self, _info: &ImageInfo, _options: &Options) -> Result<ImageInfo> {
        Err(Error::Format("read-only".into()))
    }

    fn write(&self, _path: &Path, _info: &Info, _options: &Options) -> Result<Box<dyn Write>> {
        Err(Error::Format("read-only".into()))
    }
}

struct SlowRead {
    frames: i64,
    pending: Mutex<VecDeque<reelplay_io::future::Promise<VideoData>>>,
}

impl Read for SlowRead {
    fn info(&self) -> Future<Info> {
        let mut info = Info::default();
        info.video.push(ImageInfo::new(2, 2, reelplay_core::image::PixelType::RGB_U8));
        info.video_time_range = TimeRange::new(
            RationalTime::new(0.0, 24.0),
            RationalTime::new(self.frames as f64, 24.0),
        );
        Future::ready(Ok(info))
    }

    fn read_video(&self, _time: RationalTime, _options: &Options) -> Future<VideoData> {
        let (promise, future) = pair();
        self.pending.lock().unwrap().push_back(promise);
        future
    }

    fn cancel_requests(&self) {
        let mut pending = self.pending.lock().unwrap();
        for promise in pending.drain(..) {
            promise.abort();
        }
    }
}

// ── Synthetic audio ──────────────────────────────────────────────────────────

pub const AUDIO_SAMPLE_RATE: u32 = 100;

pub struct ToneAudioPlugin {
    extensions: ExtensionMap,
    seconds: f64,
}

impl ToneAudioPlugin {
    pub fn new(seconds: f64) -> Self {
        let mut extensions = ExtensionMap::new();
        extensions.insert(".wav".into(), FileType::Audio);
        Self { extensions, seconds }
    }
}

impl Plugin for ToneAudioPlugin {
    fn name(&self) -> &str {
        "Tone"
    }

    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }

    fn read(&self, _path: &Path, _memory: &[MemoryRead], _options: &Options)
        -> Result<Arc<dyn Read>> {
        Ok(Arc::new(ToneRead { seconds: self.seconds }))
    }

    fn write_info(&self, _info: &ImageInfo, _options: &Options) -> Result<ImageInfo> {
        Err(Error::Format("read-only".into()))
    }

    fn write(&self, _path: &Path, _info: &Info, _options: &Options) -> Result<Box<dyn Write>> {
        Err(Error::Format("read-only".into()))
    }
}

struct ToneRead {
    seconds: f64,
}

impl ToneRead {
    fn audio_info(&self) -> AudioInfo {
        AudioInfo::new(1, AudioDataType::S16, AUDIO_SAMPLE_RATE)
    }
}

impl Read for ToneRead {
    fn info(&self) -> Future<Info> {
        let mut info = Info::default();
        info.audio = Some(self.audio_info());
        info.audio_time_range = TimeRange::new(
            RationalTime::new(0.0, AUDIO_SAMPLE_RATE as f64),
            RationalTime::new(self.seconds * AUDIO_SAMPLE_RATE as f64, AUDIO_SAMPLE_RATE as f64),
        );
        Future::ready(Ok(info))
    }

    fn read_video(&self, time: RationalTime, _options: &Options) -> Future<VideoData> {
        Future::ready(Ok(VideoData::new(time, 0, None)))
    }

    /// Every sample is the byte 9; short ranges at the media edge come back
    /// truncated and the resolver pads them.
    fn read_audio(&self, range: TimeRange, _options: &Options) -> Future<AudioData> {
        let info = self.audio_info();
        let media_end = self.seconds * AUDIO_SAMPLE_RATE as f64;
        let start = range.start_time().value().max(0.0);
        let end = range.end_time_exclusive().value().min(media_end);
        let samples = (end - start).max(0.0) as usize;
        let mut audio = Audio::new(info, samples);
        audio.data_mut().fill(9);
        Future::ready(Ok(AudioData::new(range.start_time(), Some(Arc::new(audio)))))
    }

    fn cancel_requests(&self) {}
}

/// Poll until `predicate` holds or the deadline passes.
pub fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    false
}
