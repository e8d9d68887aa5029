// crates/reelplay-io/src/cache.rs
//
// The process-wide decoded-data cache: string fingerprint -> video frame or
// audio slice, bounded in bytes. Readers add entries as decodes complete;
// the playback cache policy is the steady-state mutator. Entries are shared
// immutable handles — a get() clones the Arc, never the pixels.

use std::sync::{Arc, Mutex};

use reelplay_core::memory::LruCache;
use reelplay_core::path::Path;
use reelplay_core::time::{RationalTime, TimeRange};

use crate::{AudioData, Options, VideoData};

/// Default budget: 1 GB.
pub const DEFAULT_MAX: usize = 1024 * 1024 * 1024;

#[derive(Clone)]
pub enum CacheItem {
    Video(VideoData),
    Audio(AudioData),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_percentage(&self) -> f32 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f32 / total as f32 * 100.0
        } else {
            0.0
        }
    }
}

pub struct Cache {
    state: Mutex<State>,
}

struct State {
    lru: LruCache<String, CacheItem>,
    stats: CacheStats,
}

impl Cache {
    pub fn new() -> Arc<Self> {
        Self::with_max(DEFAULT_MAX)
    }

    pub fn with_max(max: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State { lru: LruCache::new(max), stats: CacheStats::default() }),
        })
    }

    pub fn max(&self) -> usize {
        self.state.lock().unwrap().lru.max()
    }

    pub fn set_max(&self, max: usize) {
        self.state.lock().unwrap().lru.set_max(max);
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().lru.size()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().lru.count()
    }

    pub fn percentage(&self) -> f32 {
        self.state.lock().unwrap().lru.percentage()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().unwrap().stats
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().lru.contains(&key.to_string())
    }

    /// The caller supplies the byte cost; the cache does not measure.
    pub fn add(&self, key: String, item: CacheItem, byte_count: usize) {
        self.state.lock().unwrap().lru.add(key, item, byte_count);
    }

    pub fn get_video(&self, key: &str) -> Option<VideoData> {
        let mut state = self.state.lock().unwrap();
        match state.lru.get(&key.to_string()) {
            Some(CacheItem::Video(data)) => {
                state.stats.hits += 1;
                Some(data)
            }
            _ => {
                state.stats.misses += 1;
                None
            }
        }
    }

    pub fn get_audio(&self, key: &str) -> Option<AudioData> {
        let mut state = self.state.lock().unwrap();
        match state.lru.get(&key.to_string()) {
            Some(CacheItem::Audio(data)) => {
                state.stats.hits += 1;
                Some(data)
            }
            _ => {
                state.stats.misses += 1;
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        self.state.lock().unwrap().lru.remove(&key.to_string());
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().lru.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().lru.keys()
    }
}

/// Fingerprint for one video frame: path, time, layer, and the options the
/// decode is sensitive to.
pub fn video_key(path: &Path, time: RationalTime, layer: u16, options: &Options) -> String {
    format!(
        "{}@v{}/{}#{}{}",
        path.get(),
        time.value(),
        time.rate(),
        layer,
        options_suffix(options)
    )
}

/// Fingerprint for one audio span.
pub fn audio_key(path: &Path, range: TimeRange, options: &Options) -> String {
    format!(
        "{}@a{}+{}/{}{}",
        path.get(),
        range.start_time().value(),
        range.duration().value(),
        range.start_time().rate(),
        options_suffix(options)
    )
}

fn options_suffix(options: &Options) -> String {
    let mut out = String::new();
    for (key, value) in options {
        out.push(';');
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelplay_core::image::{Image, ImageInfo, PixelType};

    fn frame(key_time: f64) -> (String, CacheItem, usize) {
        let image = Image::shared(ImageInfo::new(8, 8, PixelType::RGB_U8));
        let byte_count = image.byte_count();
        let path = Path::parse("clip.0001.ppm").unwrap();
        let data =
            VideoData::new(RationalTime::new(key_time, 24.0), 0, Some(image));
        (
            video_key(&path, data.time, 0, &Options::new()),
            CacheItem::Video(data),
            byte_count,
        )
    }

    #[test]
    fn add_get_and_stats() {
        let cache = Cache::with_max(10_000);
        let (key, item, cost) = frame(1.0);
        assert!(cache.get_video(&key).is_none());
        cache.add(key.clone(), item, cost);
        assert!(cache.get_video(&key).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_percentage(), 50.0);
    }

    #[test]
    fn eviction_under_byte_budget() {
        let cache = Cache::with_max(100);
        for i in 0..10 {
            cache.add(format!("k{i}"), frame(i as f64).1, 20);
        }
        assert!(cache.size() <= 100);
        assert_eq!(cache.count(), 5);
        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["k5", "k6", "k7", "k8", "k9"]);
    }

    #[test]
    fn keys_distinguish_options() {
        let path = Path::parse("clip.0001.ppm").unwrap();
        let t = RationalTime::new(1.0, 24.0);
        let plain = video_key(&path, t, 0, &Options::new());
        let mut options = Options::new();
        options.insert("SequenceIO/DefaultSpeed".into(), "30".into());
        let tuned = video_key(&path, t, 0, &options);
        assert_ne!(plain, tuned);
        assert_ne!(video_key(&path, t, 1, &Options::new()), plain);
    }
}
