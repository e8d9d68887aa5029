// crates/reelplay-core/src/settings.rs
//
// JSON settings round-trip. The host decides where the file lives (usually
// <prefs>/settings.json); this layer owns reading, typed access with
// defaults, the recent-files list, and publishing which key changed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::observer::{Observable, Subscription};

/// The configuration keys the playback core reads.
pub mod keys {
    pub const CACHE_READ_AHEAD: &str = "Cache/ReadAhead";
    pub const CACHE_READ_BEHIND: &str = "Cache/ReadBehind";
    pub const FILE_SEQUENCE_AUDIO: &str = "FileSequence/Audio";
    pub const FILE_SEQUENCE_AUDIO_FILE_NAME: &str = "FileSequence/AudioFileName";
    pub const FILE_SEQUENCE_AUDIO_DIRECTORY: &str = "FileSequence/AudioDirectory";
    pub const PERFORMANCE_VIDEO_REQUEST_COUNT: &str = "Performance/VideoRequestCount";
    pub const PERFORMANCE_AUDIO_REQUEST_COUNT: &str = "Performance/AudioRequestCount";
    pub const PERFORMANCE_SEQUENCE_THREAD_COUNT: &str = "Performance/SequenceThreadCount";
    pub const PERFORMANCE_FFMPEG_THREAD_COUNT: &str = "Performance/FFmpegThreadCount";
    pub const PERFORMANCE_FFMPEG_YUV_TO_RGB: &str = "Performance/FFmpegYUVToRGBConversion";
    pub const PERFORMANCE_TIMER_MODE: &str = "Performance/TimerMode";
    pub const PERFORMANCE_AUDIO_BUFFER_FRAME_COUNT: &str = "Performance/AudioBufferFrameCount";
    pub const MISC_MAX_FILE_SEQUENCE_DIGITS: &str = "Misc/MaxFileSequenceDigits";
    pub const RECENT_FILES: &str = "Files/Recent";
}

const RECENT_FILES_MAX: usize = 10;

pub struct Settings {
    file_name: PathBuf,
    values: BTreeMap<String, Value>,
    defaults: BTreeMap<String, Value>,
    changed: Observable<String>,
}

impl Settings {
    /// Open the settings file, keeping whatever was stored. A missing or
    /// unparseable file starts empty rather than failing.
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        let file_name = file_name.into();
        let mut values = BTreeMap::new();
        if let Ok(contents) = std::fs::read_to_string(&file_name) {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&contents) {
                values = map.into_iter().collect();
            }
        }
        Self {
            file_name,
            values,
            defaults: BTreeMap::new(),
            changed: Observable::new(String::new()),
        }
    }

    /// Typed read; None when absent or of the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .or_else(|| self.defaults.get(key))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        self.get(key).unwrap_or(fallback)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.values.insert(key.to_string(), value);
            self.changed.set_always(key.to_string());
        }
    }

    /// Register the default for a key without overriding a stored value.
    pub fn set_default<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.defaults.insert(key.to_string(), value);
        }
    }

    /// Reset every key that has a default back to it.
    pub fn reset(&mut self) {
        let defaults: Vec<(String, Value)> =
            self.defaults.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, value) in defaults {
            self.values.insert(key.clone(), value);
            self.changed.set_always(key);
        }
    }

    /// Observe which key changed.
    pub fn observe(&mut self) -> Subscription<String> {
        self.changed.observe()
    }

    pub fn recent_files(&self) -> Vec<String> {
        self.get(keys::RECENT_FILES).unwrap_or_default()
    }

    /// Push a file to the front of the recent list, deduplicated and capped.
    pub fn add_recent_file(&mut self, file: &str) {
        let mut recent = self.recent_files();
        recent.retain(|f| f != file);
        recent.insert(0, file.to_string());
        recent.truncate(RECENT_FILES_MAX);
        self.set(keys::RECENT_FILES, recent);
    }

    pub fn save(&self) -> Result<()> {
        let map: serde_json::Map<String, Value> =
            self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let contents = serde_json::to_string_pretty(&Value::Object(map))?;
        std::fs::write(&self.file_name, contents)?;
        Ok(())
    }
}
