// crates/reelplay-timeline/src/player_cache.rs
//
// The read-ahead/read-behind prefetch policy. Each player tick hands the
// policy the current time and direction; it computes the target window,
// issues timeline requests for the frames and seconds not yet held, retires
// completed futures, cancels in-flight reads that left the window, and
// drops held data outside it. Data inside the window is pinned — eviction
// only ever removes out-of-window entries.
//
// The policy is deterministic for fixed inputs; the tests drive it with
// instantly-completing readers.

use std::collections::HashMap;

use reelplay_core::time::{RationalTime, TimeRange};

use reelplay_io::future::Future;
use reelplay_io::Options as IoOptions;

use crate::timeline::{AudioData, Timeline, VideoData};
use crate::util::{loop_cache_ranges, to_ranges};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheDirection {
    #[default]
    Forward,
    Reverse,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheOptions {
    /// Seconds to prefetch past the current time.
    pub read_ahead: f64,
    /// Seconds to keep behind it.
    pub read_behind: f64,
    /// Byte budget across held video and audio.
    pub byte_count: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { read_ahead: 4.0, read_behind: 0.5, byte_count: 1024 * 1024 * 1024 }
    }
}

/// What the cache currently holds, published to observers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheInfo {
    pub video_byte_count: usize,
    pub audio_byte_count: usize,
    /// Coverage as contiguous time ranges.
    pub video_frames: Vec<TimeRange>,
    pub audio_seconds: Vec<TimeRange>,
}

/// Whether the window wraps at the in/out bounds or clamps to them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowWrap {
    #[default]
    Wrap,
    Clamp,
}

/// The target prefetch window: `[current - behind, current + ahead]` for
/// Forward (mirrored for Reverse), wrapped or clamped into the in/out
/// range.
pub fn cache_window(
    current: RationalTime,
    direction: CacheDirection,
    options: &CacheOptions,
    in_out: &TimeRange,
    wrap: WindowWrap,
) -> Vec<TimeRange> {
    let rate = current.rate();
    let (behind, ahead) = match direction {
        CacheDirection::Forward => (options.read_behind, options.read_ahead),
        CacheDirection::Reverse => (options.read_ahead, options.read_behind),
    };
    let start = current - RationalTime::from_seconds(behind, rate).round();
    let end = current + RationalTime::from_seconds(ahead, rate).round();
    let window = TimeRange::from_start_end_time(
        start,
        end + RationalTime::new(1.0, rate),
    );
    match wrap {
        WindowWrap::Wrap => loop_cache_ranges(&window, in_out),
        WindowWrap::Clamp => window.intersection(in_out).map(|r| vec![r]).unwrap_or_default(),
    }
}

pub struct PlaybackCache {
    video: HashMap<i64, VideoData>,
    video_in_flight: HashMap<i64, Future<VideoData>>,
    audio: HashMap<i64, AudioData>,
    audio_in_flight: HashMap<i64, Future<AudioData>>,
}

impl PlaybackCache {
    pub fn new() -> Self {
        Self {
            video: HashMap::new(),
            video_in_flight: HashMap::new(),
            audio: HashMap::new(),
            audio_in_flight: HashMap::new(),
        }
    }

    pub fn video_at(&self, frame: i64) -> Option<&VideoData> {
        self.video.get(&frame)
    }

    pub fn audio_at(&self, seconds: i64) -> Option<&AudioData> {
        self.audio.get(&seconds)
    }

    pub fn video_byte_count(&self) -> usize {
        self.video.values().map(VideoData::byte_count).sum()
    }

    pub fn audio_byte_count(&self) -> usize {
        self.audio.values().map(AudioData::byte_count).sum()
    }

    /// Frames with an outstanding read, for tests and observability.
    pub fn in_flight_frames(&self) -> Vec<i64> {
        self.video_in_flight.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        for (_, future) in self.video_in_flight.drain() {
            future.cancel();
        }
        for (_, future) in self.audio_in_flight.drain() {
            future.cancel();
        }
        self.video.clear();
        self.audio.clear();
    }

    /// One policy step. `wrap` follows the player's loop mode.
    pub fn update(
        &mut self,
        timeline: &Timeline,
        current: RationalTime,
        direction: CacheDirection,
        in_out: &TimeRange,
        wrap: WindowWrap,
        options: &CacheOptions,
        io_options: &IoOptions,
    ) {
        let ranges = cache_window(current, direction, options, in_out, wrap);
        let rate = current.rate();

        // The wanted frame set, in issue order.
        let mut wanted_frames: Vec<i64> = Vec::new();
        for range in &ranges {
            let start = range.start_time().rescaled_to(rate).to_frames();
            let end = range.end_time_exclusive().rescaled_to(rate).ceil().to_frames();
            for frame in start..end {
                wanted_frames.push(frame);
            }
        }
        // Reverse playback wants frames below the current time first.
        if direction == CacheDirection::Reverse {
            wanted_frames.reverse();
        }
        let wanted: std::collections::HashSet<i64> = wanted_frames.iter().copied().collect();

        // Seconds covered by the window, for audio granules.
        let mut wanted_seconds: Vec<i64> = Vec::new();
        for range in &ranges {
            let start = range.start_time().to_seconds().floor() as i64;
            let end = (range.end_time_exclusive().to_seconds() - 1e-9).floor() as i64;
            for second in start..=end {
                if !wanted_seconds.contains(&second) {
                    wanted_seconds.push(second);
                }
            }
        }
        let wanted_audio: std::collections::HashSet<i64> =
            wanted_seconds.iter().copied().collect();

        // Cancel reads whose target left the window.
        self.video_in_flight.retain(|frame, future| {
            let keep = wanted.contains(frame);
            if !keep {
                future.cancel();
            }
            keep
        });
        self.audio_in_flight.retain(|second, future| {
            let keep = wanted_audio.contains(second);
            if !keep {
                future.cancel();
            }
            keep
        });

        // Pinning: held entries outside the window are the only evictable
        // ones, and the window move just evicted them.
        self.video.retain(|frame, _| wanted.contains(frame));
        self.audio.retain(|second, _| wanted_audio.contains(second));

        // Retire completed reads.
        let mut completed: Vec<(i64, VideoData)> = Vec::new();
        self.video_in_flight.retain(|frame, future| match future.try_get() {
            Some(Ok(data)) => {
                completed.push((*frame, data));
                false
            }
            Some(Err(_)) => false,
            None => true,
        });
        for (frame, data) in completed {
            self.video.insert(frame, data);
        }
        let mut completed: Vec<(i64, AudioData)> = Vec::new();
        self.audio_in_flight.retain(|second, future| match future.try_get() {
            Some(Ok(data)) => {
                completed.push((*second, data));
                false
            }
            Some(Err(_)) => false,
            None => true,
        });
        for (second, data) in completed {
            self.audio.insert(second, data);
        }

        // Issue what is missing, bounded by the concurrent request caps and
        // the byte budget.
        let video_cap = timeline.options().video_request_count;
        let audio_cap = timeline.options().audio_request_count;
        let bytes_used = self.video_byte_count() + self.audio_byte_count();
        if bytes_used < options.byte_count {
            for frame in &wanted_frames {
                if self.video_in_flight.len() >= video_cap {
                    break;
                }
                if self.video.contains_key(frame) || self.video_in_flight.contains_key(frame) {
                    continue;
                }
                let future = timeline.video(RationalTime::from_frames(*frame, rate), io_options);
                self.video_in_flight.insert(*frame, future);
            }
            for second in &wanted_seconds {
                if self.audio_in_flight.len() >= audio_cap {
                    break;
                }
                if self.audio.contains_key(second) || self.audio_in_flight.contains_key(second) {
                    continue;
                }
                let future = timeline.audio(*second, io_options);
                self.audio_in_flight.insert(*second, future);
            }
        }
    }

    pub fn info(&self, rate: f64) -> CacheInfo {
        let video_times: Vec<RationalTime> = self
            .video
            .keys()
            .map(|frame| RationalTime::from_frames(*frame, rate))
            .collect();
        let audio_times: Vec<RationalTime> = self
            .audio
            .keys()
            .map(|second| RationalTime::from_frames(*second, 1.0))
            .collect();
        CacheInfo {
            video_byte_count: self.video_byte_count(),
            audio_byte_count: self.audio_byte_count(),
            video_frames: to_ranges(video_times),
            audio_seconds: to_ranges(audio_times),
        }
    }
}

impl Default for PlaybackCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: f64, duration: f64) -> TimeRange {
        TimeRange::new(RationalTime::new(start, 24.0), RationalTime::new(duration, 24.0))
    }

    #[test]
    fn forward_window_leans_ahead() {
        let options = CacheOptions { read_ahead: 1.0, read_behind: 0.25, byte_count: usize::MAX };
        let in_out = range(0.0, 240.0);
        let ranges = cache_window(
            RationalTime::new(48.0, 24.0),
            CacheDirection::Forward,
            &options,
            &in_out,
            WindowWrap::Clamp,
        );
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start_time().value(), 42.0);
        assert_eq!(ranges[0].end_time_exclusive().value(), 73.0);
    }

    #[test]
    fn reverse_window_mirrors() {
        let options = CacheOptions { read_ahead: 1.0, read_behind: 0.25, byte_count: usize::MAX };
        let in_out = range(0.0, 240.0);
        let ranges = cache_window(
            RationalTime::new(48.0, 24.0),
            CacheDirection::Reverse,
            &options,
            &in_out,
            WindowWrap::Clamp,
        );
        assert_eq!(ranges[0].start_time().value(), 24.0);
        assert_eq!(ranges[0].end_time_exclusive().value(), 55.0);
    }

    #[test]
    fn window_wraps_under_loop() {
        let options = CacheOptions { read_ahead: 1.0, read_behind: 0.0, byte_count: usize::MAX };
        let in_out = range(0.0, 48.0);
        let ranges = cache_window(
            RationalTime::new(40.0, 24.0),
            CacheDirection::Forward,
            &options,
            &in_out,
            WindowWrap::Wrap,
        );
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start_time().value(), 40.0);
        assert_eq!(ranges[1].start_time().value(), 0.0);
    }

    #[test]
    fn window_clamps_without_loop() {
        let options = CacheOptions { read_ahead: 1.0, read_behind: 0.0, byte_count: usize::MAX };
        let in_out = range(0.0, 48.0);
        let ranges = cache_window(
            RationalTime::new(40.0, 24.0),
            CacheDirection::Forward,
            &options,
            &in_out,
            WindowWrap::Clamp,
        );
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].end_time_exclusive().value(), 48.0);
    }
}
