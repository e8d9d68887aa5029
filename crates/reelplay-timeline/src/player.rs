// crates/reelplay-timeline/src/player.rs
//
// The player: a wall-clock state machine over one timeline. It runs on the
// caller's tick thread — tick() takes the clock as a parameter so playback
// is deterministic under test — and publishes observables for time,
// playback state, resolved video/audio, and cache coverage. The prefetch
// policy (player_cache) runs inside tick.
//
// Playback anchoring: set_playback/seek record an anchor (time, instant,
// direction); each tick derives the desired time from the anchor rather
// than accumulating per-tick deltas, so long ticks do not drift. PingPong
// folds the elapsed time through a triangle wave around the in/out range,
// which keeps the reflection exact without re-anchoring.

use std::sync::Arc;
use std::time::Instant;

use reelplay_core::audio::RingBuffer;
use reelplay_core::observer::{Observable, Subscription};
use reelplay_core::time::{RationalTime, TimeRange};

use reelplay_io::Options as IoOptions;

use crate::player_cache::{
    CacheDirection, CacheInfo, CacheOptions, PlaybackCache, WindowWrap,
};
use crate::timeline::{AudioData, Timeline, VideoData};
use crate::util::loop_time;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Playback {
    #[default]
    Stopped,
    Forward,
    Reverse,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopMode {
    #[default]
    Loop,
    Once,
    PingPong,
}

/// What drives the playback clock. Audio-driven timing is supplied by the
/// host through set_external_time; the player itself always consumes the
/// tick clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TimerMode {
    #[default]
    System,
    Audio,
}

#[derive(Clone, Debug)]
pub struct PlayerOptions {
    pub cache: CacheOptions,
    pub timer_mode: TimerMode,
    /// Device pull granularity, in sample-frames.
    pub audio_buffer_frame_count: usize,
    /// Audio sync offset in seconds.
    pub audio_offset: f64,
    /// Playback speed override; the default is the timeline's native rate.
    pub speed: Option<f64>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            cache: CacheOptions::default(),
            timer_mode: TimerMode::default(),
            audio_buffer_frame_count: 256,
            audio_offset: 0.0,
            speed: None,
        }
    }
}

impl PlayerOptions {
    /// Pick up the recognized configuration keys from a settings store.
    pub fn from_settings(settings: &reelplay_core::settings::Settings) -> Self {
        use reelplay_core::settings::keys;
        let mut out = Self::default();
        out.cache.read_ahead = settings.get_or(keys::CACHE_READ_AHEAD, out.cache.read_ahead);
        out.cache.read_behind = settings.get_or(keys::CACHE_READ_BEHIND, out.cache.read_behind);
        out.timer_mode = settings.get_or(keys::PERFORMANCE_TIMER_MODE, out.timer_mode);
        out.audio_buffer_frame_count = settings
            .get_or(keys::PERFORMANCE_AUDIO_BUFFER_FRAME_COUNT, out.audio_buffer_frame_count);
        out
    }
}

struct Anchor {
    time: RationalTime,
    instant: Instant,
    playback: Playback,
}

pub struct Player {
    timeline: Arc<Timeline>,
    options: PlayerOptions,
    io_options: IoOptions,
    speed: f64,
    default_speed: f64,

    playback: Observable<Playback>,
    loop_mode: Observable<LoopMode>,
    current_time: Observable<RationalTime>,
    in_out_range: Observable<TimeRange>,
    video_data: Observable<VideoData>,
    audio_data: Observable<AudioData>,
    cache_info: Observable<CacheInfo>,
    volume: Observable<f32>,
    mute: Observable<bool>,

    audio_offset: f64,
    external_time: Option<RationalTime>,
    anchor: Option<Anchor>,
    cache: PlaybackCache,

    ring: Option<Arc<RingBuffer>>,
    ring_second: Option<i64>,
}

impl Player {
    pub fn new(timeline: Arc<Timeline>, options: PlayerOptions) -> Self {
        let time_range = timeline.time_range();
        let default_speed = timeline.speed();
        let speed = options.speed.unwrap_or(default_speed);
        let audio_offset = options.audio_offset;
        Self {
            timeline,
            options,
            io_options: IoOptions::new(),
            speed,
            default_speed,
            playback: Observable::new(Playback::Stopped),
            loop_mode: Observable::new(LoopMode::Loop),
            current_time: Observable::new(time_range.start_time()),
            in_out_range: Observable::new(time_range),
            video_data: Observable::new(VideoData::default()),
            audio_data: Observable::new(AudioData::default()),
            cache_info: Observable::new(CacheInfo::default()),
            volume: Observable::new(1.0),
            mute: Observable::new(false),
            audio_offset,
            external_time: None,
            anchor: None,
            cache: PlaybackCache::new(),
            ring: None,
            ring_second: None,
        }
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    // ── State ────────────────────────────────────────────────────────────

    pub fn playback(&self) -> Playback {
        *self.playback.get()
    }

    pub fn loop_mode(&self) -> LoopMode {
        *self.loop_mode.get()
    }

    pub fn current_time(&self) -> RationalTime {
        *self.current_time.get()
    }

    pub fn in_out_range(&self) -> TimeRange {
        *self.in_out_range.get()
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn default_speed(&self) -> f64 {
        self.default_speed
    }

    pub fn volume(&self) -> f32 {
        *self.volume.get()
    }

    pub fn is_muted(&self) -> bool {
        *self.mute.get()
    }

    pub fn audio_offset(&self) -> f64 {
        self.audio_offset
    }

    /// The most recently published frame; what a pull-model output device
    /// polls between observable updates.
    pub fn current_video(&self) -> VideoData {
        self.video_data.get().clone()
    }

    /// The most recently published audio slice.
    pub fn current_audio(&self) -> AudioData {
        self.audio_data.get().clone()
    }

    // ── Observables ──────────────────────────────────────────────────────

    pub fn observe_playback(&mut self) -> Subscription<Playback> {
        self.playback.observe()
    }

    pub fn observe_loop_mode(&mut self) -> Subscription<LoopMode> {
        self.loop_mode.observe()
    }

    pub fn observe_current_time(&mut self) -> Subscription<RationalTime> {
        self.current_time.observe()
    }

    pub fn observe_in_out_range(&mut self) -> Subscription<TimeRange> {
        self.in_out_range.observe()
    }

    pub fn observe_video(&mut self) -> Subscription<VideoData> {
        self.video_data.observe()
    }

    pub fn observe_audio(&mut self) -> Subscription<AudioData> {
        self.audio_data.observe()
    }

    pub fn observe_cache_info(&mut self) -> Subscription<CacheInfo> {
        self.cache_info.observe()
    }

    pub fn observe_volume(&mut self) -> Subscription<f32> {
        self.volume.observe()
    }

    pub fn observe_mute(&mut self) -> Subscription<bool> {
        self.mute.observe()
    }

    // ── Inputs ───────────────────────────────────────────────────────────

    pub fn set_playback(&mut self, playback: Playback) {
        if self.playback.set_if_changed(playback) {
            self.anchor = None;
            self.ring_second = None;
        }
    }

    pub fn set_loop_mode(&mut self, loop_mode: LoopMode) {
        self.loop_mode.set_if_changed(loop_mode);
    }

    pub fn set_speed(&mut self, speed: f64) {
        if speed > 0.0 && speed != self.speed {
            self.speed = speed;
            self.anchor = None;
        }
    }

    /// Jump to a time, clamped into the in/out range. Predictive reads
    /// outside the new window are cancelled on the spot.
    pub fn seek(&mut self, time: RationalTime) {
        let range = self.in_out_range();
        let time = if range.contains(&time) {
            time
        } else {
            range.clamp_time(&time)
        };
        let time = time.floor();
        self.anchor = None;
        self.ring_second = None;
        self.current_time.set_if_changed(time);
        self.update_cache();
    }

    /// Step one frame; stops playback like a scrub.
    pub fn frame_next(&mut self) {
        self.set_playback(Playback::Stopped);
        let one = RationalTime::new(1.0, self.current_time().rate());
        let (time, _) = loop_time(self.current_time() + one, &self.in_out_range());
        self.seek(time);
    }

    pub fn frame_prev(&mut self) {
        self.set_playback(Playback::Stopped);
        let one = RationalTime::new(1.0, self.current_time().rate());
        let (time, _) = loop_time(self.current_time() - one, &self.in_out_range());
        self.seek(time);
    }

    pub fn go_start(&mut self) {
        let start = self.in_out_range().start_time();
        self.seek(start);
    }

    pub fn go_end(&mut self) {
        let end = self.in_out_range().end_time_inclusive();
        self.seek(end);
    }

    /// Restrict playback to a sub-range of the timeline.
    pub fn set_in_out_range(&mut self, range: TimeRange) {
        if self.in_out_range.set_if_changed(range) {
            self.anchor = None;
            let clamped = range.clamp_time(&self.current_time());
            self.current_time.set_if_changed(clamped);
        }
    }

    pub fn reset_in_out_range(&mut self) {
        self.set_in_out_range(self.timeline.time_range());
    }

    /// Slave this player to an external clock; None releases it.
    pub fn set_external_time(&mut self, time: Option<RationalTime>) {
        self.external_time = time;
        self.anchor = None;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume.set_if_changed(volume.clamp(0.0, 2.0));
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute.set_if_changed(mute);
    }

    pub fn set_audio_offset(&mut self, offset: f64) {
        self.audio_offset = offset;
    }

    /// The ring buffer an audio device callback drains. Created on first
    /// use, sized for two seconds of the timeline's audio.
    pub fn audio_ring(&mut self) -> Arc<RingBuffer> {
        if self.ring.is_none() {
            let bytes_per_second = self
                .timeline
                .io_info()
                .audio
                .map(|info| info.frame_byte_count() * info.sample_rate as usize)
                .unwrap_or(48000 * 8);
            let min = self.options.audio_buffer_frame_count * 16;
            self.ring = Some(Arc::new(RingBuffer::new((bytes_per_second * 2).max(min))));
        }
        Arc::clone(self.ring.as_ref().unwrap())
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.cache.info(self.default_speed)
    }

    /// Frames with in-flight predictive reads; observability for tests and
    /// HUDs.
    pub fn in_flight_frames(&self) -> Vec<i64> {
        self.cache.in_flight_frames()
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    /// Advance the player against the given wall clock and drive the
    /// prefetch policy.
    pub fn tick(&mut self, now: Instant) {
        let playback = self.playback();
        if let Some(external) = self.external_time {
            let (time, _) = loop_time(external.floor(), &self.in_out_range());
            self.current_time.set_if_changed(time);
        } else if playback != Playback::Stopped {
            let current = self.current_time();
            let anchor = self.anchor.get_or_insert(Anchor {
                time: current,
                instant: now,
                playback,
            });
            let (anchor_time, anchor_instant, anchor_playback) =
                (anchor.time, anchor.instant, anchor.playback);
            let rate = self.default_speed;
            let elapsed = now.duration_since(anchor_instant).as_secs_f64();
            let delta = elapsed * self.speed;
            let signed = match anchor_playback {
                Playback::Reverse => -delta,
                _ => delta,
            };
            let desired = anchor_time + RationalTime::from_seconds(signed, rate);
            let range = self.in_out_range();
            match self.loop_mode() {
                LoopMode::Loop => {
                    let (time, _) = loop_time(desired.floor(), &range);
                    self.current_time.set_if_changed(time);
                }
                LoopMode::Once => {
                    let desired = desired.floor();
                    if range.contains(&desired) {
                        self.current_time.set_if_changed(desired);
                    } else {
                        let edge = match anchor_playback {
                            Playback::Reverse => range.start_time(),
                            _ => range.end_time_inclusive(),
                        };
                        self.current_time.set_if_changed(edge);
                        self.playback.set_if_changed(Playback::Stopped);
                        self.anchor = None;
                    }
                }
                LoopMode::PingPong => {
                    let (time, flipped) = ping_pong(desired, &range);
                    self.current_time.set_if_changed(time.floor());
                    let direction = if flipped {
                        match anchor_playback {
                            Playback::Reverse => Playback::Forward,
                            _ => Playback::Reverse,
                        }
                    } else {
                        anchor_playback
                    };
                    // Publish the reflected direction without disturbing
                    // the anchor — the fold stays exact across wraps.
                    self.playback.set_if_changed(direction);
                }
            }
        }
        self.update_cache();
    }

    fn update_cache(&mut self) {
        let direction = match self.playback() {
            Playback::Reverse => CacheDirection::Reverse,
            _ => CacheDirection::Forward,
        };
        let wrap = match self.loop_mode() {
            LoopMode::Loop | LoopMode::PingPong => WindowWrap::Wrap,
            LoopMode::Once => WindowWrap::Clamp,
        };
        let current = self.current_time();
        let in_out = self.in_out_range();
        self.cache.update(
            &self.timeline,
            current,
            direction,
            &in_out,
            wrap,
            &self.options.cache,
            &self.io_options,
        );

        if let Some(data) = self.cache.video_at(current.to_frames()) {
            self.video_data.set_if_changed(data.clone());
        }
        let second = (current.to_seconds() + self.audio_offset).floor() as i64;
        if let Some(data) = self.cache.audio_at(second) {
            self.audio_data.set_if_changed(data.clone());
        }
        self.fill_ring(second);
        self.cache_info.set_if_changed(self.cache.info(self.default_speed));
    }

    /// Keep the device ring topped up with contiguous one-second slices.
    /// A missed slice mutes that second rather than reordering.
    fn fill_ring(&mut self, current_second: i64) {
        let Some(ring) = self.ring.as_ref().map(Arc::clone) else { return };
        if self.playback() != Playback::Forward {
            return;
        }
        let Some(info) = self.timeline.io_info().audio else { return };
        let second_bytes = info.frame_byte_count() * info.sample_rate as usize;
        if second_bytes == 0 {
            return;
        }
        let next = self.ring_second.get_or_insert(current_second);
        while ring.free() >= second_bytes {
            let Some(data) = self.cache.audio_at(*next) else { break };
            if *self.mute.get() || data.layers.is_empty() {
                let silence = vec![0u8; second_bytes];
                ring.write(&silence);
            } else if let Some(audio) = data.layers[0].audio.as_ref() {
                ring.write(audio.data());
            } else {
                let silence = vec![0u8; second_bytes];
                ring.write(&silence);
            }
            *next += 1;
        }
    }
}

/// Fold a desired time through the in/out range as a triangle wave.
/// Returns the reflected time and whether the direction is currently
/// flipped relative to the anchor direction. The fold is symmetric, so it
/// serves both anchor directions.
fn ping_pong(desired: RationalTime, range: &TimeRange) -> (RationalTime, bool) {
    let start = range.start_time();
    let end = range.end_time_inclusive();
    let len = (end - start).value();
    if len <= 0.0 {
        return (start, false);
    }
    let pos = (desired - start).value();
    let period = 2.0 * len;
    let m = pos.rem_euclid(period);
    if m <= len {
        (start + RationalTime::new(m, start.rate()), false)
    } else {
        (start + RationalTime::new(period - m, start.rate()), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelplay_core::time::TimeRange;

    #[test]
    fn player_options_pick_up_settings_keys() {
        use reelplay_core::settings::{keys, Settings};
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::new(dir.path().join("settings.json"));
        settings.set(keys::CACHE_READ_AHEAD, 8.0);
        settings.set(keys::CACHE_READ_BEHIND, 1.0);
        settings.set(keys::PERFORMANCE_TIMER_MODE, TimerMode::Audio);

        let options = PlayerOptions::from_settings(&settings);
        assert_eq!(options.cache.read_ahead, 8.0);
        assert_eq!(options.cache.read_behind, 1.0);
        assert_eq!(options.timer_mode, TimerMode::Audio);
        assert_eq!(
            options.audio_buffer_frame_count,
            PlayerOptions::default().audio_buffer_frame_count
        );
    }

    #[test]
    fn ping_pong_folds_exactly() {
        let range = TimeRange::new(RationalTime::new(0.0, 24.0), RationalTime::new(11.0, 24.0));
        // end_inclusive = 10, so the triangle has length 10.
        let at = |v: f64| ping_pong(RationalTime::new(v, 24.0), &range);
        assert_eq!(at(0.0), (RationalTime::new(0.0, 24.0), false));
        assert_eq!(at(10.0), (RationalTime::new(10.0, 24.0), false));
        assert_eq!(at(12.0), (RationalTime::new(8.0, 24.0), true));
        assert_eq!(at(20.0), (RationalTime::new(0.0, 24.0), false));
        assert_eq!(at(25.0), (RationalTime::new(5.0, 24.0), false));
    }
}
