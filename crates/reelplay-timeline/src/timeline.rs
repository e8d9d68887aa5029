// crates/reelplay-timeline/src/timeline.rs
//
// The timeline engine. One coordinator thread per timeline owns the request
// queues and the per-timeline reader cache; it resolves each (time, options)
// request against the composition into per-layer reader futures, polls them,
// and folds the completed layers into VideoData/AudioData.
//
// Request flow: callers enqueue under the mutex and poke the condvar; the
// coordinator drains pending into in-progress (bounded by the request-count
// caps), issues reader reads, and fulfills promises as layer futures land.
// Identical concurrent requests share one in-progress entry. Shutdown breaks
// every promise with Cancelled and joins the thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use reelplay_core::audio::Audio;
use reelplay_core::error::{Error, Result};
use reelplay_core::image::Image;
use reelplay_core::log::LogSystem;
use reelplay_core::memory::LruCache;
use reelplay_core::path::{MemoryRead, Path, PathOptions};
use reelplay_core::time::{RationalTime, TimeRange};

use reelplay_io::future::{pair, Future, Promise};
use reelplay_io::sequence::OPTION_DEFAULT_SPEED;
use reelplay_io::{self as io, System};

use crate::otio::{self, Clip, Item, MediaReference, Track, TrackKind, TransitionKind};
use crate::otioz;
use crate::util::{timeline_from_path, to_audio_media_time, to_video_media_time};

/// How a bare image sequence finds its audio side-car.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSequenceAudio {
    None,
    #[default]
    BaseName,
    FileName,
    Directory,
}

#[derive(Clone, Debug)]
pub struct Options {
    pub file_sequence_audio: FileSequenceAudio,
    pub file_sequence_audio_file_name: String,
    pub file_sequence_audio_directory: String,
    /// Concurrent in-progress caps; over-cap requests stay pending.
    pub video_request_count: usize,
    pub audio_request_count: usize,
    /// Coordinator poll interval while requests are in flight.
    pub request_timeout: Duration,
    pub io_options: io::Options,
    pub path_options: PathOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            file_sequence_audio: FileSequenceAudio::default(),
            file_sequence_audio_file_name: String::new(),
            file_sequence_audio_directory: String::new(),
            video_request_count: 16,
            audio_request_count: 16,
            request_timeout: Duration::from_millis(5),
            io_options: io::Options::new(),
            path_options: PathOptions::default(),
        }
    }
}

impl Options {
    /// Pick up the recognized configuration keys from a settings store.
    pub fn from_settings(settings: &reelplay_core::settings::Settings) -> Self {
        use reelplay_core::settings::keys;
        let mut out = Self::default();
        out.file_sequence_audio =
            settings.get_or(keys::FILE_SEQUENCE_AUDIO, out.file_sequence_audio);
        out.file_sequence_audio_file_name =
            settings.get_or(keys::FILE_SEQUENCE_AUDIO_FILE_NAME, String::new());
        out.file_sequence_audio_directory =
            settings.get_or(keys::FILE_SEQUENCE_AUDIO_DIRECTORY, String::new());
        out.video_request_count =
            settings.get_or(keys::PERFORMANCE_VIDEO_REQUEST_COUNT, out.video_request_count);
        out.audio_request_count =
            settings.get_or(keys::PERFORMANCE_AUDIO_REQUEST_COUNT, out.audio_request_count);
        if let Some(count) = settings.get::<usize>(keys::PERFORMANCE_SEQUENCE_THREAD_COUNT) {
            out.io_options
                .insert(reelplay_io::sequence::OPTION_THREAD_COUNT.into(), count.to_string());
        }
        if let Some(count) = settings.get::<usize>(keys::PERFORMANCE_FFMPEG_THREAD_COUNT) {
            out.io_options.insert("FFmpeg/ThreadCount".into(), count.to_string());
        }
        if let Some(convert) = settings.get::<bool>(keys::PERFORMANCE_FFMPEG_YUV_TO_RGB) {
            out.io_options
                .insert("FFmpeg/YUVToRGBConversion".into(), convert.to_string());
        }
        if let Some(digits) = settings.get::<usize>(keys::MISC_MAX_FILE_SEQUENCE_DIGITS) {
            out.path_options.max_number_digits = digits;
        }
        out
    }
}

/// Readers kept alive per timeline, keyed by target URL + options.
const READ_CACHE_COUNT: usize = 16;

// ── Resolved data ────────────────────────────────────────────────────────────

/// One video layer at one time. During a transition the layer carries both
/// sides plus the progress value; compositing them is the renderer's job.
#[derive(Clone, Debug, Default)]
pub struct VideoLayer {
    pub image: Option<Arc<Image>>,
    pub image_b: Option<Arc<Image>>,
    pub transition: Option<TransitionKind>,
    pub transition_value: f32,
}

impl PartialEq for VideoLayer {
    fn eq(&self, other: &Self) -> bool {
        fn same(a: &Option<Arc<Image>>, b: &Option<Arc<Image>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }
        same(&self.image, &other.image)
            && same(&self.image_b, &other.image_b)
            && self.transition == other.transition
            && self.transition_value == other.transition_value
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoData {
    pub time: RationalTime,
    pub layers: Vec<VideoLayer>,
}

impl VideoData {
    pub fn byte_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| {
                layer.image.as_ref().map(|i| i.byte_count()).unwrap_or(0)
                    + layer.image_b.as_ref().map(|i| i.byte_count()).unwrap_or(0)
            })
            .sum()
    }
}

/// One audio layer covering one second of track time, padded to the full
/// second. Crossfade application is a downstream mixer concern; the flags
/// mark which edges are inside transitions.
#[derive(Clone, Debug, Default)]
pub struct AudioLayer {
    pub audio: Option<Arc<Audio>>,
    pub in_transition: bool,
    pub out_transition: bool,
}

impl PartialEq for AudioLayer {
    fn eq(&self, other: &Self) -> bool {
        let same = match (&self.audio, &other.audio) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same && self.in_transition == other.in_transition
            && self.out_transition == other.out_transition
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioData {
    pub seconds: i64,
    pub layers: Vec<AudioLayer>,
}

impl AudioData {
    pub fn byte_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| layer.audio.as_ref().map(|a| a.byte_count()).unwrap_or(0))
            .sum()
    }
}

// ── Requests ─────────────────────────────────────────────────────────────────

struct VideoRequest {
    id: u64,
    time: RationalTime,
    options: io::Options,
    promise: Promise<VideoData>,
}

struct AudioRequest {
    id: u64,
    seconds: i64,
    options: io::Options,
    promise: Promise<AudioData>,
}

struct Pending {
    video: Vec<VideoRequest>,
    audio: Vec<AudioRequest>,
    stopped: bool,
}

struct Shared {
    system: Arc<System>,
    log: Arc<LogSystem>,
    path: Path,
    options: Options,
    otio: otio::Timeline,
    time_range: TimeRange,
    io_info: io::Info,
    request_id: AtomicU64,
    pending: Mutex<Pending>,
    cv: Condvar,
}

pub struct Timeline {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Timeline {
    /// Open a timeline from a file: `.otio` JSON, an `.otioz` archive, or a
    /// bare media path that becomes a single-clip cut.
    pub fn from_file(system: &Arc<System>, file_name: &str, options: Options) -> Result<Self> {
        let path = Path::parse_with(file_name, &options.path_options)?;
        let otio = match path.extension().to_lowercase().as_str() {
            ".otio" => otio::Timeline::from_json_str(&std::fs::read_to_string(file_name)?)?,
            ".otioz" => otioz::read(file_name)?,
            _ => timeline_from_path(system, &path, &options)?,
        };
        Self::from_otio(system, otio, path, options)
    }

    /// Wrap an already-built composition.
    pub fn from_otio(
        system: &Arc<System>,
        otio: otio::Timeline,
        path: Path,
        options: Options,
    ) -> Result<Self> {
        let time_range = otio.time_range();
        let log = Arc::clone(system.log());
        let io_info = probe_info(system, &otio, &path, &options);
        let shared = Arc::new(Shared {
            system: Arc::clone(system),
            log,
            path,
            options,
            otio,
            time_range,
            io_info,
            request_id: AtomicU64::new(0),
            pending: Mutex::new(Pending { video: Vec::new(), audio: Vec::new(), stopped: false }),
            cv: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = std::thread::spawn(move || coordinator(worker));
        Ok(Self { shared, thread: Some(thread) })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub fn composition(&self) -> &otio::Timeline {
        &self.shared.otio
    }

    pub fn time_range(&self) -> TimeRange {
        self.shared.time_range
    }

    pub fn duration(&self) -> RationalTime {
        self.shared.time_range.duration()
    }

    /// The native frame rate of the composition.
    pub fn speed(&self) -> f64 {
        self.shared.time_range.duration().rate()
    }

    pub fn io_info(&self) -> &io::Info {
        &self.shared.io_info
    }

    /// Request the resolved video layers for one time.
    pub fn video(&self, time: RationalTime, options: &io::Options) -> Future<VideoData> {
        let (promise, future) = pair();
        let id = self.shared.request_id.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.shared.pending.lock().unwrap();
        if pending.stopped {
            promise.abort();
        } else {
            pending.video.push(VideoRequest {
                id,
                time,
                options: io::merge(&self.shared.options.io_options, options),
                promise,
            });
            self.shared.cv.notify_one();
        }
        future
    }

    /// Request one second of resolved audio, addressed by whole timeline
    /// seconds.
    pub fn audio(&self, seconds: i64, options: &io::Options) -> Future<AudioData> {
        let (promise, future) = pair();
        let id = self.shared.request_id.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.shared.pending.lock().unwrap();
        if pending.stopped {
            promise.abort();
        } else {
            pending.audio.push(AudioRequest {
                id,
                seconds,
                options: io::merge(&self.shared.options.io_options, options),
                promise,
            });
            self.shared.cv.notify_one();
        }
        future
    }

    /// Break every pending request with Cancelled. In-progress reader work
    /// may still complete.
    pub fn cancel_requests(&self) {
        let mut pending = self.shared.pending.lock().unwrap();
        for request in pending.video.drain(..) {
            request.promise.abort();
        }
        for request in pending.audio.drain(..) {
            request.promise.abort();
        }
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.stopped = true;
        }
        self.shared.cv.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ── Reference resolution ─────────────────────────────────────────────────────

/// Resolve a media reference into an openable path, its in-memory buffers,
/// and the io options a reader should be created with.
fn resolve_reference(
    timeline_path: &Path,
    reference: &MediaReference,
    clip: &Clip,
    options: &Options,
) -> Result<Option<(Path, Vec<MemoryRead>, io::Options)>> {
    let target_url = match reference {
        MediaReference::ImageSequence {
            target_url_base,
            name_prefix,
            name_suffix,
            start_frame,
            frame_zero_padding,
            ..
        } => {
            let mut url = String::new();
            url.push_str(target_url_base);
            url.push_str(name_prefix);
            url.push_str(&reelplay_core::path::format_number(*start_frame, *frame_zero_padding));
            url.push_str(name_suffix);
            url
        }
        _ => match reference.target_url() {
            Some(url) => url.to_string(),
            None => return Ok(None),
        },
    };

    let mut path = Path::parse_with(&target_url, &options.path_options)?;
    // Relative targets resolve against the timeline's directory.
    if path.protocol().is_empty()
        && !path.directory().starts_with('/')
        && !path.directory().starts_with('\\')
        && !timeline_path.directory().is_empty()
    {
        let absolute = format!("{}{}", timeline_path.directory(), target_url);
        path = Path::parse_with(&absolute, &options.path_options)?;
    }

    let memory = reference.memory_reads();
    if let Some(range) = reference.available_range() {
        if path.has_number() {
            let start = range.start_time().to_frames();
            let end = range.end_time_inclusive().to_frames();
            path.set_frame_range(start, end);
        }
    }

    let mut io_options = options.io_options.clone();
    let rate = clip.trimmed_range().start_time().rate();
    if rate > 0.0 {
        io_options
            .entry(OPTION_DEFAULT_SPEED.to_string())
            .or_insert_with(|| rate.to_string());
    }
    Ok(Some((path, memory, io_options)))
}

/// Probe the first video and audio clips for the timeline's IOInfo.
fn probe_info(
    system: &Arc<System>,
    otio: &otio::Timeline,
    path: &Path,
    options: &Options,
) -> io::Info {
    let mut out = io::Info::default();
    for kind in [TrackKind::Video, TrackKind::Audio] {
        'tracks: for track in otio.tracks_of(kind) {
            for item in &track.children {
                let Item::Clip(clip) = item else { continue };
                let Ok(Some((clip_path, memory, io_options))) =
                    resolve_reference(path, &clip.media_reference, clip, options)
                else {
                    continue;
                };
                let Ok(read) = system.read(&clip_path, &memory, &io_options) else {
                    continue;
                };
                let Ok(info) = read.info().get() else { continue };
                match kind {
                    TrackKind::Video if info.has_video() => {
                        out.video = info.video;
                        out.video_time_range = info.video_time_range;
                        out.tags.extend(info.tags);
                        break 'tracks;
                    }
                    TrackKind::Audio if info.has_audio() => {
                        out.audio = info.audio;
                        out.audio_time_range = info.audio_time_range;
                        break 'tracks;
                    }
                    _ => {}
                }
            }
        }
    }
    out
}

// ── Coordinator ──────────────────────────────────────────────────────────────

struct PendingVideoLayer {
    video: Option<Future<io::VideoData>>,
    video_b: Option<Future<io::VideoData>>,
    transition: Option<TransitionKind>,
    transition_value: f32,
    image: Option<Arc<Image>>,
    image_b: Option<Arc<Image>>,
}

struct VideoInProgress {
    id: u64,
    time: RationalTime,
    options: io::Options,
    layers: Vec<PendingVideoLayer>,
    promises: Vec<Promise<VideoData>>,
}

struct PendingAudioLayer {
    audio: Option<Future<io::AudioData>>,
    /// Sample offset of the clip within the one-second slice.
    offset: usize,
    in_transition: bool,
    out_transition: bool,
    resolved: Option<Arc<Audio>>,
    done: bool,
}

struct AudioInProgress {
    id: u64,
    seconds: i64,
    options: io::Options,
    layers: Vec<PendingAudioLayer>,
    promises: Vec<Promise<AudioData>>,
}

struct CoordinatorState {
    reads: LruCache<String, Arc<dyn io::Read>>,
}

fn coordinator(shared: Arc<Shared>) {
    let mut state = CoordinatorState { reads: LruCache::new(READ_CACHE_COUNT) };
    let mut video_in_progress: Vec<VideoInProgress> = Vec::new();
    let mut audio_in_progress: Vec<AudioInProgress> = Vec::new();
    loop {
        // Take pending work, waiting when fully idle and polling on a short
        // timeout while futures are in flight.
        let (new_video, new_audio) = {
            let mut pending = shared.pending.lock().unwrap();
            loop {
                if pending.stopped {
                    for request in pending.video.drain(..) {
                        request.promise.abort();
                    }
                    for request in pending.audio.drain(..) {
                        request.promise.abort();
                    }
                    return;
                }
                let video_slots =
                    shared.options.video_request_count.saturating_sub(video_in_progress.len());
                let audio_slots =
                    shared.options.audio_request_count.saturating_sub(audio_in_progress.len());
                let has_new = (!pending.video.is_empty() && video_slots > 0)
                    || (!pending.audio.is_empty() && audio_slots > 0);
                if has_new {
                    let take = pending.video.len().min(video_slots);
                    let new_video: Vec<VideoRequest> = pending.video.drain(..take).collect();
                    let take = pending.audio.len().min(audio_slots);
                    let new_audio: Vec<AudioRequest> = pending.audio.drain(..take).collect();
                    break (new_video, new_audio);
                }
                if !video_in_progress.is_empty() || !audio_in_progress.is_empty() {
                    let (guard, _) = shared
                        .cv
                        .wait_timeout(pending, shared.options.request_timeout)
                        .unwrap();
                    pending = guard;
                    break (Vec::new(), Vec::new());
                }
                pending = shared.cv.wait(pending).unwrap();
            }
        };

        for request in new_video {
            if request.promise.is_cancelled() {
                request.promise.abort();
                continue;
            }
            // Deduplicate against an identical in-flight request.
            if let Some(existing) = video_in_progress
                .iter_mut()
                .find(|r| r.time == request.time && r.options == request.options)
            {
                existing.promises.push(request.promise);
                continue;
            }
            let layers = resolve_video(&shared, &mut state, request.time, &request.options);
            video_in_progress.push(VideoInProgress {
                id: request.id,
                time: request.time,
                options: request.options,
                layers,
                promises: vec![request.promise],
            });
        }

        for request in new_audio {
            if request.promise.is_cancelled() {
                request.promise.abort();
                continue;
            }
            if let Some(existing) = audio_in_progress
                .iter_mut()
                .find(|r| r.seconds == request.seconds && r.options == request.options)
            {
                existing.promises.push(request.promise);
                continue;
            }
            let layers = resolve_audio(&shared, &mut state, request.seconds, &request.options);
            audio_in_progress.push(AudioInProgress {
                id: request.id,
                seconds: request.seconds,
                options: request.options,
                layers,
                promises: vec![request.promise],
            });
        }

        finish_video(&shared, &mut video_in_progress);
        finish_audio(&shared, &mut audio_in_progress);
    }
}

/// Fetch or create the reader for a clip. Readers are shared through an LRU
/// keyed by target URL and options; eviction drops the reader, which drains
/// its queue on the way out.
fn get_read(
    shared: &Shared,
    state: &mut CoordinatorState,
    clip: &Clip,
) -> Option<(Arc<dyn io::Read>, io::Options)> {
    let (path, memory, io_options) =
        match resolve_reference(&shared.path, &clip.media_reference, clip, &shared.options) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return None,
            Err(e) => {
                shared.log.error("timeline", &format!("{}: {e}", clip.name));
                return None;
            }
        };
    let key = format!("{}?{:?}", path.get(), io_options);
    if let Some(read) = state.reads.get(&key) {
        return Some((read, io_options));
    }
    match shared.system.read(&path, &memory, &io_options) {
        Ok(read) => {
            state.reads.add(key, Arc::clone(&read), 1);
            Some((read, io_options))
        }
        Err(e) => {
            shared.log.error("timeline", &format!("{}: {e}", path.get()));
            None
        }
    }
}

/// Issue the read for one clip at one track time.
fn read_clip_video(
    shared: &Shared,
    state: &mut CoordinatorState,
    clip: &Clip,
    track_time: RationalTime,
    range_in_parent: &TimeRange,
    options: &io::Options,
) -> Option<Future<io::VideoData>> {
    let (read, io_options) = get_read(shared, state, clip)?;
    let trimmed = clip.trimmed_range();
    let rate = trimmed.start_time().rate();
    let media_time = to_video_media_time(track_time, range_in_parent, &trimmed, rate);
    Some(read.read_video(media_time, &io::merge(&io_options, options)))
}

/// The linear progress through a transition window.
fn transition_value(time: RationalTime, window: &TimeRange) -> f32 {
    let duration = window.duration().value();
    if duration <= 0.0 {
        return 0.0;
    }
    ((time - window.start_time()).value() / duration) as f32
}

/// The window a transition occupies around a cut, with its offsets clamped
/// to the items it bridges.
fn transition_window(
    transition: &otio::Transition,
    cut: RationalTime,
    outgoing: Option<&TimeRange>,
    incoming: Option<&TimeRange>,
) -> TimeRange {
    let rate = cut.rate();
    let mut in_offset = transition.in_offset.rescaled_to(rate);
    let mut out_offset = transition.out_offset.rescaled_to(rate);
    if let Some(outgoing) = outgoing {
        let max = outgoing.duration().rescaled_to(rate);
        if in_offset > max {
            in_offset = max;
        }
    }
    if let Some(incoming) = incoming {
        let max = incoming.duration().rescaled_to(rate);
        if out_offset > max {
            out_offset = max;
        }
    }
    TimeRange::from_start_end_time(cut - in_offset, cut + out_offset)
}

fn clip_at(track: &Track, index: usize) -> Option<&Clip> {
    match track.children.get(index) {
        Some(Item::Clip(clip)) => Some(clip),
        _ => None,
    }
}

/// Resolve the video layers for one timeline time: one layer per video
/// track with an active item; a transition folds both sides into the layer.
fn resolve_video(
    shared: &Shared,
    state: &mut CoordinatorState,
    time: RationalTime,
    options: &io::Options,
) -> Vec<PendingVideoLayer> {
    let mut layers = Vec::new();
    let track_time = time - shared.time_range.start_time();
    for track in shared.otio.tracks_of(TrackKind::Video) {
        let ranges = track.child_ranges();
        let Some(index) = track.item_at(track_time) else { continue };
        let range = match ranges[index] {
            Some(range) => range,
            None => continue,
        };

        let mut layer = PendingVideoLayer {
            video: None,
            video_b: None,
            transition: None,
            transition_value: 0.0,
            image: None,
            image_b: None,
        };

        // The transition after this item, bridging to index + 2.
        let next = track.children.get(index + 1).and_then(Item::as_transition);
        // The transition before this item, bridging from index - 2.
        let prev = index
            .checked_sub(1)
            .and_then(|i| track.children.get(i))
            .and_then(Item::as_transition);

        let next_window = next.map(|transition| {
            transition_window(
                transition,
                range.end_time_exclusive(),
                Some(&range),
                ranges.get(index + 2).copied().flatten().as_ref(),
            )
        });
        let prev_window = prev.map(|transition| {
            transition_window(
                transition,
                range.start_time(),
                index.checked_sub(2).and_then(|i| ranges.get(i).copied().flatten()).as_ref(),
                Some(&range),
            )
        });

        if let (Some(transition), Some(window)) = (next, &next_window) {
            if window.contains(&track_time) {
                // First half of a transition out of this item.
                layer.transition = Some(transition.kind());
                layer.transition_value = transition_value(track_time, window);
                if let Some(clip) = clip_at(track, index) {
                    layer.video =
                        read_clip_video(shared, state, clip, track_time, &range, options);
                }
                if let (Some(clip), Some(range_b)) =
                    (clip_at(track, index + 2), ranges.get(index + 2).copied().flatten())
                {
                    layer.video_b =
                        read_clip_video(shared, state, clip, track_time, &range_b, options);
                }
                layers.push(layer);
                continue;
            }
        }
        if let (Some(transition), Some(window)) = (prev, &prev_window) {
            if window.contains(&track_time) {
                // Second half: the outgoing neighbor is still side A.
                layer.transition = Some(transition.kind());
                layer.transition_value = transition_value(track_time, window);
                if let (Some(clip), Some(range_a)) = (
                    index.checked_sub(2).and_then(|i| clip_at(track, i)),
                    index.checked_sub(2).and_then(|i| ranges.get(i).copied().flatten()),
                ) {
                    layer.video =
                        read_clip_video(shared, state, clip, track_time, &range_a, options);
                }
                if let Some(clip) = clip_at(track, index) {
                    layer.video_b =
                        read_clip_video(shared, state, clip, track_time, &range, options);
                }
                layers.push(layer);
                continue;
            }
        }

        // Plain clip or gap.
        if let Some(clip) = clip_at(track, index) {
            layer.video = read_clip_video(shared, state, clip, track_time, &range, options);
        }
        layers.push(layer);
    }
    layers
}

/// Resolve the audio layers covering one whole second of timeline time.
fn resolve_audio(
    shared: &Shared,
    state: &mut CoordinatorState,
    seconds: i64,
    options: &io::Options,
) -> Vec<PendingAudioLayer> {
    let mut layers = Vec::new();
    let sample_rate = shared
        .io_info
        .audio
        .map(|info| info.sample_rate as f64)
        .unwrap_or(48000.0);
    let start_seconds = seconds as f64 - shared.time_range.start_time().to_seconds();
    let slice = TimeRange::new(
        RationalTime::from_seconds(start_seconds, sample_rate),
        RationalTime::from_seconds(1.0, sample_rate),
    );

    for track in shared.otio.tracks_of(TrackKind::Audio) {
        let ranges = track.child_ranges();
        for (index, item) in track.children.iter().enumerate() {
            let Item::Clip(clip) = item else { continue };
            let Some(range) = ranges[index] else { continue };
            let range = TimeRange::new(
                range.start_time().rescaled_to(sample_rate),
                range.duration().rescaled_to(sample_rate),
            );
            // A clip is audible past its edges while a neighboring
            // transition crossfades it.
            let in_transition = index
                .checked_sub(1)
                .and_then(|i| track.children.get(i))
                .and_then(Item::as_transition);
            let out_transition =
                track.children.get(index + 1).and_then(Item::as_transition);
            let mut audible_start = range.start_time();
            let mut audible_end = range.end_time_exclusive();
            if let Some(transition) = in_transition {
                audible_start = audible_start - transition.in_offset.rescaled_to(sample_rate);
            }
            if let Some(transition) = out_transition {
                audible_end = audible_end + transition.out_offset.rescaled_to(sample_rate);
            }
            let audible = TimeRange::from_start_end_time(audible_start, audible_end);
            let Some(intersection) = audible.intersection(&slice) else { continue };
            let Some((read, io_options)) = get_read(shared, state, clip) else {
                layers.push(PendingAudioLayer {
                    audio: None,
                    offset: 0,
                    in_transition: false,
                    out_transition: false,
                    resolved: None,
                    done: true,
                });
                continue;
            };
            let trimmed = clip.trimmed_range();
            let media_range = to_audio_media_time(&intersection, &range, &trimmed, sample_rate);
            let offset = (intersection.start_time() - slice.start_time()).value().max(0.0) as usize;
            layers.push(PendingAudioLayer {
                audio: Some(read.read_audio(media_range, &io::merge(&io_options, options))),
                offset,
                in_transition: in_transition.is_some(),
                out_transition: out_transition.is_some(),
                resolved: None,
                done: false,
            });
        }
    }
    layers
}

/// Poll in-progress video requests; fulfill the complete ones.
fn finish_video(shared: &Shared, in_progress: &mut Vec<VideoInProgress>) {
    let mut index = 0;
    while index < in_progress.len() {
        let request = &mut in_progress[index];
        let mut done = true;
        let id = request.id;
        for layer in &mut request.layers {
            if let Some(future) = &layer.video {
                match future.try_get() {
                    Some(Ok(data)) => {
                        layer.image = data.image;
                        layer.video = None;
                    }
                    Some(Err(e)) => {
                        log_read_error(shared, id, &e);
                        layer.video = None;
                    }
                    None => done = false,
                }
            }
            if let Some(future) = &layer.video_b {
                match future.try_get() {
                    Some(Ok(data)) => {
                        layer.image_b = data.image;
                        layer.video_b = None;
                    }
                    Some(Err(e)) => {
                        log_read_error(shared, id, &e);
                        layer.video_b = None;
                    }
                    None => done = false,
                }
            }
        }
        if !done {
            index += 1;
            continue;
        }
        let request = in_progress.swap_remove(index);
        let data = VideoData {
            time: request.time,
            layers: request
                .layers
                .into_iter()
                .map(|layer| VideoLayer {
                    image: layer.image,
                    image_b: layer.image_b,
                    transition: layer.transition,
                    transition_value: layer.transition_value,
                })
                .collect(),
        };
        for promise in request.promises {
            promise.fulfill(Ok(data.clone()));
        }
    }
}

/// Poll in-progress audio requests; pad completed layers to the full second
/// and fulfill.
fn finish_audio(shared: &Shared, in_progress: &mut Vec<AudioInProgress>) {
    let sample_rate = shared
        .io_info
        .audio
        .map(|info| info.sample_rate as usize)
        .unwrap_or(48000);
    let mut index = 0;
    while index < in_progress.len() {
        let request = &mut in_progress[index];
        let mut done = true;
        let id = request.id;
        for layer in &mut request.layers {
            if layer.done {
                continue;
            }
            let Some(future) = &layer.audio else {
                layer.done = true;
                continue;
            };
            match future.try_get() {
                Some(Ok(data)) => {
                    if let Some(audio) = data.audio {
                        // Pad the clip's span out to one full second of
                        // silence-backed samples.
                        layer.resolved =
                            Some(Arc::new(audio.padded(sample_rate, layer.offset)));
                    }
                    layer.done = true;
                }
                Some(Err(e)) => {
                    log_read_error(shared, id, &e);
                    layer.done = true;
                }
                None => done = false,
            }
        }
        if !done {
            index += 1;
            continue;
        }
        let request = in_progress.swap_remove(index);
        let data = AudioData {
            seconds: request.seconds,
            layers: request
                .layers
                .into_iter()
                .map(|layer| AudioLayer {
                    audio: layer.resolved,
                    in_transition: layer.in_transition,
                    out_transition: layer.out_transition,
                })
                .collect(),
        };
        for promise in request.promises {
            promise.fulfill(Ok(data.clone()));
        }
    }
}

fn log_read_error(shared: &Shared, request_id: u64, error: &Error) {
    // Cancelled reads are routine during seeks; real failures get logged.
    if !matches!(error, Error::Cancelled) {
        shared
            .log
            .error("timeline", &format!("request {request_id}: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelplay_core::Context;

    fn ppm_bytes(value: u8) -> Vec<u8> {
        let mut out = b"P6\n2 2\n255\n".to_vec();
        out.extend(std::iter::repeat(value).take(12));
        out
    }

    fn memory_clip(name: &str, frames: usize, first_value: u8) -> Item {
        let memory = (0..frames)
            .map(|i| MemoryRead::from_bytes(ppm_bytes(first_value + i as u8)))
            .collect();
        Item::Clip(Clip {
            name: name.into(),
            media_reference: MediaReference::MemorySequence {
                target_url: format!("{name}.0000.ppm"),
                memory,
                available_range: Some(TimeRange::new(
                    RationalTime::new(0.0, 24.0),
                    RationalTime::new(frames as f64, 24.0),
                )),
            },
            source_range: None,
        })
    }

    fn single_clip_timeline(frames: usize) -> Timeline {
        let context = Context::new();
        let system = System::new(&context);
        let mut otio = otio::Timeline::default();
        let mut track = Track::new(TrackKind::Video);
        track.children.push(memory_clip("clip", frames, 10));
        otio.tracks.children.push(track);
        Timeline::from_otio(&system, otio, Path::default(), Options::default()).unwrap()
    }

    #[test]
    fn resolves_frames_from_a_single_clip() {
        let timeline = single_clip_timeline(5);
        assert_eq!(timeline.duration().to_frames(), 5);
        for frame in 0..5 {
            let data = timeline
                .video(RationalTime::from_frames(frame, 24.0), &io::Options::new())
                .get()
                .unwrap();
            assert_eq!(data.time.to_frames(), frame);
            assert_eq!(data.layers.len(), 1);
            let image = data.layers[0].image.as_ref().expect("image");
            assert_eq!(image.data()[0], 10 + frame as u8);
        }
    }

    #[test]
    fn out_of_range_resolves_to_empty_layers() {
        let timeline = single_clip_timeline(5);
        let data = timeline
            .video(RationalTime::from_frames(99, 24.0), &io::Options::new())
            .get()
            .unwrap();
        assert!(data.layers.is_empty());
        // The end itself is exclusive.
        let data = timeline
            .video(RationalTime::from_frames(5, 24.0), &io::Options::new())
            .get()
            .unwrap();
        assert!(data.layers.is_empty());
    }

    #[test]
    fn gaps_resolve_to_an_empty_image_layer() {
        let context = Context::new();
        let system = System::new(&context);
        let mut otio = otio::Timeline::default();
        let mut track = Track::new(TrackKind::Video);
        track.children.push(memory_clip("head", 2, 10));
        track.children.push(Item::Gap(otio::Gap {
            name: String::new(),
            source_range: Some(TimeRange::new(
                RationalTime::new(0.0, 24.0),
                RationalTime::new(2.0, 24.0),
            )),
        }));
        track.children.push(memory_clip("tail", 2, 50));
        otio.tracks.children.push(track);
        let timeline =
            Timeline::from_otio(&system, otio, Path::default(), Options::default()).unwrap();

        let data = timeline
            .video(RationalTime::from_frames(2, 24.0), &io::Options::new())
            .get()
            .unwrap();
        assert_eq!(data.layers.len(), 1);
        assert!(data.layers[0].image.is_none());

        let data = timeline
            .video(RationalTime::from_frames(4, 24.0), &io::Options::new())
            .get()
            .unwrap();
        assert_eq!(data.layers[0].image.as_ref().unwrap().data()[0], 50);
    }

    #[test]
    fn dissolve_carries_both_sides_and_midpoint_value() {
        let context = Context::new();
        let system = System::new(&context);
        let mut otio = otio::Timeline::default();
        let mut track = Track::new(TrackKind::Video);
        track.children.push(memory_clip("a", 10, 10));
        track.children.push(Item::Transition(otio::Transition {
            name: String::new(),
            transition_type: otio::TRANSITION_SMPTE_DISSOLVE.into(),
            in_offset: RationalTime::new(2.5, 24.0),
            out_offset: RationalTime::new(2.5, 24.0),
        }));
        track.children.push(memory_clip("b", 10, 100));
        otio.tracks.children.push(track);
        let timeline =
            Timeline::from_otio(&system, otio, Path::default(), Options::default()).unwrap();

        // The cut is at frame 10; the dissolve midpoint is the cut itself.
        let data = timeline
            .video(RationalTime::new(10.0, 24.0), &io::Options::new())
            .get()
            .unwrap();
        assert_eq!(data.layers.len(), 1);
        let layer = &data.layers[0];
        assert_eq!(layer.transition, Some(TransitionKind::Dissolve));
        assert!((layer.transition_value - 0.5).abs() < 1e-6);
        let a = layer.image.as_ref().expect("side A");
        let b = layer.image_b.as_ref().expect("side B");
        assert_eq!(a.data()[0], 10 + 9);
        // B is read before its own start and clamps to its first frame.
        assert_eq!(b.data()[0], 100);

        // Outside the window there is no transition.
        let data = timeline
            .video(RationalTime::new(5.0, 24.0), &io::Options::new())
            .get()
            .unwrap();
        assert!(data.layers[0].transition.is_none());
        assert!(data.layers[0].image_b.is_none());
    }

    #[test]
    fn transition_offsets_clamp_to_the_bridged_clips() {
        let context = Context::new();
        let system = System::new(&context);
        let mut otio = otio::Timeline::default();
        let mut track = Track::new(TrackKind::Video);
        track.children.push(memory_clip("a", 3, 10));
        track.children.push(Item::Transition(otio::Transition {
            name: String::new(),
            transition_type: otio::TRANSITION_SMPTE_DISSOLVE.into(),
            // Wildly larger than either clip.
            in_offset: RationalTime::new(100.0, 24.0),
            out_offset: RationalTime::new(100.0, 24.0),
        }));
        track.children.push(memory_clip("b", 3, 100));
        otio.tracks.children.push(track);
        let timeline =
            Timeline::from_otio(&system, otio, Path::default(), Options::default()).unwrap();

        // Clamped to [cut-3, cut+3); every frame resolves without panicking.
        for frame in 0..6 {
            let data = timeline
                .video(RationalTime::from_frames(frame, 24.0), &io::Options::new())
                .get()
                .unwrap();
            assert_eq!(data.layers.len(), 1);
            assert_eq!(data.layers[0].transition, Some(TransitionKind::Dissolve));
        }
    }

    #[test]
    fn identical_requests_share_one_resolution() {
        let timeline = single_clip_timeline(5);
        let t = RationalTime::from_frames(2, 24.0);
        let a = timeline.video(t, &io::Options::new());
        let b = timeline.video(t, &io::Options::new());
        let image_a = a.get().unwrap().layers[0].image.clone().unwrap();
        let image_b = b.get().unwrap().layers[0].image.clone().unwrap();
        assert!(Arc::ptr_eq(&image_a, &image_b));
    }

    #[test]
    fn cancel_requests_breaks_pending() {
        let timeline = single_clip_timeline(5);
        let futures: Vec<_> = (0..5)
            .map(|f| timeline.video(RationalTime::from_frames(f, 24.0), &io::Options::new()))
            .collect();
        timeline.cancel_requests();
        for future in futures {
            let _ = future.get();
        }
    }

    #[test]
    fn options_pick_up_settings_keys() {
        use reelplay_core::settings::{keys, Settings};
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::new(dir.path().join("settings.json"));
        settings.set(keys::PERFORMANCE_VIDEO_REQUEST_COUNT, 4usize);
        settings.set(keys::FILE_SEQUENCE_AUDIO, FileSequenceAudio::Directory);
        settings.set(keys::PERFORMANCE_SEQUENCE_THREAD_COUNT, 2usize);
        settings.set(keys::MISC_MAX_FILE_SEQUENCE_DIGITS, 6usize);

        let options = Options::from_settings(&settings);
        assert_eq!(options.video_request_count, 4);
        assert_eq!(options.file_sequence_audio, FileSequenceAudio::Directory);
        assert_eq!(
            options
                .io_options
                .get(reelplay_io::sequence::OPTION_THREAD_COUNT)
                .map(String::as_str),
            Some("2")
        );
        assert_eq!(options.path_options.max_number_digits, 6);
        // Unset keys keep their defaults.
        assert_eq!(options.audio_request_count, Options::default().audio_request_count);
    }

    #[test]
    fn drop_joins_and_breaks_requests() {
        let timeline = single_clip_timeline(5);
        let future = timeline.video(RationalTime::from_frames(1, 24.0), &io::Options::new());
        drop(timeline);
        let _ = future.get();
    }
}
