// crates/reelplay-io/src/ffmpeg.rs
//
// FFmpeg movie plugin: demux + decode on a dedicated worker thread. The
// video path keeps a stateful decoder per source so sequential playback
// never re-opens the file; seeks land on the previous keyframe and burn
// forward (decode-only, no scaling) to the requested frame. Audio decodes
// through the software resampler to interleaved F32.
//
// Built only with the `ffmpeg` cargo feature — it links the system FFmpeg
// libraries.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use reelplay_core::audio::{Audio, AudioDataType, AudioInfo};
use reelplay_core::error::{Error, Result};
use reelplay_core::image::{Image, ImageInfo, PixelType};
use reelplay_core::log::LogSystem;
use reelplay_core::path::{MemoryRead, Path};
use reelplay_core::time::{RationalTime, TimeRange};

use crate::cache::{audio_key, video_key, Cache, CacheItem};
use crate::future::{pair, Future, Promise};
use crate::plugin::{ExtensionMap, FileType, Plugin, Read, Write};
use crate::{AudioData, Info, Options, VideoData};

/// Decoder thread count passed to the codec context.
pub const OPTION_THREAD_COUNT: &str = "FFmpeg/ThreadCount";

/// Forward seeks shorter than this decode through; longer ones re-open.
const RESEEK_THRESHOLD_SECONDS: f64 = 2.0;

pub struct FFmpegPlugin {
    extensions: ExtensionMap,
    cache: Arc<Cache>,
    log: Arc<LogSystem>,
}

impl FFmpegPlugin {
    pub fn new(cache: Arc<Cache>, log: Arc<LogSystem>) -> Self {
        let mut extensions = ExtensionMap::new();
        for ext in [".avi", ".m4v", ".mkv", ".mov", ".mp4", ".mpg", ".mpeg", ".mxf", ".webm"] {
            extensions.insert(ext.into(), FileType::Movie);
        }
        for ext in [".aac", ".flac", ".mp3", ".ogg", ".opus", ".wav"] {
            extensions.insert(ext.into(), FileType::Audio);
        }
        Self { extensions, cache, log }
    }
}

impl Plugin for FFmpegPlugin {
    fn name(&self) -> &str {
        "FFmpeg"
    }

    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }

    fn read(&self, path: &Path, _memory: &[MemoryRead], options: &Options)
        -> Result<Arc<dyn Read>> {
        FFmpegRead::new(path, options, Arc::clone(&self.cache), Arc::clone(&self.log))
    }

    fn write_info(&self, _info: &ImageInfo, _options: &Options) -> Result<ImageInfo> {
        Err(Error::Format("FFmpeg writing is a separate sink".into()))
    }

    fn write(&self, _path: &Path, _info: &Info, _options: &Options) -> Result<Box<dyn Write>> {
        Err(Error::Format("FFmpeg writing is a separate sink".into()))
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

struct VideoRequest {
    time: RationalTime,
    options: Options,
    promise: Promise<VideoData>,
}

struct AudioRequest {
    range: TimeRange,
    options: Options,
    promise: Promise<AudioData>,
}

struct Queue {
    info_waiters: Vec<Promise<Info>>,
    video: VecDeque<VideoRequest>,
    audio: VecDeque<AudioRequest>,
    stopped: bool,
}

struct Shared {
    path: Path,
    cache: Arc<Cache>,
    log: Arc<LogSystem>,
    queue: Mutex<Queue>,
    cv: Condvar,
}

pub struct FFmpegRead {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FFmpegRead {
    pub fn new(
        path: &Path,
        _options: &Options,
        cache: Arc<Cache>,
        log: Arc<LogSystem>,
    ) -> Result<Arc<dyn Read>> {
        let shared = Arc::new(Shared {
            path: path.clone(),
            cache,
            log,
            queue: Mutex::new(Queue {
                info_waiters: Vec::new(),
                video: VecDeque::new(),
                audio: VecDeque::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = std::thread::spawn(move || worker_loop(worker));
        Ok(Arc::new(Self { shared, thread: Mutex::new(Some(thread)) }))
    }
}

impl Read for FFmpegRead {
    fn info(&self) -> Future<Info> {
        let (promise, future) = pair();
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.stopped {
            promise.abort();
        } else {
            queue.info_waiters.push(promise);
            self.shared.cv.notify_one();
        }
        future
    }

    fn read_video(&self, time: RationalTime, options: &Options) -> Future<VideoData> {
        let (promise, future) = pair();
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.stopped {
            promise.abort();
        } else {
            queue.video.push_back(VideoRequest { time, options: options.clone(), promise });
            self.shared.cv.notify_one();
        }
        future
    }

    fn read_audio(&self, range: TimeRange, options: &Options) -> Future<AudioData> {
        let (promise, future) = pair();
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.stopped {
            promise.abort();
        } else {
            queue.audio.push_back(AudioRequest { range, options: options.clone(), promise });
            self.shared.cv.notify_one();
        }
        future
    }

    fn cancel_requests(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        for request in queue.video.drain(..) {
            request.promise.abort();
        }
        for request in queue.audio.drain(..) {
            request.promise.abort();
        }
    }
}

impl Drop for FFmpegRead {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stopped = true;
        }
        self.shared.cv.notify_one();
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

// ── Worker ───────────────────────────────────────────────────────────────────

enum Work {
    Info(Vec<Promise<Info>>),
    Video(VideoRequest),
    Audio(AudioRequest),
    Stop,
}

fn worker_loop(shared: Arc<Shared>) {
    let mut video: Option<VideoDecoder> = None;
    let mut audio: Option<AudioDecoder> = None;
    let mut info: Option<Result<Info>> = None;
    loop {
        let work = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if queue.stopped {
                    for request in queue.video.drain(..) {
                        request.promise.abort();
                    }
                    for request in queue.audio.drain(..) {
                        request.promise.abort();
                    }
                    for promise in queue.info_waiters.drain(..) {
                        promise.abort();
                    }
                    break Work::Stop;
                }
                if !queue.info_waiters.is_empty() {
                    break Work::Info(queue.info_waiters.drain(..).collect());
                }
                if let Some(request) = queue.video.pop_front() {
                    break Work::Video(request);
                }
                if let Some(request) = queue.audio.pop_front() {
                    break Work::Audio(request);
                }
                queue = shared.cv.wait(queue).unwrap();
            }
        };
        match work {
            Work::Stop => return,
            Work::Info(waiters) => {
                let info = info.get_or_insert_with(|| probe(&shared));
                for promise in waiters {
                    promise.fulfill(info.clone());
                }
            }
            Work::Video(request) => serve_video(&shared, &mut video, request),
            Work::Audio(request) => serve_audio(&shared, &mut audio, request),
        }
    }
}

fn probe(shared: &Shared) -> Result<Info> {
    let file_name = shared.path.file_name(true);
    let ictx = input(&file_name).map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
    let mut out = Info::default();

    if let Some(stream) = ictx.streams().best(Type::Video) {
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            24.0
        };
        let tb = stream.time_base();
        let duration_seconds = if tb.denominator() != 0 {
            stream.duration() as f64 * tb.numerator() as f64 / tb.denominator() as f64
        } else {
            0.0
        };
        out.video.push(ImageInfo::new(decoder.width(), decoder.height(), PixelType::RGBA_U8));
        out.video_time_range = TimeRange::new(
            RationalTime::new(0.0, fps),
            RationalTime::from_seconds(duration_seconds, fps).round(),
        );
    }

    if let Some(stream) = ictx.streams().best(Type::Audio) {
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().audio())
            .map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        let sample_rate = decoder.rate();
        let tb = stream.time_base();
        let duration_seconds = if tb.denominator() != 0 {
            stream.duration() as f64 * tb.numerator() as f64 / tb.denominator() as f64
        } else {
            0.0
        };
        out.audio = Some(AudioInfo::new(
            decoder.channels() as u8,
            AudioDataType::F32,
            sample_rate,
        ));
        out.audio_time_range = TimeRange::new(
            RationalTime::new(0.0, sample_rate as f64),
            RationalTime::from_seconds(duration_seconds, sample_rate as f64).round(),
        );
    }

    if !out.has_video() && !out.has_audio() {
        return Err(Error::Format(format!("{file_name}: no usable streams")));
    }
    Ok(out)
}

// ── Video decode ─────────────────────────────────────────────────────────────

struct VideoDecoder {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: SwsContext,
    stream_index: usize,
    tb_num: i32,
    tb_den: i32,
    width: u32,
    height: u32,
    last_pts: i64,
}

impl VideoDecoder {
    fn open(file_name: &str, seconds: f64) -> Result<Self> {
        let mut ictx = input(file_name).map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        let stream_index = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| Error::Format(format!("{file_name}: no video stream")))?
            .index();
        let (tb_num, tb_den) = {
            let stream = ictx.stream(stream_index).ok_or(Error::OutOfRange)?;
            let tb = stream.time_base();
            (tb.numerator(), tb.denominator())
        };

        let ts = (seconds * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        let _ = ictx.seek(ts, ..=ts);

        // A second context for the decoder parameters; Parameters borrows
        // from the stream.
        let ictx2 = input(file_name).map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        let stream2 = ictx2.stream(stream_index).ok_or(Error::OutOfRange)?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| Error::Format(format!("{file_name}: {e}")))?;

        let width = decoder.width();
        let height = decoder.height();
        let scaler = SwsContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGBA,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|e| Error::Format(format!("{file_name}: {e}")))?;

        let seek_pts = (seconds * tb_den as f64 / tb_num as f64) as i64;
        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            tb_num,
            tb_den,
            width,
            height,
            // The seek landed on a keyframe at or before seek_pts; strictly
            // smaller so an advance to seek_pts itself still fires.
            last_pts: seek_pts.saturating_sub(1),
        })
    }

    fn seconds_to_pts(&self, seconds: f64) -> i64 {
        (seconds * self.tb_den as f64 / self.tb_num as f64) as i64
    }

    /// Decode forward to `target_pts`, scaling only the frame that lands.
    fn advance_to(&mut self, target_pts: i64) -> Option<Image> {
        for result in self.ictx.packets() {
            let Ok((stream, packet)) = result else { continue };
            if stream.index() != self.stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::frame::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.pts().unwrap_or(self.last_pts + 1);
                self.last_pts = pts;
                if pts < target_pts {
                    // Burn-through: decode-only for frames before the
                    // target.
                    continue;
                }
                return self.scale(&decoded);
            }
        }
        None
    }

    fn scale(&mut self, decoded: &ffmpeg::frame::Video) -> Option<Image> {
        let mut out = ffmpeg::frame::Video::empty();
        if self.scaler.run(decoded, &mut out).is_err() {
            return None;
        }
        let stride = out.stride(0);
        let raw = out.data(0);
        let row_bytes = self.width as usize * 4;
        let data: Vec<u8> = (0..self.height as usize)
            .flat_map(|row| {
                let start = row * stride;
                &raw[start..start + row_bytes]
            })
            .copied()
            .collect();
        Some(Image::with_data(
            ImageInfo::new(self.width, self.height, PixelType::RGBA_U8),
            data,
        ))
    }
}

fn serve_video(shared: &Shared, state: &mut Option<VideoDecoder>, request: VideoRequest) {
    if request.promise.is_cancelled() {
        request.promise.abort();
        return;
    }
    let key = video_key(&shared.path, request.time, 0, &request.options);
    if let Some(hit) = shared.cache.get_video(&key) {
        request.promise.fulfill(Ok(VideoData::new(request.time, hit.layer, hit.image)));
        return;
    }

    let file_name = shared.path.file_name(true);
    let seconds = request.time.to_seconds();

    // Re-open on a different file state, any backward movement, or a long
    // forward jump; short forward jumps decode through.
    let needs_reset = state
        .as_ref()
        .map(|d| {
            let target = d.seconds_to_pts(seconds);
            target <= d.last_pts
                || target > d.last_pts + d.seconds_to_pts(RESEEK_THRESHOLD_SECONDS)
        })
        .unwrap_or(true);
    if needs_reset {
        match VideoDecoder::open(&file_name, seconds) {
            Ok(decoder) => *state = Some(decoder),
            Err(e) => {
                shared.log.error("ffmpeg", &format!("{file_name}: {e}"));
                request.promise.fulfill(Err(e));
                return;
            }
        }
    }

    let Some(decoder) = state.as_mut() else {
        request.promise.fulfill(Err(Error::Format(format!("{file_name}: no decoder"))));
        return;
    };
    let target = decoder.seconds_to_pts(seconds);
    match decoder.advance_to(target) {
        Some(mut image) => {
            image.set_tag(crate::sequence::TAG_SOURCE_FILE, file_name);
            let image = Arc::new(image);
            let data = VideoData::new(request.time, 0, Some(Arc::clone(&image)));
            shared
                .cache
                .add(key, CacheItem::Video(data.clone()), image.byte_count());
            request.promise.fulfill(Ok(data));
        }
        // EOF before the target: out-of-range resolves to an empty image.
        None => request.promise.fulfill(Ok(VideoData::new(request.time, 0, None))),
    }
}

// ── Audio decode ─────────────────────────────────────────────────────────────

struct AudioDecoder {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
    info: AudioInfo,
    /// Absolute sample position of the next decoded sample.
    position: i64,
}

impl AudioDecoder {
    fn open(file_name: &str, start_seconds: f64) -> Result<Self> {
        let mut ictx = input(file_name).map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        let stream_index = ictx
            .streams()
            .best(Type::Audio)
            .ok_or_else(|| Error::Format(format!("{file_name}: no audio stream")))?
            .index();
        let ts = (start_seconds * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        let _ = ictx.seek(ts, ..=ts);

        let ictx2 = input(file_name).map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        let stream2 = ictx2.stream(stream_index).ok_or(Error::OutOfRange)?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())
            .and_then(|ctx| ctx.decoder().audio())
            .map_err(|e| Error::Format(format!("{file_name}: {e}")))?;
        let info =
            AudioInfo::new(decoder.channels() as u8, AudioDataType::F32, decoder.rate());
        Ok(Self { ictx, decoder, stream_index, info, position: i64::MIN })
    }

    /// Decode and resample samples covering `range` (in sample-rate units),
    /// zero-padded where the media runs short.
    fn read(&mut self, range: &TimeRange) -> Result<Audio> {
        let start = range.start_time().value() as i64;
        let count = range.duration().value() as usize;
        let frame_bytes = self.info.frame_byte_count();
        let mut out = Audio::new(self.info, count);

        let mut resampler: Option<ffmpeg::software::resampling::context::Context> = None;
        let mut done = 0usize;
        'demux: for result in self.ictx.packets() {
            let Ok((stream, packet)) = result else { continue };
            if stream.index() != self.stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::frame::Audio::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if let Some(pts) = decoded.pts() {
                    let tb = stream.time_base();
                    let seconds = pts as f64 * tb.numerator() as f64 / tb.denominator() as f64;
                    self.position = (seconds * self.info.sample_rate as f64).round() as i64;
                }
                if resampler.is_none() {
                    let layout = decoded.channel_layout();
                    let built = ffmpeg::software::resampling::context::Context::get(
                        decoded.format(),
                        layout,
                        decoded.rate(),
                        ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
                        layout,
                        self.info.sample_rate,
                    )
                    .map_err(|e| Error::Format(format!("resampler: {e}")))?;
                    resampler = Some(built);
                }
                let Some(swr) = resampler.as_mut() else { continue };
                // The output frame must start empty; the resampler
                // allocates it from its own configuration.
                let mut converted = ffmpeg::frame::Audio::empty();
                swr.run(&decoded, &mut converted)
                    .map_err(|e| Error::Format(format!("resampler: {e}")))?;
                let samples = converted.samples();
                if samples == 0 {
                    continue;
                }
                let bytes = &converted.data(0)[..samples * frame_bytes];
                let chunk_start = self.position;
                self.position += samples as i64;
                // Clip the converted chunk to the requested window.
                let skip = (start + done as i64 - chunk_start).max(0) as usize;
                if skip >= samples {
                    continue;
                }
                let available = samples - skip;
                let want = count - done;
                let take = available.min(want);
                let dst = (done) * frame_bytes;
                let src = skip * frame_bytes;
                out.data_mut()[dst..dst + take * frame_bytes]
                    .copy_from_slice(&bytes[src..src + take * frame_bytes]);
                done += take;
                if done >= count {
                    break 'demux;
                }
            }
        }
        // Whatever the media did not cover stays silent.
        Ok(out)
    }
}

fn serve_audio(shared: &Shared, state: &mut Option<AudioDecoder>, request: AudioRequest) {
    if request.promise.is_cancelled() {
        request.promise.abort();
        return;
    }
    let key = audio_key(&shared.path, request.range, &request.options);
    if let Some(hit) = shared.cache.get_audio(&key) {
        request.promise.fulfill(Ok(AudioData::new(request.range.start_time(), hit.audio)));
        return;
    }

    let file_name = shared.path.file_name(true);
    let start_seconds = request.range.start_time().to_seconds();
    let start_sample = request.range.start_time().value() as i64;

    let needs_reset = state
        .as_ref()
        .map(|d| start_sample < d.position || d.position == i64::MIN)
        .unwrap_or(true);
    if needs_reset {
        match AudioDecoder::open(&file_name, start_seconds) {
            Ok(decoder) => *state = Some(decoder),
            Err(e) => {
                shared.log.error("ffmpeg", &format!("{file_name}: {e}"));
                request.promise.fulfill(Err(e));
                return;
            }
        }
    }
    let Some(decoder) = state.as_mut() else {
        request.promise.fulfill(Err(Error::Format(format!("{file_name}: no decoder"))));
        return;
    };
    match decoder.read(&request.range) {
        Ok(audio) => {
            let audio = Arc::new(audio);
            let data = AudioData::new(request.range.start_time(), Some(Arc::clone(&audio)));
            shared
                .cache
                .add(key, CacheItem::Audio(data.clone()), audio.byte_count());
            request.promise.fulfill(Ok(data));
        }
        Err(e) => {
            shared.log.error("ffmpeg", &format!("{file_name}: {e}"));
            request.promise.fulfill(Err(e));
        }
    }
}
