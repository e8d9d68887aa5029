// crates/reelplay-io/src/sequence.rs
//
// Sequence reader: one frame per file, decoded by a pool of workers. A
// plugin supplies the single-frame decode as a FrameDecoder and this type
// handles the rest — the request queue, the rayon fan-out, the io cache,
// out-of-range frames, and cancellation.
//
// The queue thread wakes on a condvar, takes a batch of requests, and
// dispatches them across the pool; completion order is whatever the pool
// produces, which is why callers match by future.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use reelplay_core::error::Result;
use reelplay_core::image::ImageInfo;
use reelplay_core::log::LogSystem;
use reelplay_core::path::{MemoryRead, Path};
use reelplay_core::time::{RationalTime, TimeRange};

use crate::cache::{video_key, Cache, CacheItem};
use crate::future::{pair, Future, Promise};
use crate::plugin::Read;
use crate::{Info, Options, VideoData};

/// Worker-pool size for per-frame decodes.
pub const OPTION_THREAD_COUNT: &str = "SequenceIO/ThreadCount";
/// Frame rate assumed for sequences that do not carry one.
pub const OPTION_DEFAULT_SPEED: &str = "SequenceIO/DefaultSpeed";

/// Tag naming the file a frame was decoded from.
pub const TAG_SOURCE_FILE: &str = "sourceFile";

pub const DEFAULT_THREAD_COUNT: usize = 4;
pub const DEFAULT_SPEED: f64 = 24.0;

/// Single-frame decode supplied by the plugin. `memory` replaces the file
/// when the source is in-memory.
pub trait FrameDecoder: Send + Sync + 'static {
    fn frame_info(&self, path: &Path, memory: Option<&MemoryRead>) -> Result<ImageInfo>;
    fn decode(&self, path: &Path, memory: Option<&MemoryRead>)
        -> Result<reelplay_core::image::Image>;
}

struct VideoRequest {
    time: RationalTime,
    options: Options,
    promise: Promise<VideoData>,
}

struct Queue {
    video: VecDeque<VideoRequest>,
    info_waiters: Vec<Promise<Info>>,
    stopped: bool,
}

struct Shared {
    path: Path,
    memory: Vec<MemoryRead>,
    decoder: Arc<dyn FrameDecoder>,
    start_frame: i64,
    end_frame: i64,
    speed: f64,
    options: Options,
    cache: Option<Arc<Cache>>,
    log: Arc<LogSystem>,
    queue: Mutex<Queue>,
    cv: Condvar,
    info: Mutex<Option<Result<Info>>>,
}

pub struct SequenceRead {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SequenceRead {
    pub fn new(
        decoder: Arc<dyn FrameDecoder>,
        path: &Path,
        memory: &[MemoryRead],
        options: &Options,
        cache: Option<Arc<Cache>>,
        log: Arc<LogSystem>,
    ) -> Result<Arc<Self>> {
        let mut path = path.clone();
        let (start_frame, end_frame) = if !memory.is_empty() {
            let start = path.frame_number().unwrap_or(0);
            (start, start + memory.len() as i64 - 1)
        } else if let Some((min, max)) = path.frame_range() {
            (min, max)
        } else if path.has_number() {
            path.discover_frames()?;
            path.frame_range()
                .or_else(|| path.frame_number().map(|f| (f, f)))
                .unwrap_or((0, 0))
        } else {
            (0, 0)
        };

        let speed = option_f64(options, OPTION_DEFAULT_SPEED, DEFAULT_SPEED);
        let thread_count =
            option_usize(options, OPTION_THREAD_COUNT, DEFAULT_THREAD_COUNT).max(1);

        let shared = Arc::new(Shared {
            path,
            memory: memory.to_vec(),
            decoder,
            start_frame,
            end_frame,
            speed,
            options: options.clone(),
            cache,
            log,
            queue: Mutex::new(Queue {
                video: VecDeque::new(),
                info_waiters: Vec::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
            info: Mutex::new(None),
        });

        let worker = Arc::clone(&shared);
        let thread = std::thread::spawn(move || worker_loop(worker, thread_count));

        Ok(Arc::new(Self { shared, thread: Mutex::new(Some(thread)) }))
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl Read for SequenceRead {
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
            queue.video.push_back(VideoRequest {
                time,
                options: crate::merge(&self.shared.options, options),
                promise,
            });
            self.shared.cv.notify_one();
        }
        future
    }

    fn cancel_requests(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        for request in queue.video.drain(..) {
            request.promise.abort();
        }
    }
}

impl Drop for SequenceRead {
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

fn worker_loop(shared: Arc<Shared>, thread_count: usize) {
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(thread_count).build() {
        Ok(pool) => pool,
        Err(e) => {
            shared.log.error("sequence", &format!("thread pool: {e}"));
            return;
        }
    };
    loop {
        let (info_waiters, batch) = {
            let mut queue = shared.queue.lock().unwrap();
            while !queue.stopped && queue.video.is_empty() && queue.info_waiters.is_empty() {
                queue = shared.cv.wait(queue).unwrap();
            }
            if queue.stopped {
                // Break the remaining promises so no caller waits forever.
                for request in queue.video.drain(..) {
                    request.promise.abort();
                }
                for promise in queue.info_waiters.drain(..) {
                    promise.abort();
                }
                return;
            }
            let take = queue.video.len().min(thread_count);
            let batch: Vec<VideoRequest> = queue.video.drain(..take).collect();
            let info_waiters: Vec<Promise<Info>> = queue.info_waiters.drain(..).collect();
            (info_waiters, batch)
        };

        if !info_waiters.is_empty() {
            let info = sequence_info(&shared);
            for promise in info_waiters {
                promise.fulfill(info.clone());
            }
        }

        pool.scope(|scope| {
            for request in batch {
                let shared = &shared;
                scope.spawn(move |_| serve_request(shared, request));
            }
        });
    }
}

fn serve_request(shared: &Shared, request: VideoRequest) {
    if request.promise.is_cancelled() {
        request.promise.abort();
        return;
    }
    let frame = request.time.to_frames();
    if frame < shared.start_frame || frame > shared.end_frame {
        request
            .promise
            .fulfill(Ok(VideoData::new(request.time, 0, None)));
        return;
    }

    let key = video_key(&shared.path, request.time, 0, &request.options);
    if let Some(cache) = &shared.cache {
        if let Some(hit) = cache.get_video(&key) {
            request.promise.fulfill(Ok(VideoData::new(request.time, hit.layer, hit.image)));
            return;
        }
    }

    let (frame_path, memory) = frame_source(shared, frame);
    match shared.decoder.decode(&frame_path, memory) {
        Ok(mut image) => {
            image.set_tag(TAG_SOURCE_FILE, frame_path.get());
            let image = Arc::new(image);
            let data = VideoData::new(request.time, 0, Some(Arc::clone(&image)));
            if let Some(cache) = &shared.cache {
                cache.add(key, CacheItem::Video(data.clone()), image.byte_count());
            }
            request.promise.fulfill(Ok(data));
        }
        Err(e) => {
            shared
                .log
                .error("sequence", &format!("{}: {e}", frame_path.get()));
            request.promise.fulfill(Err(e));
        }
    }
}

/// The file path (or memory buffer) backing a given frame number.
fn frame_source(shared: &Shared, frame: i64) -> (Path, Option<&MemoryRead>) {
    if !shared.memory.is_empty() {
        let index = (frame - shared.start_frame) as usize;
        return (shared.path.clone(), shared.memory.get(index));
    }
    let frame_path = if shared.path.has_number() {
        Path::parse(&shared.path.frame(frame, true)).unwrap_or_else(|_| shared.path.clone())
    } else {
        shared.path.clone()
    };
    (frame_path, None)
}

fn sequence_info(shared: &Shared) -> Result<Info> {
    let mut cached = shared.info.lock().unwrap();
    if let Some(info) = cached.as_ref() {
        return info.clone();
    }
    let (frame_path, memory) = frame_source(shared, shared.start_frame);
    let result = shared.decoder.frame_info(&frame_path, memory).map(|image_info| {
        let frame_count = shared.end_frame - shared.start_frame + 1;
        let mut info = Info {
            video: vec![image_info],
            video_time_range: TimeRange::new(
                RationalTime::from_frames(shared.start_frame, shared.speed),
                RationalTime::from_frames(frame_count, shared.speed),
            ),
            ..Info::default()
        };
        info.tags
            .insert(TAG_SOURCE_FILE.into(), shared.path.get());
        info
    });
    if let Err(e) = &result {
        shared
            .log
            .error("sequence", &format!("{}: {e}", shared.path.get()));
    }
    *cached = Some(result.clone());
    result
}

fn option_f64(options: &Options, key: &str, fallback: f64) -> f64 {
    options.get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

fn option_usize(options: &Options, key: &str, fallback: usize) -> usize {
    options.get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelplay_core::error::Error;
    use reelplay_core::image::{Image, PixelType};

    /// Decoder that renders each frame's number into the first pixel.
    struct TestDecoder;

    impl FrameDecoder for TestDecoder {
        fn frame_info(&self, _path: &Path, _memory: Option<&MemoryRead>) -> Result<ImageInfo> {
            Ok(ImageInfo::new(2, 2, PixelType::RGB_U8))
        }

        fn decode(&self, path: &Path, _memory: Option<&MemoryRead>) -> Result<Image> {
            let mut image = Image::new(ImageInfo::new(2, 2, PixelType::RGB_U8));
            image.data_mut()[0] = path.frame_number().unwrap_or(0) as u8;
            Ok(image)
        }
    }

    fn reader(start: i64, end: i64) -> Arc<SequenceRead> {
        let mut path = Path::parse("/seq/frame.0001.tst").unwrap();
        path.set_frame_range(start, end);
        SequenceRead::new(
            Arc::new(TestDecoder),
            &path,
            &[],
            &Options::new(),
            None,
            Arc::new(LogSystem::new()),
        )
        .unwrap()
    }

    #[test]
    fn info_reports_the_frame_range() {
        let read = reader(1, 5);
        let info = read.info().get().unwrap();
        assert_eq!(info.video.len(), 1);
        let range = info.video_time_range;
        assert_eq!(range.start_time().to_frames(), 1);
        assert_eq!(range.duration().to_frames(), 5);
        assert_eq!(range.start_time().rate(), DEFAULT_SPEED);
    }

    #[test]
    fn frames_decode_with_source_tag() {
        let read = reader(1, 5);
        let data = read
            .read_video(RationalTime::from_frames(3, 24.0), &Options::new())
            .get()
            .unwrap();
        let image = data.image.unwrap();
        assert_eq!(image.data()[0], 3);
        assert_eq!(
            image.tags().get(TAG_SOURCE_FILE).map(String::as_str),
            Some("/seq/frame.0003.tst")
        );
    }

    #[test]
    fn out_of_range_is_an_empty_image() {
        let read = reader(1, 5);
        let data = read
            .read_video(RationalTime::from_frames(99, 24.0), &Options::new())
            .get()
            .unwrap();
        assert!(data.image.is_none());
        assert_eq!(data.time.to_frames(), 99);
    }

    #[test]
    fn cancel_requests_breaks_pending_futures() {
        let read = reader(1, 5);
        let futures: Vec<_> = (1..=5)
            .map(|f| read.read_video(RationalTime::from_frames(f, 24.0), &Options::new()))
            .collect();
        read.cancel_requests();
        // Every future resolves — success for whatever was already in
        // flight, Cancelled for the rest.
        for future in futures {
            let _ = future.get();
        }
    }

    #[test]
    fn memory_frames_bypass_the_filesystem() {
        struct MemoryDecoder;
        impl FrameDecoder for MemoryDecoder {
            fn frame_info(&self, _p: &Path, _m: Option<&MemoryRead>) -> Result<ImageInfo> {
                Ok(ImageInfo::new(1, 1, PixelType::L_U8))
            }
            fn decode(&self, _p: &Path, memory: Option<&MemoryRead>) -> Result<Image> {
                let memory = memory.ok_or(Error::OutOfRange)?;
                let mut image = Image::new(ImageInfo::new(1, 1, PixelType::L_U8));
                image.data_mut()[0] = memory.data[0];
                Ok(image)
            }
        }
        let path = Path::parse("memory://seq.0.tst").unwrap();
        let memory =
            vec![MemoryRead::from_bytes(vec![7]), MemoryRead::from_bytes(vec![9])];
        let read = SequenceRead::new(
            Arc::new(MemoryDecoder),
            &path,
            &memory,
            &Options::new(),
            None,
            Arc::new(LogSystem::new()),
        )
        .unwrap();
        let data = read
            .read_video(RationalTime::from_frames(1, 24.0), &Options::new())
            .get()
            .unwrap();
        assert_eq!(data.image.unwrap().data()[0], 9);
    }
}
