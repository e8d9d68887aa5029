// crates/reelplay-io/src/plugin.rs
//
// The plugin contract. A Plugin declares which extensions it claims and
// constructs readers and writers; a Read owns its own decode worker(s) and
// answers with futures. Readers are not required to preserve submission
// order — callers match results by future, never by sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use reelplay_core::error::Result;
use reelplay_core::image::ImageInfo;
use reelplay_core::path::{MemoryRead, Path};
use reelplay_core::time::{RationalTime, TimeRange};

use crate::future::Future;
use crate::{AudioData, Info, Options, VideoData};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    /// A container with its own clock (one file, many frames).
    Movie,
    /// One frame per file, numbered.
    Sequence,
    /// Audio-only media.
    Audio,
}

/// Map from extension (with leading dot, lower case) to kind.
pub type ExtensionMap = BTreeMap<String, FileType>;

/// An open source. Implementations own their decode threads; every method
/// returns immediately.
pub trait Read: Send + Sync {
    /// Source description. Always resolves or fails; never blocks the
    /// calling thread.
    fn info(&self) -> Future<Info>;

    /// Decode one frame. Out-of-range times resolve successfully with an
    /// empty image.
    fn read_video(&self, time: RationalTime, options: &Options) -> Future<VideoData>;

    /// Decode an audio span, zero-padded where the range extends past the
    /// media.
    fn read_audio(&self, range: TimeRange, options: &Options) -> Future<AudioData> {
        let _ = (range, options);
        Future::ready(Ok(AudioData::default()))
    }

    /// Best-effort: outstanding futures resolve with Cancelled, though
    /// already-running decodes may still complete.
    fn cancel_requests(&self);
}

/// An open sink. Writers surface errors synchronously.
pub trait Write: Send {
    fn write_video(
        &mut self,
        time: RationalTime,
        image: &reelplay_core::image::Image,
        options: &Options,
    ) -> Result<()>;

    fn write_audio(
        &mut self,
        range: TimeRange,
        audio: &reelplay_core::audio::Audio,
        options: &Options,
    ) -> Result<()> {
        let _ = (range, audio, options);
        Ok(())
    }
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn extensions(&self) -> &ExtensionMap;

    /// Extensions of the given kinds, for building file dialogs and
    /// timeline-open filters.
    fn extensions_of(&self, types: &[FileType]) -> Vec<String> {
        self.extensions()
            .iter()
            .filter(|(_, t)| types.contains(t))
            .map(|(ext, _)| ext.clone())
            .collect()
    }

    /// Protocol-specific matching for sources without a usable extension
    /// (network streams).
    fn matches_protocol(&self, protocol: &str) -> bool {
        let _ = protocol;
        false
    }

    /// Open a reader. `memory` replaces filesystem access when non-empty:
    /// one buffer per frame for sequences, a single buffer otherwise.
    fn read(&self, path: &Path, memory: &[MemoryRead], options: &Options)
        -> Result<Arc<dyn Read>>;

    /// The info this plugin would actually write for the given input, or an
    /// error when it cannot represent it.
    fn write_info(&self, info: &ImageInfo, options: &Options) -> Result<ImageInfo>;

    fn write(&self, path: &Path, info: &Info, options: &Options) -> Result<Box<dyn Write>>;
}
