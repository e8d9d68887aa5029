// crates/reelplay-timeline/src/otio.rs
//
// The composition model: a value-owned tree parsed from OpenTimelineIO
// JSON. Items are addressed by index within their track, and a transition
// bridges the non-transition items on either side of it — there are no back
// pointers, so user-crafted JSON cannot form cycles. Parser recursion is
// depth-limited; blowing the limit is a composition error.
//
// Unknown JSON fields (metadata, markers, effects) pass through untouched
// by being ignored; this layer models exactly what playback resolves.

use serde::{Deserialize, Serialize};

use reelplay_core::error::{Error, Result};
use reelplay_core::path::MemoryRead;
use reelplay_core::time::{RationalTime, TimeRange};

fn timeline_schema() -> String {
    "Timeline.1".into()
}

fn stack_schema() -> String {
    "Stack.1".into()
}

fn track_schema() -> String {
    "Track.1".into()
}

// ── Media references ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "OTIO_SCHEMA")]
pub enum MediaReference {
    #[serde(rename = "ExternalReference.1")]
    External {
        target_url: String,
        #[serde(default)]
        available_range: Option<TimeRange>,
    },
    #[serde(rename = "ImageSequenceReference.1")]
    ImageSequence {
        target_url_base: String,
        name_prefix: String,
        name_suffix: String,
        start_frame: i64,
        rate: f64,
        frame_zero_padding: usize,
        #[serde(default)]
        available_range: Option<TimeRange>,
    },
    /// A single in-memory buffer. The buffer itself never serializes; an
    /// .otioz archive stores it under the target URL instead.
    #[serde(rename = "SharedMemoryReference.1")]
    SharedMemory {
        target_url: String,
        #[serde(skip)]
        memory: Option<MemoryRead>,
        #[serde(default)]
        available_range: Option<TimeRange>,
    },
    /// One in-memory buffer per frame.
    #[serde(rename = "MemorySequenceReference.1")]
    MemorySequence {
        target_url: String,
        #[serde(skip)]
        memory: Vec<MemoryRead>,
        #[serde(default)]
        available_range: Option<TimeRange>,
    },
    /// A placeholder that renders nothing.
    #[serde(rename = "GeneratorReference.1")]
    Generator {
        generator_kind: String,
        #[serde(default)]
        available_range: Option<TimeRange>,
    },
    #[serde(rename = "MissingReference.1")]
    Missing {
        #[serde(default)]
        available_range: Option<TimeRange>,
    },
}

impl MediaReference {
    pub fn available_range(&self) -> Option<TimeRange> {
        match self {
            MediaReference::External { available_range, .. }
            | MediaReference::ImageSequence { available_range, .. }
            | MediaReference::SharedMemory { available_range, .. }
            | MediaReference::MemorySequence { available_range, .. }
            | MediaReference::Generator { available_range, .. }
            | MediaReference::Missing { available_range } => *available_range,
        }
    }

    /// The URL a reader opens, when there is one.
    pub fn target_url(&self) -> Option<&str> {
        match self {
            MediaReference::External { target_url, .. }
            | MediaReference::SharedMemory { target_url, .. }
            | MediaReference::MemorySequence { target_url, .. } => Some(target_url),
            MediaReference::ImageSequence { target_url_base, .. } => Some(target_url_base),
            MediaReference::Generator { .. } | MediaReference::Missing { .. } => None,
        }
    }

    /// In-memory buffers backing this reference, one per frame for
    /// sequences.
    pub fn memory_reads(&self) -> Vec<MemoryRead> {
        match self {
            MediaReference::SharedMemory { memory, .. } => {
                memory.iter().cloned().collect()
            }
            MediaReference::MemorySequence { memory, .. } => memory.clone(),
            _ => Vec::new(),
        }
    }
}

// ── Items ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Clip {
    #[serde(default)]
    pub name: String,
    pub media_reference: MediaReference,
    #[serde(default)]
    pub source_range: Option<TimeRange>,
}

impl Clip {
    /// The media span this clip uses: the source range when trimmed,
    /// otherwise everything the media has.
    pub fn trimmed_range(&self) -> TimeRange {
        self.source_range
            .or_else(|| self.media_reference.available_range())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Gap {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_range: Option<TimeRange>,
}

impl Gap {
    pub fn trimmed_range(&self) -> TimeRange {
        self.source_range.unwrap_or_default()
    }
}

/// SMPTE transition names this engine understands.
pub const TRANSITION_SMPTE_DISSOLVE: &str = "SMPTE_Dissolve";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub transition_type: String,
    /// Overlap into the outgoing item.
    pub in_offset: RationalTime,
    /// Overlap into the incoming item.
    pub out_offset: RationalTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    #[default]
    Dissolve,
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        // Every SMPTE wipe degrades to a dissolve here; the renderer may
        // refine this.
        TransitionKind::Dissolve
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "OTIO_SCHEMA")]
pub enum Item {
    #[serde(rename = "Clip.2", alias = "Clip.1")]
    Clip(Clip),
    #[serde(rename = "Gap.1")]
    Gap(Gap),
    #[serde(rename = "Transition.1")]
    Transition(Transition),
}

impl Item {
    /// The duration this item occupies in its track; transitions occupy
    /// none.
    pub fn duration(&self) -> Option<RationalTime> {
        match self {
            Item::Clip(clip) => Some(clip.trimmed_range().duration()),
            Item::Gap(gap) => Some(gap.trimmed_range().duration()),
            Item::Transition(_) => None,
        }
    }

    pub fn as_transition(&self) -> Option<&Transition> {
        match self {
            Item::Transition(transition) => Some(transition),
            _ => None,
        }
    }
}

// ── Tracks ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    #[default]
    Video,
    Audio,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    #[serde(rename = "OTIO_SCHEMA", default = "track_schema")]
    pub schema: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: TrackKind,
    #[serde(default)]
    pub children: Vec<Item>,
}

impl Track {
    pub fn new(kind: TrackKind) -> Self {
        Self { schema: track_schema(), name: String::new(), kind, children: Vec::new() }
    }

    /// Total duration of the non-transition items.
    pub fn duration(&self) -> RationalTime {
        let mut out: Option<RationalTime> = None;
        for item in &self.children {
            if let Some(duration) = item.duration() {
                out = Some(match out {
                    Some(total) => total + duration,
                    None => duration,
                });
            }
        }
        out.unwrap_or_default()
    }

    /// The range each child occupies in track coordinates; transitions get
    /// None. Ranges accumulate at the first item's rate.
    pub fn child_ranges(&self) -> Vec<Option<TimeRange>> {
        let mut out = Vec::with_capacity(self.children.len());
        let mut position: Option<RationalTime> = None;
        for item in &self.children {
            match item.duration() {
                Some(duration) => {
                    let start = position.unwrap_or_else(|| RationalTime::new(0.0, duration.rate()));
                    out.push(Some(TimeRange::new(start, duration)));
                    position = Some(start + duration);
                }
                None => out.push(None),
            }
        }
        out
    }

    /// Index of the non-transition item active at `time` (end-exclusive).
    pub fn item_at(&self, time: RationalTime) -> Option<usize> {
        for (index, range) in self.child_ranges().iter().enumerate() {
            if let Some(range) = range {
                if range.contains(&time) {
                    return Some(index);
                }
            }
        }
        None
    }
}

// ── Timeline ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stack {
    #[serde(rename = "OTIO_SCHEMA", default = "stack_schema")]
    pub schema: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub children: Vec<Track>,
}

impl Default for Stack {
    fn default() -> Self {
        Self { schema: stack_schema(), name: String::new(), children: Vec::new() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(rename = "OTIO_SCHEMA", default = "timeline_schema")]
    pub schema: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub global_start_time: Option<RationalTime>,
    #[serde(default)]
    pub tracks: Stack,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            schema: timeline_schema(),
            name: String::new(),
            global_start_time: None,
            tracks: Stack::default(),
        }
    }
}

impl Timeline {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            let message = e.to_string();
            if message.contains("recursion") {
                Error::Composition(message)
            } else {
                Error::Parse(message)
            }
        })
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.children.iter().filter(move |track| track.kind == kind)
    }

    /// The longest duration across tracks of one kind.
    pub fn duration_of(&self, kind: TrackKind) -> Option<RationalTime> {
        self.tracks_of(kind)
            .map(Track::duration)
            .filter(|d| d.is_valid())
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// The timeline's span: the video duration (or audio when there is no
    /// video) starting at the global start time.
    pub fn time_range(&self) -> TimeRange {
        let duration = self
            .duration_of(TrackKind::Video)
            .or_else(|| self.duration_of(TrackKind::Audio))
            .unwrap_or_default();
        let start = self
            .global_start_time
            .unwrap_or_else(|| RationalTime::new(0.0, duration.rate()));
        TimeRange::new(start, duration.rescaled_to(start.rate()))
    }
}
