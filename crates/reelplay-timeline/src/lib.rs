// crates/reelplay-timeline/src/lib.rs
//
// The composition layer: the OTIO data model and archives, the resolver and
// its coordinator thread, the wall-clock player with its prefetch policy,
// the A/B compare pipeline, and the output-device contract.

pub mod compare;
pub mod device;
pub mod options;
pub mod otio;
pub mod otioz;
pub mod player;
pub mod player_cache;
pub mod timeline;
pub mod util;

pub use player::{LoopMode, Playback, Player, PlayerOptions};
pub use player_cache::{CacheInfo, CacheOptions};
pub use timeline::{AudioData, AudioLayer, Options, Timeline, VideoData, VideoLayer};
