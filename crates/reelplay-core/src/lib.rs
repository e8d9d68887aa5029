// crates/reelplay-core/src/lib.rs
//
// Leaf types shared by the whole workspace: rational time, paths and
// sequences, image and audio buffers, the byte-budgeted LRU cache,
// observables, the error taxonomy, logging, and settings. No I/O threads
// live here — those belong to reelplay-io and reelplay-timeline.

pub mod audio;
pub mod context;
pub mod error;
pub mod image;
pub mod log;
pub mod math;
pub mod memory;
pub mod observer;
pub mod path;
pub mod settings;
pub mod time;

pub use context::Context;
pub use error::{Error, Result};
