// crates/reelplay-timeline/src/util.rs
//
// Time math shared by the resolver, the player, and the cache policy, plus
// EDL construction for opening a bare media path as a timeline.

use std::sync::Arc;

use reelplay_core::error::{Error, Result};
use reelplay_core::path::Path;
use reelplay_core::time::{frames, RationalTime, TimeRange};

use reelplay_io::plugin::FileType;
use reelplay_io::sequence::OPTION_DEFAULT_SPEED;
use reelplay_io::System;

use crate::otio::{Clip, Item, MediaReference, Timeline, Track, TrackKind};
use crate::timeline::{FileSequenceAudio, Options};

/// Wrap a time into a range. Returns the wrapped time and whether a wrap
/// happened.
pub fn loop_time(time: RationalTime, range: &TimeRange) -> (RationalTime, bool) {
    let duration = range.duration().value();
    if !range.is_valid() || duration <= 0.0 {
        return (time, false);
    }
    if range.contains(&time) {
        return (time, false);
    }
    let start = range.start_time();
    let offset = (time - start).value().rem_euclid(duration);
    (start + RationalTime::new(offset, start.rate()), true)
}

/// Clip a cache window into the in/out range, wrapping past the end. The
/// result is one range, or two when the window straddles the loop point.
pub fn loop_cache_ranges(window: &TimeRange, in_out: &TimeRange) -> Vec<TimeRange> {
    if !window.is_valid() || !in_out.is_valid() {
        return Vec::new();
    }
    if window.duration() >= in_out.duration() {
        return vec![*in_out];
    }
    let (start, _) = loop_time(window.start_time(), in_out);
    let end = start + window.duration();
    if end <= in_out.end_time_exclusive() {
        return vec![TimeRange::from_start_end_time(start, end)];
    }
    let tail = end - in_out.end_time_exclusive();
    vec![
        TimeRange::from_start_end_time(start, in_out.end_time_exclusive()),
        TimeRange::new(in_out.start_time(), tail),
    ]
}

/// Collapse frame times into contiguous ranges. Input order does not
/// matter; duplicates collapse.
pub fn to_ranges(mut times: Vec<RationalTime>) -> Vec<TimeRange> {
    times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    times.dedup();
    let mut out: Vec<TimeRange> = Vec::new();
    for time in times {
        let one = RationalTime::new(1.0, time.rate());
        match out.last_mut() {
            Some(last) if last.end_time_exclusive() == time => {
                *last = TimeRange::new(last.start_time(), last.duration() + one);
            }
            _ => out.push(TimeRange::new(time, one)),
        }
    }
    out
}

/// Transform a track time into video media time: offset into the clip's
/// trimmed range, rescaled to the media rate, clamped into the trimmed
/// range.
pub fn to_video_media_time(
    time: RationalTime,
    trimmed_range_in_parent: &TimeRange,
    trimmed_range: &TimeRange,
    rate: f64,
) -> RationalTime {
    let media = (time - trimmed_range_in_parent.start_time()) + trimmed_range.start_time();
    let media = media.rescaled_to(rate).floor();
    let clamp = TimeRange::new(
        trimmed_range.start_time().rescaled_to(rate),
        trimmed_range.duration().rescaled_to(rate),
    );
    clamp.clamp_time(&media)
}

/// Transform a track-time span into audio media time at the media's sample
/// rate, clamped into the trimmed range.
pub fn to_audio_media_time(
    range: &TimeRange,
    trimmed_range_in_parent: &TimeRange,
    trimmed_range: &TimeRange,
    sample_rate: f64,
) -> TimeRange {
    let start =
        (range.start_time() - trimmed_range_in_parent.start_time()) + trimmed_range.start_time();
    let media = TimeRange::new(start.rescaled_to(sample_rate), range.duration().rescaled_to(sample_rate));
    let clamp = TimeRange::new(
        trimmed_range.start_time().rescaled_to(sample_rate),
        trimmed_range.duration().rescaled_to(sample_rate),
    );
    clamp.clamp_range(&media)
}

// ── EDL construction ─────────────────────────────────────────────────────────

/// Build a single-clip timeline around a media path: the way a bare image
/// sequence or movie opens in the player. A separate audio file is bound
/// according to the FileSequence/Audio setting.
pub fn timeline_from_path(
    system: &Arc<System>,
    path: &Path,
    options: &Options,
) -> Result<Timeline> {
    let mut media_path = path.clone();
    if media_path.has_number() && media_path.frame_range().is_none() {
        media_path.discover_frames()?;
    }

    let mut io_options = options.io_options.clone();
    let read = system.read(&media_path, &[], &io_options)?;
    let info = read.info().get()?;

    let mut timeline = Timeline::default();
    timeline.name = media_path.file_name(false);

    if info.has_video() {
        let range = info.video_time_range;
        let mut track = Track::new(TrackKind::Video);
        track.children.push(Item::Clip(Clip {
            name: media_path.base_name().trim_end_matches('.').to_string(),
            media_reference: MediaReference::External {
                target_url: media_path.get(),
                available_range: Some(range),
            },
            source_range: None,
        }));
        timeline.tracks.children.push(track);
        timeline.global_start_time = Some(range.start_time());
        io_options
            .entry(OPTION_DEFAULT_SPEED.to_string())
            .or_insert_with(|| range.start_time().rate().to_string());
    }

    let audio_path = if info.has_audio() {
        Some(media_path.clone())
    } else {
        find_sequence_audio(system, &media_path, options)?
    };
    if let Some(audio_path) = audio_path {
        let audio_range = if info.has_audio() {
            info.audio_time_range
        } else {
            let audio_read = system.read(&audio_path, &[], &io_options)?;
            audio_read.info().get()?.audio_time_range
        };
        if audio_range.is_valid() {
            let mut track = Track::new(TrackKind::Audio);
            track.children.push(Item::Clip(Clip {
                name: audio_path.base_name().trim_end_matches('.').to_string(),
                media_reference: MediaReference::External {
                    target_url: audio_path.get(),
                    available_range: Some(audio_range),
                },
                source_range: None,
            }));
            timeline.tracks.children.push(track);
        }
    }

    if timeline.tracks.children.is_empty() {
        return Err(Error::NotFound(format!("{}: no media", path.get())));
    }
    Ok(timeline)
}

/// Locate the separate audio file for an image sequence, per the
/// FileSequence/Audio setting.
fn find_sequence_audio(
    system: &Arc<System>,
    media_path: &Path,
    options: &Options,
) -> Result<Option<Path>> {
    let audio_extensions = system.extensions(&[FileType::Audio]);
    if audio_extensions.is_empty() {
        return Ok(None);
    }
    match options.file_sequence_audio {
        FileSequenceAudio::None => Ok(None),
        FileSequenceAudio::BaseName => {
            let base = media_path.base_name().trim_end_matches('.').to_lowercase();
            scan_for_audio(media_path.directory(), &audio_extensions, Some(&base))
        }
        FileSequenceAudio::FileName => {
            if options.file_sequence_audio_file_name.is_empty() {
                return Ok(None);
            }
            let candidate = format!(
                "{}{}",
                media_path.directory(),
                options.file_sequence_audio_file_name
            );
            Ok(Some(Path::parse(&candidate)?))
        }
        FileSequenceAudio::Directory => {
            let directory = if options.file_sequence_audio_directory.is_empty() {
                media_path.directory().to_string()
            } else {
                options.file_sequence_audio_directory.clone()
            };
            scan_for_audio(&directory, &audio_extensions, None)
        }
    }
}

/// First audio-extension file in a directory, lexically ordered, optionally
/// restricted to a base name.
fn scan_for_audio(
    directory: &str,
    extensions: &[String],
    base_name: Option<&str>,
) -> Result<Option<Path>> {
    let directory = if directory.is_empty() { "." } else { directory };
    let mut names: Vec<String> = Vec::new();
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(_) => return Ok(None),
    };
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    for name in names {
        let lower = name.to_lowercase();
        if !extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
            continue;
        }
        if let Some(base) = base_name {
            let candidate = Path::parse(&name)?;
            if candidate.base_name().trim_end_matches('.').to_lowercase() != base {
                continue;
            }
        }
        let full = format!(
            "{}{}",
            if directory == "." { String::new() } else { directory.to_string() },
            name
        );
        return Ok(Some(Path::parse(&full)?));
    }
    Ok(None)
}

/// Every frame in a set of ranges, for prefetch planning.
pub fn range_frames(ranges: &[TimeRange]) -> Vec<RationalTime> {
    let mut out = Vec::new();
    for range in ranges {
        out.extend(frames(range));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: f64, duration: f64) -> TimeRange {
        TimeRange::new(RationalTime::new(start, 24.0), RationalTime::new(duration, 24.0))
    }

    #[test]
    fn loop_time_wraps_both_directions() {
        let r = range(0.0, 5.0);
        let (t, looped) = loop_time(RationalTime::new(5.0, 24.0), &r);
        assert_eq!(t.value(), 0.0);
        assert!(looped);
        let (t, looped) = loop_time(RationalTime::new(-1.0, 24.0), &r);
        assert_eq!(t.value(), 4.0);
        assert!(looped);
        let (t, looped) = loop_time(RationalTime::new(3.0, 24.0), &r);
        assert_eq!(t.value(), 3.0);
        assert!(!looped);
    }

    #[test]
    fn cache_ranges_wrap_at_the_loop_point() {
        let in_out = range(0.0, 100.0);
        let ranges = loop_cache_ranges(&range(10.0, 20.0), &in_out);
        assert_eq!(ranges, vec![range(10.0, 20.0)]);

        let ranges = loop_cache_ranges(&range(90.0, 20.0), &in_out);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], range(90.0, 10.0));
        assert_eq!(ranges[1], range(0.0, 10.0));

        // A window wider than the loop covers everything once.
        let ranges = loop_cache_ranges(&range(-50.0, 300.0), &in_out);
        assert_eq!(ranges, vec![in_out]);
    }

    #[test]
    fn to_ranges_groups_consecutive_frames() {
        let times = vec![
            RationalTime::new(4.0, 24.0),
            RationalTime::new(0.0, 24.0),
            RationalTime::new(1.0, 24.0),
            RationalTime::new(2.0, 24.0),
            RationalTime::new(1.0, 24.0),
        ];
        let ranges = to_ranges(times);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], range(0.0, 3.0));
        assert_eq!(ranges[1], range(4.0, 1.0));
    }

    #[test]
    fn video_media_time_offsets_and_clamps() {
        // Clip lives at [10, 20) in the track, uses media [100, 110).
        let parent = range(10.0, 10.0);
        let trimmed = range(100.0, 10.0);
        let t = to_video_media_time(RationalTime::new(15.0, 24.0), &parent, &trimmed, 24.0);
        assert_eq!(t.value(), 105.0);
        // Before and past the clip clamp to its edges.
        let t = to_video_media_time(RationalTime::new(5.0, 24.0), &parent, &trimmed, 24.0);
        assert_eq!(t.value(), 100.0);
        let t = to_video_media_time(RationalTime::new(25.0, 24.0), &parent, &trimmed, 24.0);
        assert_eq!(t.value(), 109.0);
    }

    #[test]
    fn video_media_time_rescales_to_media_rate() {
        // 24 fps track, 48 fps media.
        let parent = range(0.0, 10.0);
        let trimmed = TimeRange::new(RationalTime::new(0.0, 48.0), RationalTime::new(20.0, 48.0));
        let t = to_video_media_time(RationalTime::new(3.0, 24.0), &parent, &trimmed, 48.0);
        assert_eq!(t.value(), 6.0);
        assert_eq!(t.rate(), 48.0);
    }

    #[test]
    fn audio_media_time_maps_a_second() {
        let parent = range(0.0, 240.0);
        let trimmed = range(0.0, 240.0);
        let slice = TimeRange::new(RationalTime::new(24.0, 24.0), RationalTime::new(24.0, 24.0));
        let media = to_audio_media_time(&slice, &parent, &trimmed, 48000.0);
        assert_eq!(media.start_time().value(), 48000.0);
        assert_eq!(media.duration().value(), 48000.0);
        assert_eq!(media.start_time().rate(), 48000.0);
    }
}
