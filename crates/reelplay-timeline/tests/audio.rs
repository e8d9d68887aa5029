// crates/reelplay-timeline/tests/audio.rs
//
// Audio resolution end-to-end: one-second slices, padding at clip edges,
// transition markers, side-car discovery, and the player ring buffer.

mod common;

use std::sync::Arc;
use std::time::Instant;

use reelplay_core::path::Path;
use reelplay_core::time::{RationalTime, TimeRange};
use reelplay_core::Context;
use reelplay_io::System;
use reelplay_timeline::otio;
use reelplay_timeline::player::{Playback, Player, PlayerOptions};
use reelplay_timeline::timeline::{FileSequenceAudio, Options, Timeline};

use common::{wait_for, write_ppm_sequence, ToneAudioPlugin, AUDIO_SAMPLE_RATE};

fn tone_system(seconds: f64) -> Arc<System> {
    let context = Context::new();
    let system = System::new(&context);
    system.add_plugin(Arc::new(ToneAudioPlugin::new(seconds)));
    system
}

fn audio_clip(name: &str, seconds: f64, source_range: Option<TimeRange>) -> otio::Item {
    let rate = AUDIO_SAMPLE_RATE as f64;
    otio::Item::Clip(otio::Clip {
        name: name.into(),
        media_reference: otio::MediaReference::External {
            target_url: format!("/media/{name}.wav"),
            available_range: Some(TimeRange::new(
                RationalTime::new(0.0, rate),
                RationalTime::new(seconds * rate, rate),
            )),
        },
        source_range,
    })
}

#[test]
fn one_second_slices_resolve_per_clip() {
    let system = tone_system(5.0);
    let mut timeline = otio::Timeline::default();
    let mut track = otio::Track::new(otio::TrackKind::Audio);
    track.children.push(audio_clip("tone", 5.0, None));
    timeline.tracks.children.push(track);
    let timeline =
        Timeline::from_otio(&system, timeline, Path::default(), Options::default()).unwrap();

    let data = timeline.audio(2, &reelplay_io::Options::new()).get().unwrap();
    assert_eq!(data.seconds, 2);
    assert_eq!(data.layers.len(), 1);
    let audio = data.layers[0].audio.as_ref().expect("audio");
    // A full second at the tone's sample rate, all tone samples.
    assert_eq!(audio.sample_count(), AUDIO_SAMPLE_RATE as usize);
    assert!(audio.data().iter().all(|&b| b == 9));
}

#[test]
fn clip_edges_pad_with_silence() {
    let system = tone_system(5.0);
    let rate = AUDIO_SAMPLE_RATE as f64;
    let mut timeline = otio::Timeline::default();

    // Push the clip half a second into the track with a leading gap.
    let mut track = otio::Track::new(otio::TrackKind::Audio);
    track.children.push(otio::Item::Gap(otio::Gap {
        name: String::new(),
        source_range: Some(TimeRange::new(
            RationalTime::new(0.0, rate),
            RationalTime::new(0.5 * rate, rate),
        )),
    }));
    track.children.push(audio_clip("tone", 5.0, None));
    timeline.tracks.children.push(track);
    let timeline =
        Timeline::from_otio(&system, timeline, Path::default(), Options::default()).unwrap();

    let data = timeline.audio(0, &reelplay_io::Options::new()).get().unwrap();
    assert_eq!(data.layers.len(), 1);
    let audio = data.layers[0].audio.as_ref().expect("audio");
    assert_eq!(audio.sample_count(), AUDIO_SAMPLE_RATE as usize);
    let half = audio.byte_count() / 2;
    // First half silent (the gap), second half tone.
    assert!(audio.data()[..half].iter().all(|&b| b == 0));
    assert!(audio.data()[half..].iter().all(|&b| b == 9));
}

#[test]
fn transition_markers_flag_the_edges() {
    let system = tone_system(2.0);
    let rate = AUDIO_SAMPLE_RATE as f64;
    let mut timeline = otio::Timeline::default();
    let mut track = otio::Track::new(otio::TrackKind::Audio);
    track.children.push(audio_clip("a", 2.0, None));
    track.children.push(otio::Item::Transition(otio::Transition {
        name: String::new(),
        transition_type: otio::TRANSITION_SMPTE_DISSOLVE.into(),
        in_offset: RationalTime::new(0.25 * rate, rate),
        out_offset: RationalTime::new(0.25 * rate, rate),
    }));
    track.children.push(audio_clip("b", 2.0, None));
    timeline.tracks.children.push(track);
    let timeline =
        Timeline::from_otio(&system, timeline, Path::default(), Options::default()).unwrap();

    // The second containing the cut sees both clips, one fading out and
    // one fading in.
    let data = timeline.audio(1, &reelplay_io::Options::new()).get().unwrap();
    assert_eq!(data.layers.len(), 2);
    assert!(data.layers[0].out_transition);
    assert!(!data.layers[0].in_transition);
    assert!(data.layers[1].in_transition);
    assert!(!data.layers[1].out_transition);
}

#[test]
fn sequence_side_car_audio_by_base_name() {
    let dir = tempfile::tempdir().unwrap();
    let url = write_ppm_sequence(dir.path(), 5);
    // The side-car shares the sequence's base name.
    std::fs::write(dir.path().join("frame.wav"), b"tone").unwrap();

    let system = tone_system(3.0);
    let mut options = Options::default();
    options.file_sequence_audio = FileSequenceAudio::BaseName;
    let timeline = Timeline::from_file(&system, &url, options).unwrap();

    let composition = timeline.composition();
    assert_eq!(composition.tracks.children.len(), 2);
    let audio_track = &composition.tracks.children[1];
    assert_eq!(audio_track.kind, otio::TrackKind::Audio);
    let otio::Item::Clip(clip) = &audio_track.children[0] else {
        panic!("expected an audio clip");
    };
    assert!(clip.media_reference.target_url().unwrap().ends_with("frame.wav"));
    assert!(timeline.io_info().has_audio());
}

#[test]
fn player_publishes_audio_and_fills_the_ring() {
    let dir = tempfile::tempdir().unwrap();
    let url = write_ppm_sequence(dir.path(), 5);
    std::fs::write(dir.path().join("frame.wav"), b"tone").unwrap();

    let system = tone_system(3.0);
    let mut options = Options::default();
    options.file_sequence_audio = FileSequenceAudio::BaseName;
    let timeline = Timeline::from_file(&system, &url, options).unwrap();
    let mut player = Player::new(Arc::new(timeline), PlayerOptions::default());

    let ring = player.audio_ring();
    let audio_sub = player.observe_audio();
    audio_sub.drain();
    let t0 = Instant::now();
    player.set_playback(Playback::Forward);
    assert!(
        wait_for(|| {
            player.tick(t0);
            !ring.is_empty()
        }),
        "ring never received audio"
    );
    let second_bytes = AUDIO_SAMPLE_RATE as usize * 2;
    assert!(ring.len() >= second_bytes);

    // The consumer side drains tone samples; a few edge samples are silent
    // because the sequence's first frame offsets the slice.
    let mut buf = vec![0u8; second_bytes];
    let read = ring.read(&mut buf);
    assert_eq!(read, second_bytes);
    let tone_bytes = buf.iter().filter(|&&b| b == 9).count();
    assert!(tone_bytes >= second_bytes - 16, "{tone_bytes} of {second_bytes}");

    assert!(audio_sub.latest().is_some());
}
