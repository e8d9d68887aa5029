// crates/reelplay-timeline/src/otioz.rs
//
// .otioz archives: a zip holding the composition JSON ("content.otio") and
// the media it references. Reading converts referenced entries into
// in-memory references so playback never touches the archive again;
// writing serializes a timeline whose references carry memory buffers.

use std::io::{Read as _, Write as _};
use std::sync::Arc;

use reelplay_core::error::{Error, Result};
use reelplay_core::path::{MemoryRead, Path};

use crate::otio::{Item, MediaReference, Timeline};

/// Name of the composition inside the archive.
pub const CONTENT_NAME: &str = "content.otio";

/// Read a timeline from an .otioz archive, binding bundled media as memory
/// references.
pub fn read(file_name: &str) -> Result<Timeline> {
    let file = std::fs::File::open(file_name)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| Error::Format(format!("{file_name}: {e}")))?;

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    let content_name = names
        .iter()
        .find(|name| *name == CONTENT_NAME)
        .or_else(|| names.iter().find(|name| name.ends_with(".otio")))
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("{file_name}: no composition entry")))?;

    let json = read_entry(&mut archive, &content_name, file_name)?;
    let json = String::from_utf8(json)
        .map_err(|_| Error::Parse(format!("{file_name}: composition is not UTF-8")))?;
    let mut timeline = Timeline::from_json_str(&json)?;

    for track in &mut timeline.tracks.children {
        for item in &mut track.children {
            let Item::Clip(clip) = item else { continue };
            let MediaReference::External { target_url, available_range } =
                clip.media_reference.clone()
            else {
                continue;
            };
            let target = Path::parse(&target_url)?;
            if target.has_number() {
                // A bundled sequence: collect every sibling frame, ordered.
                let mut frames: Vec<(i64, String)> = Vec::new();
                for name in &names {
                    if let Ok(candidate) = Path::parse(name) {
                        if candidate.sequence(&target) || target.sequence(&candidate) {
                            if let Some(frame) = candidate.frame_number() {
                                frames.push((frame, name.clone()));
                            }
                        }
                    }
                }
                if frames.is_empty() {
                    continue;
                }
                frames.sort();
                let mut memory = Vec::with_capacity(frames.len());
                for (_, name) in &frames {
                    memory.push(MemoryRead::new(Arc::new(read_entry(
                        &mut archive,
                        name,
                        file_name,
                    )?)));
                }
                clip.media_reference = MediaReference::MemorySequence {
                    target_url,
                    memory,
                    available_range,
                };
            } else if names.iter().any(|name| *name == target_url) {
                let data = read_entry(&mut archive, &target_url, file_name)?;
                clip.media_reference = MediaReference::SharedMemory {
                    target_url,
                    memory: Some(MemoryRead::new(Arc::new(data))),
                    available_range,
                };
            }
        }
    }
    Ok(timeline)
}

/// Write a timeline into an .otioz archive. Memory-backed references store
/// their buffers under the target URL; other references serialize as-is.
pub fn write(file_name: &str, timeline: &Timeline) -> Result<()> {
    let file = std::fs::File::create(file_name)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let zip_err = |e: zip::result::ZipError| Error::Format(format!("{file_name}: {e}"));

    // Memory buffers land in the archive; the serialized form keeps only
    // the target URLs.
    let mut stored = timeline.clone();
    for track in &mut stored.tracks.children {
        for item in &mut track.children {
            let Item::Clip(clip) = item else { continue };
            match &clip.media_reference {
                MediaReference::SharedMemory { target_url, memory: Some(memory), available_range } => {
                    writer.start_file(target_url.as_str(), options).map_err(zip_err)?;
                    writer.write_all(&memory.data)?;
                    clip.media_reference = MediaReference::External {
                        target_url: target_url.clone(),
                        available_range: *available_range,
                    };
                }
                MediaReference::MemorySequence { target_url, memory, available_range } => {
                    let target = Path::parse(target_url)?;
                    let start = target.frame_number().unwrap_or(0);
                    for (index, frame) in memory.iter().enumerate() {
                        let name = target.frame(start + index as i64, true);
                        writer.start_file(name.as_str(), options).map_err(zip_err)?;
                        writer.write_all(&frame.data)?;
                    }
                    clip.media_reference = MediaReference::External {
                        target_url: target_url.clone(),
                        available_range: *available_range,
                    };
                }
                _ => {}
            }
        }
    }

    writer.start_file(CONTENT_NAME, options).map_err(zip_err)?;
    let json = stored.to_json_string()?;
    writer.write_all(json.as_bytes())?;
    writer.finish().map_err(zip_err)?;
    Ok(())
}

fn read_entry<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    file_name: &str,
) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| Error::Format(format!("{file_name}: {name}: {e}")))?;
    let mut out = Vec::new();
    entry.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otio::{Clip, Track, TrackKind};
    use reelplay_core::time::{RationalTime, TimeRange};

    fn memory_timeline() -> Timeline {
        let mut timeline = Timeline::default();
        timeline.name = "bundled".into();
        let mut track = Track::new(TrackKind::Video);
        track.children.push(Item::Clip(Clip {
            name: "frames".into(),
            media_reference: MediaReference::MemorySequence {
                target_url: "media/frame.0001.ppm".into(),
                memory: vec![
                    MemoryRead::from_bytes(b"P6\n1 1\n255\n\xff\x00\x00".to_vec()),
                    MemoryRead::from_bytes(b"P6\n1 1\n255\n\x00\xff\x00".to_vec()),
                ],
                available_range: Some(TimeRange::new(
                    RationalTime::new(1.0, 24.0),
                    RationalTime::new(2.0, 24.0),
                )),
            },
            source_range: None,
        }));
        timeline.tracks.children.push(track);
        timeline
    }

    #[test]
    fn write_then_read_binds_memory() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("cut.otioz");
        let file_name = file_name.to_str().unwrap();

        write(file_name, &memory_timeline()).unwrap();
        let back = read(file_name).unwrap();
        assert_eq!(back.name, "bundled");
        let Item::Clip(clip) = &back.tracks.children[0].children[0] else {
            panic!("expected a clip");
        };
        let MediaReference::MemorySequence { memory, .. } = &clip.media_reference else {
            panic!("expected bundled frames, got {:?}", clip.media_reference);
        };
        assert_eq!(memory.len(), 2);
        assert_eq!(memory[0].data[..2], b"P6"[..]);
    }

    #[test]
    fn missing_composition_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("empty.otioz");
        {
            let file = std::fs::File::create(&file_name).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("readme.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut writer, b"nothing here").unwrap();
            writer.finish().unwrap();
        }
        let err = read(file_name.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn not_a_zip_fails_with_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("garbage.otioz");
        std::fs::write(&file_name, b"plain bytes").unwrap();
        let err = read(file_name.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
