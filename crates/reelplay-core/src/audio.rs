// crates/reelplay-core/src/audio.rs
//
// Audio buffers and the playback ring. Audio flows through the pipeline as
// interleaved sample-frames; the timeline hands out roughly one second per
// read and the player feeds the device callback through an SPSC ring.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioDataType {
    #[default]
    None,
    S16,
    S32,
    F32,
    F64,
}

impl AudioDataType {
    pub fn byte_count(self) -> usize {
        match self {
            AudioDataType::None => 0,
            AudioDataType::S16 => 2,
            AudioDataType::S32 | AudioDataType::F32 => 4,
            AudioDataType::F64 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub channel_count: u8,
    pub data_type: AudioDataType,
    pub sample_rate: u32,
}

impl AudioInfo {
    pub fn new(channel_count: u8, data_type: AudioDataType, sample_rate: u32) -> Self {
        Self { channel_count, data_type, sample_rate }
    }

    pub fn is_valid(&self) -> bool {
        self.channel_count > 0 && self.data_type != AudioDataType::None && self.sample_rate > 0
    }

    /// Bytes for one interleaved sample-frame (all channels).
    pub fn frame_byte_count(&self) -> usize {
        self.channel_count as usize * self.data_type.byte_count()
    }
}

/// An interleaved audio buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Audio {
    info: AudioInfo,
    sample_count: usize,
    data: Vec<u8>,
}

impl Audio {
    /// Allocate a zeroed (silent) buffer of `sample_count` frames.
    pub fn new(info: AudioInfo, sample_count: usize) -> Self {
        let byte_count = info.frame_byte_count() * sample_count;
        Self { info, sample_count, data: vec![0; byte_count] }
    }

    pub fn with_data(info: AudioInfo, data: Vec<u8>) -> Self {
        let frame = info.frame_byte_count().max(1);
        let sample_count = data.len() / frame;
        Self { info, sample_count, data }
    }

    pub fn shared(info: AudioInfo, sample_count: usize) -> Arc<Self> {
        Arc::new(Self::new(info, sample_count))
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn seconds(&self) -> f64 {
        if self.info.sample_rate > 0 {
            self.sample_count as f64 / self.info.sample_rate as f64
        } else {
            0.0
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_count(&self) -> usize {
        self.data.len()
    }

    pub fn zero(&mut self) {
        self.data.fill(0);
    }

    /// Copy this buffer into a new one of `sample_count` frames, starting at
    /// frame `offset` in the destination; the rest stays silent. Used to pad
    /// short media reads out to a full slice.
    pub fn padded(&self, sample_count: usize, offset: usize) -> Audio {
        let mut out = Audio::new(self.info, sample_count);
        let frame = self.info.frame_byte_count();
        if frame == 0 {
            return out;
        }
        let dst_start = offset.min(sample_count) * frame;
        let copy_frames = self.sample_count.min(sample_count.saturating_sub(offset));
        let len = copy_frames * frame;
        out.data[dst_start..dst_start + len].copy_from_slice(&self.data[..len]);
        out
    }
}

// ── Playback ring buffer ─────────────────────────────────────────────────────

/// Single-producer single-consumer byte ring. The coordinator writes decoded
/// audio; the device callback reads it without waiting on the producer.
/// Both sides are non-blocking: a full ring truncates the write, an empty
/// one truncates the read, and the shared lock is only ever held for the
/// copy itself.
pub struct RingBuffer {
    capacity: usize,
    buf: Mutex<VecDeque<u8>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes available to read.
    pub fn len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space for the producer.
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Producer side: append up to `src.len()` bytes, returning how many
    /// were written.
    pub fn write(&self, src: &[u8]) -> usize {
        let mut buf = self.buf.lock().unwrap();
        let n = src.len().min(self.capacity - buf.len());
        buf.extend(&src[..n]);
        n
    }

    /// Consumer side: read up to `dst.len()` bytes, returning how many were
    /// read.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut buf = self.buf.lock().unwrap();
        let n = dst.len().min(buf.len());
        for (slot, byte) in dst.iter_mut().zip(buf.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_byte_counts() {
        let info = AudioInfo::new(2, AudioDataType::F32, 48000);
        assert!(info.is_valid());
        assert_eq!(info.frame_byte_count(), 8);
        assert!(!AudioInfo::default().is_valid());
    }

    #[test]
    fn audio_allocates_silence() {
        let info = AudioInfo::new(2, AudioDataType::S16, 44100);
        let audio = Audio::new(info, 44100);
        assert_eq!(audio.byte_count(), 44100 * 4);
        assert_eq!(audio.seconds(), 1.0);
        assert!(audio.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn padded_copies_at_offset() {
        let info = AudioInfo::new(1, AudioDataType::S16, 10);
        let mut short = Audio::new(info, 2);
        short.data_mut().copy_from_slice(&[1, 1, 2, 2]);
        let padded = short.padded(5, 1);
        assert_eq!(padded.sample_count(), 5);
        assert_eq!(padded.data(), &[0, 0, 1, 1, 2, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn ring_buffer_roundtrip() {
        let ring = RingBuffer::new(8);
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.write(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(ring.len(), 5);
        let mut out = [0u8; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        // Wrap around.
        assert_eq!(ring.write(&[6, 7, 8, 9, 10, 11, 12]), 6);
        let mut out = [0u8; 16];
        assert_eq!(ring.read(&mut out), 8);
        assert_eq!(&out[..8], &[4, 5, 6, 7, 8, 9, 10, 11]);
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_buffer_across_threads() {
        let ring = Arc::new(RingBuffer::new(1024));
        let producer = Arc::clone(&ring);
        let handle = std::thread::spawn(move || {
            let mut sent = 0u32;
            while sent < 4096 {
                let byte = (sent % 251) as u8;
                if producer.write(&[byte]) == 1 {
                    sent += 1;
                }
            }
        });
        let mut received = 0u32;
        let mut next = 0u32;
        while received < 4096 {
            let mut buf = [0u8; 64];
            let n = ring.read(&mut buf);
            for &b in &buf[..n] {
                assert_eq!(b, (next % 251) as u8);
                next += 1;
            }
            received += n as u32;
        }
        handle.join().unwrap();
    }
}
