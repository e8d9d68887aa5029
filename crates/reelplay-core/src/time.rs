// crates/reelplay-core/src/time.rs
//
// Rational time and time ranges. Every clock in the pipeline — track time,
// media time, cache windows — is a RationalTime: a frame value at a rate.
// The invalid sentinel (rate <= 0) poisons arithmetic rather than panicking.

use std::cmp::Ordering;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

// ── RationalTime ─────────────────────────────────────────────────────────────

/// A point in time: `value` frames at `rate` frames per second.
#[derive(Clone, Copy, Debug)]
pub struct RationalTime {
    value: f64,
    rate: f64,
}

/// The invalid-time sentinel. Use `is_valid()` rather than comparing
/// against this constant.
pub const INVALID_TIME: RationalTime = RationalTime {
    value: -1.0,
    rate: -1.0,
};

impl RationalTime {
    pub const fn new(value: f64, rate: f64) -> Self {
        Self { value, rate }
    }

    pub fn from_frames(frame: i64, rate: f64) -> Self {
        Self::new(frame as f64, rate)
    }

    pub fn from_seconds(seconds: f64, rate: f64) -> Self {
        Self::new(seconds * rate, rate)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_valid(&self) -> bool {
        self.rate > 0.0
    }

    pub fn to_seconds(&self) -> f64 {
        if self.rate > 0.0 {
            self.value / self.rate
        } else {
            0.0
        }
    }

    /// Frame index, rounding toward negative infinity.
    pub fn to_frames(&self) -> i64 {
        self.value.floor() as i64
    }

    pub fn rescaled_to(&self, rate: f64) -> Self {
        if !self.is_valid() || rate <= 0.0 {
            return INVALID_TIME;
        }
        if (self.rate - rate).abs() < f64::EPSILON {
            return *self;
        }
        Self::new(self.value * rate / self.rate, rate)
    }

    /// Round to the nearest whole frame at the same rate.
    pub fn round(&self) -> Self {
        Self::new(self.value.round(), self.rate)
    }

    pub fn floor(&self) -> Self {
        Self::new(self.value.floor(), self.rate)
    }

    pub fn ceil(&self) -> Self {
        Self::new(self.value.ceil(), self.rate)
    }

    /// Exact comparison of both fields, unlike `==` which rescales.
    pub fn strictly_equal(&self, other: &RationalTime) -> bool {
        self.value == other.value && self.rate == other.rate
    }

    /// Format as SMPTE timecode, wrapping at 24 hours. With `drop_frame`
    /// the 29.97/59.94 drop-frame correction is applied and the frame
    /// separator becomes ';'.
    pub fn to_timecode(&self, drop_frame: bool) -> Result<String> {
        if !self.is_valid() {
            return Err(Error::OutOfRange);
        }
        let nominal = self.rate.round() as i64;
        if nominal <= 0 {
            return Err(Error::OutOfRange);
        }
        let mut frames = self.value.round() as i64;
        if frames < 0 {
            return Err(Error::OutOfRange);
        }
        let drop = if drop_frame {
            dropped_frames_per_minute(self.rate)
                .ok_or_else(|| Error::Parse(format!("rate {} is not a drop-frame rate", self.rate)))?
        } else {
            0
        };
        if drop > 0 {
            // SMPTE drop-frame: frame numbers 0..drop are skipped at every
            // minute boundary except every tenth minute.
            let frames_per_min = nominal * 60 - drop;
            let frames_per_10min = frames_per_min * 10 + drop;
            let d = frames / frames_per_10min;
            let m = frames % frames_per_10min;
            if m > drop {
                frames += drop * 9 * d + drop * ((m - drop) / frames_per_min);
            } else {
                frames += drop * 9 * d;
            }
        }
        let ff = frames % nominal;
        let total_seconds = frames / nominal;
        let ss = total_seconds % 60;
        let mm = (total_seconds / 60) % 60;
        let hh = (total_seconds / 3600) % 24;
        let sep = if drop > 0 { ';' } else { ':' };
        Ok(format!("{hh:02}:{mm:02}:{ss:02}{sep}{ff:02}"))
    }

    /// Parse `hh:mm:ss:ff` (or `hh:mm:ss;ff` for drop-frame) at the given
    /// rate. Rejects malformed strings and impossible drop-frame codes.
    pub fn from_timecode(s: &str, rate: f64) -> Result<Self> {
        if rate <= 0.0 {
            return Err(Error::Parse(format!("invalid rate {rate}")));
        }
        let bytes = s.as_bytes();
        if bytes.len() != 11 || !s.is_ascii() {
            return Err(Error::Parse(format!("bad timecode {s:?}")));
        }
        let drop_frame = match (bytes[2], bytes[5], bytes[8]) {
            (b':', b':', b':') => false,
            (b':', b':', b';') => true,
            _ => return Err(Error::Parse(format!("bad timecode {s:?}"))),
        };
        let field = |range: std::ops::Range<usize>| -> Result<i64> {
            s[range.clone()]
                .parse::<i64>()
                .map_err(|_| Error::Parse(format!("bad timecode {s:?}")))
        };
        let hh = field(0..2)?;
        let mm = field(3..5)?;
        let ss = field(6..8)?;
        let ff = field(9..11)?;
        let nominal = rate.round() as i64;
        if mm >= 60 || ss >= 60 || ff >= nominal {
            return Err(Error::Parse(format!("bad timecode {s:?}")));
        }
        let drop = if drop_frame {
            dropped_frames_per_minute(rate)
                .ok_or_else(|| Error::Parse(format!("rate {rate} is not a drop-frame rate")))?
        } else {
            0
        };
        if drop > 0 && mm % 10 != 0 && ss == 0 && ff < drop {
            // Dropped frame numbers do not exist at non-tenth minutes.
            return Err(Error::Parse(format!("bad drop-frame timecode {s:?}")));
        }
        let mut frames = ((hh * 60 + mm) * 60 + ss) * nominal + ff;
        if drop > 0 {
            let minutes = hh * 60 + mm;
            frames -= drop * (minutes - minutes / 10);
        }
        Ok(Self::from_frames(frames, rate))
    }
}

/// Frames dropped per minute under the SMPTE rule, or None for rates
/// that have no drop-frame form.
fn dropped_frames_per_minute(rate: f64) -> Option<i64> {
    if (rate - 30000.0 / 1001.0).abs() < 0.01 || (rate - 29.97).abs() < 0.01 {
        Some(2)
    } else if (rate - 60000.0 / 1001.0).abs() < 0.01 || (rate - 59.94).abs() < 0.01 {
        Some(4)
    } else {
        None
    }
}

/// Whether the rate has a drop-frame timecode form (29.97 or 59.94).
pub fn is_drop_frame_rate(rate: f64) -> bool {
    dropped_frames_per_minute(rate).is_some()
}

impl Default for RationalTime {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

impl PartialEq for RationalTime {
    /// Rescaling equality: `(24, 24) == (1, 1)`. Use `strictly_equal`
    /// to compare the fields themselves.
    fn eq(&self, other: &Self) -> bool {
        if !self.is_valid() || !other.is_valid() {
            return self.is_valid() == other.is_valid();
        }
        self.value == other.rescaled_to(self.rate).value
    }
}

impl PartialOrd for RationalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.is_valid() || !other.is_valid() {
            return None;
        }
        self.value.partial_cmp(&other.rescaled_to(self.rate).value)
    }
}

impl std::ops::Add for RationalTime {
    type Output = RationalTime;

    /// RHS is rescaled to the LHS rate. Invalid operands poison the result.
    fn add(self, rhs: RationalTime) -> RationalTime {
        if !self.is_valid() || !rhs.is_valid() {
            return INVALID_TIME;
        }
        RationalTime::new(self.value + rhs.rescaled_to(self.rate).value, self.rate)
    }
}

impl std::ops::Sub for RationalTime {
    type Output = RationalTime;

    fn sub(self, rhs: RationalTime) -> RationalTime {
        if !self.is_valid() || !rhs.is_valid() {
            return INVALID_TIME;
        }
        RationalTime::new(self.value - rhs.rescaled_to(self.rate).value, self.rate)
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.rate)
    }
}

// OTIO JSON schema form: {"OTIO_SCHEMA": "RationalTime.1", "rate": r, "value": v}

#[derive(Serialize, Deserialize)]
struct RationalTimeJson {
    #[serde(rename = "OTIO_SCHEMA")]
    schema: String,
    rate: f64,
    value: f64,
}

impl Serialize for RationalTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RationalTimeJson {
            schema: "RationalTime.1".into(),
            rate: self.rate,
            value: self.value,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RationalTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = RationalTimeJson::deserialize(deserializer)?;
        if !json.schema.starts_with("RationalTime.") {
            return Err(D::Error::custom(format!("unexpected schema {:?}", json.schema)));
        }
        Ok(RationalTime::new(json.value, json.rate))
    }
}

// ── TimeRange ────────────────────────────────────────────────────────────────

/// A half-open span: `start_time` plus `duration`, both at the same rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    start_time: RationalTime,
    duration: RationalTime,
}

/// The invalid-range sentinel.
pub const INVALID_TIME_RANGE: TimeRange = TimeRange {
    start_time: INVALID_TIME,
    duration: INVALID_TIME,
};

impl TimeRange {
    pub const fn new(start_time: RationalTime, duration: RationalTime) -> Self {
        Self { start_time, duration }
    }

    /// Range covering `[start, end)`.
    pub fn from_start_end_time(start: RationalTime, end_exclusive: RationalTime) -> Self {
        Self::new(start, end_exclusive - start)
    }

    /// Range covering `[start, end]`.
    pub fn from_start_end_time_inclusive(start: RationalTime, end: RationalTime) -> Self {
        Self::new(start, end - start + RationalTime::new(1.0, start.rate()))
    }

    pub fn start_time(&self) -> RationalTime {
        self.start_time
    }

    pub fn duration(&self) -> RationalTime {
        self.duration
    }

    pub fn is_valid(&self) -> bool {
        self.start_time.is_valid() && self.duration.is_valid()
    }

    pub fn end_time_exclusive(&self) -> RationalTime {
        self.start_time + self.duration
    }

    pub fn end_time_inclusive(&self) -> RationalTime {
        self.end_time_exclusive() - RationalTime::new(1.0, self.start_time.rate())
    }

    /// End-exclusive containment.
    pub fn contains(&self, time: &RationalTime) -> bool {
        *time >= self.start_time && *time < self.end_time_exclusive()
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start_time < other.end_time_exclusive() && other.start_time < self.end_time_exclusive()
    }

    /// Clamp a time into `[start, end_inclusive]`.
    pub fn clamp_time(&self, time: &RationalTime) -> RationalTime {
        if *time < self.start_time {
            self.start_time
        } else if *time > self.end_time_inclusive() {
            self.end_time_inclusive()
        } else {
            *time
        }
    }

    /// Clamp another range into this one. An empty intersection yields a
    /// zero-duration range at the nearest edge.
    pub fn clamp_range(&self, other: &TimeRange) -> TimeRange {
        let start = self.clamp_time(&other.start_time);
        let mut end = other.end_time_exclusive();
        if end > self.end_time_exclusive() {
            end = self.end_time_exclusive();
        }
        if end < start {
            end = start;
        }
        TimeRange::from_start_end_time(start, end)
    }

    /// The overlapping part of two ranges, if any.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        if !self.intersects(other) {
            return None;
        }
        let start = if self.start_time > other.start_time {
            self.start_time
        } else {
            other.start_time
        };
        let self_end = self.end_time_exclusive();
        let other_end = other.end_time_exclusive();
        let end = if self_end < other_end { self_end } else { other_end };
        Some(TimeRange::from_start_end_time(start, end))
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::new(RationalTime::default(), RationalTime::default())
    }
}

/// Compare two ranges field-for-field, unlike `==` which rescales.
pub fn compare_exact(a: &TimeRange, b: &TimeRange) -> bool {
    a.start_time.strictly_equal(&b.start_time) && a.duration.strictly_equal(&b.duration)
}

#[derive(Serialize, Deserialize)]
struct TimeRangeJson {
    #[serde(rename = "OTIO_SCHEMA")]
    schema: String,
    duration: RationalTime,
    start_time: RationalTime,
}

impl Serialize for TimeRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        TimeRangeJson {
            schema: "TimeRange.1".into(),
            duration: self.duration,
            start_time: self.start_time,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TimeRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = TimeRangeJson::deserialize(deserializer)?;
        if !json.schema.starts_with("TimeRange.") {
            return Err(D::Error::custom(format!("unexpected schema {:?}", json.schema)));
        }
        Ok(TimeRange::new(json.start_time, json.duration))
    }
}

// ── Range helpers ────────────────────────────────────────────────────────────

/// Every frame start time within a range, end-exclusive.
pub fn frames(range: &TimeRange) -> Vec<RationalTime> {
    let mut out = Vec::new();
    if !range.is_valid() {
        return out;
    }
    let rate = range.start_time().rate();
    let start = range.start_time().to_frames();
    let end = range.end_time_exclusive().rescaled_to(rate).to_frames();
    for frame in start..end {
        out.push(RationalTime::from_frames(frame, rate));
    }
    out
}

/// Split a range at whole-second boundaries.
pub fn seconds(range: &TimeRange) -> Vec<TimeRange> {
    let mut out = Vec::new();
    if !range.is_valid() {
        return out;
    }
    let rate = range.start_time().rate();
    let mut t = range.start_time();
    let end = range.end_time_exclusive();
    while t < end {
        let next_second = (t.to_seconds().floor() + 1.0).min(end.to_seconds());
        let next = RationalTime::from_seconds(next_second, rate);
        out.push(TimeRange::from_start_end_time(t, next));
        t = next;
    }
    out
}

/// Convert a floating point rate to a rational numerator/denominator,
/// recognizing the NTSC family.
pub fn to_rational(rate: f64) -> (i32, i32) {
    const RATIONALS: &[(f64, (i32, i32))] = &[
        (23.976, (24000, 1001)),
        (23.98, (24000, 1001)),
        (29.97, (30000, 1001)),
        (47.952, (48000, 1001)),
        (59.94, (60000, 1001)),
        (119.88, (120000, 1001)),
    ];
    for (value, rational) in RATIONALS {
        if (rate - value).abs() < 0.01 {
            return *rational;
        }
    }
    (rate.round() as i32, 1)
}
