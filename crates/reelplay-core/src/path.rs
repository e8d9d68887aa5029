// crates/reelplay-core/src/path.rs
//
// File locations: local paths, URLs, and frame sequences. A path is split
// into components once at parse time; sequence handling (padding, wildcard,
// frame ranges) works on the number component between base name and
// extension, e.g. "render.0001.exr" -> base "render." number "0001" ext
// ".exr" padding 4.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathOptions {
    /// Digit runs longer than this are not treated as frame numbers.
    pub max_number_digits: usize,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self { max_number_digits: 9 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Path {
    protocol: String,
    directory: String,
    base_name: String,
    number: String,
    padding: usize,
    extension: String,
    request: String,
    frames: Option<(i64, i64)>,
}

impl Path {
    /// Parse a path or URL string. Never panics on arbitrary input; fails
    /// only on structurally malformed URIs.
    pub fn parse(value: &str) -> Result<Self> {
        Self::parse_with(value, &PathOptions::default())
    }

    pub fn parse_with(value: &str, options: &PathOptions) -> Result<Self> {
        if value.contains('\0') {
            return Err(Error::Parse("path contains NUL".into()));
        }
        let mut out = Path::default();
        let mut rest = value;

        if let Some(pos) = rest.find("://") {
            let scheme = &rest[..pos];
            let valid = !scheme.is_empty()
                && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
            if !valid {
                return Err(Error::Parse(format!("malformed URI {value:?}")));
            }
            out.protocol = rest[..pos + 3].to_string();
            rest = &rest[pos + 3..];
        }

        if !out.protocol.is_empty() && !out.protocol.eq_ignore_ascii_case("file://") {
            if let Some(pos) = rest.find('?') {
                out.request = rest[pos..].to_string();
                rest = &rest[..pos];
            }
        }

        let dir_end = rest.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
        out.directory = rest[..dir_end].to_string();
        let file_name = &rest[dir_end..];

        // Extension: everything from the last dot, unless it is a dot file.
        let (stem, extension) = match file_name.rfind('.') {
            Some(0) | None => (file_name, ""),
            Some(pos) => (&file_name[..pos], &file_name[pos..]),
        };
        out.extension = extension.to_string();

        if stem.ends_with('#') {
            out.base_name = stem[..stem.len() - 1].to_string();
            out.number = "#".to_string();
        } else {
            let digits = stem
                .bytes()
                .rev()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits > 0 && digits <= options.max_number_digits {
                let split = stem.len() - digits;
                out.base_name = stem[..split].to_string();
                out.number = stem[split..].to_string();
                out.padding = digits;
            } else {
                out.base_name = stem.to_string();
            }
        }
        Ok(out)
    }

    /// The reconstructed path string.
    pub fn get(&self) -> String {
        format!(
            "{}{}{}{}{}{}",
            self.protocol, self.directory, self.base_name, self.number, self.extension,
            self.request
        )
    }

    /// The file name, optionally prefixed with the directory.
    pub fn file_name(&self, with_dir: bool) -> String {
        if with_dir {
            format!("{}{}{}{}", self.directory, self.base_name, self.number, self.extension)
        } else {
            format!("{}{}{}", self.base_name, self.number, self.extension)
        }
    }

    /// The file name for a specific frame, padded to this path's padding.
    pub fn frame(&self, frame: i64, with_dir: bool) -> String {
        let dir = if with_dir { self.directory.as_str() } else { "" };
        if self.number.is_empty() {
            format!("{dir}{}{}", self.base_name, self.extension)
        } else {
            format!(
                "{dir}{}{}{}",
                self.base_name,
                format_number(frame, self.padding),
                self.extension
            )
        }
    }

    pub fn is_empty(&self) -> bool {
        self.protocol.is_empty()
            && self.directory.is_empty()
            && self.base_name.is_empty()
            && self.number.is_empty()
            && self.extension.is_empty()
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// The numeric value of the number component, if it has one.
    pub fn frame_number(&self) -> Option<i64> {
        self.number.parse().ok()
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn has_number(&self) -> bool {
        !self.number.is_empty()
    }

    pub fn has_seq_wildcard(&self) -> bool {
        self.number == "#"
    }

    pub fn frame_range(&self) -> Option<(i64, i64)> {
        self.frames
    }

    pub fn set_frame_range(&mut self, min: i64, max: i64) {
        self.frames = Some((min.min(max), min.max(max)));
    }

    pub fn set_padding(&mut self, padding: usize) {
        self.padding = padding;
    }

    /// A sequence is a numbered path with a nontrivial frame range.
    pub fn is_sequence(&self) -> bool {
        self.has_number() && self.frames.map(|(min, max)| min != max).unwrap_or(false)
    }

    /// The "start-end" form of the frame range, padded.
    pub fn frame_range_string(&self) -> String {
        match self.frames {
            Some((min, max)) if min != max => format!(
                "{}-{}",
                format_number(min, self.padding),
                format_number(max, self.padding)
            ),
            Some((min, _)) => format_number(min, self.padding),
            None => String::new(),
        }
    }

    /// Whether two paths belong to the same sequence: matching directory,
    /// base name, and extension, and both numbered (or this one a wildcard).
    pub fn sequence(&self, other: &Path) -> bool {
        self.has_number()
            && other.has_number()
            && !other.has_seq_wildcard()
            && self.directory == other.directory
            && self.base_name == other.base_name
            && self.extension == other.extension
    }

    /// Scan this path's directory for sequence siblings and record the
    /// discovered frame range and padding.
    pub fn discover_frames(&mut self) -> Result<()> {
        if !self.has_number() {
            return Ok(());
        }
        let dir = if self.directory.is_empty() { "." } else { self.directory.as_str() };
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut padding = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(candidate) = Path::parse(name) else { continue };
            if candidate.base_name == self.base_name
                && candidate.extension == self.extension
                && candidate.has_number()
                && !candidate.has_seq_wildcard()
            {
                if let Some(frame) = candidate.frame_number() {
                    min = min.min(frame);
                    max = max.max(frame);
                    if candidate.number.starts_with('0') {
                        padding = padding.max(candidate.padding);
                    }
                }
            }
        }
        if min <= max {
            self.frames = Some((min, max));
            if padding > 0 {
                self.padding = padding;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Zero-pad `value` to `padding` digits.
pub fn format_number(value: i64, padding: usize) -> String {
    format!("{value:0padding$}")
}

// ── Memory references ────────────────────────────────────────────────────────

/// An in-memory source: a shared immutable byte buffer a reader decodes
/// instead of touching the filesystem. Sequences carry one buffer per frame.
#[derive(Clone, Debug)]
pub struct MemoryRead {
    pub data: Arc<Vec<u8>>,
}

impl MemoryRead {
    pub fn new(data: Arc<Vec<u8>>) -> Self {
        Self { data }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data: Arc::new(data) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_file() {
        let p = Path::parse("/tmp/media/shot.mov").unwrap();
        assert_eq!(p.directory(), "/tmp/media/");
        assert_eq!(p.base_name(), "shot");
        assert_eq!(p.extension(), ".mov");
        assert!(!p.has_number());
        assert_eq!(p.get(), "/tmp/media/shot.mov");
    }

    #[test]
    fn parse_sequence_frame() {
        let p = Path::parse("render.0001.exr").unwrap();
        assert_eq!(p.base_name(), "render.");
        assert_eq!(p.number(), "0001");
        assert_eq!(p.padding(), 4);
        assert_eq!(p.extension(), ".exr");
        assert_eq!(p.frame(12, false), "render.0012.exr");
        assert_eq!(p.frame_number(), Some(1));
    }

    #[test]
    fn parse_wildcard() {
        let p = Path::parse("/shots/render.#.exr").unwrap();
        assert!(p.has_seq_wildcard());
        assert!(p.has_number());
        assert_eq!(p.base_name(), "render.");
    }

    #[test]
    fn parse_url_with_request() {
        let p = Path::parse("ndi://studio/camera1?quality=high").unwrap();
        assert_eq!(p.protocol(), "ndi://");
        assert_eq!(p.request(), "?quality=high");
        assert_eq!(p.get(), "ndi://studio/camera1?quality=high");
    }

    #[test]
    fn parse_rejects_malformed_uri() {
        assert!(Path::parse("://nohost").is_err());
        assert!(Path::parse("9ad://x").is_err());
        assert!(Path::parse("with\0nul").is_err());
    }

    #[test]
    fn long_digit_runs_are_not_numbers() {
        let options = PathOptions { max_number_digits: 4 };
        let p = Path::parse_with("take_123456789.png", &options).unwrap();
        assert!(!p.has_number());
        assert_eq!(p.base_name(), "take_123456789");
    }

    #[test]
    fn dot_files_keep_their_name() {
        let p = Path::parse("/home/user/.config").unwrap();
        assert_eq!(p.base_name(), ".config");
        assert_eq!(p.extension(), "");
    }

    #[test]
    fn sequence_predicate() {
        let mut a = Path::parse("/s/render.0001.exr").unwrap();
        let b = Path::parse("/s/render.0002.exr").unwrap();
        let c = Path::parse("/s/other.0002.exr").unwrap();
        assert!(a.sequence(&b));
        assert!(!a.sequence(&c));
        assert!(!a.is_sequence());
        a.set_frame_range(1, 5);
        assert!(a.is_sequence());
        assert_eq!(a.frame_range_string(), "0001-0005");
        // The padded first frame is still part of the same sequence.
        let first = Path::parse(&a.frame(1, true)).unwrap();
        assert!(first.sequence(&a));
    }

    #[test]
    fn discover_frames_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        for frame in 3..=7 {
            let name = dir.path().join(format!("img.{frame:04}.ppm"));
            std::fs::write(name, b"x").unwrap();
        }
        let url = format!("{}/img.0003.ppm", dir.path().display());
        let mut p = Path::parse(&url).unwrap();
        p.discover_frames().unwrap();
        assert_eq!(p.frame_range(), Some((3, 7)));
        assert!(p.is_sequence());
        assert_eq!(p.padding(), 4);
    }
}
