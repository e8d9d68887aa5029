// crates/reelplay-timeline/src/compare.rs
//
// A/B compare layout. Given the sizes of the inputs, each mode produces the
// per-input boxes and the composite render size; pixel compositing (wipe
// angle, overlay blend, difference) happens in the renderer with the options
// carried here. The first input's size drives the layout — B is fitted into
// A-sized cells.

use serde::{Deserialize, Serialize};

use reelplay_core::math::{Box2i, Size2i, Vector2f};
use reelplay_core::time::{RationalTime, TimeRange};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareMode {
    #[default]
    A,
    B,
    Wipe,
    Overlay,
    Difference,
    Horizontal,
    Vertical,
    Tile,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareTimeMode {
    #[default]
    Relative,
    Absolute,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    pub mode: CompareMode,
    /// Wipe line center in normalized [0, 1] coordinates.
    pub wipe_center: Vector2f,
    /// Wipe line rotation in degrees.
    pub wipe_rotation: f32,
    /// Overlay blend in [0, 1].
    pub overlay: f32,
    pub time_mode: CompareTimeMode,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::default(),
            wipe_center: Vector2f::new(0.5, 0.5),
            wipe_rotation: 0.0,
            overlay: 0.5,
            time_mode: CompareTimeMode::default(),
        }
    }
}

/// Per-input boxes for a compare mode. Stacked modes place A-sized cells;
/// tile mode lays a row-major ceil(sqrt(n)) grid of max-size cells.
pub fn boxes(mode: CompareMode, sizes: &[Size2i]) -> Vec<Box2i> {
    let mut out = Vec::new();
    let Some(first) = sizes.first().copied() else {
        return out;
    };
    match mode {
        CompareMode::A | CompareMode::B | CompareMode::Wipe | CompareMode::Overlay
        | CompareMode::Difference => {
            out.push(Box2i::from_size(first));
            out.push(Box2i::from_size(first));
        }
        CompareMode::Horizontal => {
            out.push(Box2i::from_size(first));
            out.push(Box2i::new(first.w, 0, first.w, first.h));
        }
        CompareMode::Vertical => {
            out.push(Box2i::from_size(first));
            out.push(Box2i::new(0, first.h, first.w, first.h));
        }
        CompareMode::Tile => {
            let mut cell = Size2i::default();
            for size in sizes {
                cell.w = cell.w.max(size.w);
                cell.h = cell.h.max(size.h);
            }
            let columns = (sizes.len() as f64).sqrt().ceil() as i32;
            for (index, _) in sizes.iter().enumerate() {
                let col = index as i32 % columns;
                let row = index as i32 / columns;
                out.push(Box2i::new(col * cell.w, row * cell.h, cell.w, cell.h));
            }
        }
    }
    out
}

/// The composite size covering all boxes of a mode.
pub fn render_size(mode: CompareMode, sizes: &[Size2i]) -> Size2i {
    let mut out = Size2i::default();
    for b in boxes(mode, sizes) {
        out.w = out.w.max(b.x + b.w);
        out.h = out.h.max(b.y + b.h);
    }
    out
}

/// Pair the current A and B frames for rendering: the active inputs, their
/// boxes, and the composite size. Mode A drops the B input entirely; every
/// other mode emits both so the renderer can composite.
pub fn pair(
    a: &crate::timeline::VideoData,
    b: Option<&crate::timeline::VideoData>,
    options: &CompareOptions,
) -> (Vec<crate::timeline::VideoData>, Vec<Box2i>, Size2i) {
    let mut inputs = vec![a.clone()];
    if options.mode != CompareMode::A {
        if let Some(b) = b {
            inputs.push(b.clone());
        }
    }
    let sizes: Vec<Size2i> = inputs.iter().map(video_size).collect();
    let layout = boxes(options.mode, &sizes);
    let composite = render_size(options.mode, &sizes);
    (inputs, layout, composite)
}

/// The pixel size of a resolved frame's first image.
pub fn video_size(data: &crate::timeline::VideoData) -> Size2i {
    data.layers
        .iter()
        .find_map(|layer| layer.image.as_ref())
        .map(|image| Size2i::new(image.size().w as i32, image.size().h as i32))
        .unwrap_or_default()
}

/// Map the A-timeline time onto the B timeline.
pub fn compare_time(
    time: RationalTime,
    a_range: &TimeRange,
    b_range: &TimeRange,
    mode: CompareTimeMode,
) -> RationalTime {
    match mode {
        CompareTimeMode::Absolute => time,
        CompareTimeMode::Relative => b_range.start_time() + (time - a_range.start_time()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes() -> Vec<Size2i> {
        vec![
            Size2i::new(1920, 1080),
            Size2i::new(1920 / 2, 1080 / 2),
            Size2i::new(1920 / 2, 1080 / 2),
            Size2i::new(1920 / 2, 1080 / 2),
        ]
    }

    #[test]
    fn single_box_modes_use_the_first_size() {
        for mode in [
            CompareMode::A,
            CompareMode::B,
            CompareMode::Wipe,
            CompareMode::Overlay,
            CompareMode::Difference,
        ] {
            let b = boxes(mode, &sizes());
            assert_eq!(b.len(), 2);
            assert_eq!(b[0], Box2i::new(0, 0, 1920, 1080));
            assert_eq!(b[1], Box2i::new(0, 0, 1920, 1080));
            assert_eq!(render_size(mode, &sizes()), Size2i::new(1920, 1080));
        }
    }

    #[test]
    fn horizontal_and_vertical_stack_a_sized_cells() {
        let b = boxes(CompareMode::Horizontal, &sizes());
        assert_eq!(b[0], Box2i::new(0, 0, 1920, 1080));
        assert_eq!(b[1], Box2i::new(1920, 0, 1920, 1080));
        assert_eq!(render_size(CompareMode::Horizontal, &sizes()), Size2i::new(3840, 1080));

        let b = boxes(CompareMode::Vertical, &sizes());
        assert_eq!(b[0], Box2i::new(0, 0, 1920, 1080));
        assert_eq!(b[1], Box2i::new(0, 1080, 1920, 1080));
        assert_eq!(render_size(CompareMode::Vertical, &sizes()), Size2i::new(1920, 2160));
    }

    #[test]
    fn tile_is_a_row_major_grid_of_max_cells() {
        let b = boxes(CompareMode::Tile, &sizes());
        assert_eq!(b.len(), 4);
        assert_eq!(b[0], Box2i::new(0, 0, 1920, 1080));
        assert_eq!(b[1], Box2i::new(1920, 0, 1920, 1080));
        assert_eq!(b[2], Box2i::new(0, 1080, 1920, 1080));
        assert_eq!(b[3], Box2i::new(1920, 1080, 1920, 1080));
        assert_eq!(render_size(CompareMode::Tile, &sizes()), Size2i::new(3840, 2160));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(boxes(CompareMode::Wipe, &[]).is_empty());
        assert_eq!(render_size(CompareMode::Tile, &[]), Size2i::default());
    }

    #[test]
    fn pair_emits_active_inputs_with_layout() {
        use crate::timeline::{VideoData, VideoLayer};
        use reelplay_core::image::{Image, ImageInfo, PixelType};

        let frame = |w: u32, h: u32| VideoData {
            time: RationalTime::new(0.0, 24.0),
            layers: vec![VideoLayer {
                image: Some(Image::shared(ImageInfo::new(w, h, PixelType::RGB_U8))),
                image_b: None,
                transition: None,
                transition_value: 0.0,
            }],
        };
        let a = frame(1920, 1080);
        let b = frame(960, 540);

        let mut options = CompareOptions::default();
        options.mode = CompareMode::Wipe;
        let (inputs, layout, size) = pair(&a, Some(&b), &options);
        assert_eq!(inputs.len(), 2);
        assert_eq!(layout[0], Box2i::new(0, 0, 1920, 1080));
        assert_eq!(layout[1], Box2i::new(0, 0, 1920, 1080));
        assert_eq!(size, Size2i::new(1920, 1080));

        options.mode = CompareMode::Horizontal;
        let (_, layout, size) = pair(&a, Some(&b), &options);
        assert_eq!(layout[1], Box2i::new(1920, 0, 1920, 1080));
        assert_eq!(size, Size2i::new(3840, 1080));

        // Mode A ignores B entirely.
        options.mode = CompareMode::A;
        let (inputs, _, _) = pair(&a, Some(&b), &options);
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn relative_time_offsets_into_b() {
        let a_range = TimeRange::new(RationalTime::new(100.0, 24.0), RationalTime::new(100.0, 24.0));
        let b_range =
            TimeRange::new(RationalTime::new(1000.0, 24.0), RationalTime::new(100.0, 24.0));
        let t = compare_time(
            RationalTime::new(150.0, 24.0),
            &a_range,
            &b_range,
            CompareTimeMode::Relative,
        );
        assert_eq!(t, RationalTime::new(1050.0, 24.0));
        let t = compare_time(
            RationalTime::new(150.0, 24.0),
            &a_range,
            &b_range,
            CompareTimeMode::Absolute,
        );
        assert_eq!(t, RationalTime::new(150.0, 24.0));
    }
}
