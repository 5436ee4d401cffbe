//! Network output to binary mask.

use common::Buffer2;
use rayon::prelude::*;

use crate::config::Orientation;

/// Zeroes a `width` square centred on every internal tile corner.
///
/// Corners sit at multiples of `tile_size` strictly inside the image; squares
/// are clipped at the image edge.
pub fn erase_seams(image: &mut Buffer2<f32>, tile_size: usize, width: usize) {
    if tile_size == 0 || width == 0 {
        return;
    }
    let (w, h) = image.dimensions();
    let half = width / 2;

    for i in 1..h.div_ceil(tile_size) {
        for j in 1..w.div_ceil(tile_size) {
            let y0 = (i * tile_size).saturating_sub(half);
            let x0 = (j * tile_size).saturating_sub(half);
            for y in y0..(y0 + width).min(h) {
                image.row_mut(y)[x0..(x0 + width).min(w)].fill(0.0);
            }
        }
    }
}

/// 1 where `value >= threshold`, else 0.
pub fn threshold(image: &Buffer2<f32>, threshold: f32) -> Buffer2<u8> {
    image.map(|v| u8::from(v >= threshold))
}

/// Window of a `size` wide structuring element as (before, after) offsets.
/// Dilation uses the mirrored window so opening and closing stay aligned
/// for even sizes.
fn window(size: usize, mirrored: bool) -> (usize, usize) {
    let center = size / 2;
    let rest = size - 1 - center;
    if mirrored { (rest, center) } else { (center, rest) }
}

fn filter_line(src: &[u8], dst: &mut [u8], before: usize, after: usize, take_max: bool) {
    let len = src.len();
    for (i, out) in dst.iter_mut().enumerate() {
        let window = &src[i.saturating_sub(before)..(i + after + 1).min(len)];
        *out = if take_max {
            window.iter().copied().max().unwrap_or(0)
        } else {
            window.iter().copied().min().unwrap_or(0)
        };
    }
}

/// Separable min/max filter over a square window. Pixels outside the image
/// do not take part.
fn rank_filter(mask: &Buffer2<u8>, size: usize, take_max: bool) -> Buffer2<u8> {
    let (w, h) = mask.dimensions();
    if size <= 1 || mask.is_empty() {
        return mask.clone();
    }
    let (before, after) = window(size, take_max);

    let mut horizontal = Buffer2::new_default(w, h);
    horizontal
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| filter_line(mask.row(y), row, before, after, take_max));

    let mut out = Buffer2::new_default(w, h);
    out.pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let rows = y.saturating_sub(before)..(y + after + 1).min(h);
            row.copy_from_slice(horizontal.row(rows.start));
            for yy in rows.skip(1) {
                for (out, &v) in row.iter_mut().zip(horizontal.row(yy)) {
                    *out = if take_max { (*out).max(v) } else { (*out).min(v) };
                }
            }
        });
    out
}

pub fn erode(mask: &Buffer2<u8>, size: usize) -> Buffer2<u8> {
    rank_filter(mask, size, false)
}

pub fn dilate(mask: &Buffer2<u8>, size: usize) -> Buffer2<u8> {
    rank_filter(mask, size, true)
}

/// Removes foreground specks narrower than `size`.
pub fn opening(mask: &Buffer2<u8>, size: usize) -> Buffer2<u8> {
    dilate(&erode(mask, size), size)
}

/// Fills background gaps narrower than `size`.
pub fn closing(mask: &Buffer2<u8>, size: usize) -> Buffer2<u8> {
    erode(&dilate(mask, size), size)
}

/// Applies rotation, then the vertical flip, then the horizontal flip.
pub fn orient<T: Copy>(image: &Buffer2<T>, orientation: &Orientation) -> Buffer2<T> {
    let quarter_turns = (orientation.rotation.rem_euclid(360) / 90) as u32;
    let mut image = image.rotate_ccw(quarter_turns);
    if orientation.flipud {
        image = image.flip_vertical();
    }
    if orientation.fliplr {
        image = image.flip_horizontal();
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(rows: &[&str]) -> Buffer2<u8> {
        let width = rows[0].len();
        let pixels = rows
            .iter()
            .flat_map(|r| r.bytes().map(|b| u8::from(b == b'#')))
            .collect();
        Buffer2::new(width, rows.len(), pixels)
    }

    #[test]
    fn seams_are_erased_at_internal_corners_only() {
        let mut image = Buffer2::new_filled(8, 8, 1.0f32);
        erase_seams(&mut image, 4, 2);

        // One internal corner at (4, 4); square spans 3..5 on both axes.
        let zeros: Vec<(usize, usize)> = (0..8)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get(x, y) == 0.0)
            .collect();
        assert_eq!(zeros, vec![(3, 3), (4, 3), (3, 4), (4, 4)]);
    }

    #[test]
    fn single_tile_has_no_seams() {
        let mut image = Buffer2::new_filled(4, 4, 1.0f32);
        erase_seams(&mut image, 4, 9);
        assert!(image.pixels().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn threshold_is_inclusive() {
        let image = Buffer2::new(3, 1, vec![0.05f32, 0.1, 0.9]);
        assert_eq!(threshold(&image, 0.1).pixels(), &[0, 1, 1]);
    }

    #[test]
    fn opening_drops_isolated_pixels() {
        let m = mask(&[".....", ".#...", ".....", "...##", "...##"]);
        let opened = opening(&m, 2);
        assert_eq!(*opened.get(1, 1), 0);
        assert_eq!(*opened.get(3, 3), 1);
        assert_eq!(*opened.get(4, 4), 1);
    }

    #[test]
    fn closing_fills_one_pixel_holes() {
        let m = mask(&["#####", "#####", "##.##", "#####", "#####"]);
        let closed = closing(&m, 3);
        assert!(closed.pixels().iter().all(|&v| v == 1));
    }

    #[test]
    fn kernel_of_one_is_identity() {
        let m = mask(&["#.#", ".#.", "#.#"]);
        assert_eq!(opening(&m, 1), m);
        assert_eq!(closing(&m, 1), m);
    }

    #[test]
    fn orientation_rotates_before_flipping() {
        let image = Buffer2::new(2, 2, vec![1u8, 2, 3, 4]);
        let orientation = Orientation {
            rotation: 270,
            flipud: true,
            fliplr: false,
        };
        // 270 ccw: [[3, 1], [4, 2]]; flipped up-down: [[4, 2], [3, 1]].
        assert_eq!(orient(&image, &orientation).pixels(), &[4, 2, 3, 1]);
        assert_eq!(orient(&image, &Orientation::default()), image);
    }

    #[test]
    fn negative_rotation_wraps() {
        let image = Buffer2::new(2, 1, vec![1u8, 2]);
        let ccw = Orientation {
            rotation: 270,
            ..Default::default()
        };
        let cw = Orientation {
            rotation: -90,
            ..Default::default()
        };
        assert_eq!(orient(&image, &ccw), orient(&image, &cw));
    }
}
