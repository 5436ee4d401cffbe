//! Pixel to stage coordinate conversion.

use crate::detection::DetectedPosition;

/// Maps a detection from pixel coordinates of its frame to stage microns.
///
/// The stage position of an event is recorded at the optical centre of the
/// frame, so the frame centre maps to the event's stage position. `x` pairs
/// with the image width and `y` with the height. A missing stage coordinate
/// counts as zero.
pub fn remap(
    position: &DetectedPosition,
    pixel_size_um: f64,
    image_width: usize,
    image_height: usize,
) -> DetectedPosition {
    let event = &position.event;
    let half_width = image_width as f64 * pixel_size_um / 2.0;
    let half_height = image_height as f64 * pixel_size_um / 2.0;

    DetectedPosition {
        x: position.x * pixel_size_um + event.x_pos().unwrap_or(0.0) - half_width,
        y: position.y * pixel_size_um + event.y_pos().unwrap_or(0.0) - half_height,
        ..position.clone()
    }
}
