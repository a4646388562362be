//! Pure pixel-layout conversion and PNG encoding.
//!
//! Nothing in here touches a device or holds state, so it runs outside the
//! capture lock.

use std::io::Cursor;

use armgate_types::GateError;
use image::{ImageFormat, RgbImage};

use crate::camera::{PixelLayout, RawFrame};

/// Convert `frame` into interleaved RGB8, the layout PNG expects.
///
/// # Errors
///
/// Returns [`GateError::CaptureFailed`] if the frame is empty or its buffer
/// length does not match `width * height * 3`.
pub fn to_interleaved_rgb(frame: &RawFrame) -> Result<Vec<u8>, GateError> {
    let expected = frame.layout.frame_len(frame.width, frame.height);
    if expected == 0 {
        return Err(GateError::CaptureFailed("empty frame".to_string()));
    }
    if frame.data.len() != expected {
        return Err(GateError::CaptureFailed(format!(
            "frame buffer is {} bytes, expected {expected} for {}x{} {:?}",
            frame.data.len(),
            frame.width,
            frame.height,
            frame.layout
        )));
    }

    let rgb = match frame.layout {
        PixelLayout::Rgb24 => frame.data.clone(),
        PixelLayout::Bgr24 => frame
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelLayout::PlanarRgb => {
            let plane = expected / 3;
            let (r, rest) = frame.data.split_at(plane);
            let (g, b) = rest.split_at(plane);
            r.iter()
                .zip(g)
                .zip(b)
                .flat_map(|((r, g), b)| [*r, *g, *b])
                .collect()
        }
    };
    Ok(rgb)
}

/// Encode a raw frame as PNG bytes.
pub fn encode_png(frame: &RawFrame) -> Result<Vec<u8>, GateError> {
    let rgb = to_interleaved_rgb(frame)?;
    let img = RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| GateError::CaptureFailed("frame dimensions overflow".to_string()))?;

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| GateError::CaptureFailed(format!("failed to encode frame: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(layout: PixelLayout, data: Vec<u8>) -> RawFrame {
        RawFrame {
            width: 2,
            height: 1,
            layout,
            data,
        }
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let f = frame(PixelLayout::Bgr24, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(to_interleaved_rgb(&f).unwrap(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn planar_is_interleaved() {
        // R plane [10, 11], G plane [20, 21], B plane [30, 31]
        let f = frame(PixelLayout::PlanarRgb, vec![10, 11, 20, 21, 30, 31]);
        assert_eq!(to_interleaved_rgb(&f).unwrap(), vec![10, 20, 30, 11, 21, 31]);
    }

    #[test]
    fn rgb_passes_through() {
        let f = frame(PixelLayout::Rgb24, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(to_interleaved_rgb(&f).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let f = frame(PixelLayout::Bgr24, vec![1, 2, 3]);
        assert!(matches!(to_interleaved_rgb(&f), Err(GateError::CaptureFailed(_))));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let f = RawFrame {
            width: 0,
            height: 0,
            layout: PixelLayout::Rgb24,
            data: vec![],
        };
        assert!(matches!(encode_png(&f), Err(GateError::CaptureFailed(_))));
    }

    #[test]
    fn encoded_output_is_png_with_original_pixels() {
        let f = frame(PixelLayout::Bgr24, vec![0, 0, 255, 255, 0, 0]);
        let png = encode_png(&f).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(decoded.get_pixel(1, 0).0, [0, 0, 255]);
    }
}
