use anyhow::{anyhow, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
    Mjpeg,
}

impl PixelFormat {
    /// Map a V4L2 fourcc to a supported format.
    #[allow(dead_code)]
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

/// Convert a captured buffer to packed RGB24. Returns the pixels and the
/// decoded dimensions, which only differ from the inputs for MJPEG.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<(Vec<u8>, u32, u32)> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = plane_len(width, height, 3)?;
            if pixels.len() != expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok((pixels.to_vec(), width, height))
        }
        PixelFormat::Yuyv => Ok((yuyv_to_rgb(pixels, width, height)?, width, height)),
        PixelFormat::Nv12 => Ok((nv12_to_rgb(pixels, width, height)?, width, height)),
        PixelFormat::Mjpeg => decode_jpeg(pixels),
    }
}

/// Decode a JPEG into RGB24 pixels plus its dimensions.
pub(crate) fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode jpeg")?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok((rgb.into_raw(), width, height))
}

/// Locate the first complete JPEG (SOI..EOI) in a byte buffer.
#[allow(dead_code)]
pub(crate) fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn plane_len(width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(bytes_per_pixel))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = plane_len(width, height, 2)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(plane_len(width, height, 3)?);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = plane_len(width, height, 1)?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    Ok(rgb)
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let (rgb, w, h) = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        assert_eq!((w, h), (2, 2));
        Ok(())
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![128u8; 8];
        let (rgb, _, _) = normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() -> Result<()> {
        let pixels = vec![1u8; 9];
        let (rgb, _, _) = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(rgb, pixels);
        assert!(normalize_to_rgb(&pixels, 2, 3, PixelFormat::Rgb24).is_err());
        Ok(())
    }

    #[test]
    fn jpeg_bounds_skip_leading_garbage() {
        let buffer = [0x00, 0x11, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(find_jpeg_bounds(&buffer), Some((2, 8)));
        assert_eq!(find_jpeg_bounds(&buffer[..7]), None);
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }
}
