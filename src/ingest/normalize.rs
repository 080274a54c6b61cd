use anyhow::{anyhow, Result};

use crate::frame::PixelFormat;

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Byte length a frame of this layout must have.
pub(crate) fn expected_len(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    let len = match format {
        PixelFormat::Rgb24 => pixels.checked_mul(3),
        PixelFormat::Rgba32 => pixels.checked_mul(4),
        PixelFormat::Gray8 => Some(pixels),
        PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
    };
    len.ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// Convert any supported layout to one luminance value per pixel.
pub(crate) fn luminance_plane(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<f32>> {
    let expected = expected_len(width, height, format)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }

    let plane = match format {
        PixelFormat::Rgb24 => pixels.chunks_exact(3).map(weighted_luma).collect(),
        PixelFormat::Rgba32 => pixels.chunks_exact(4).map(weighted_luma).collect(),
        PixelFormat::Gray8 => pixels.iter().map(|&p| p as f32).collect(),
        // NV12 carries luma in its leading Y plane.
        PixelFormat::Nv12 => {
            let y_plane = width as usize * height as usize;
            pixels[..y_plane].iter().map(|&p| p as f32).collect()
        }
    };
    Ok(plane)
}

fn weighted_luma(px: &[u8]) -> f32 {
    LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_uses_y_plane() -> Result<()> {
        let width = 2;
        let height = 2;
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![0u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let luma = luminance_plane(&nv12, width, height, PixelFormat::Nv12)?;
        assert_eq!(luma, vec![128.0; 4]);

        Ok(())
    }

    #[test]
    fn rgba_ignores_alpha() -> Result<()> {
        let luma = luminance_plane(&[10, 10, 10, 0, 10, 10, 10, 255], 2, 1, PixelFormat::Rgba32)?;
        assert!((luma[0] - luma[1]).abs() < 1e-6);
        assert!((luma[0] - 10.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn rgb_validates_length() {
        let pixels = vec![1u8; 8];
        assert!(luminance_plane(&pixels, 1, 3, PixelFormat::Rgb24).is_err());
    }
}
