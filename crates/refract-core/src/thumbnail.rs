//! Backbuffer thumbnail: point-sampled downscale with format conversion,
//! encoded as JPEG for the log header.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use refract_driver::ImageReadback;
use refract_protocol::ImageFormat;
use refract_trace::Thumbnail;
use tracing::error;

const MAX_THUMB_WIDTH: u32 = 1024;
const JPEG_QUALITY: u8 = 40;

/// Thumbnail dimensions for a backbuffer: at most 1024 wide, aligned down
/// to a multiple of 8, aspect preserved. `None` for degenerate sizes.
pub(crate) fn thumb_dimensions(width: u32, height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let tw = MAX_THUMB_WIDTH.min(width) & !0x7;
    if tw == 0 {
        return None;
    }
    let aspect = width as f32 / height as f32;
    let th = (tw as f32 / aspect) as u32;
    if th == 0 {
        return None;
    }
    Some((tw, th))
}

/// Point-sample `rb` into a tightly packed RGB8 buffer of `tw` x `th`.
pub(crate) fn point_sample_rgb(rb: &ImageReadback, out: &mut [u8], tw: u32, th: u32) {
    debug_assert!(out.len() >= 3 * tw as usize * th as usize);

    let stride = match rb.format {
        ImageFormat::Rgba16Float => 8usize,
        _ => 4usize,
    };
    let widthf = rb.width as f32;
    let heightf = rb.height as f32;

    let mut dst = 0usize;
    for y in 0..th {
        for x in 0..tw {
            let xf = x as f32 / tw as f32;
            let yf = y as f32 / th as f32;
            let src_off = stride * (xf * widthf) as usize
                + rb.row_pitch as usize * (yf * heightf) as usize;
            let src = &rb.data[src_off..src_off + stride];

            let rgb = match rb.format {
                ImageFormat::Rgb10A2Unorm => {
                    let packed = u32::from_le_bytes(src[0..4].try_into().unwrap());
                    unpack_rgb10a2(packed)
                }
                ImageFormat::Bgra8Unorm => [src[2], src[1], src[0]],
                ImageFormat::Rgba16Float => {
                    let r = f16_to_f32(u16::from_le_bytes(src[0..2].try_into().unwrap()));
                    let g = f16_to_f32(u16::from_le_bytes(src[2..4].try_into().unwrap()));
                    let b = f16_to_f32(u16::from_le_bytes(src[4..6].try_into().unwrap()));
                    [
                        srgb_encode(r.clamp(0.0, 1.0)),
                        srgb_encode(g.clamp(0.0, 1.0)),
                        srgb_encode(b.clamp(0.0, 1.0)),
                    ]
                }
                _ => [src[0], src[1], src[2]],
            };
            out[dst..dst + 3].copy_from_slice(&rgb);
            dst += 3;
        }
    }
}

pub(crate) fn encode_jpeg(rgb: &[u8], width: u32, height: u32) -> Option<Thumbnail> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    match encoder.encode(rgb, width, height, ExtendedColorType::Rgb8) {
        Ok(()) => Some(Thumbnail {
            width,
            height,
            jpeg,
        }),
        Err(err) => {
            error!(error = %err, "thumbnail jpeg encode failed");
            None
        }
    }
}

fn unpack_rgb10a2(packed: u32) -> [u8; 3] {
    let r = (packed & 0x3ff) as f32 / 1023.0;
    let g = ((packed >> 10) & 0x3ff) as f32 / 1023.0;
    let b = ((packed >> 20) & 0x3ff) as f32 / 1023.0;
    [
        (r * 255.0) as u8,
        (g * 255.0) as u8,
        (b * 255.0) as u8,
    ]
}

/// Gamma-encode a linear value into an 8-bit sRGB channel.
fn srgb_encode(linear: f32) -> u8 {
    let encoded = if linear < 0.0031308 {
        12.92 * linear
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0) as u8
}

fn f16_to_f32(half: u16) -> f32 {
    let sign = ((half >> 15) & 1) as u32;
    let exponent = ((half >> 10) & 0x1f) as u32;
    let mantissa = (half & 0x3ff) as u32;

    let bits = if exponent == 0 {
        if mantissa == 0 {
            sign << 31
        } else {
            // subnormal: normalize
            let mut exponent = 127 - 15 + 1;
            let mut mantissa = mantissa;
            while mantissa & 0x400 == 0 {
                mantissa <<= 1;
                exponent -= 1;
            }
            (sign << 31) | ((exponent as u32) << 23) | ((mantissa & 0x3ff) << 13)
        }
    } else if exponent == 0x1f {
        (sign << 31) | (0xff << 23) | (mantissa << 13)
    } else {
        (sign << 31) | ((exponent + 127 - 15) << 23) | (mantissa << 13)
    };
    f32::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_align_down_to_eight() {
        assert_eq!(thumb_dimensions(1920, 1080), Some((1024, 576)));
        assert_eq!(thumb_dimensions(100, 100), Some((96, 96)));
        assert_eq!(thumb_dimensions(0, 100), None);
        assert_eq!(thumb_dimensions(4, 4), None);
    }

    #[test]
    fn half_floats_convert() {
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0xc000), -2.0);
        assert!((f16_to_f32(0x3800) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn srgb_encoding_matches_reference_points() {
        assert_eq!(srgb_encode(0.0), 0);
        assert_eq!(srgb_encode(1.0), 255);
        // linear 0.5 is ~188 in sRGB
        let mid = srgb_encode(0.5);
        assert!((186..=190).contains(&mid), "got {mid}");
    }

    #[test]
    fn bgra_swaps_to_rgb() {
        let rb = ImageReadback {
            format: ImageFormat::Bgra8Unorm,
            width: 8,
            height: 8,
            row_pitch: 32,
            data: {
                let mut data = Vec::new();
                for _ in 0..64 {
                    data.extend_from_slice(&[10, 20, 30, 255]); // b g r a
                }
                data
            },
        };
        let mut out = vec![0u8; 3 * 64];
        point_sample_rgb(&rb, &mut out, 8, 8);
        assert_eq!(&out[0..3], &[30, 20, 10]);
    }

    #[test]
    fn rgb10a2_unpacks() {
        let packed: u32 = 1023 | (512 << 10) | (0 << 20);
        let [r, g, b] = unpack_rgb10a2(packed);
        assert_eq!(r, 255);
        assert!((126..=129).contains(&g));
        assert_eq!(b, 0);
    }
}
