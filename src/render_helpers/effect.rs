//! 特效变换：模糊之后的逐像素后处理（饱和度、噪点）以及带裁剪的合成。
//!
//! 固定顺序为 blur → saturation → noise → clip。噪点由物理像素坐标的整数哈希得到，
//! 相同输入永远得到相同输出。

use glam::{Vec3, Vec4};
use smithay::utils::{Physical, Point, Rectangle};

use super::blur::BlurOptions;
use super::buffer::PixelBuffer;
use super::clipped_surface::ClipShape;

/// Luminance weights (Rec. 709).
const LUMINANCE: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Parameters of the effect transform for one surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectParams {
    /// Blur options, `None` when not blurring.
    pub blur: Option<BlurOptions>,
    pub noise: f32,
    pub saturation: f32,
}

impl EffectParams {
    /// Whether the post-processing step changes any pixel.
    pub fn has_postprocess(&self) -> bool {
        self.noise > 0. || self.saturation != 1.
    }
}

/// Applies saturation and noise to a premultiplied `color` at physical output pixel `(x, y)`.
pub fn postprocess(color: Vec4, x: i32, y: i32, noise: f32, saturation: f32) -> Vec4 {
    let mut rgb = color.truncate();
    let a = color.w;

    if saturation != 1. {
        let desaturated = Vec3::splat(rgb.dot(LUMINANCE));
        rgb = desaturated.lerp(rgb, saturation);
    }

    if noise > 0. {
        let n = noise_hash(x, y);
        rgb += Vec3::splat((n - 0.5) * noise * a);
    }

    // Keep the color a valid premultiplied one.
    let rgb = rgb.clamp(Vec3::ZERO, Vec3::splat(a));
    rgb.extend(a)
}

/// Post-processes `buffer` in place; `origin` is the output position of its top-left pixel.
pub fn postprocess_buffer(
    buffer: &mut PixelBuffer,
    origin: Point<i32, Physical>,
    noise: f32,
    saturation: f32,
) {
    let _span = tracy_client::span!("postprocess_buffer");

    let size = buffer.size();
    for y in 0..size.h {
        for x in 0..size.w {
            let color = buffer.get(x, y);
            let color = postprocess(color, origin.x + x, origin.y + y, noise, saturation);
            buffer.put(x, y, color);
        }
    }
}

/// Composites `sample(x, y)` over `frame` for every pixel of `rect`, weighted by `clip`.
///
/// `sample` receives output pixel coordinates and is only called for covered pixels.
pub fn draw_clipped(
    frame: &mut PixelBuffer,
    rect: Rectangle<i32, Physical>,
    clip: &ClipShape,
    mut sample: impl FnMut(i32, i32) -> Vec4,
) {
    let Some(rect) = rect.intersection(Rectangle::from_size(frame.size())) else {
        return;
    };

    for y in rect.loc.y..rect.loc.y + rect.size.h {
        for x in rect.loc.x..rect.loc.x + rect.size.w {
            let coverage = clip.coverage(x, y);
            if coverage <= 0. {
                continue;
            }
            let color = sample(x, y);
            frame.blend(x, y, color, coverage);
        }
    }
}

/// Integer hash of a pixel coordinate mapped to `[0, 1)`.
pub fn noise_hash(x: i32, y: i32) -> f32 {
    let mut h = (x as u32).wrapping_mul(0x8da6_b343) ^ (y as u32).wrapping_mul(0xd816_3841);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    (h >> 8) as f32 / (1u32 << 24) as f32
}
