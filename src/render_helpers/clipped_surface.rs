// 文件: render_helpers/clipped_surface.rs
// 作用: 计算特效的裁剪覆盖率（圆角抗锯齿 + 客户端子区域）
// 圆角公式: coverage = 1 - smoothstep(r - 0.5px, r + 0.5px, dist)，其中 0.5px 为半个物理像素

use glam::Vec2;
use niri_config::CornerRadius;
use smithay::utils::{Logical, Physical, Rectangle};

use crate::utils::pixel_center_logical;

/// Clip shape of an effect, ready for per-pixel coverage queries.
#[derive(Debug, Clone)]
pub struct ClipShape {
    /// Clip geometry in output-local logical coordinates.
    pub geometry: Rectangle<f64, Logical>,
    pub corner_radius: CornerRadius,
    /// Output scale.
    pub scale: f64,
    /// Physical pixels the effect is limited to, on top of `geometry`.
    pub subregion: Option<Vec<Rectangle<i32, Physical>>>,
}

impl ClipShape {
    /// Coverage of the physical pixel `(x, y)` in output coordinates, in `[0, 1]`.
    pub fn coverage(&self, x: i32, y: i32) -> f32 {
        if let Some(rects) = &self.subregion {
            if !rects.iter().any(|r| contains(*r, x, y)) {
                return 0.;
            }
        }

        let point = pixel_center_logical(x, y, self.scale) - self.geometry.loc;
        let coords = Vec2::new(point.x as f32, point.y as f32);
        let size = Vec2::new(
            self.geometry.size.w as f32,
            self.geometry.size.h as f32,
        );

        if coords.x < 0. || coords.y < 0. || coords.x > size.x || coords.y > size.y {
            return 0.;
        }

        rounding_alpha(coords, size, self.corner_radius, self.scale as f32)
    }
}

fn contains(rect: Rectangle<i32, Physical>, x: i32, y: i32) -> bool {
    rect.loc.x <= x
        && x < rect.loc.x + rect.size.w
        && rect.loc.y <= y
        && y < rect.loc.y + rect.size.h
}

/// Antialiased alpha of `coords` inside a rounded rectangle of `size`.
///
/// `coords` and `size` are logical; `scale` turns half a physical pixel into logical units.
pub fn rounding_alpha(coords: Vec2, size: Vec2, corner_radius: CornerRadius, scale: f32) -> f32 {
    let r = corner_radius;

    let (center, radius) = if coords.x < r.top_left && coords.y < r.top_left {
        (Vec2::new(r.top_left, r.top_left), r.top_left)
    } else if size.x - r.top_right < coords.x && coords.y < r.top_right {
        (Vec2::new(size.x - r.top_right, r.top_right), r.top_right)
    } else if size.x - r.bottom_right < coords.x && size.y - r.bottom_right < coords.y {
        (
            Vec2::new(size.x - r.bottom_right, size.y - r.bottom_right),
            r.bottom_right,
        )
    } else if coords.x < r.bottom_left && size.y - r.bottom_left < coords.y {
        (Vec2::new(r.bottom_left, size.y - r.bottom_left), r.bottom_left)
    } else {
        return 1.;
    };

    let dist = coords.distance(center);
    let half_px = 0.5 / scale;
    1. - smoothstep(radius - half_px, radius + half_px, dist)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0., 1.);
    t * t * (3. - 2. * t)
}
