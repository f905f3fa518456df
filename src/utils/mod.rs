//! 实用工具模块。
//!
//! - 逻辑坐标与物理像素之间的对齐
//! - 全局唯一 ID（见 [`id`]）
//! - 客户端区域到不重叠矩形的转换（见 [`region`]）

use smithay::utils::{Logical, Physical, Point, Rectangle, Scale};

pub mod id;
pub mod region;

/// Snaps a logical rectangle to whole physical pixels.
pub fn to_physical_rect(rect: Rectangle<f64, Logical>, scale: f64) -> Rectangle<i32, Physical> {
    rect.to_physical_precise_round(Scale::from(scale))
}

/// Center of a physical pixel, in logical coordinates.
pub fn pixel_center_logical(x: i32, y: i32, scale: f64) -> Point<f64, Logical> {
    Point::from(((f64::from(x) + 0.5) / scale, (f64::from(y) + 0.5) / scale))
}
