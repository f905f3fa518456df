//! 软件像素缓冲区。
//!
//! 像素以预乘 alpha 的 RGBA `f32`（`glam::Vec4`）存储，行优先。
//! 采样采用 clamp-to-edge，与 GPU 纹理的 CLAMP_TO_EDGE + LINEAR 行为一致。

use std::rc::Rc;

use glam::{Vec2, Vec4};
use smithay::utils::{Physical, Point, Rectangle, Size};

/// Premultiplied RGBA pixel buffer.
#[derive(Clone, PartialEq)]
pub struct PixelBuffer {
    size: Size<i32, Physical>,
    pixels: Vec<Vec4>,
}

/// What a surface draws: either a solid color or its committed buffer.
#[derive(Debug, Clone)]
pub enum SurfaceContent {
    /// Premultiplied color.
    Solid([f32; 4]),
    Buffer(Rc<PixelBuffer>),
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("size", &self.size)
            .field("data", &self.pixels.as_ptr())
            .finish()
    }
}

impl PixelBuffer {
    /// Creates a transparent buffer.
    ///
    /// Renderers go through this; other code should allocate via
    /// [`EffectRenderer::create_buffer`](super::renderer::EffectRenderer::create_buffer).
    pub(crate) fn new(size: Size<i32, Physical>) -> Self {
        let w = size.w.max(0) as usize;
        let h = size.h.max(0) as usize;
        Self {
            size,
            pixels: vec![Vec4::ZERO; w * h],
        }
    }

    /// Creates a buffer filled with a premultiplied color.
    pub fn from_color(size: Size<i32, Physical>, color: [f32; 4]) -> Self {
        let mut buffer = Self::new(size);
        buffer.fill(color);
        buffer
    }

    pub fn size(&self) -> Size<i32, Physical> {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Address of the pixel storage; two live buffers never share it.
    pub fn data_ptr(&self) -> *const Vec4 {
        self.pixels.as_ptr()
    }

    pub fn pixels(&self) -> &[Vec4] {
        &self.pixels
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.size.w || y >= self.size.h {
            return None;
        }
        Some(y as usize * self.size.w as usize + x as usize)
    }

    pub fn get(&self, x: i32, y: i32) -> Vec4 {
        self.index(x, y).map_or(Vec4::ZERO, |i| self.pixels[i])
    }

    pub fn put(&mut self, x: i32, y: i32, color: Vec4) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = color;
        }
    }

    pub fn fill(&mut self, color: [f32; 4]) {
        self.pixels.fill(Vec4::from_array(color));
    }

    /// Pixel with coordinates clamped into the buffer.
    fn get_clamped(&self, x: i32, y: i32) -> Vec4 {
        if self.pixels.is_empty() {
            return Vec4::ZERO;
        }
        let x = x.clamp(0, self.size.w - 1);
        let y = y.clamp(0, self.size.h - 1);
        self.pixels[y as usize * self.size.w as usize + x as usize]
    }

    /// Bilinear sample at normalized coordinates, clamping to edge.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let x = uv.x * self.size.w as f32 - 0.5;
        let y = uv.y * self.size.h as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);

        let top = self
            .get_clamped(x0, y0)
            .lerp(self.get_clamped(x0 + 1, y0), fx);
        let bottom = self
            .get_clamped(x0, y0 + 1)
            .lerp(self.get_clamped(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }

    /// Source-over blend of a premultiplied color, scaled by `alpha`.
    pub fn blend(&mut self, x: i32, y: i32, color: Vec4, alpha: f32) {
        if let Some(i) = self.index(x, y) {
            let src = color * alpha;
            let dst = self.pixels[i];
            self.pixels[i] = src + dst * (1. - src.w);
        }
    }

    /// Copies the `src` region of `self` into `dst`, clamping reads to the edge of `self`.
    ///
    /// `dst` must have the size of `src`.
    pub fn copy_into(&self, src: Rectangle<i32, Physical>, dst: &mut PixelBuffer) {
        debug_assert_eq!(src.size, dst.size);
        for y in 0..dst.size.h {
            for x in 0..dst.size.w {
                let color = self.get_clamped(src.loc.x + x, src.loc.y + y);
                dst.put(x, y, color);
            }
        }
    }

    /// Draws `content` into `dst`, clipped to the buffer, with nearest sampling.
    pub fn draw_content(
        &mut self,
        content: &SurfaceContent,
        dst: Rectangle<i32, Physical>,
        alpha: f32,
    ) {
        if alpha <= 0. || dst.size.w <= 0 || dst.size.h <= 0 {
            return;
        }

        let bounds = Rectangle::from_size(self.size);
        let Some(visible) = dst.intersection(bounds) else {
            return;
        };

        for y in visible.loc.y..visible.loc.y + visible.size.h {
            for x in visible.loc.x..visible.loc.x + visible.size.w {
                let color = match content {
                    SurfaceContent::Solid(color) => Vec4::from_array(*color),
                    SurfaceContent::Buffer(buffer) => {
                        let bs = buffer.size();
                        let sx = (x - dst.loc.x) * bs.w / dst.size.w;
                        let sy = (y - dst.loc.y) * bs.h / dst.size.h;
                        buffer.get(sx, sy)
                    }
                };
                self.blend(x, y, color, alpha);
            }
        }
    }

    /// Composites `src` over `self` at `loc`, weighting each source pixel by `coverage`.
    pub fn composite(
        &mut self,
        src: &PixelBuffer,
        loc: Point<i32, Physical>,
        mut coverage: impl FnMut(i32, i32) -> f32,
    ) {
        for y in 0..src.size.h {
            for x in 0..src.size.w {
                let cov = coverage(x, y);
                if cov <= 0. {
                    continue;
                }
                self.blend(loc.x + x, loc.y + y, src.get(x, y), cov);
            }
        }
    }
}
