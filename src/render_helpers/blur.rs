//! Dual Kawase 模糊。
//!
//! 流程: 源图像逐级降采样（每级尺寸减半）`passes` 次，再逐级升采样回原尺寸。
//! 降采样每个像素取中心 ×4 加对角四点，升采样取八个邻点（对角权重 ×2）。
//! 中间缓冲区按尺寸缓存在 [`Blur`] 中，尺寸不变时不会重新分配。

use std::cmp::max;
use std::iter::zip;

use anyhow::{ensure, Context as _};
use glam::{Vec2, Vec4};
use smithay::utils::{Physical, Size};

use super::buffer::PixelBuffer;
use super::renderer::RenderError;

#[derive(Debug, Default)]
pub struct Blur {
    /// Output buffer followed by intermediate buffers, large to small.
    ///
    /// Created lazily and stored here to avoid recreating blur buffers frequently.
    buffers: Vec<PixelBuffer>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BlurOptions {
    pub passes: u8,
    pub offset: f64,
}

impl From<niri_config::Blur> for BlurOptions {
    fn from(config: niri_config::Blur) -> Self {
        Self {
            passes: config.passes,
            offset: config.offset,
        }
    }
}

impl BlurOptions {
    fn passes(self) -> usize {
        usize::from(
            self.passes
                .clamp(niri_config::Blur::MIN_PASSES, niri_config::Blur::MAX_PASSES),
        )
    }
}

impl Blur {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure the output and intermediate buffers match `size` and `options`.
    pub fn prepare_buffers(
        &mut self,
        mut create_buffer: impl FnMut(Size<i32, Physical>) -> Result<PixelBuffer, RenderError>,
        size: Size<i32, Physical>,
        options: BlurOptions,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Blur::prepare_buffers");

        let passes = options.passes();

        if let Some(output) = self.buffers.first() {
            let old_size = output.size();
            if old_size != size {
                trace!(
                    "recreating buffers: output size changed from {} × {} to {} × {}",
                    old_size.w,
                    old_size.h,
                    size.w,
                    size.h
                );
                self.buffers.clear();
            }
        }

        let mut w = size.w;
        let mut h = size.h;
        for i in 0..=passes {
            let size = Size::from((w, h));
            w = max(1, w / 2);
            h = max(1, h / 2);

            if self.buffers.len() > i {
                continue;
            }

            let buffer = create_buffer(size).context("error creating blur buffer")?;
            self.buffers.push(buffer);
        }

        // Drop any no longer needed buffers.
        self.buffers.truncate(passes + 1);

        Ok(())
    }

    /// Blurs `source` and returns the blurred result, owned by `self`.
    pub fn render(
        &mut self,
        source: &PixelBuffer,
        options: BlurOptions,
    ) -> anyhow::Result<&PixelBuffer> {
        let _span = tracy_client::span!("Blur::render");
        trace!("rendering blur");

        let passes = options.passes();
        let size = source.size();

        ensure!(
            self.buffers.len() == passes + 1,
            "wrong buffers len: expected {}, got {}",
            passes + 1,
            self.buffers.len()
        );
        ensure!(
            self.buffers[0].size() == size,
            "wrong output buffer size: expected {size:?}, got {:?}",
            self.buffers[0].size()
        );

        let offset = options.offset as f32;

        // Down: source -> 1 -> 2 -> ... -> passes.
        for i in 1..=passes {
            let (done, rest) = self.buffers.split_at_mut(i);
            let src = if i == 1 { source } else { &done[i - 1] };
            let dst = &mut rest[0];

            // During downsampling, half_pixel is half of the destination pixel.
            let dst_size = dst.size();
            let half_pixel = Vec2::new(0.5 / dst_size.w as f32, 0.5 / dst_size.h as f32);
            run_pass(src, dst, |src, uv| down_sample(src, uv, half_pixel, offset));
        }

        // Up: passes -> ... -> 1 -> 0.
        let srcs = (1..=passes).rev();
        let dsts = (0..passes).rev();
        for (s, d) in zip(srcs, dsts) {
            let (lo, hi) = self.buffers.split_at_mut(s);
            let src = &hi[0];
            let dst = &mut lo[d];

            // During upsampling, half_pixel is half of the source pixel.
            let src_size = src.size();
            let half_pixel = Vec2::new(0.5 / src_size.w as f32, 0.5 / src_size.h as f32);
            run_pass(src, dst, |src, uv| up_sample(src, uv, half_pixel, offset));
        }

        Ok(&self.buffers[0])
    }

    /// Address of the output buffer, if allocated.
    pub fn output_ptr(&self) -> Option<*const Vec4> {
        self.buffers.first().map(PixelBuffer::data_ptr)
    }
}

fn run_pass(
    src: &PixelBuffer,
    dst: &mut PixelBuffer,
    sample: impl Fn(&PixelBuffer, Vec2) -> Vec4,
) {
    let size = dst.size();
    let texel = Vec2::new(1. / size.w as f32, 1. / size.h as f32);
    for y in 0..size.h {
        for x in 0..size.w {
            let uv = (Vec2::new(x as f32, y as f32) + 0.5) * texel;
            dst.put(x, y, sample(src, uv));
        }
    }
}

fn down_sample(src: &PixelBuffer, uv: Vec2, half_pixel: Vec2, offset: f32) -> Vec4 {
    let hp = half_pixel * offset;
    let mut sum = src.sample(uv) * 4.;
    sum += src.sample(uv - hp);
    sum += src.sample(uv + hp);
    sum += src.sample(uv + Vec2::new(hp.x, -hp.y));
    sum += src.sample(uv - Vec2::new(hp.x, -hp.y));
    sum / 8.
}

fn up_sample(src: &PixelBuffer, uv: Vec2, half_pixel: Vec2, offset: f32) -> Vec4 {
    let hp = half_pixel * offset;
    let mut sum = src.sample(uv + Vec2::new(-hp.x * 2., 0.));
    sum += src.sample(uv + Vec2::new(-hp.x, hp.y)) * 2.;
    sum += src.sample(uv + Vec2::new(0., hp.y * 2.));
    sum += src.sample(uv + Vec2::new(hp.x, hp.y)) * 2.;
    sum += src.sample(uv + Vec2::new(hp.x * 2., 0.));
    sum += src.sample(uv + Vec2::new(hp.x, -hp.y)) * 2.;
    sum += src.sample(uv + Vec2::new(0., -hp.y * 2.));
    sum += src.sample(uv + Vec2::new(-hp.x, -hp.y)) * 2.;
    sum / 12.
}
