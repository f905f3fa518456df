// 文件: render_helpers/framebuffer_effect.rs
// 作用: 非 xray 的实时路径。每帧从当前帧缓冲捕获实例下方已合成的内容，
//       施加特效变换（blur → saturation → noise），再按形状裁剪画回帧中
// 每个 (表面, 渲染实例) 拥有独立的一份，缓冲区只在捕获尺寸变化时重新分配
// 提交后若同步点尚未到达，本帧直接跳过绘制（不阻塞）

use anyhow::Context as _;
use glam::Vec4;
use smithay::utils::{Physical, Rectangle, Size};

use super::background_effect::RenderParams;
use super::blur::Blur;
use super::buffer::PixelBuffer;
use super::effect::{postprocess_buffer, EffectParams};
use super::renderer::{EffectRenderer, RenderError, SyncPoint};
use crate::utils::id::unique_id;

unique_id! {
    /// Identity of one live effect buffer.
    pub struct EffectId;
}

#[derive(Debug)]
pub struct FramebufferEffect {
    id: EffectId,
    /// Copy of the frame beneath the effect.
    framebuffer: Option<PixelBuffer>,
    blur: Blur,
    /// Transformed result, drawn by [`Self::draw`].
    intermediate: Option<PixelBuffer>,
    /// Output pixels `intermediate` covers.
    rect: Rectangle<i32, Physical>,
    sync: Option<SyncPoint>,
}

impl Default for FramebufferEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl FramebufferEffect {
    pub fn new() -> Self {
        Self {
            id: EffectId::next(),
            framebuffer: None,
            blur: Blur::new(),
            intermediate: None,
            rect: Rectangle::from_size(Size::from((0, 0))),
            sync: None,
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Captures what `frame` holds beneath `params` and runs the effect transform on it.
    ///
    /// The capture is clamped to the frame. When nothing is visible, the following
    /// [`Self::draw`] draws nothing.
    pub fn capture<R: EffectRenderer>(
        &mut self,
        renderer: &mut R,
        frame: &PixelBuffer,
        params: &RenderParams,
        effect: &EffectParams,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FramebufferEffect::capture");

        let old_intermediate = self.intermediate.take();
        self.sync = None;

        let output_rect = Rectangle::from_size(frame.size());
        let Some(rect) = params.physical_geometry().intersection(output_rect) else {
            return Ok(());
        };
        let size = rect.size;

        // Recreate buffers if the size changed.
        let framebuffer = match self.framebuffer.take() {
            Some(fb) if fb.size() == size => fb,
            _ => {
                trace!("creating framebuffer sized {} × {}", size.w, size.h);
                renderer
                    .create_buffer(size)
                    .context("error creating framebuffer")?
            }
        };
        let framebuffer = self.framebuffer.insert(framebuffer);
        frame.copy_into(rect, framebuffer);

        let mut intermediate = match old_intermediate {
            Some(buffer) if buffer.size() == size => buffer,
            _ => renderer
                .create_buffer(size)
                .context("error creating intermediate buffer")?,
        };

        if let Some(options) = effect.blur {
            self.blur
                .prepare_buffers(|size| renderer.create_buffer(size), size, options)
                .context("error preparing blur")?;
            let blurred = self.blur.render(framebuffer, options)?;
            blurred.copy_into(Rectangle::from_size(size), &mut intermediate);
        } else {
            framebuffer.copy_into(Rectangle::from_size(size), &mut intermediate);
        }

        if effect.has_postprocess() {
            postprocess_buffer(&mut intermediate, rect.loc, effect.noise, effect.saturation);
        }

        self.intermediate = Some(intermediate);
        self.rect = rect;
        self.sync = Some(renderer.submit());
        Ok(())
    }

    /// Draws the last captured result into `frame`, clipped to `params`.
    ///
    /// Returns [`RenderError::NotReady`] without drawing if the work has not completed yet.
    pub fn draw(&self, frame: &mut PixelBuffer, params: &RenderParams) -> Result<(), RenderError> {
        let Some(intermediate) = &self.intermediate else {
            return Ok(());
        };

        if !self.sync.as_ref().is_some_and(SyncPoint::is_reached) {
            return Err(RenderError::NotReady);
        }

        let clip = params.clip_shape();
        let origin = self.rect.loc;
        frame.composite(intermediate, origin, |x, y| {
            clip.coverage(origin.x + x, origin.y + y)
        });
        Ok(())
    }

    /// Address of the effect result storage, if any.
    pub fn buffer_ptr(&self) -> Option<*const Vec4> {
        self.intermediate.as_ref().map(PixelBuffer::data_ptr)
    }
}
