//! 背景快照存储（xray）。
//!
//! 每个输出一份快照：背景色 + Background/Bottom 层表面合成一次，同一代（generation）
//! 内所有 xray 消费者共享。只有脏标记置位时才重新合成，成功后由这里清除脏标记。
//! 原始合成与模糊结果并存，需要模糊的消费者第一次请求时才模糊，之后不论谁请求都不再重算。
//! 饱和度和噪点属于各个消费者，在采样时施加。
//!
//! 概览中工作区背景色画在快照之上；不透明工作区完全盖住的特效不需要快照。

use std::rc::Rc;

use anyhow::Context as _;
use glam::{Vec2, Vec4};
use niri_config::Color;
use smithay::utils::{Logical, Physical, Point, Rectangle, Size};

use super::background_effect::RenderParams;
use super::blur::{Blur, BlurOptions};
use super::buffer::{PixelBuffer, SurfaceContent};
use super::damage::BackdropDamage;
use super::effect::{draw_clipped, postprocess, EffectParams};
use super::renderer::EffectRenderer;
use crate::utils::pixel_center_logical;

/// Background snapshot store of one output.
#[derive(Debug, Default)]
pub struct Xray {
    snapshot: Option<Rc<BackgroundSnapshot>>,
    /// Blur buffers, kept across refreshes.
    blur: Blur,
    generation: u64,
}

/// Composited and blurred backdrop of an output.
#[derive(Debug, Clone)]
pub struct BackgroundSnapshot {
    generation: u64,
    scale: f64,
    raw: PixelBuffer,
    /// `raw` blurred with `blur_options`; stale storage when `blur_options` is `None`.
    blurred: Option<PixelBuffer>,
    blur_options: Option<BlurOptions>,
}

/// Background of one workspace as shown in the overview, drawn between the backdrop and
/// the surfaces of the workspace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkspaceBackground {
    /// Output-local area the workspace is drawn at.
    pub geometry: Rectangle<f64, Logical>,
    pub color: Color,
}

/// What a snapshot is composited from, back to front.
#[derive(Debug)]
pub struct Backdrop<'a> {
    pub size: Size<i32, Physical>,
    pub scale: f64,
    /// Premultiplied backdrop color.
    pub color: [f32; 4],
    pub surfaces: Vec<BackdropSurface<'a>>,
}

#[derive(Debug)]
pub struct BackdropSurface<'a> {
    pub rect: Rectangle<i32, Physical>,
    pub content: &'a SurfaceContent,
    pub alpha: f32,
}

impl Xray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot, refreshing it first if it is stale.
    ///
    /// The backdrop is recomposited only when `damage` is dirty. Asking for blur on a
    /// snapshot that was not blurred with `blur_options` blurs the existing composite without
    /// recompositing it; asking for no blur keeps any blurred copy around for other callers.
    ///
    /// `backdrop` is only called on recomposite. On error the dirty flag stays set, so the next
    /// call retries.
    pub fn get_or_refresh<'a, R: EffectRenderer>(
        &mut self,
        renderer: &mut R,
        damage: &mut BackdropDamage,
        backdrop: impl FnOnce() -> Backdrop<'a>,
        blur_options: Option<BlurOptions>,
    ) -> anyhow::Result<Rc<BackgroundSnapshot>> {
        let mut snapshot = match self.snapshot.take() {
            Some(snapshot) if !damage.is_dirty() => snapshot,
            old => Rc::new(self.recomposite(renderer, damage, old, backdrop())?),
        };

        let res = match blur_options {
            Some(options) if snapshot.blur_options != Some(options) => {
                self.blur_snapshot(renderer, &mut snapshot, options)
            }
            _ => Ok(()),
        };

        self.snapshot = Some(snapshot.clone());
        res.map(|()| snapshot)
    }

    fn recomposite<R: EffectRenderer>(
        &mut self,
        renderer: &mut R,
        damage: &mut BackdropDamage,
        old: Option<Rc<BackgroundSnapshot>>,
        backdrop: Backdrop<'_>,
    ) -> anyhow::Result<BackgroundSnapshot> {
        let _span = tracy_client::span!("Xray::recomposite");

        let size = backdrop.size;
        debug!(
            "recompositing background snapshot, changes: {:?}",
            damage.changes()
        );

        let mut snapshot = match old.map(Rc::try_unwrap) {
            Some(Ok(snapshot)) if snapshot.raw.size() == size => snapshot,
            old => {
                if let Some(Err(_)) = old {
                    debug!("background snapshot still in use, allocating a new one");
                }

                let raw = renderer
                    .create_buffer(size)
                    .context("error allocating background snapshot")?;
                BackgroundSnapshot {
                    generation: 0,
                    scale: backdrop.scale,
                    raw,
                    blurred: None,
                    blur_options: None,
                }
            }
        };

        snapshot.scale = backdrop.scale;
        snapshot.raw.fill(backdrop.color);
        for surface in &backdrop.surfaces {
            snapshot
                .raw
                .draw_content(surface.content, surface.rect, surface.alpha);
        }

        // The blurred storage is kept for reuse, but its contents are stale now.
        snapshot.blur_options = None;

        self.generation += 1;
        snapshot.generation = self.generation;
        damage.clear();

        Ok(snapshot)
    }

    fn blur_snapshot<R: EffectRenderer>(
        &mut self,
        renderer: &mut R,
        snapshot: &mut Rc<BackgroundSnapshot>,
        options: BlurOptions,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Xray::blur_snapshot");

        if Rc::strong_count(snapshot) > 1 {
            debug!("background snapshot still in use, copying it before blurring");
        }
        let snapshot = Rc::make_mut(snapshot);
        let size = snapshot.raw.size();

        let mut target = match snapshot.blurred.take() {
            Some(buffer) if buffer.size() == size => buffer,
            _ => renderer
                .create_buffer(size)
                .context("error allocating blurred background snapshot")?,
        };

        self.blur
            .prepare_buffers(|size| renderer.create_buffer(size), size, options)?;
        let blurred = self.blur.render(&snapshot.raw, options)?;
        blurred.copy_into(Rectangle::from_size(size), &mut target);

        trace!("blurred background snapshot {}", snapshot.generation);
        snapshot.blurred = Some(target);
        snapshot.blur_options = Some(options);
        Ok(())
    }

    pub fn snapshot(&self) -> Option<&Rc<BackgroundSnapshot>> {
        self.snapshot.as_ref()
    }

    /// Number of recomposites so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl BackgroundSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn raw(&self) -> &PixelBuffer {
        &self.raw
    }

    /// Blurred composite, if blurred since the last recomposite.
    pub fn blurred(&self) -> Option<&PixelBuffer> {
        self.blur_options.and(self.blurred.as_ref())
    }

    /// Samples the snapshot at a logical backdrop position.
    pub fn sample(&self, blur: bool, point: Point<f64, Logical>) -> Vec4 {
        let buffer = match self.blurred() {
            Some(blurred) if blur => blurred,
            _ => &self.raw,
        };

        let size = buffer.size();
        let uv = Vec2::new(
            (point.x * self.scale / f64::from(size.w)) as f32,
            (point.y * self.scale / f64::from(size.h)) as f32,
        );
        buffer.sample(uv)
    }
}

impl WorkspaceBackground {
    fn premultiplied(&self) -> Vec4 {
        Vec4::from_array(self.color.to_array_premul())
    }

    fn is_opaque(&self) -> bool {
        self.color.a >= 1.
    }
}

/// Whether an opaque workspace background hides everything behind `geometry`.
///
/// Xray effects in such a spot never see the backdrop, so they need no snapshot.
pub fn covered_by_opaque_workspace(
    workspaces: &[WorkspaceBackground],
    geometry: Rectangle<f64, Logical>,
) -> bool {
    workspaces
        .iter()
        .any(|ws| ws.is_opaque() && ws.geometry.contains_rect(geometry))
}

/// Draws an xray effect: workspace backgrounds over the snapshot, seen through `params`,
/// post-processed and clipped.
///
/// `snapshot` may be `None` only when opaque workspaces cover the whole effect.
pub fn render_xray(
    frame: &mut PixelBuffer,
    snapshot: Option<&BackgroundSnapshot>,
    workspaces: &[WorkspaceBackground],
    params: &RenderParams,
    effect: &EffectParams,
) {
    let _span = tracy_client::span!("render_xray");

    let clip = params.clip_shape();
    let blur = effect.blur.is_some();

    draw_clipped(frame, params.physical_geometry(), &clip, |x, y| {
        let point = pixel_center_logical(x, y, params.scale);
        let workspace = workspaces.iter().find(|ws| ws.geometry.contains(point));

        let color = match workspace {
            Some(ws) if ws.is_opaque() => ws.premultiplied(),
            _ => {
                let below = snapshot
                    .map(|snapshot| snapshot.sample(blur, params.to_backdrop(point)))
                    .unwrap_or(Vec4::ZERO);
                match workspace {
                    Some(ws) => {
                        let color = ws.premultiplied();
                        color + below * (1. - color.w)
                    }
                    None => below,
                }
            }
        };
        postprocess(color, x, y, effect.noise, effect.saturation)
    });
}

#[cfg(test)]
mod tests {
    use niri_config::CornerRadius;

    use super::*;
    use crate::render_helpers::damage::BackdropChange;
    use crate::render_helpers::effect_shape::EffectShape;
    use crate::render_helpers::renderer::SoftwareRenderer;

    const OPTIONS: Option<BlurOptions> = Some(BlurOptions {
        passes: 1,
        offset: 1.,
    });

    fn backdrop(content: &SurfaceContent) -> Backdrop<'_> {
        Backdrop {
            size: Size::from((16, 16)),
            scale: 1.,
            color: [0., 0., 0., 1.],
            surfaces: vec![BackdropSurface {
                rect: Rectangle::new(Point::from((0, 0)), Size::from((8, 16))),
                content,
                alpha: 1.,
            }],
        }
    }

    #[test]
    fn refreshes_once_per_invalidation() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();

        let mut calls = 0;
        for _ in 0..3 {
            let snapshot = xray
                .get_or_refresh(
                    &mut renderer,
                    &mut damage,
                    || {
                        calls += 1;
                        backdrop(&content)
                    },
                    OPTIONS,
                )
                .unwrap();
            assert_eq!(snapshot.generation(), 1);
        }
        assert_eq!(calls, 1);
        assert!(!damage.is_dirty());

        damage.mark(BackdropChange::LAYER_COMMIT);
        let snapshot = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), OPTIONS)
            .unwrap();
        assert_eq!(snapshot.generation(), 2);
        assert_eq!(xray.generation(), 2);
    }

    #[test]
    fn refresh_reuses_unshared_storage() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();

        let first = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), None)
            .unwrap();
        let ptr = first.raw().data_ptr();
        drop(first);

        damage.mark(BackdropChange::BACKDROP_COLOR);
        let second = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), None)
            .unwrap();
        assert_eq!(second.raw().data_ptr(), ptr);

        // Still held: the refresh must not write into it.
        damage.mark(BackdropChange::BACKDROP_COLOR);
        let third = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), None)
            .unwrap();
        assert_ne!(third.raw().data_ptr(), second.raw().data_ptr());
        assert_eq!(second.generation(), 2);
        assert_eq!(third.generation(), 3);
    }

    #[test]
    fn blur_added_without_recompositing() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();

        let mut calls = 0;
        let mut get = |xray: &mut Xray, options| {
            xray.get_or_refresh(
                &mut renderer,
                &mut damage,
                || {
                    calls += 1;
                    backdrop(&content)
                },
                options,
            )
            .unwrap()
        };

        let snapshot = get(&mut xray, None);
        assert!(snapshot.blurred().is_none());
        drop(snapshot);

        let snapshot = get(&mut xray, OPTIONS);
        let blurred = snapshot.blurred().unwrap().data_ptr();
        assert_eq!(snapshot.generation(), 1);
        drop(snapshot);

        // Callers without blur alternate with blurring ones: nothing gets redone.
        for _ in 0..3 {
            let snapshot = get(&mut xray, None);
            assert_eq!(snapshot.blurred().unwrap().data_ptr(), blurred);
            drop(snapshot);

            let snapshot = get(&mut xray, OPTIONS);
            assert_eq!(snapshot.blurred().unwrap().data_ptr(), blurred);
        }

        assert_eq!(calls, 1);
        assert_eq!(xray.generation(), 1);
    }

    #[test]
    fn recomposite_invalidates_blur() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();

        let snapshot = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), OPTIONS)
            .unwrap();
        assert!(snapshot.blurred().is_some());
        drop(snapshot);

        damage.mark(BackdropChange::LAYER_COMMIT);
        let snapshot = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), None)
            .unwrap();
        assert!(snapshot.blurred().is_none());
        drop(snapshot);

        let snapshot = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), OPTIONS)
            .unwrap();
        assert!(snapshot.blurred().is_some());
        assert_eq!(snapshot.generation(), 2);
    }

    #[test]
    fn blurring_shared_snapshot_copies_it() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();

        let unblurred = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), None)
            .unwrap();
        let blurred = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), OPTIONS)
            .unwrap();

        assert!(unblurred.blurred().is_none());
        assert!(blurred.blurred().is_some());
        assert_ne!(unblurred.raw().data_ptr(), blurred.raw().data_ptr());
        assert_eq!(blurred.generation(), 1);
    }

    #[test]
    fn allocation_failure_keeps_dirty_flag() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();

        renderer.fail_next_allocations(1);
        let res =
            xray.get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), OPTIONS);
        assert!(res.is_err());
        assert!(damage.is_dirty());

        let snapshot = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), OPTIONS)
            .unwrap();
        assert_eq!(snapshot.generation(), 1);
        assert!(!damage.is_dirty());
    }

    #[test]
    fn xray_samples_matching_backdrop_area() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();
        let snapshot = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), None)
            .unwrap();

        let effect = EffectParams {
            blur: None,
            noise: 0.,
            saturation: 1.,
        };
        let shape = EffectShape::resolve(
            Size::from((8., 8.)),
            Some(CornerRadius::default()),
            None,
        );

        // Drawn at half size in the right half of the frame, but sitting over the red area
        // in the backdrop.
        let params = shape.place(Point::from((8., 0.)), 0.5, Point::from((0., 0.)), 1.);
        let mut frame = PixelBuffer::new(Size::from((16, 16)));
        render_xray(&mut frame, Some(&*snapshot), &[], &params, &effect);

        assert_eq!(frame.get(9, 1), Vec4::new(1., 0., 0., 1.));
        assert_eq!(frame.get(1, 1), Vec4::ZERO);
        // Outside the placed geometry.
        assert_eq!(frame.get(9, 5), Vec4::ZERO);
    }

    #[test]
    fn workspace_background_over_snapshot() {
        let content = SurfaceContent::Solid([1., 0., 0., 1.]);
        let mut renderer = SoftwareRenderer::new();
        let mut damage = BackdropDamage::new();
        let mut xray = Xray::new();
        let snapshot = xray
            .get_or_refresh(&mut renderer, &mut damage, || backdrop(&content), None)
            .unwrap();

        let effect = EffectParams {
            blur: None,
            noise: 0.,
            saturation: 1.,
        };
        let shape = EffectShape::resolve(Size::from((16., 16.)), None, None);
        let params = shape.place(Point::from((0., 0.)), 1., Point::from((0., 0.)), 1.);
        let workspaces = [WorkspaceBackground {
            geometry: Rectangle::new(Point::from((0., 0.)), Size::from((4., 16.))),
            color: Color::new_unpremul(0., 0., 1., 0.5),
        }];

        let mut frame = PixelBuffer::new(Size::from((16, 16)));
        render_xray(&mut frame, Some(&*snapshot), &workspaces, &params, &effect);

        // Half-transparent blue over the red backdrop area.
        assert_eq!(frame.get(1, 1), Vec4::new(0.5, 0., 0.5, 1.));
        // Outside the workspace.
        assert_eq!(frame.get(6, 1), Vec4::new(1., 0., 0., 1.));
        assert_eq!(frame.get(12, 1), Vec4::new(0., 0., 0., 1.));
    }

    #[test]
    fn opaque_workspace_needs_no_snapshot() {
        let workspaces = [WorkspaceBackground {
            geometry: Rectangle::new(Point::from((8., 8.)), Size::from((8., 8.))),
            color: Color::new_unpremul(0., 1., 0., 1.),
        }];
        let inside = Rectangle::new(Point::from((10., 10.)), Size::from((4., 4.)));
        let across = Rectangle::new(Point::from((6., 10.)), Size::from((4., 4.)));
        assert!(covered_by_opaque_workspace(&workspaces, inside));
        assert!(!covered_by_opaque_workspace(&workspaces, across));

        let translucent = [WorkspaceBackground {
            color: Color::new_unpremul(0., 1., 0., 0.9),
            ..workspaces[0]
        }];
        assert!(!covered_by_opaque_workspace(&translucent, inside));

        let effect = EffectParams {
            blur: None,
            noise: 0.,
            saturation: 1.,
        };
        let shape = EffectShape::resolve(inside.size, None, None);
        let params = shape.place(inside.loc, 1., inside.loc, 1.);
        let mut frame = PixelBuffer::new(Size::from((16, 16)));
        render_xray(&mut frame, None, &workspaces, &params, &effect);

        assert_eq!(frame.get(11, 11), Vec4::new(0., 1., 0., 1.));
        assert_eq!(frame.get(9, 9), Vec4::ZERO);
    }
}
