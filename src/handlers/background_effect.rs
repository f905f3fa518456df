// 文件: handlers/background_effect.rs
// 作用: 处理客户端提交的模糊区域（ext-background-effect 与 KDE blur 两种协议）
// 状态是双缓冲的: set/unset 只写入 pending，表面 commit 时才生效
// 两种协议同时使用时，ext-background-effect 优先

use std::sync::Arc;

use bitflags::bitflags;
use smithay::utils::{Logical, Point, Rectangle, Size};
use smithay::wayland::compositor::RegionAttributes;

use crate::niri::{Niri, SurfaceId};
use crate::utils::region::region_to_non_overlapping_rects;

bitflags! {
    /// Effects the compositor advertises to clients.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u32 {
        const BLUR = 1;
    }
}

/// Region requested through the KDE blur protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum KdeBlurRegion {
    /// No region given: blur behind the whole surface.
    WholeSurface,
    Region(RegionAttributes),
}

/// Client blur region state of one surface.
#[derive(Debug, Default)]
pub struct BlurRegionState {
    // Pending state, `Some` when changed since the last commit.
    pending_ext: Option<Option<RegionAttributes>>,
    pending_kde: Option<Option<KdeBlurRegion>>,

    /// `Some` once the client has used ext-background-effect, even if it unset the region.
    ext: Option<Option<RegionAttributes>>,
    kde: Option<KdeBlurRegion>,

    /// Whether `rects` needs recomputing.
    dirty: bool,
    rects: Option<Arc<Vec<Rectangle<i32, Logical>>>>,
}

impl BlurRegionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ext(&mut self, region: RegionAttributes) {
        self.pending_ext = Some(Some(region));
    }

    pub fn unset_ext(&mut self) {
        self.pending_ext = Some(None);
    }

    pub fn set_kde(&mut self, region: KdeBlurRegion) {
        self.pending_kde = Some(Some(region));
    }

    pub fn unset_kde(&mut self) {
        self.pending_kde = Some(None);
    }

    /// Applies pending state. Returns whether anything changed.
    pub fn commit(&mut self) -> bool {
        let mut changed = false;

        if let Some(ext) = self.pending_ext.take() {
            if self.ext.as_ref() != Some(&ext) {
                self.ext = Some(ext);
                changed = true;
            }
        }

        if let Some(kde) = self.pending_kde.take() {
            if self.kde != kde {
                self.kde = kde;
                changed = true;
            }
        }

        self.dirty |= changed;
        changed
    }

    /// Current blur region as non-overlapping rects, `None` if the client set none.
    pub fn blur_region(&mut self) -> Option<Arc<Vec<Rectangle<i32, Logical>>>> {
        if self.dirty {
            self.dirty = false;
            self.recompute();
        }

        self.rects.clone()
    }

    fn recompute(&mut self) {
        let _span = tracy_client::span!("BlurRegionState::recompute");

        let region = match &self.ext {
            // Once the client speaks ext-background-effect, KDE blur is ignored.
            Some(ext) => ext.as_ref(),
            None => match &self.kde {
                Some(KdeBlurRegion::Region(region)) => Some(region),
                Some(KdeBlurRegion::WholeSurface) => {
                    let whole = Rectangle::new(
                        Point::new(-i32::MAX / 2, -i32::MAX / 2),
                        Size::new(i32::MAX, i32::MAX),
                    );
                    self.rects = Some(Arc::new(vec![whole]));
                    return;
                }
                None => None,
            },
        };

        let Some(region) = region else {
            self.rects = None;
            return;
        };

        // Reuse the allocation when nobody else holds it.
        let mut rects = self.rects.take().unwrap_or_default();
        region_to_non_overlapping_rects(region, Arc::make_mut(&mut rects));
        self.rects = Some(rects);
    }
}

/// ext-background-effect requests.
pub trait ExtBackgroundEffectHandler {
    fn capabilities(&self) -> Capability;
    fn set_blur_region(&mut self, surface: SurfaceId, region: RegionAttributes);
    fn unset_blur_region(&mut self, surface: SurfaceId);
}

/// KDE blur requests.
pub trait KdeBlurHandler {
    fn set_blur_region(&mut self, surface: SurfaceId, region: KdeBlurRegion);
    fn unset_blur_region(&mut self, surface: SurfaceId);
}

impl ExtBackgroundEffectHandler for Niri {
    fn capabilities(&self) -> Capability {
        Capability::BLUR
    }

    fn set_blur_region(&mut self, surface: SurfaceId, region: RegionAttributes) {
        match self.blur_region_mut(surface) {
            Some(state) => state.set_ext(region),
            None => debug!("set_blur_region for unknown surface {surface:?}"),
        }
    }

    fn unset_blur_region(&mut self, surface: SurfaceId) {
        if let Some(state) = self.blur_region_mut(surface) {
            state.unset_ext();
        }
    }
}

impl KdeBlurHandler for Niri {
    fn set_blur_region(&mut self, surface: SurfaceId, region: KdeBlurRegion) {
        match self.blur_region_mut(surface) {
            Some(state) => state.set_kde(region),
            None => debug!("kde blur set for unknown surface {surface:?}"),
        }
    }

    fn unset_blur_region(&mut self, surface: SurfaceId) {
        if let Some(state) = self.blur_region_mut(surface) {
            state.unset_kde();
        }
    }
}

#[cfg(test)]
mod tests {
    use smithay::wayland::compositor::RectangleKind;

    use super::*;

    fn region(rects: &[(RectangleKind, (i32, i32, i32, i32))]) -> RegionAttributes {
        RegionAttributes {
            rects: rects
                .iter()
                .map(|&(kind, (x, y, w, h))| {
                    (kind, Rectangle::new(Point::from((x, y)), Size::from((w, h))))
                })
                .collect(),
        }
    }

    #[test]
    fn state_applies_on_commit() {
        let mut state = BlurRegionState::new();
        state.set_ext(region(&[(RectangleKind::Add, (0, 0, 10, 10))]));
        assert_eq!(state.blur_region(), None);

        assert!(state.commit());
        let rects = state.blur_region().unwrap();
        assert_eq!(
            *rects,
            vec![Rectangle::new(Point::from((0, 0)), Size::from((10, 10)))]
        );

        // Nothing pending.
        assert!(!state.commit());

        state.unset_ext();
        assert!(state.commit());
        assert_eq!(state.blur_region(), None);
    }

    #[test]
    fn ext_wins_over_kde() {
        let mut state = BlurRegionState::new();
        state.set_kde(KdeBlurRegion::WholeSurface);
        state.commit();
        let rects = state.blur_region().unwrap();
        assert_eq!(rects[0].size, Size::from((i32::MAX, i32::MAX)));

        state.set_ext(region(&[(RectangleKind::Add, (5, 5, 4, 4))]));
        state.commit();
        assert_eq!(state.blur_region().unwrap()[0].loc, Point::from((5, 5)));

        // Unsetting the ext region does not fall back to KDE.
        state.unset_ext();
        state.commit();
        assert_eq!(state.blur_region(), None);
    }

    #[test]
    fn recompute_reuses_unshared_storage() {
        let mut state = BlurRegionState::new();
        state.set_ext(region(&[(RectangleKind::Add, (0, 0, 10, 10))]));
        state.commit();
        let ptr = Arc::as_ptr(&state.blur_region().unwrap());

        state.set_ext(region(&[(RectangleKind::Add, (0, 0, 20, 10))]));
        state.commit();
        let rects = state.blur_region().unwrap();
        assert_eq!(Arc::as_ptr(&rects), ptr);
        assert_eq!(rects[0].size, Size::from((20, 10)));

        // Held elsewhere: the old rects stay untouched.
        state.set_ext(region(&[(RectangleKind::Add, (0, 0, 30, 10))]));
        state.commit();
        let new = state.blur_region().unwrap();
        assert_eq!(rects[0].size, Size::from((20, 10)));
        assert_eq!(new[0].size, Size::from((30, 10)));
    }

    #[test]
    fn subtracted_region() {
        let mut state = BlurRegionState::new();
        state.set_kde(KdeBlurRegion::Region(region(&[
            (RectangleKind::Add, (0, 0, 10, 10)),
            (RectangleKind::Subtract, (0, 0, 10, 5)),
        ])));
        state.commit();
        assert_eq!(
            *state.blur_region().unwrap(),
            vec![Rectangle::new(Point::from((0, 5)), Size::from((10, 5)))]
        );
    }
}
