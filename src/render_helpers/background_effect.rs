//! 表面背景特效的选项解析与渲染参数。
//!
//! [`BackgroundEffect`] 把规则中的 `background-effect {}` 与全局 `blur {}` 合成最终选项，
//! 并决定每帧走哪条路径：xray（采样缓存的背景快照）或 live（实时捕获下方内容）。

use std::sync::Arc;

use niri_config::CornerRadius;
use smithay::utils::{Logical, Physical, Point, Rectangle, Scale};

use super::blur::BlurOptions;
use super::clipped_surface::ClipShape;
use super::damage::ExtraDamage;
use super::effect::EffectParams;
use crate::utils::to_physical_rect;

#[derive(Debug)]
pub struct BackgroundEffect {
    /// Damage when options change.
    damage: ExtraDamage,
    /// Corner radius for clipping, kept to damage when it changes.
    corner_radius: CornerRadius,
    blur_config: niri_config::Blur,
    options: Options,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Options {
    pub blur: bool,
    pub xray: bool,
    pub noise: Option<f64>,
    pub saturation: Option<f64>,
}

/// How a background effect is rendered this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectMode {
    /// No visible effect.
    Disabled,
    /// Samples the cached background snapshot of the output.
    Xray,
    /// Captures and transforms the content beneath every frame.
    Live,
}

impl Options {
    fn is_visible(&self) -> bool {
        self.xray
            || self.blur
            || self.noise.is_some_and(|x| x > 0.)
            || self.saturation.is_some_and(|x| x != 1.)
    }
}

/// Render-time parameters of one effect instance.
#[derive(Debug, Clone)]
pub struct RenderParams {
    /// Geometry of the background effect in output-local coordinates.
    pub geometry: Rectangle<f64, Logical>,
    /// Effect subregion, clipped to `geometry`.
    pub subregion: Option<EffectSubregion>,
    /// Position of `geometry` relative to the backdrop.
    pub pos_in_backdrop: Point<f64, Logical>,
    /// Geometry and radius for clipping, in the same coordinate space as `geometry`.
    pub clip: Option<(Rectangle<f64, Logical>, CornerRadius)>,
    /// Zoom factor between backdrop coordinates and geometry.
    pub zoom: f64,
    /// Output scale, for rounding to physical pixels.
    pub scale: f64,
}

#[derive(Debug, Clone)]
pub struct EffectSubregion {
    /// Non-overlapping rects in surface-local coordinates.
    pub rects: Arc<Vec<Rectangle<i32, Logical>>>,
    /// Scale to apply to each rect.
    pub scale: Scale<f64>,
    /// Translation to apply to each rect after scaling.
    pub offset: Point<f64, Logical>,
}

impl EffectSubregion {
    /// Returns the top-left and bottom-right corners of the transformed rects.
    ///
    /// Working on extremities keeps adjacent rects adjacent: their shared edge goes through
    /// exactly the same float operations.
    pub fn iter(&self) -> impl Iterator<Item = (Point<f64, Logical>, Point<f64, Logical>)> + '_ {
        self.rects.iter().map(|r| {
            let r = r.to_f64();
            let a = r.loc.upscale(self.scale) + self.offset;
            let b = (r.loc + r.size.to_point()).upscale(self.scale) + self.offset;
            (a, b)
        })
    }

    /// Physical rects covered by the subregion within `crop`.
    pub fn to_physical(
        &self,
        crop: Rectangle<f64, Logical>,
        scale: f64,
    ) -> Vec<Rectangle<i32, Physical>> {
        let crop_b = crop.loc + crop.size.to_point();

        self.iter()
            .filter_map(|(a, b)| {
                let a = Point::<f64, Logical>::new(
                    f64::max(a.x, crop.loc.x),
                    f64::max(a.y, crop.loc.y),
                );
                let b = Point::<f64, Logical>::new(
                    f64::min(b.x, crop_b.x),
                    f64::min(b.y, crop_b.y),
                );
                if b.x <= a.x || b.y <= a.y {
                    return None;
                }

                let a: Point<i32, Physical> = a.to_physical_precise_round(scale);
                let b: Point<i32, Physical> = b.to_physical_precise_round(scale);
                let r = Rectangle::from_extremities(a, b);
                (!r.is_empty()).then_some(r)
            })
            .collect()
    }
}

impl RenderParams {
    /// Geometry rounded to physical pixels.
    pub fn physical_geometry(&self) -> Rectangle<i32, Physical> {
        to_physical_rect(self.geometry, self.scale)
    }

    pub fn clip_shape(&self) -> ClipShape {
        let (geometry, corner_radius) = self
            .clip
            .unwrap_or((self.geometry, CornerRadius::default()));

        let subregion = self
            .subregion
            .as_ref()
            .map(|subregion| subregion.to_physical(self.geometry, self.scale));

        ClipShape {
            geometry,
            corner_radius,
            scale: self.scale,
            subregion,
        }
    }

    /// Maps an output-local logical point inside `geometry` into the backdrop.
    pub fn to_backdrop(&self, point: Point<f64, Logical>) -> Point<f64, Logical> {
        self.pos_in_backdrop + (point - self.geometry.loc).upscale(self.zoom)
    }
}

impl Default for BackgroundEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundEffect {
    pub fn new() -> Self {
        Self {
            damage: ExtraDamage::new(),
            corner_radius: CornerRadius::default(),
            blur_config: niri_config::Blur::default(),
            options: Options::default(),
        }
    }

    pub fn update_config(&mut self, config: niri_config::Blur) {
        if self.blur_config == config {
            return;
        }

        self.blur_config = config;
        self.damage.damage_all();
    }

    /// Resolves options from the rule and whether the client asked for a blur region.
    ///
    /// Returns whether anything changed.
    pub fn update_render_elements(
        &mut self,
        corner_radius: CornerRadius,
        effect: niri_config::BackgroundEffect,
        has_blur_region: bool,
    ) -> bool {
        // A client blur region turns blur on unless a rule turns it off.
        let blur = if has_blur_region {
            effect.blur != Some(false)
        } else {
            effect.blur == Some(true)
        };

        let mut options = Options {
            blur,
            xray: effect.xray == Some(true),
            noise: effect.noise,
            saturation: effect.saturation,
        };

        // Any visible effect defaults to xray unless set explicitly.
        if options.is_visible() && effect.xray.is_none() {
            options.xray = true;
        }

        if self.options == options && self.corner_radius == corner_radius {
            return false;
        }

        trace!("background effect options changed: {options:?}");
        self.options = options;
        self.corner_radius = corner_radius;
        self.damage.damage_all();
        true
    }

    pub fn is_visible(&self) -> bool {
        self.options.is_visible()
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn damage(&self) -> ExtraDamage {
        self.damage
    }

    pub fn mode(&self) -> EffectMode {
        if !self.is_visible() {
            EffectMode::Disabled
        } else if self.options.xray {
            EffectMode::Xray
        } else {
            EffectMode::Live
        }
    }

    /// Final transform parameters.
    ///
    /// Noise and saturation fall back to the global blur values when blurring, and to no
    /// effect otherwise.
    pub fn effect_params(&self) -> EffectParams {
        let blur = self.options.blur && !self.blur_config.off;

        let noise = if blur { self.blur_config.noise } else { 0. };
        let noise = self.options.noise.unwrap_or(noise) as f32;

        let saturation = if blur {
            self.blur_config.saturation
        } else {
            1.
        };
        let saturation = self.options.saturation.unwrap_or(saturation) as f32;

        EffectParams {
            blur: blur.then(|| BlurOptions::from(self.blur_config)),
            noise,
            saturation,
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;
    use smithay::utils::Size;

    use super::*;

    fn effect(text: &str) -> niri_config::BackgroundEffect {
        serde_json::from_str(text).unwrap()
    }

    fn resolve(text: &str, has_blur_region: bool) -> BackgroundEffect {
        let mut bg = BackgroundEffect::new();
        bg.update_render_elements(CornerRadius::default(), effect(text), has_blur_region);
        bg
    }

    #[test]
    fn blur_defaults_to_xray() {
        let bg = resolve(r#"{ "blur": true }"#, false);
        assert_eq!(bg.mode(), EffectMode::Xray);

        let bg = resolve(r#"{ "blur": true, "xray": false }"#, false);
        assert_eq!(bg.mode(), EffectMode::Live);

        let explicit = resolve(r#"{ "blur": true, "xray": true }"#, false);
        let implicit = resolve(r#"{ "blur": true }"#, false);
        assert_eq!(explicit.options(), implicit.options());
        assert_eq!(explicit.effect_params(), implicit.effect_params());
    }

    #[test]
    fn nothing_set_is_disabled() {
        let bg = resolve("{}", false);
        assert_eq!(bg.mode(), EffectMode::Disabled);

        // Neutral values do not make the effect visible.
        let bg = resolve(r#"{ "noise": 0, "saturation": 1 }"#, false);
        assert_eq!(bg.mode(), EffectMode::Disabled);
    }

    #[test]
    fn client_blur_region_enables_blur() {
        let bg = resolve("{}", true);
        assert!(bg.options().blur);
        assert_eq!(bg.mode(), EffectMode::Xray);

        let bg = resolve(r#"{ "blur": false }"#, true);
        assert_eq!(bg.mode(), EffectMode::Disabled);
    }

    #[test]
    fn params_fall_back_to_blur_config() {
        let bg = resolve(r#"{ "blur": true }"#, false);
        assert_debug_snapshot!(bg.effect_params(), @r"
        EffectParams {
            blur: Some(
                BlurOptions {
                    passes: 3,
                    offset: 3.0,
                },
            ),
            noise: 0.02,
            saturation: 1.5,
        }
        ");

        let bg = resolve(r#"{ "saturation": 0.5 }"#, false);
        assert_debug_snapshot!(bg.effect_params(), @r"
        EffectParams {
            blur: None,
            noise: 0.0,
            saturation: 0.5,
        }
        ");
    }

    #[test]
    fn blur_off_keeps_other_effects() {
        let mut bg = resolve(r#"{ "blur": true, "noise": 0.1 }"#, false);
        bg.update_config(niri_config::Blur {
            off: true,
            ..Default::default()
        });

        let params = bg.effect_params();
        assert_eq!(params.blur, None);
        assert_eq!(params.saturation, 1.);
        assert!((params.noise - 0.1).abs() < 1e-6);
    }

    #[test]
    fn changes_bump_damage() {
        let mut bg = BackgroundEffect::new();
        let commit = bg.damage().commit();

        let effect = effect(r#"{ "blur": true }"#);
        assert!(bg.update_render_elements(CornerRadius::default(), effect, false));
        assert!(!bg.update_render_elements(CornerRadius::default(), effect, false));
        assert!(bg.update_render_elements(CornerRadius::uniform(4.), effect, false));
        assert_eq!(bg.damage().commit(), commit + 2);

        bg.update_config(niri_config::Blur::default());
        assert_eq!(bg.damage().commit(), commit + 2);
    }

    #[test]
    fn adjacent_subregion_rects_stay_adjacent() {
        let subregion = EffectSubregion {
            rects: Arc::new(vec![
                Rectangle::new(Point::from((0, 0)), Size::from((3, 10))),
                Rectangle::new(Point::from((3, 0)), Size::from((4, 10))),
            ]),
            scale: Scale::from(0.7),
            offset: Point::from((0.3, 0.)),
        };

        let crop = Rectangle::new(Point::from((0., 0.)), Size::from((100., 100.)));
        let rects = subregion.to_physical(crop, 1.5);
        assert_eq!(rects.len(), 2);
        assert_eq!(rects[0].loc.x + rects[0].size.w, rects[1].loc.x);
    }

    #[test]
    fn unbounded_subregion_is_cropped() {
        let infinite = Rectangle::new(
            Point::new(-i32::MAX / 2, -i32::MAX / 2),
            Size::new(i32::MAX, i32::MAX),
        );
        let subregion = EffectSubregion {
            rects: Arc::new(vec![infinite]),
            scale: Scale::from(1.),
            offset: Point::from((10., 10.)),
        };

        let crop = Rectangle::new(Point::from((10., 10.)), Size::from((20., 20.)));
        let rects = subregion.to_physical(crop, 2.);
        assert_eq!(
            rects,
            vec![Rectangle::new(Point::from((20, 20)), Size::from((40, 40)))]
        );
    }
}
