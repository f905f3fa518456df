// window/mapped.rs
// 此文件实现已映射窗口的状态：规则、几何、内容与背景特效
// 实时（非 xray）特效在打开/关闭动画和平铺窗口交互拖动期间暂停

use niri_config::WindowRule;
use smithay::utils::{Logical, Rectangle};

use super::{ResolvedWindowRules, Toplevel};
use crate::handlers::BlurRegionState;
use crate::niri::{OutputId, SkipReason, SurfaceId};
use crate::render_helpers::background_effect::BackgroundEffect;
use crate::render_helpers::buffer::SurfaceContent;
use crate::render_helpers::effect_shape::EffectShape;

/// 已映射窗口结构体
#[derive(Debug)]
pub struct Mapped {
    /// 窗口的唯一ID
    id: SurfaceId,

    /// 窗口所在的输出
    output: OutputId,

    /// 用于规则匹配的窗口属性
    toplevel: Toplevel,

    /// 当前应用的窗口规则
    rules: ResolvedWindowRules,

    /// 输出坐标系下的窗口几何
    geometry: Rectangle<f64, Logical>,

    /// 窗口提交的内容
    content: SurfaceContent,

    /// 客户端请求的模糊区域
    blur_region: BlurRegionState,

    background_effect: BackgroundEffect,

    /// 背景特效覆盖的形状
    effect_shape: EffectShape,

    /// 是否正在播放打开/关闭动画
    is_animating: bool,

    /// 是否为浮动窗口
    is_floating: bool,

    /// 是否正在被交互拖动
    is_in_interactive_drag: bool,
}

impl Mapped {
    // 创建新的已映射窗口
    pub fn new(
        id: SurfaceId,
        output: OutputId,
        toplevel: Toplevel,
        rules: ResolvedWindowRules,
        geometry: Rectangle<f64, Logical>,
        content: SurfaceContent,
        blur_config: niri_config::Blur,
    ) -> Self {
        let mut background_effect = BackgroundEffect::new();
        background_effect.update_config(blur_config);

        let mut rv = Self {
            id,
            output,
            toplevel,
            rules,
            geometry,
            content,
            blur_region: BlurRegionState::new(),
            background_effect,
            effect_shape: EffectShape::default(),
            is_animating: false,
            is_floating: false,
            is_in_interactive_drag: false,
        };
        rv.update_background_effect();
        rv
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn toplevel(&self) -> &Toplevel {
        &self.toplevel
    }

    pub fn rules(&self) -> &ResolvedWindowRules {
        &self.rules
    }

    pub fn geometry(&self) -> Rectangle<f64, Logical> {
        self.geometry
    }

    pub fn content(&self) -> &SurfaceContent {
        &self.content
    }

    pub fn opacity(&self) -> f32 {
        self.rules.opacity.unwrap_or(1.).clamp(0., 1.)
    }

    pub fn background_effect(&self) -> &BackgroundEffect {
        &self.background_effect
    }

    pub fn effect_shape(&self) -> &EffectShape {
        &self.effect_shape
    }

    pub fn blur_region_mut(&mut self) -> &mut BlurRegionState {
        &mut self.blur_region
    }

    /// 重新计算窗口规则并返回是否更改
    pub fn recompute_window_rules(&mut self, rules: &[WindowRule], is_at_startup: bool) -> bool {
        let new_rules = ResolvedWindowRules::compute(rules, &self.toplevel, is_at_startup);
        if new_rules == self.rules {
            return false; // 无变化
        }

        self.rules = new_rules;
        self.update_background_effect();
        true
    }

    /// 更新标题/应用ID；规则需要调用者重新计算
    pub fn set_toplevel(&mut self, toplevel: Toplevel) -> bool {
        if self.toplevel == toplevel {
            return false;
        }
        self.toplevel = toplevel;
        true
    }

    pub fn update_blur_config(&mut self, config: niri_config::Blur) {
        self.background_effect.update_config(config);
    }

    /// 返回几何是否改变
    pub fn set_geometry(&mut self, geometry: Rectangle<f64, Logical>) -> bool {
        if self.geometry == geometry {
            return false;
        }

        let resized = self.geometry.size != geometry.size;
        self.geometry = geometry;
        // 尺寸变化时圆角需要重新适配
        if resized {
            self.update_background_effect();
        }
        true
    }

    pub fn set_content(&mut self, content: SurfaceContent) {
        self.content = content;
    }

    /// 应用双缓冲状态，返回特效是否改变
    pub fn on_commit(&mut self) -> bool {
        if self.blur_region.commit() {
            return self.update_background_effect();
        }
        false
    }

    pub fn is_floating(&self) -> bool {
        self.is_floating
    }

    pub fn set_floating(&mut self, floating: bool) {
        self.is_floating = floating;
    }

    pub fn set_animating(&mut self, animating: bool) {
        self.is_animating = animating;
    }

    pub fn set_interactive_drag(&mut self, dragging: bool) {
        self.is_in_interactive_drag = dragging;
    }

    /// 实时特效此帧无法正确合成的原因
    pub fn live_effect_suppressed(&self) -> Option<SkipReason> {
        if self.is_animating {
            return Some(SkipReason::Animating);
        }

        // 浮动窗口拖动时下方内容保持不变
        if self.is_in_interactive_drag && !self.is_floating {
            return Some(SkipReason::InteractiveDrag);
        }

        None
    }

    fn update_background_effect(&mut self) -> bool {
        self.effect_shape = EffectShape::resolve(
            self.geometry.size,
            self.rules.geometry_corner_radius,
            self.blur_region.blur_region(),
        );
        self.background_effect.update_render_elements(
            self.effect_shape.corner_radius,
            self.rules.background_effect,
            self.effect_shape.has_client_region(),
        )
    }
}

#[cfg(test)]
mod tests {
    use niri_config::{BackgroundEffect as EffectRule, CornerRadius};
    use smithay::utils::{Point, Size};

    use super::*;
    use crate::render_helpers::background_effect::EffectMode;

    fn mapped(rules: ResolvedWindowRules) -> Mapped {
        Mapped::new(
            SurfaceId::next(),
            OutputId::next(),
            Toplevel::default(),
            rules,
            Rectangle::new(Point::from((10., 10.)), Size::from((40., 40.))),
            SurfaceContent::Solid([0., 0., 0., 0.5]),
            niri_config::Blur::default(),
        )
    }

    #[test]
    fn live_effect_suppression() {
        let mut window = mapped(ResolvedWindowRules::empty());
        assert_eq!(window.live_effect_suppressed(), None);

        window.set_animating(true);
        assert_eq!(window.live_effect_suppressed(), Some(SkipReason::Animating));
        window.set_animating(false);

        window.set_interactive_drag(true);
        assert_eq!(
            window.live_effect_suppressed(),
            Some(SkipReason::InteractiveDrag)
        );

        window.set_floating(true);
        assert_eq!(window.live_effect_suppressed(), None);
    }

    #[test]
    fn resize_refits_corner_radius() {
        let rules = ResolvedWindowRules {
            geometry_corner_radius: Some(CornerRadius::uniform(15.)),
            background_effect: EffectRule {
                blur: Some(true),
                ..Default::default()
            },
            ..ResolvedWindowRules::empty()
        };
        let mut window = mapped(rules);
        assert_eq!(window.background_effect().mode(), EffectMode::Xray);
        assert_eq!(window.effect_shape().corner_radius, CornerRadius::uniform(16.));

        let damage = window.background_effect().damage();
        assert!(window.set_geometry(Rectangle::new(
            Point::from((10., 10.)),
            Size::from((16., 40.))
        )));
        assert_eq!(window.effect_shape().corner_radius, CornerRadius::uniform(8.));
        assert_ne!(window.background_effect().damage(), damage);

        // Moving alone keeps the shape.
        let damage = window.background_effect().damage();
        assert!(window.set_geometry(Rectangle::new(
            Point::from((0., 0.)),
            Size::from((16., 40.))
        )));
        assert_eq!(window.background_effect().damage(), damage);
    }
}
