// 文件: layer/mapped.rs
// 作用: 已映射层表面的状态：规则、几何、内容以及背景特效
// Wayland概念: LayerSurface - 分层表面协议，Background/Bottom 两层构成输出的背景

use niri_config::layer_rule::LayerRule;
use smithay::utils::{Logical, Rectangle};
use smithay::wayland::shell::wlr_layer::Layer;

use super::ResolvedLayerRules;
use crate::handlers::BlurRegionState;
use crate::niri::{OutputId, SurfaceId};
use crate::render_helpers::background_effect::BackgroundEffect;
use crate::render_helpers::buffer::SurfaceContent;
use crate::render_helpers::effect_shape::EffectShape;

// 结构体: MappedLayer
// 作用: 表示已配置并准备好渲染的层表面
#[derive(Debug)]
pub struct MappedLayer {
    id: SurfaceId,
    output: OutputId,

    /// Layer-shell namespace, used for rule matching.
    namespace: String,
    layer: Layer,

    /// Up-to-date rules.
    rules: ResolvedLayerRules,

    /// Output-local geometry.
    geometry: Rectangle<f64, Logical>,
    content: SurfaceContent,

    /// Client-requested blur region.
    blur_region: BlurRegionState,
    background_effect: BackgroundEffect,
    effect_shape: EffectShape,
}

impl MappedLayer {
    // 函数: new
    // 作用: 创建新的已映射层表面
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SurfaceId,
        output: OutputId,
        namespace: String,
        layer: Layer,
        rules: ResolvedLayerRules,
        geometry: Rectangle<f64, Logical>,
        content: SurfaceContent,
        blur_config: niri_config::Blur,
    ) -> Self {
        let mut background_effect = BackgroundEffect::new();
        background_effect.update_config(blur_config);

        let mut rv = Self {
            id,
            output,
            namespace,
            layer,
            rules,
            geometry,
            content,
            blur_region: BlurRegionState::new(),
            background_effect,
            effect_shape: EffectShape::default(),
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

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    // 函数: rules
    // 作用: 获取渲染规则引用
    pub fn rules(&self) -> &ResolvedLayerRules {
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

    // 函数: recompute_layer_rules
    // 作用: 重新计算层规则并返回是否改变
    pub fn recompute_layer_rules(&mut self, rules: &[LayerRule], is_at_startup: bool) -> bool {
        let new_rules = ResolvedLayerRules::compute(rules, &self.namespace, is_at_startup);
        if new_rules == self.rules {
            return false;
        }

        self.rules = new_rules;
        self.update_background_effect();
        true
    }

    pub fn update_blur_config(&mut self, config: niri_config::Blur) {
        self.background_effect.update_config(config);
    }

    /// Returns whether the geometry changed.
    pub fn set_geometry(&mut self, geometry: Rectangle<f64, Logical>) -> bool {
        if self.geometry == geometry {
            return false;
        }

        let resized = self.geometry.size != geometry.size;
        self.geometry = geometry;
        if resized {
            self.update_background_effect();
        }
        true
    }

    pub fn set_content(&mut self, content: SurfaceContent) {
        self.content = content;
    }

    // 函数: on_commit
    // 作用: 应用双缓冲的模糊区域，返回特效是否改变
    pub fn on_commit(&mut self) -> bool {
        if self.blur_region.commit() {
            return self.update_background_effect();
        }
        false
    }

    // 函数: place_within_backdrop
    // 作用: 判断是否应放置在概览背景中
    pub fn place_within_backdrop(&self) -> bool {
        if !self.rules.place_within_backdrop {
            return false;
        }

        // 只允许背景层
        self.layer == Layer::Background
    }

    /// Whether the surface is part of the output backdrop that xray samples.
    pub fn is_in_backdrop(&self) -> bool {
        matches!(self.layer, Layer::Background | Layer::Bottom)
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
