// 文件: layer/mod.rs
// 作用: 定义层表面规则解析逻辑，用于配置层表面的背景特效
// Wayland概念: LayerSurface - 分层表面协议，允许客户端创建在桌面不同层级显示的表面

use niri_config::layer_rule::{LayerRule, Match};
use niri_config::{BackgroundEffect, CornerRadius};

// 子模块声明: mapped
// 作用: 包含已映射层表面的处理逻辑
pub mod mapped;
pub use mapped::MappedLayer;

/// Rules fully resolved for a layer-shell surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedLayerRules {
    /// Extra opacity to draw this layer surface with.
    pub opacity: Option<f32>,

    /// Corner radius to assume this layer surface has.
    pub geometry_corner_radius: Option<CornerRadius>,

    /// Whether to place this layer surface within the overview backdrop.
    pub place_within_backdrop: bool,

    /// Background effect overrides.
    pub background_effect: BackgroundEffect,
}

impl Default for ResolvedLayerRules {
    fn default() -> Self {
        Self::empty()
    }
}

impl ResolvedLayerRules {
    // 函数: empty
    // 作用: 创建空规则集（所有值设为默认状态）
    pub const fn empty() -> Self {
        Self {
            opacity: None,
            geometry_corner_radius: None,
            place_within_backdrop: false,
            background_effect: BackgroundEffect {
                blur: None,
                xray: None,
                noise: None,
                saturation: None,
            },
        }
    }

    // 函数: compute
    // 作用: 根据配置规则集计算层表面的最终规则
    // 参数:
    //   rules - 配置规则列表
    //   namespace - 层表面的命名空间
    //   is_at_startup - 是否在启动阶段
    pub fn compute(rules: &[LayerRule], namespace: &str, is_at_startup: bool) -> Self {
        let _span = tracy_client::span!("ResolvedLayerRules::compute");

        let mut resolved = ResolvedLayerRules::empty();

        for rule in rules {
            let matches = |m: &Match| {
                if let Some(at_startup) = m.at_startup {
                    if at_startup != is_at_startup {
                        return false;
                    }
                }

                surface_matches(namespace, m)
            };

            // 无匹配条件则默认匹配，否则需要至少一个条件匹配
            if !(rule.matches.is_empty() || rule.matches.iter().any(matches)) {
                continue;
            }

            if rule.excludes.iter().any(matches) {
                continue;
            }

            if let Some(x) = rule.opacity {
                resolved.opacity = Some(x);
            }
            if let Some(x) = rule.geometry_corner_radius {
                resolved.geometry_corner_radius = Some(x);
            }
            if let Some(x) = rule.place_within_backdrop {
                resolved.place_within_backdrop = x;
            }

            resolved
                .background_effect
                .merge_with(&rule.background_effect);
        }

        resolved
    }
}

// 函数: surface_matches
// 作用: 检查层表面是否匹配给定条件
fn surface_matches(namespace: &str, m: &Match) -> bool {
    if let Some(namespace_re) = &m.namespace {
        if !namespace_re.0.is_match(namespace) {
            return false;
        }
    }

    true
}
