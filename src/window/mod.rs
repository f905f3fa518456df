// window/mod.rs
// 此文件定义窗口规则的解析：把配置中的窗口规则按顺序匹配并合并成最终结果
// 只保留背景特效需要的部分（不透明度、圆角、background-effect）

use niri_config::{BackgroundEffect, CornerRadius, Match, WindowRule};

// 子模块：已映射窗口
pub mod mapped;
pub use mapped::Mapped; // 导出已映射窗口结构体

/// 规则匹配所用的窗口属性
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Toplevel {
    pub app_id: Option<String>,
    pub title: Option<String>,
}

/// 已解析的窗口规则集合
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedWindowRules {
    /// 窗口不透明度
    pub opacity: Option<f32>,

    /// 窗口圆角半径
    pub geometry_corner_radius: Option<CornerRadius>,

    /// 背景特效（各规则逐字段合并）
    pub background_effect: BackgroundEffect,
}

impl Default for ResolvedWindowRules {
    fn default() -> Self {
        Self::empty()
    }
}

impl ResolvedWindowRules {
    /// 创建空规则集合
    pub const fn empty() -> Self {
        Self {
            opacity: None,
            geometry_corner_radius: None,
            background_effect: BackgroundEffect {
                blur: None,
                xray: None,
                noise: None,
                saturation: None,
            },
        }
    }

    /// 计算窗口应用的规则
    /// 参数:
    ///   rules - 所有可用规则列表
    ///   toplevel - 目标窗口属性
    ///   is_at_startup - 是否在启动阶段
    pub fn compute(rules: &[WindowRule], toplevel: &Toplevel, is_at_startup: bool) -> Self {
        let _span = tracy_client::span!("ResolvedWindowRules::compute"); // 性能分析

        let mut resolved = ResolvedWindowRules::empty();

        for rule in rules {
            let matches = |m: &Match| {
                // 检查启动条件
                if let Some(at_startup) = m.at_startup {
                    if at_startup != is_at_startup {
                        return false;
                    }
                }

                window_matches(toplevel, m)
            };

            // 规则适用条件：匹配任意条件（或无条件）且不被排除
            if !(rule.matches.is_empty() || rule.matches.iter().any(matches)) {
                continue;
            }

            if rule.excludes.iter().any(matches) {
                continue;
            }

            // 后出现的规则覆盖前面的
            if let Some(x) = rule.opacity {
                resolved.opacity = Some(x);
            }
            if let Some(x) = rule.geometry_corner_radius {
                resolved.geometry_corner_radius = Some(x);
            }

            resolved
                .background_effect
                .merge_with(&rule.background_effect);
        }

        resolved
    }
}

/// 检查窗口是否匹配规则条件
fn window_matches(toplevel: &Toplevel, m: &Match) -> bool {
    // 检查应用ID正则匹配
    if let Some(app_id_re) = &m.app_id {
        let Some(app_id) = &toplevel.app_id else {
            return false; // 无应用ID则不匹配
        };
        if !app_id_re.0.is_match(app_id) {
            return false;
        }
    }

    // 检查标题正则匹配
    if let Some(title_re) = &m.title {
        let Some(title) = &toplevel.title else {
            return false;
        };
        if !title_re.0.is_match(title) {
            return false;
        }
    }

    true
}
