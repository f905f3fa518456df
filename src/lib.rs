/// lib.rs - 背景特效子系统的库根模块
/// 模糊（blur）、透视（xray）、饱和度与噪点，作用于半透明窗口和层表面之下

/// 启用 tracing 宏的全局引入，用于日志
#[macro_use]
extern crate tracing;

/// 客户端协议请求处理（ext-background-effect、KDE blur）
pub mod handlers;

/// 层表面规则与已映射层表面
pub mod layer;

/// 合成器状态与每帧渲染
pub mod niri;

/// 渲染辅助：缓冲区、模糊、快照、实时特效、渲染实例
pub mod render_helpers;

/// 实用工具：坐标对齐、唯一 ID、区域转换
pub mod utils;

/// 窗口规则与已映射窗口
pub mod window;

#[cfg(test)]
mod tests;
