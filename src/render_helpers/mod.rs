//! 作用：背景特效的渲染辅助模块
//! 说明：软件渲染器、像素缓冲区，以及 blur / xray / 实时特效的各个组成部分
//! 数据流：
//!   - 表面规则与客户端区域 → effect_shape / background_effect 解析出形状和参数
//!   - xray 路径从每个输出共享的背景快照中采样
//!   - 实时路径从当前帧捕获，由 instances 按渲染实例分别保存缓冲区

pub mod background_effect; // 每个表面的特效状态与渲染参数
pub mod blur; // Dual Kawase 模糊
pub mod buffer; // 像素缓冲区
pub mod clipped_surface; // 圆角/子区域裁剪
pub mod damage; // 快照失效跟踪
pub mod effect; // 饱和度、噪点与裁剪绘制
pub mod effect_shape; // 特效形状解析
pub mod framebuffer_effect; // 实时（非 xray）特效
pub mod instances; // 渲染实例与其特效缓冲区
pub mod renderer; // 渲染器抽象与软件实现
pub mod xray; // 背景快照
