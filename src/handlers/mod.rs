//! 作用：客户端协议请求的处理
//! 说明：只涉及背景特效所消费的协议（ext-background-effect 与 KDE blur）

pub mod background_effect;
pub use background_effect::{
    BlurRegionState, Capability, ExtBackgroundEffectHandler, KdeBlurHandler, KdeBlurRegion,
};
