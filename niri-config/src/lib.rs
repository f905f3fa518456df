//! 背景特效相关的配置类型。
//!
//! 这里只定义配置的数据结构与合并语义（后出现的规则覆盖前面的规则），
//! 配置文件本身的解析由上层负责；所有类型都实现了 `serde::Deserialize`，
//! 因此可以从任意 serde 数据源构造。

#[macro_use]
extern crate tracing;

use regex::Regex;
use serde::{Deserialize, Deserializer};

pub mod layer_rule;

pub use layer_rule::LayerRule;

/// Resolved compositor configuration, as far as background effects are concerned.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Global blur parameters shared by every background effect.
    pub blur: Blur,
    pub overview: Overview,
    pub window_rules: Vec<WindowRule>,
    pub layer_rules: Vec<LayerRule>,
}

impl Config {
    /// Clamps out-of-range values, warning about each one.
    pub fn sanitize(&mut self) {
        let passes = self.blur.passes.clamp(Blur::MIN_PASSES, Blur::MAX_PASSES);
        if passes != self.blur.passes {
            warn!(
                "blur passes {} out of range, clamping to {passes}",
                self.blur.passes
            );
            self.blur.passes = passes;
        }

        if !(self.blur.offset.is_finite() && self.blur.offset >= 0.) {
            warn!("invalid blur offset {}, resetting to default", self.blur.offset);
            self.blur.offset = Blur::default().offset;
        }

        if self.blur.saturation < 0. {
            warn!("negative blur saturation, clamping to 0");
            self.blur.saturation = 0.;
        }
        if self.blur.noise < 0. {
            warn!("negative blur noise, clamping to 0");
            self.blur.noise = 0.;
        }
    }
}

/// 全局 `blur {}` 配置段，适用于所有背景模糊（无论由规则还是客户端触发）。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Blur {
    /// Disables blurring everywhere, leaving noise and saturation alone.
    pub off: bool,
    /// Number of down- and up-sampling passes; more passes blur wider.
    pub passes: u8,
    /// Sample offset of every pass, in pixels of the pass's texture.
    pub offset: f64,
    /// Noise applied on top of the blur unless a rule overrides it.
    pub noise: f64,
    /// Saturation applied on top of the blur unless a rule overrides it.
    pub saturation: f64,
}

impl Blur {
    pub const MIN_PASSES: u8 = 1;
    pub const MAX_PASSES: u8 = 31;
}

impl Default for Blur {
    fn default() -> Self {
        Self {
            off: false,
            passes: 3,
            offset: 3.,
            noise: 0.02,
            saturation: 1.5,
        }
    }
}

/// `background-effect {}` block of a window or layer rule.
#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackgroundEffect {
    pub blur: Option<bool>,
    pub xray: Option<bool>,
    pub noise: Option<f64>,
    pub saturation: Option<f64>,
}

impl BackgroundEffect {
    /// Overrides the fields that `other` sets.
    pub fn merge_with(&mut self, other: &Self) {
        if let Some(x) = other.blur {
            self.blur = Some(x);
        }
        if let Some(x) = other.xray {
            self.xray = Some(x);
        }
        if let Some(x) = other.noise {
            self.noise = Some(x);
        }
        if let Some(x) = other.saturation {
            self.saturation = Some(x);
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Overview {
    /// Color drawn behind everything else on an output.
    pub backdrop_color: Color,
}

/// RGBA color with straight (not premultiplied) alpha, components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new_unpremul(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array_premul(self) -> [f32; 4] {
        let [r, g, b, a] = [self.r, self.g, self.b, self.a];
        [r * a, g * a, b * a, a]
    }
}

impl Default for Color {
    fn default() -> Self {
        // Same gray as the default overview backdrop.
        Self::new_unpremul(0.15, 0.15, 0.15, 1.)
    }
}

/// 圆角半径，四个角可以分别设置。
#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CornerRadius {
    pub top_left: f32,
    pub top_right: f32,
    pub bottom_right: f32,
    pub bottom_left: f32,
}

impl From<CornerRadius> for [f32; 4] {
    fn from(value: CornerRadius) -> Self {
        [
            value.top_left,
            value.top_right,
            value.bottom_right,
            value.bottom_left,
        ]
    }
}

impl CornerRadius {
    pub const fn uniform(radius: f32) -> Self {
        Self {
            top_left: radius,
            top_right: radius,
            bottom_right: radius,
            bottom_left: radius,
        }
    }

    pub fn is_zero(&self) -> bool {
        <[f32; 4]>::from(*self) == [0.; 4]
    }

    /// Scales down the radii so that adjacent corners do not overlap.
    ///
    /// Follows CSS: <https://drafts.csswg.org/css-backgrounds/#corner-overlap>
    pub fn fit_to(self, width: f32, height: f32) -> Self {
        let reduction = f32::min(
            f32::min(
                width / (self.top_left + self.top_right),
                width / (self.bottom_left + self.bottom_right),
            ),
            f32::min(
                height / (self.top_left + self.bottom_left),
                height / (self.top_right + self.bottom_right),
            ),
        );
        // f32::min() skips the NaN coming from 0 / 0.
        let reduction = f32::min(1., reduction);

        self.scaled_by(reduction)
    }

    /// Grows every rounded corner by `width`; square corners stay square.
    pub fn expanded_by(mut self, width: f32) -> Self {
        if self.top_left > 0. {
            self.top_left += width;
        }
        if self.top_right > 0. {
            self.top_right += width;
        }
        if self.bottom_right > 0. {
            self.bottom_right += width;
        }
        if self.bottom_left > 0. {
            self.bottom_left += width;
        }

        self
    }

    pub fn scaled_by(self, scale: f32) -> Self {
        Self {
            top_left: self.top_left * scale,
            top_right: self.top_right * scale,
            bottom_right: self.bottom_right * scale,
            bottom_left: self.bottom_left * scale,
        }
    }
}

/// 窗口规则：匹配条件 + 覆盖项。
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct WindowRule {
    #[serde(rename = "match")]
    pub matches: Vec<Match>,
    #[serde(rename = "exclude")]
    pub excludes: Vec<Match>,

    pub opacity: Option<f32>,
    pub geometry_corner_radius: Option<CornerRadius>,
    pub background_effect: BackgroundEffect,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Match {
    pub app_id: Option<RegexEq>,
    pub title: Option<RegexEq>,
    pub at_startup: Option<bool>,
}

/// `Regex` wrapper comparing by source pattern.
#[derive(Debug, Clone)]
pub struct RegexEq(pub Regex);

impl PartialEq for RegexEq {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Eq for RegexEq {}

impl<'de> Deserialize<'de> for RegexEq {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(&pattern)
            .map(RegexEq)
            .map_err(serde::de::Error::custom)
    }
}
