use serde::Deserialize;

use crate::{BackgroundEffect, CornerRadius, RegexEq};

/// 层表面规则：按 namespace 匹配。
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LayerRule {
    #[serde(rename = "match")]
    pub matches: Vec<Match>,
    #[serde(rename = "exclude")]
    pub excludes: Vec<Match>,

    pub opacity: Option<f32>,
    pub geometry_corner_radius: Option<CornerRadius>,
    pub place_within_backdrop: Option<bool>,
    pub background_effect: BackgroundEffect,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Match {
    pub namespace: Option<RegexEq>,
    pub at_startup: Option<bool>,
}
