// 文件: render_helpers/effect_shape.rs
// 作用: 计算表面背景特效覆盖的形状
// 优先级: 客户端通过协议提交的模糊区域 > 规则中的 geometry-corner-radius > 无圆角的矩形
// 纯函数，不做任何渲染工作

use std::sync::Arc;

use niri_config::CornerRadius;
use smithay::utils::{Logical, Point, Rectangle, Scale, Size};

use super::background_effect::{EffectSubregion, RenderParams};

/// Region a surface's background effect covers, in surface-local coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectShape {
    pub size: Size<f64, Logical>,
    /// Corner radius, already fitted to `size`.
    pub corner_radius: CornerRadius,
    /// Client-requested region as non-overlapping rects.
    pub rects: Option<Arc<Vec<Rectangle<i32, Logical>>>>,
}

impl EffectShape {
    /// Resolves the shape from the rule corner radius and the client region.
    pub fn resolve(
        size: Size<f64, Logical>,
        rule_radius: Option<CornerRadius>,
        client_rects: Option<Arc<Vec<Rectangle<i32, Logical>>>>,
    ) -> Self {
        // A client region carries its own corner shape.
        let corner_radius = match (&client_rects, rule_radius) {
            (Some(_), _) | (None, None) => CornerRadius::default(),
            (None, Some(radius)) => radius
                // Avoid a sliver of bleed on rounded corners.
                .expanded_by(1.)
                .fit_to(size.w as f32, size.h as f32),
        };

        Self {
            size,
            corner_radius,
            rects: client_rects,
        }
    }

    pub fn has_client_region(&self) -> bool {
        self.rects.is_some()
    }

    /// Places the shape on an output.
    ///
    /// `location` is where the surface is drawn and `zoom` how much it is scaled down
    /// (1 normally, less than 1 in the overview); `pos_in_backdrop` is where the surface sits
    /// in the unzoomed backdrop.
    pub fn place(
        &self,
        location: Point<f64, Logical>,
        zoom: f64,
        pos_in_backdrop: Point<f64, Logical>,
        scale: f64,
    ) -> RenderParams {
        let geometry = Rectangle::new(location, self.size.upscale(zoom));

        let subregion = self.rects.clone().map(|rects| EffectSubregion {
            rects,
            scale: Scale::from(zoom),
            offset: location,
        });

        RenderParams {
            geometry,
            subregion,
            pos_in_backdrop,
            clip: Some((geometry, self.corner_radius.scaled_by(zoom as f32))),
            zoom: 1. / zoom,
            scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rects() -> Option<Arc<Vec<Rectangle<i32, Logical>>>> {
        Some(Arc::new(vec![Rectangle::new(
            Point::from((0, 0)),
            Size::from((50, 20)),
        )]))
    }

    #[test]
    fn client_region_wins_over_rule_radius() {
        let size = Size::from((100., 100.));
        let shape = EffectShape::resolve(size, Some(CornerRadius::uniform(12.)), rects());
        assert!(shape.corner_radius.is_zero());
        assert!(shape.has_client_region());
    }

    #[test]
    fn rule_radius_is_expanded_and_fitted() {
        let shape = EffectShape::resolve(
            Size::from((100., 100.)),
            Some(CornerRadius::uniform(12.)),
            None,
        );
        assert_eq!(shape.corner_radius, CornerRadius::uniform(13.));

        let shape = EffectShape::resolve(
            Size::from((16., 100.)),
            Some(CornerRadius::uniform(15.)),
            None,
        );
        assert_eq!(shape.corner_radius, CornerRadius::uniform(8.));

        // Square corners stay square.
        let radius = CornerRadius {
            top_left: 4.,
            ..Default::default()
        };
        let shape = EffectShape::resolve(Size::from((100., 100.)), Some(radius), None);
        assert_eq!(shape.corner_radius.top_left, 5.);
        assert_eq!(shape.corner_radius.bottom_right, 0.);
    }

    #[test]
    fn no_radius_no_region_is_plain_rectangle() {
        let shape = EffectShape::resolve(Size::from((10., 10.)), None, None);
        assert_eq!(
            shape,
            EffectShape {
                size: Size::from((10., 10.)),
                corner_radius: CornerRadius::default(),
                rects: None,
            }
        );
    }

    #[test]
    fn place_scales_with_zoom() {
        let shape = EffectShape::resolve(
            Size::from((100., 60.)),
            Some(CornerRadius::uniform(9.)),
            None,
        );
        let params = shape.place(
            Point::from((10., 20.)),
            0.5,
            Point::from((200., 100.)),
            1.,
        );

        assert_eq!(params.geometry.size, Size::from((50., 30.)));
        assert_eq!(params.zoom, 2.);
        let (clip, radius) = params.clip.unwrap();
        assert_eq!(clip, params.geometry);
        assert_eq!(radius, CornerRadius::uniform(5.));
    }
}
