//! 渲染实例协调。
//!
//! 一个逻辑表面可以同时出现多次（例如概览中每个工作区各画一份）。
//! 非 xray 特效的缓冲区存放在以 `(SurfaceId, InstanceId)` 为键的表中，
//! 每个实例一份，互不共享；实例只通过 `SurfaceId` 引用表面，不拥有它。

use std::collections::{HashMap, HashSet};

use smithay::utils::{Logical, Point};

use super::framebuffer_effect::FramebufferEffect;
use crate::niri::SurfaceId;
use crate::utils::id::unique_id;

unique_id! {
    pub struct InstanceId;
}

/// Where an instance is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceContext {
    /// The surface at its own place on the output.
    Normal,
    /// A clone shown for one workspace of the overview.
    Overview { workspace: usize },
}

/// A drawable occurrence of a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderInstance {
    pub id: InstanceId,
    pub surface: SurfaceId,
    pub context: InstanceContext,
    /// Output-local location the surface is drawn at.
    pub location: Point<f64, Logical>,
    /// Scale the surface is drawn with, 1 outside the overview.
    pub zoom: f64,
}

#[derive(Debug, Default)]
pub struct RenderInstances {
    instances: HashMap<InstanceId, RenderInstance>,
    /// Live effect buffers, one per (surface, instance).
    effects: HashMap<(SurfaceId, InstanceId), FramebufferEffect>,
}

impl RenderInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        surface: SurfaceId,
        context: InstanceContext,
        location: Point<f64, Logical>,
        zoom: f64,
    ) -> InstanceId {
        let id = InstanceId::next();
        let instance = RenderInstance {
            id,
            surface,
            context,
            location,
            zoom,
        };
        trace!("adding render instance {instance:?}");
        self.instances.insert(id, instance);
        id
    }

    pub fn get(&self, id: InstanceId) -> Option<&RenderInstance> {
        self.instances.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut RenderInstance> {
        self.instances.get_mut(&id)
    }

    /// Removes an instance along with its effect buffer.
    pub fn remove(&mut self, id: InstanceId) -> Option<RenderInstance> {
        let instance = self.instances.remove(&id)?;
        self.effects.remove(&(instance.surface, id));
        Some(instance)
    }

    /// Removes every instance of `surface`, returning their ids.
    pub fn remove_surface(&mut self, surface: SurfaceId) -> Vec<InstanceId> {
        let ids = self.instances_of(surface);
        for id in &ids {
            self.instances.remove(id);
        }
        self.effects.retain(|(s, _), _| *s != surface);
        ids
    }

    /// Instances of `surface`, oldest first.
    pub fn instances_of(&self, surface: SurfaceId) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self
            .instances
            .values()
            .filter(|instance| instance.surface == surface)
            .map(|instance| instance.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Live effect buffer of an instance, created on first use.
    pub fn effect_mut(&mut self, surface: SurfaceId, instance: InstanceId) -> &mut FramebufferEffect {
        debug_assert_eq!(
            self.instances.get(&instance).map(|i| i.surface),
            Some(surface),
            "instance does not belong to the surface"
        );

        self.effects.entry((surface, instance)).or_insert_with(|| {
            trace!("creating live effect buffer for {surface:?} {instance:?}");
            FramebufferEffect::new()
        })
    }

    pub fn effect(&self, surface: SurfaceId, instance: InstanceId) -> Option<&FramebufferEffect> {
        self.effects.get(&(surface, instance))
    }

    /// Drops the live effect buffers of `surface`, returning how many there were.
    pub fn release_effects(&mut self, surface: SurfaceId) -> usize {
        let before = self.effects.len();
        self.effects.retain(|(s, _), _| *s != surface);
        let released = before - self.effects.len();
        if released > 0 {
            debug!("released {released} live effect buffers of {surface:?}");
        }
        released
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Checks that no two live effects share buffer storage.
    pub fn debug_assert_no_aliasing(&self) {
        if !cfg!(debug_assertions) {
            return;
        }

        let mut seen = HashSet::new();
        for (key, effect) in &self.effects {
            if let Some(ptr) = effect.buffer_ptr() {
                debug_assert!(seen.insert(ptr), "live effect buffer of {key:?} is shared");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use niri_config::CornerRadius;
    use smithay::utils::Size;

    use super::*;
    use crate::render_helpers::buffer::PixelBuffer;
    use crate::render_helpers::effect::EffectParams;
    use crate::render_helpers::effect_shape::EffectShape;
    use crate::render_helpers::renderer::SoftwareRenderer;

    #[test]
    fn each_instance_gets_its_own_buffer() {
        let mut instances = RenderInstances::new();
        let surface = SurfaceId::next();
        let a = instances.add(surface, InstanceContext::Normal, Point::from((0., 0.)), 1.);
        let b = instances.add(
            surface,
            InstanceContext::Overview { workspace: 1 },
            Point::from((8., 8.)),
            0.5,
        );

        let mut renderer = SoftwareRenderer::new();
        let frame = PixelBuffer::from_color(Size::from((16, 16)), [0.5, 0.5, 0.5, 1.]);
        let shape = EffectShape::resolve(Size::from((8., 8.)), Some(CornerRadius::default()), None);
        let effect = EffectParams {
            blur: None,
            noise: 0.1,
            saturation: 1.,
        };

        for id in [a, b] {
            let instance = *instances.get(id).unwrap();
            let params = shape.place(instance.location, instance.zoom, Point::from((0., 0.)), 1.);
            instances
                .effect_mut(surface, id)
                .capture(&mut renderer, &frame, &params, &effect)
                .unwrap();
        }

        let ptr_a = instances.effect(surface, a).unwrap().buffer_ptr().unwrap();
        let ptr_b = instances.effect(surface, b).unwrap().buffer_ptr().unwrap();
        assert_ne!(ptr_a, ptr_b);
        assert_ne!(
            instances.effect(surface, a).unwrap().id(),
            instances.effect(surface, b).unwrap().id()
        );
        instances.debug_assert_no_aliasing();
    }

    #[test]
    fn removal_drops_buffers() {
        let mut instances = RenderInstances::new();
        let surface = SurfaceId::next();
        let other = SurfaceId::next();

        let a = instances.add(surface, InstanceContext::Normal, Point::from((0., 0.)), 1.);
        let b = instances.add(
            surface,
            InstanceContext::Overview { workspace: 0 },
            Point::from((0., 0.)),
            0.5,
        );
        let c = instances.add(other, InstanceContext::Normal, Point::from((0., 0.)), 1.);
        instances.effect_mut(surface, a);
        instances.effect_mut(surface, b);
        instances.effect_mut(other, c);
        assert_eq!(instances.effect_count(), 3);
        assert_eq!(instances.instances_of(surface), vec![a, b]);

        instances.remove(a);
        assert!(instances.effect(surface, a).is_none());
        assert_eq!(instances.effect_count(), 2);

        assert_eq!(instances.release_effects(surface), 1);
        assert_eq!(instances.instances_of(surface), vec![b]);

        assert_eq!(instances.remove_surface(other), vec![c]);
        assert_eq!(instances.effect_count(), 0);
        assert!(instances.get(c).is_none());
    }
}
