//! 合成器状态：输出、表面注册表、渲染实例，以及每帧的背景特效渲染。
//!
//! 每个输出的每一帧：
//!   1. 按渲染顺序遍历渲染实例；
//!   2. xray 特效从输出共享的背景快照采样（快照过期时先刷新一次）；
//!   3. 实时特效捕获此前已画好的帧内容，变换后裁剪画回；
//!   4. 最后画出表面本身。
//!
//! 特效失败只会让该表面本帧没有特效，唯一致命的错误是分配输出帧本身失败。

use std::collections::{HashMap, HashSet};

use anyhow::Context as _;
use niri_config::{Color, Config};
use smithay::utils::{Logical, Physical, Point, Rectangle, Size};
use smithay::wayland::shell::wlr_layer::Layer;

use crate::handlers::BlurRegionState;
use crate::layer::{MappedLayer, ResolvedLayerRules};
use crate::render_helpers::background_effect::{BackgroundEffect, EffectMode};
use crate::render_helpers::buffer::{PixelBuffer, SurfaceContent};
use crate::render_helpers::damage::{BackdropChange, BackdropDamage};
use crate::render_helpers::effect_shape::EffectShape;
use crate::render_helpers::instances::{InstanceContext, InstanceId, RenderInstances};
use crate::render_helpers::renderer::{EffectRenderer, RenderError};
use crate::render_helpers::xray::{
    covered_by_opaque_workspace, render_xray, Backdrop, BackdropSurface, WorkspaceBackground,
    Xray,
};
use crate::utils::id::unique_id;
use crate::utils::to_physical_rect;
use crate::window::{Mapped, ResolvedWindowRules, Toplevel};

unique_id! {
    /// Handle of a window or layer surface in the registry.
    pub struct SurfaceId;
}

unique_id! {
    pub struct OutputId;
}

#[derive(Debug)]
pub struct OutputState {
    name: String,
    size: Size<i32, Physical>,
    scale: f64,
    backdrop_color: Color,
    /// Background snapshot for xray effects.
    xray: Xray,
    damage: BackdropDamage,
    /// Instances drawn on this output, back to front.
    render_order: Vec<InstanceId>,
    /// Workspace backgrounds shown in the overview, empty outside of it.
    workspaces: Vec<WorkspaceBackground>,
    /// Last effect damage commit reported for each surface.
    effect_commits: HashMap<SurfaceId, u64>,
}

#[derive(Debug)]
pub enum Surface {
    Window(Mapped),
    Layer(MappedLayer),
}

/// Why an effect was not drawn this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Open or close animation in progress.
    Animating,
    /// Tiled window being dragged.
    InteractiveDrag,
    /// Buffer allocation failed.
    OutOfResources,
    /// Submitted work did not complete in time.
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedEffect {
    pub surface: SurfaceId,
    pub instance: InstanceId,
    pub reason: SkipReason,
}

/// What happened while rendering one frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameStats {
    /// Whether the background snapshot was recomputed.
    pub snapshot_refreshed: bool,
    pub xray_effects: usize,
    pub live_effects: usize,
    pub skipped: Vec<SkippedEffect>,
    /// Surfaces whose effect area must be redrawn because its options or shape changed.
    pub damaged_effects: Vec<SurfaceId>,
}

#[derive(Debug)]
pub struct Niri {
    config: Config,
    outputs: HashMap<OutputId, OutputState>,
    surfaces: HashMap<SurfaceId, Surface>,
    instances: RenderInstances,
    is_at_startup: bool,
}

impl OutputState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> Size<i32, Physical> {
        self.size
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn xray(&self) -> &Xray {
        &self.xray
    }

    pub fn damage(&self) -> &BackdropDamage {
        &self.damage
    }

    pub fn render_order(&self) -> &[InstanceId] {
        &self.render_order
    }

    pub fn workspaces(&self) -> &[WorkspaceBackground] {
        &self.workspaces
    }
}

impl Surface {
    pub fn id(&self) -> SurfaceId {
        match self {
            Surface::Window(mapped) => mapped.id(),
            Surface::Layer(layer) => layer.id(),
        }
    }

    pub fn output(&self) -> OutputId {
        match self {
            Surface::Window(mapped) => mapped.output(),
            Surface::Layer(layer) => layer.output(),
        }
    }

    pub fn geometry(&self) -> Rectangle<f64, Logical> {
        match self {
            Surface::Window(mapped) => mapped.geometry(),
            Surface::Layer(layer) => layer.geometry(),
        }
    }

    pub fn content(&self) -> &SurfaceContent {
        match self {
            Surface::Window(mapped) => mapped.content(),
            Surface::Layer(layer) => layer.content(),
        }
    }

    pub fn opacity(&self) -> f32 {
        match self {
            Surface::Window(mapped) => mapped.opacity(),
            Surface::Layer(layer) => layer.opacity(),
        }
    }

    pub fn background_effect(&self) -> &BackgroundEffect {
        match self {
            Surface::Window(mapped) => mapped.background_effect(),
            Surface::Layer(layer) => layer.background_effect(),
        }
    }

    pub fn effect_shape(&self) -> &EffectShape {
        match self {
            Surface::Window(mapped) => mapped.effect_shape(),
            Surface::Layer(layer) => layer.effect_shape(),
        }
    }

    /// Whether xray samples this surface as part of the backdrop.
    pub fn is_in_backdrop(&self) -> bool {
        match self {
            Surface::Window(_) => false,
            Surface::Layer(layer) => layer.is_in_backdrop(),
        }
    }

    fn live_effect_suppressed(&self) -> Option<SkipReason> {
        match self {
            Surface::Window(mapped) => mapped.live_effect_suppressed(),
            Surface::Layer(_) => None,
        }
    }

    fn blur_region_mut(&mut self) -> &mut BlurRegionState {
        match self {
            Surface::Window(mapped) => mapped.blur_region_mut(),
            Surface::Layer(layer) => layer.blur_region_mut(),
        }
    }

    fn set_geometry(&mut self, geometry: Rectangle<f64, Logical>) -> bool {
        match self {
            Surface::Window(mapped) => mapped.set_geometry(geometry),
            Surface::Layer(layer) => layer.set_geometry(geometry),
        }
    }

    fn update_config(&mut self, config: &Config, is_at_startup: bool) -> bool {
        match self {
            Surface::Window(mapped) => {
                mapped.update_blur_config(config.blur);
                mapped.recompute_window_rules(&config.window_rules, is_at_startup)
            }
            Surface::Layer(layer) => {
                layer.update_blur_config(config.blur);
                layer.recompute_layer_rules(&config.layer_rules, is_at_startup)
            }
        }
    }
}

impl Niri {
    pub fn new(mut config: Config) -> Self {
        config.sanitize();

        Self {
            config,
            outputs: HashMap::new(),
            surfaces: HashMap::new(),
            instances: RenderInstances::new(),
            is_at_startup: true,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output(&self, output: OutputId) -> Option<&OutputState> {
        self.outputs.get(&output)
    }

    pub fn surface(&self, surface: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&surface)
    }

    pub fn instances(&self) -> &RenderInstances {
        &self.instances
    }

    pub fn add_output(&mut self, name: String, size: Size<i32, Physical>, scale: f64) -> OutputId {
        let id = OutputId::next();
        debug!("adding output {name} ({id:?}), {} × {} @ {scale}", size.w, size.h);

        let state = OutputState {
            name,
            size,
            scale,
            backdrop_color: self.config.overview.backdrop_color,
            xray: Xray::new(),
            damage: BackdropDamage::new(),
            render_order: Vec::new(),
            workspaces: Vec::new(),
            effect_commits: HashMap::new(),
        };
        self.outputs.insert(id, state);
        id
    }

    /// Removes the output along with every surface on it.
    pub fn remove_output(&mut self, output: OutputId) {
        let Some(state) = self.outputs.remove(&output) else {
            return;
        };
        debug!("removing output {}", state.name);

        let surfaces: Vec<_> = self
            .surfaces
            .values()
            .filter(|surface| surface.output() == output)
            .map(Surface::id)
            .collect();
        for id in surfaces {
            self.surfaces.remove(&id);
            self.instances.remove_surface(id);
        }
    }

    pub fn resize_output(&mut self, output: OutputId, size: Size<i32, Physical>, scale: f64) {
        let Some(state) = self.outputs.get_mut(&output) else {
            return;
        };
        if state.size == size && state.scale == scale {
            return;
        }

        state.size = size;
        state.scale = scale;
        state.damage.mark(BackdropChange::OUTPUT_RESIZED);
    }

    pub fn set_backdrop_color(&mut self, output: OutputId, color: Color) {
        let Some(state) = self.outputs.get_mut(&output) else {
            return;
        };
        if state.backdrop_color == color {
            return;
        }

        state.backdrop_color = color;
        state.damage.mark(BackdropChange::BACKDROP_COLOR);
    }

    /// Sets the workspace backgrounds of the overview; pass an empty list when it closes.
    ///
    /// These are drawn on top of the snapshot, so they never invalidate it.
    pub fn set_workspace_backgrounds(
        &mut self,
        output: OutputId,
        workspaces: Vec<WorkspaceBackground>,
    ) {
        if let Some(state) = self.outputs.get_mut(&output) {
            state.workspaces = workspaces;
        }
    }

    /// Maps a window and shows it at its own place on the output.
    pub fn add_window(
        &mut self,
        output: OutputId,
        toplevel: Toplevel,
        geometry: Rectangle<f64, Logical>,
        content: SurfaceContent,
    ) -> anyhow::Result<SurfaceId> {
        anyhow::ensure!(
            self.outputs.contains_key(&output),
            "unknown output {output:?}"
        );

        let rules =
            ResolvedWindowRules::compute(&self.config.window_rules, &toplevel, self.is_at_startup);
        let id = SurfaceId::next();
        let mapped = Mapped::new(
            id,
            output,
            toplevel,
            rules,
            geometry,
            content,
            self.config.blur,
        );
        self.surfaces.insert(id, Surface::Window(mapped));
        self.add_instance(id, InstanceContext::Normal, geometry.loc, 1.)?;
        Ok(id)
    }

    /// Maps a layer-shell surface and shows it at its own place on the output.
    pub fn add_layer(
        &mut self,
        output: OutputId,
        namespace: String,
        layer: Layer,
        geometry: Rectangle<f64, Logical>,
        content: SurfaceContent,
    ) -> anyhow::Result<SurfaceId> {
        let state = self
            .outputs
            .get_mut(&output)
            .with_context(|| format!("unknown output {output:?}"))?;

        let rules =
            ResolvedLayerRules::compute(&self.config.layer_rules, &namespace, self.is_at_startup);
        let id = SurfaceId::next();
        let mapped = MappedLayer::new(
            id,
            output,
            namespace,
            layer,
            rules,
            geometry,
            content,
            self.config.blur,
        );
        if mapped.is_in_backdrop() {
            state.damage.mark(BackdropChange::LAYER_MAPPED);
        }

        self.surfaces.insert(id, Surface::Layer(mapped));
        self.add_instance(id, InstanceContext::Normal, geometry.loc, 1.)?;
        Ok(id)
    }

    /// Unmaps a surface, dropping all of its instances and their effect buffers.
    pub fn remove_surface(&mut self, surface: SurfaceId) {
        let Some(removed) = self.surfaces.remove(&surface) else {
            return;
        };

        let ids = self.instances.remove_surface(surface);
        if let Some(state) = self.outputs.get_mut(&removed.output()) {
            state.render_order.retain(|id| !ids.contains(id));
            if removed.is_in_backdrop() {
                state.damage.mark(BackdropChange::LAYER_UNMAPPED);
            }
        }
    }

    pub fn set_geometry(&mut self, surface: SurfaceId, geometry: Rectangle<f64, Logical>) {
        let Some(s) = self.surfaces.get_mut(&surface) else {
            return;
        };
        if !s.set_geometry(geometry) {
            return;
        }

        if s.is_in_backdrop() {
            if let Some(state) = self.outputs.get_mut(&s.output()) {
                state.damage.mark(BackdropChange::LAYER_GEOMETRY);
            }
        }

        // Normal instances follow the surface.
        for id in self.instances.instances_of(surface) {
            if let Some(instance) = self.instances.get_mut(id) {
                if instance.context == InstanceContext::Normal {
                    instance.location = geometry.loc;
                }
            }
        }
        self.pin_to_backdrop(surface);
    }

    /// Applies a surface commit: new content if any, and the pending blur region.
    pub fn surface_committed(&mut self, surface: SurfaceId, content: Option<SurfaceContent>) {
        let Some(s) = self.surfaces.get_mut(&surface) else {
            return;
        };

        let changed = match s {
            Surface::Window(mapped) => {
                if let Some(content) = content.clone() {
                    mapped.set_content(content);
                }
                mapped.on_commit()
            }
            Surface::Layer(layer) => {
                if let Some(content) = content.clone() {
                    layer.set_content(content);
                }
                layer.on_commit()
            }
        };
        if changed {
            trace!("background effect of {surface:?} changed on commit");
        }

        if content.is_some() && s.is_in_backdrop() {
            if let Some(state) = self.outputs.get_mut(&s.output()) {
                state.damage.mark(BackdropChange::LAYER_COMMIT);
            }
        }
    }

    pub fn set_animating(&mut self, surface: SurfaceId, animating: bool) {
        if let Some(Surface::Window(mapped)) = self.surfaces.get_mut(&surface) {
            mapped.set_animating(animating);
        }
    }

    pub fn set_interactive_drag(&mut self, surface: SurfaceId, dragging: bool) {
        if let Some(Surface::Window(mapped)) = self.surfaces.get_mut(&surface) {
            mapped.set_interactive_drag(dragging);
        }
    }

    pub fn set_floating(&mut self, surface: SurfaceId, floating: bool) {
        if let Some(Surface::Window(mapped)) = self.surfaces.get_mut(&surface) {
            mapped.set_floating(floating);
        }
    }

    pub fn set_toplevel(&mut self, surface: SurfaceId, toplevel: Toplevel) {
        if let Some(Surface::Window(mapped)) = self.surfaces.get_mut(&surface) {
            if mapped.set_toplevel(toplevel) {
                mapped.recompute_window_rules(&self.config.window_rules, self.is_at_startup);
            }
        }
    }

    /// Ends the startup period, re-evaluating `at-startup` rule matchers.
    pub fn finish_startup(&mut self) {
        if !self.is_at_startup {
            return;
        }
        self.is_at_startup = false;
        self.recompute_rules();
    }

    pub fn reload_config(&mut self, mut config: Config) {
        let _span = tracy_client::span!("Niri::reload_config");

        config.sanitize();
        let blur_changed = self.config.blur != config.blur;
        let backdrop_changed =
            self.config.overview.backdrop_color != config.overview.backdrop_color;
        self.config = config;

        for state in self.outputs.values_mut() {
            // The cached blur was computed with the old options.
            if blur_changed {
                state.damage.mark(BackdropChange::CONFIG);
            }
            if backdrop_changed {
                state.backdrop_color = self.config.overview.backdrop_color;
                state.damage.mark(BackdropChange::BACKDROP_COLOR);
            }
        }

        self.recompute_rules();
    }

    fn recompute_rules(&mut self) {
        let mut changed_layers = Vec::new();
        for surface in self.surfaces.values_mut() {
            let changed = surface.update_config(&self.config, self.is_at_startup);
            if !changed {
                continue;
            }

            if let Surface::Layer(layer) = surface {
                changed_layers.push(layer.id());
            }

            // Opacity rules change how the backdrop is drawn.
            if surface.is_in_backdrop() {
                if let Some(state) = self.outputs.get_mut(&surface.output()) {
                    state.damage.mark(BackdropChange::CONFIG);
                }
            }
        }

        for id in changed_layers {
            self.pin_to_backdrop(id);
        }
    }

    /// Shows another occurrence of `surface`, drawn last on its output.
    pub fn add_instance(
        &mut self,
        surface: SurfaceId,
        context: InstanceContext,
        location: Point<f64, Logical>,
        zoom: f64,
    ) -> anyhow::Result<InstanceId> {
        let s = self
            .surfaces
            .get(&surface)
            .with_context(|| format!("unknown surface {surface:?}"))?;
        let state = self
            .outputs
            .get_mut(&s.output())
            .context("surface output is gone")?;

        let id = self.instances.add(surface, context, location, zoom);
        state.render_order.push(id);
        self.pin_to_backdrop(surface);
        Ok(id)
    }

    pub fn remove_instance(&mut self, instance: InstanceId) {
        let Some(removed) = self.instances.remove(instance) else {
            return;
        };

        let output = self.surfaces.get(&removed.surface).map(Surface::output);
        if let Some(state) = output.and_then(|output| self.outputs.get_mut(&output)) {
            state.render_order.retain(|id| *id != instance);
        }
    }

    pub fn set_instance_placement(
        &mut self,
        instance: InstanceId,
        location: Point<f64, Logical>,
        zoom: f64,
    ) {
        let Some(instance) = self.instances.get_mut(instance) else {
            return;
        };
        instance.location = location;
        instance.zoom = zoom;

        let surface = instance.surface;
        self.pin_to_backdrop(surface);
    }

    /// Keeps every instance of a `place-within-backdrop` layer at its spot in the unzoomed
    /// backdrop, the overview included.
    fn pin_to_backdrop(&mut self, surface: SurfaceId) {
        let Some(Surface::Layer(layer)) = self.surfaces.get(&surface) else {
            return;
        };
        if !layer.place_within_backdrop() {
            return;
        }

        let location = layer.geometry().loc;
        for id in self.instances.instances_of(surface) {
            if let Some(instance) = self.instances.get_mut(id) {
                instance.location = location;
                instance.zoom = 1.;
            }
        }
    }

    /// Replaces the back-to-front drawing order of an output.
    pub fn set_render_order(&mut self, output: OutputId, order: Vec<InstanceId>) {
        let Some(state) = self.outputs.get_mut(&output) else {
            return;
        };

        debug_assert!(order.iter().all(|id| {
            self.instances
                .get(*id)
                .and_then(|instance| self.surfaces.get(&instance.surface))
                .is_some_and(|surface| surface.output() == output)
        }));

        state.render_order = order;
    }

    pub fn blur_region_mut(&mut self, surface: SurfaceId) -> Option<&mut BlurRegionState> {
        self.surfaces.get_mut(&surface).map(Surface::blur_region_mut)
    }

    /// Renders one frame of `output`.
    pub fn render_output<R: EffectRenderer>(
        &mut self,
        renderer: &mut R,
        output: OutputId,
    ) -> anyhow::Result<(PixelBuffer, FrameStats)> {
        let _span = tracy_client::span!("Niri::render_output");

        let Self {
            outputs,
            surfaces,
            instances,
            ..
        } = self;
        let surfaces = &*surfaces;

        let state = outputs
            .get_mut(&output)
            .with_context(|| format!("unknown output {output:?}"))?;
        let size = state.size;
        let scale = state.scale;
        let backdrop_color = state.backdrop_color.to_array_premul();

        let mut frame = renderer
            .create_buffer(size)
            .context("error allocating output frame")?;
        frame.fill(backdrop_color);

        let mut stats = FrameStats::default();
        let generation = state.xray.generation();
        let mut snapshot_failed = false;
        let mut seen = HashSet::new();

        for &instance_id in &state.render_order {
            let Some(instance) = instances.get(instance_id).copied() else {
                continue;
            };
            let Some(surface) = surfaces.get(&instance.surface) else {
                continue;
            };

            let geometry = surface.geometry();
            let effect = surface.background_effect();

            if seen.insert(instance.surface) {
                let commit = effect.damage().commit();
                if state.effect_commits.insert(instance.surface, commit) != Some(commit) {
                    stats.damaged_effects.push(instance.surface);
                }
            }

            let params = surface.effect_shape().place(
                instance.location,
                instance.zoom,
                geometry.loc,
                scale,
            );
            let skip = |reason| SkippedEffect {
                surface: instance.surface,
                instance: instance_id,
                reason,
            };

            match effect.mode() {
                EffectMode::Disabled => (),
                EffectMode::Xray
                    if covered_by_opaque_workspace(&state.workspaces, params.geometry) =>
                {
                    // Nothing of the backdrop shows through.
                    let effect_params = effect.effect_params();
                    render_xray(&mut frame, None, &state.workspaces, &params, &effect_params);
                    stats.xray_effects += 1;
                }
                EffectMode::Xray if snapshot_failed => {
                    stats.skipped.push(skip(SkipReason::OutOfResources));
                }
                EffectMode::Xray => {
                    let effect_params = effect.effect_params();
                    let res = state.xray.get_or_refresh(
                        renderer,
                        &mut state.damage,
                        || collect_backdrop(surfaces, output, size, scale, backdrop_color),
                        effect_params.blur,
                    );
                    match res {
                        Ok(snapshot) => {
                            render_xray(
                                &mut frame,
                                Some(&*snapshot),
                                &state.workspaces,
                                &params,
                                &effect_params,
                            );
                            stats.xray_effects += 1;
                        }
                        Err(err) => {
                            warn!("error refreshing background snapshot: {err:?}");
                            snapshot_failed = true;
                            stats.skipped.push(skip(SkipReason::OutOfResources));
                        }
                    }
                }
                EffectMode::Live => {
                    if let Some(reason) = surface.live_effect_suppressed() {
                        stats.skipped.push(skip(reason));
                    } else {
                        let effect_params = effect.effect_params();
                        let fx = instances.effect_mut(instance.surface, instance_id);
                        let res = fx
                            .capture(renderer, &frame, &params, &effect_params)
                            .map(|()| fx.draw(&mut frame, &params));
                        match res {
                            Ok(Ok(())) => stats.live_effects += 1,
                            Ok(Err(RenderError::NotReady)) => {
                                trace!("live effect of {instance_id:?} not ready, skipping");
                                stats.skipped.push(skip(SkipReason::NotReady));
                            }
                            Ok(Err(err)) => {
                                warn!("error drawing live background effect: {err}");
                                stats.skipped.push(skip(SkipReason::OutOfResources));
                            }
                            Err(err) => {
                                warn!("error rendering live background effect: {err:?}");
                                stats.skipped.push(skip(SkipReason::OutOfResources));
                            }
                        }
                    }
                }
            }

            let rect = Rectangle::new(instance.location, geometry.size.upscale(instance.zoom));
            frame.draw_content(
                surface.content(),
                to_physical_rect(rect, scale),
                surface.opacity(),
            );
        }

        // Xray and disabled effects keep no per-instance buffers.
        for surface in surfaces.values() {
            if surface.output() == output && surface.background_effect().mode() != EffectMode::Live
            {
                instances.release_effects(surface.id());
            }
        }
        instances.debug_assert_no_aliasing();
        state
            .effect_commits
            .retain(|id, _| surfaces.get(id).is_some_and(|s| s.output() == output));

        stats.snapshot_refreshed = state.xray.generation() != generation;
        Ok((frame, stats))
    }
}

/// Backdrop of `output`: its color and the Background/Bottom layer surfaces, back to front.
fn collect_backdrop(
    surfaces: &HashMap<SurfaceId, Surface>,
    output: OutputId,
    size: Size<i32, Physical>,
    scale: f64,
    color: [f32; 4],
) -> Backdrop<'_> {
    let mut layers: Vec<_> = surfaces
        .values()
        .filter_map(|surface| match surface {
            Surface::Layer(layer) if layer.output() == output && layer.is_in_backdrop() => {
                Some(layer)
            }
            _ => None,
        })
        .collect();
    layers.sort_by_key(|layer| (layer.layer() != Layer::Background, layer.id()));

    let surfaces = layers
        .into_iter()
        .map(|layer| BackdropSurface {
            rect: to_physical_rect(layer.geometry(), scale),
            content: layer.content(),
            alpha: layer.opacity(),
        })
        .collect();

    Backdrop {
        size,
        scale,
        color,
        surfaces,
    }
}
