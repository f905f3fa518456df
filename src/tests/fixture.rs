use niri_config::Config;
use smithay::utils::{Logical, Point, Rectangle, Size};
use smithay::wayland::shell::wlr_layer::Layer;
use tracing_subscriber::EnvFilter;

use crate::niri::{FrameStats, Niri, OutputId, SurfaceId};
use crate::render_helpers::buffer::{PixelBuffer, SurfaceContent};
use crate::render_helpers::renderer::SoftwareRenderer;
use crate::window::Toplevel;

pub const OUTPUT_SIZE: i32 = 64;

/// One 64 × 64 output at scale 1 and a software renderer.
pub struct Fixture {
    pub niri: Niri,
    pub renderer: SoftwareRenderer,
    pub output: OutputId,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub fn config(text: &str) -> Config {
    serde_json::from_str(text).unwrap()
}

pub fn rect(x: f64, y: f64, w: f64, h: f64) -> Rectangle<f64, Logical> {
    Rectangle::new(Point::from((x, y)), Size::from((w, h)))
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config("{}")
    }

    pub fn with_config(text: &str) -> Self {
        init_tracing();

        let mut niri = Niri::new(config(text));
        let output = niri.add_output(
            String::from("headless-1"),
            Size::from((OUTPUT_SIZE, OUTPUT_SIZE)),
            1.,
        );

        Self {
            niri,
            renderer: SoftwareRenderer::new(),
            output,
        }
    }

    pub fn add_wallpaper(&mut self, color: [f32; 4]) -> SurfaceId {
        let size = f64::from(OUTPUT_SIZE);
        self.add_layer("wallpaper", Layer::Background, rect(0., 0., size, size), color)
    }

    pub fn add_layer(
        &mut self,
        namespace: &str,
        layer: Layer,
        geometry: Rectangle<f64, Logical>,
        color: [f32; 4],
    ) -> SurfaceId {
        self.niri
            .add_layer(
                self.output,
                String::from(namespace),
                layer,
                geometry,
                SurfaceContent::Solid(color),
            )
            .unwrap()
    }

    pub fn add_window(
        &mut self,
        app_id: &str,
        geometry: Rectangle<f64, Logical>,
        color: [f32; 4],
    ) -> SurfaceId {
        let toplevel = Toplevel {
            app_id: Some(String::from(app_id)),
            title: None,
        };
        self.niri
            .add_window(self.output, toplevel, geometry, SurfaceContent::Solid(color))
            .unwrap()
    }

    pub fn render(&mut self) -> (PixelBuffer, FrameStats) {
        self.niri
            .render_output(&mut self.renderer, self.output)
            .unwrap()
    }

    /// Number of background snapshot refreshes so far.
    pub fn generation(&self) -> u64 {
        self.niri.output(self.output).unwrap().xray().generation()
    }
}
