//! Nova shaderpack viewer
//!
//! Opens a window and renders a shaderpack with the Vulkan backend.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p nova-viewer -- [SHADERPACK]
//! ```
//!
//! `SHADERPACK` is a shaderpack directory or zip file. Without it the viewer
//! loads `cache.loaded_shaderpack` from the settings.
//!
//! Settings are read from `nova.json` in the working directory when it
//! exists; every field is optional.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use nova_core::settings::GraphicsApi;
use nova_core::NovaSettings;
use nova_renderer::NovaRenderer;
use nova_vulkan::VulkanRenderDevice;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

const SETTINGS_FILE: &str = "nova.json";

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        eprintln!("USAGE:\n    nova-viewer [SHADERPACK]\n\nSettings are read from {SETTINGS_FILE} when present.");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings(Path::new(SETTINGS_FILE))?;
    if settings.api != GraphicsApi::Vulkan {
        bail!("{:?} is not supported, only Vulkan is", settings.api);
    }
    let shaderpack = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(&settings.cache.loaded_shaderpack), PathBuf::from);

    info!("{} starting...", settings.window.title);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut viewer = Viewer {
        settings,
        shaderpack,
        state: None,
    };
    event_loop.run_app(&mut viewer)?;
    Ok(())
}

fn load_settings(path: &Path) -> anyhow::Result<NovaSettings> {
    if !path.exists() {
        return Ok(NovaSettings::default());
    }
    NovaSettings::from_json_file(path).with_context(|| format!("Failed to read {}", path.display()))
}

struct Viewer {
    settings: NovaSettings,
    shaderpack: PathBuf,
    state: Option<ViewerState>,
}

/// The renderer is declared first so the device goes before its window.
struct ViewerState {
    renderer: NovaRenderer<VulkanRenderDevice>,
    window: Arc<Window>,
}

impl Viewer {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<ViewerState> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.settings.window.title)
            .with_inner_size(PhysicalSize::new(self.settings.window.width, self.settings.window.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let device = VulkanRenderDevice::new(window.as_ref(), &self.settings)?;
        let mut renderer = NovaRenderer::new(device, self.settings.clone())?;
        renderer
            .load_shaderpack(&self.shaderpack)
            .with_context(|| format!("Failed to load shaderpack {}", self.shaderpack.display()))?;

        Ok(ViewerState { renderer, window })
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Viewer ready");
            }
            Err(e) => {
                error!("Failed to initialize the viewer: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    if let Err(e) = state.renderer.shutdown() {
                        error!("Shutdown error: {e}");
                    }
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.renderer.execute_frame() {
                        error!("Render error: {e}");
                    }
                }
            }
            WindowEvent::Resized(size) => {
                // The swapchain keeps its creation size
                info!("Window resized to {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}
