//! Renderpasses provided by the renderer or the host application rather than
//! the shaderpack.

use std::sync::Arc;

use nova_core::constants::{BACKBUFFER_NAME, UI_RENDER_PASS_NAME};
use nova_core::shaderpack::{PixelFormat, RenderPassCreateInfo, TextureAttachmentInfo};
use nova_rhi::CommandList;
use parking_lot::Mutex;

use crate::frame::FrameContext;
use crate::render_graph::Renderpass;

/// A pass recorded by code instead of by shaderpack pipelines.
pub trait BuiltinRenderpass<L: CommandList>: Send {
    /// What the pass reads and writes. Reported as pass metadata, and the
    /// renderer builds the pass's renderpass from it.
    fn create_info(&self) -> RenderPassCreateInfo;

    /// Record the pass. Runs after every shaderpack pass, inside the pass's
    /// renderpass.
    fn render(&mut self, cmds: &mut L, ctx: &FrameContext);
}

/// The default UI pass: draws on top of the backbuffer without clearing it,
/// and records nothing until an application replaces it.
#[derive(Debug, Default)]
pub struct NullUiRenderpass;

impl<L: CommandList> BuiltinRenderpass<L> for NullUiRenderpass {
    fn create_info(&self) -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            name: UI_RENDER_PASS_NAME.to_string(),
            texture_inputs: vec![BACKBUFFER_NAME.to_string()],
            texture_outputs: vec![TextureAttachmentInfo::new(BACKBUFFER_NAME, PixelFormat::Rgba8, false)],
            ..RenderPassCreateInfo::default()
        }
    }

    fn render(&mut self, _cmds: &mut L, _ctx: &FrameContext) {}
}

pub type SharedBuiltin<L> = Arc<Mutex<Box<dyn BuiltinRenderpass<L>>>>;

/// Registered builtin passes, in registration order.
pub struct BuiltinRegistry<L: CommandList> {
    passes: Mutex<Vec<(String, SharedBuiltin<L>)>>,
}

impl<L: CommandList> Default for BuiltinRegistry<L> {
    fn default() -> Self {
        Self {
            passes: Mutex::new(Vec::new()),
        }
    }
}

impl<L: CommandList> BuiltinRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass under `name`, replacing any pass already registered
    /// under it.
    pub fn register(&self, name: impl Into<String>, pass: Box<dyn BuiltinRenderpass<L>>) {
        let name = name.into();
        let pass = Arc::new(Mutex::new(pass));

        let mut passes = self.passes.lock();
        if let Some(existing) = passes.iter_mut().find(|(existing, _)| *existing == name) {
            tracing::debug!("Replacing builtin renderpass {name}");
            existing.1 = pass;
        } else {
            tracing::debug!("Registered builtin renderpass {name}");
            passes.push((name, pass));
        }
    }

    pub fn get(&self, name: &str) -> Option<SharedBuiltin<L>> {
        self.passes
            .lock()
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, pass)| Arc::clone(pass))
    }

    pub fn names(&self) -> Vec<String> {
        self.passes.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Render the registered pass behind each of `renderpasses`, in order,
    /// inside its renderpass. The registry lock is only held while the passes
    /// are looked up.
    pub fn render(&self, renderpasses: &[&Renderpass], cmds: &mut L, ctx: &FrameContext) {
        let passes: Vec<_> = {
            let registered = self.passes.lock();
            renderpasses
                .iter()
                .filter_map(|renderpass| {
                    registered
                        .iter()
                        .find(|(existing, _)| *existing == renderpass.name)
                        .map(|(_, pass)| (*renderpass, Arc::clone(pass)))
                })
                .collect()
        };

        for (renderpass, pass) in passes {
            cmds.begin_renderpass(renderpass.renderpass, renderpass.framebuffer);
            pass.lock().render(cmds, ctx);
            cmds.end_renderpass();
        }
    }
}
