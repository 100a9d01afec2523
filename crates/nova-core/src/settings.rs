//! Renderer settings.
//!
//! Settings are plain data with defaults for every field, so a settings file
//! only needs to name what it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_IN_FLIGHT_FRAMES;
use crate::error::Result;

/// Graphics API the renderer should drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphicsApi {
    #[default]
    Vulkan,
    D3D12,
    NvGl4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderdocOptions {
    pub enabled: bool,
    pub renderdoc_dll_path: PathBuf,
    /// Where RenderDoc writes captures
    pub capture_path: PathBuf,
}

impl Default for RenderdocOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            renderdoc_dll_path: PathBuf::new(),
            capture_path: PathBuf::from("logs/captures"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    pub enabled: bool,
    pub enable_validation_layers: bool,
    /// Abort on the first validation error instead of logging it
    pub break_on_validation_errors: bool,
    pub enable_gpu_based_validation: bool,
    pub renderdoc: RenderdocOptions,
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            enable_validation_layers: cfg!(debug_assertions),
            break_on_validation_errors: true,
            enable_gpu_based_validation: false,
            renderdoc: RenderdocOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Shaderpack to load at startup
    pub loaded_shaderpack: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            loaded_shaderpack: "DefaultShaderpack".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "Nova Renderer".to_string(),
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanOptions {
    pub application_name: String,
    pub application_version: Version,
}

impl Default for VulkanOptions {
    fn default() -> Self {
        Self {
            application_name: "Nova Renderer".to_string(),
            application_version: Version {
                major: 0,
                minor: 8,
                patch: 4,
            },
        }
    }
}

/// Limits for a growable block allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockAllocatorSettings {
    /// Upper bound on the memory this allocator may ever hold
    pub max_total_allocation: u64,
    /// Size of each new backing buffer
    pub new_buffer_size: u64,
    /// Granularity of sub-allocations
    pub buffer_part_size: u64,
}

impl Default for BlockAllocatorSettings {
    fn default() -> Self {
        Self {
            max_total_allocation: 1024 * 1024 * 1024,
            new_buffer_size: 16 * 1024 * 1024,
            buffer_part_size: 16 * 1024,
        }
    }
}

/// Sizes of the renderer's global memory pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryOptions {
    /// Device-local memory for static and procedural mesh buffers
    pub mesh_memory_size: u64,
    /// Host-visible memory for staging buffers
    pub staging_memory_size: u64,
    /// Number of model matrices the builtin model matrix buffer holds
    pub max_model_matrices: u64,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            mesh_memory_size: 512_000_000,
            staging_memory_size: 64 * 1024 * 1024,
            max_model_matrices: 0xFFFF,
        }
    }
}

/// All renderer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NovaSettings {
    pub debug: DebugOptions,
    pub cache: CacheOptions,
    pub window: WindowOptions,
    pub vulkan: VulkanOptions,
    pub api: GraphicsApi,
    /// How many frames the CPU may record before waiting on the GPU
    pub max_in_flight_frames: u32,
    pub vertex_memory_settings: BlockAllocatorSettings,
    pub index_memory_settings: BlockAllocatorSettings,
    pub memory: MemoryOptions,
}

impl Default for NovaSettings {
    fn default() -> Self {
        Self {
            debug: DebugOptions::default(),
            cache: CacheOptions::default(),
            window: WindowOptions::default(),
            vulkan: VulkanOptions::default(),
            api: GraphicsApi::default(),
            max_in_flight_frames: DEFAULT_IN_FLIGHT_FRAMES,
            vertex_memory_settings: BlockAllocatorSettings::default(),
            index_memory_settings: BlockAllocatorSettings::default(),
            memory: MemoryOptions::default(),
        }
    }
}

impl NovaSettings {
    /// Create settings with the given window title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut settings = Self::default();
        settings.window.title = title.into();
        settings
    }

    /// Parse settings from a JSON string. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Self::from_json_str(&text)
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Set the number of in-flight frames. Zero is clamped to one.
    #[must_use]
    pub fn with_in_flight_frames(mut self, frames: u32) -> Self {
        self.max_in_flight_frames = frames.max(1);
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.debug.enable_validation_layers = validation;
        self
    }

    /// Set the shaderpack loaded at startup.
    #[must_use]
    pub fn with_shaderpack(mut self, name: impl Into<String>) -> Self {
        self.cache.loaded_shaderpack = name.into();
        self
    }

    /// Set the graphics API.
    #[must_use]
    pub fn with_api(mut self, api: GraphicsApi) -> Self {
        self.api = api;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let settings = NovaSettings::default();
        assert_eq!(settings.max_in_flight_frames, 3);
        assert_eq!(settings.cache.loaded_shaderpack, "DefaultShaderpack");
        assert_eq!(settings.window.title, "Nova Renderer");
        assert!(settings.debug.break_on_validation_errors);
        assert_eq!(
            settings.debug.renderdoc.capture_path,
            PathBuf::from("logs/captures")
        );
        assert_eq!(settings.vulkan.application_version.minor, 8);
        assert_eq!(
            settings.vertex_memory_settings.max_total_allocation,
            1 << 30
        );
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = NovaSettings::from_json_str(
            r#"{ "window": { "width": 1280 }, "max_in_flight_frames": 2 }"#,
        )
        .unwrap();

        assert_eq!(settings.window.width, 1280);
        assert_eq!(settings.window.height, 480);
        assert_eq!(settings.max_in_flight_frames, 2);
        assert_eq!(settings.api, GraphicsApi::Vulkan);
    }

    #[test]
    fn reads_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cache": {{ "loaded_shaderpack": "Sildurs" }} }}"#).unwrap();

        let settings = NovaSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.cache.loaded_shaderpack, "Sildurs");
    }

    #[test]
    fn builder() {
        let settings = NovaSettings::new("Viewer")
            .with_size(800, 600)
            .with_in_flight_frames(0)
            .with_shaderpack("Test");

        assert_eq!(settings.window.title, "Viewer");
        assert_eq!(settings.window.width, 800);
        assert_eq!(settings.max_in_flight_frames, 1);
        assert_eq!(settings.cache.loaded_shaderpack, "Test");
    }
}
