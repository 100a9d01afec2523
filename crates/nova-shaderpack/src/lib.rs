//! Shaderpack loading for the Nova renderer.
//!
//! This crate provides:
//! - Folder accessors over plain directories and zip archives
//! - A resource manager that searches an ordered list of roots
//! - The loader that turns a shaderpack's JSON files and SPIR-V into `ShaderpackData`

pub mod accessor;
pub mod error;
pub mod loader;
pub mod regular;
pub mod resources;
pub mod zipped;

pub use accessor::{has_root, is_zip_folder, open_folder, FolderAccessor, SPIRV_HEADER_WORDS, SPIRV_MAGIC};
pub use error::{Result, ShaderpackError};
pub use loader::{fill_in_render_target_formats, load_shaderpack_data, load_shaderpack_from};
pub use regular::RegularFolderAccessor;
pub use resources::{ImageData, ResourceManager};
pub use zipped::ZipFolderAccessor;
