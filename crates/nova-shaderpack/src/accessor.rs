//! Read access to a shaderpack folder, whether a directory or a zip archive.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, ShaderpackError};
use crate::regular::RegularFolderAccessor;
use crate::zipped::ZipFolderAccessor;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;
/// Magic, version, generator, bound and schema.
pub const SPIRV_HEADER_WORDS: usize = 5;

/// Read-only view of a folder of resources.
///
/// Resource paths are relative to [`FolderAccessor::root`]. Paths returned by
/// [`FolderAccessor::get_all_items_in_folder`] use the same convention, so they
/// can be passed straight back to `read_file`.
pub trait FolderAccessor: Send + Sync {
    /// The directory or archive this accessor reads from.
    fn root(&self) -> &Path;

    fn does_resource_exist(&self, resource_path: &Path) -> bool;

    fn read_file(&self, resource_path: &Path) -> Result<Vec<u8>>;

    /// Immediate children of `folder`, sorted by path.
    fn get_all_items_in_folder(&self, folder: &Path) -> Result<Vec<PathBuf>>;

    fn read_text_file(&self, resource_path: &Path) -> Result<String> {
        let bytes = self.read_file(resource_path)?;
        String::from_utf8(bytes).map_err(|_| ShaderpackError::NotUtf8(resource_path.to_path_buf()))
    }

    /// Read a file of little-endian SPIR-V words. The file must hold at
    /// least a module header.
    fn read_spirv_file(&self, resource_path: &Path) -> Result<Vec<u32>> {
        let bytes = self.read_file(resource_path)?;
        if bytes.len() % 4 != 0 {
            return Err(ShaderpackError::InvalidSpirv {
                path: resource_path.to_path_buf(),
                len: bytes.len(),
            });
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        if words.len() < SPIRV_HEADER_WORDS || words[0] != SPIRV_MAGIC {
            return Err(ShaderpackError::MissingSpirvHeader {
                path: resource_path.to_path_buf(),
            });
        }
        Ok(words)
    }
}

/// Remembers which resources exist so repeated lookups skip the filesystem.
#[derive(Default)]
pub(crate) struct ExistenceCache {
    known: Mutex<HashMap<PathBuf, bool>>,
}

impl ExistenceCache {
    /// Look `path` up, running `check` and caching its answer on a miss.
    pub(crate) fn get_or_check(&self, path: &Path, check: impl FnOnce() -> bool) -> bool {
        if let Some(exists) = self.known.lock().get(path) {
            return *exists;
        }

        let exists = check();
        self.known.lock().insert(path.to_path_buf(), exists);
        exists
    }

    pub(crate) fn mark_missing(&self, path: &Path) {
        self.known.lock().insert(path.to_path_buf(), false);
    }
}

/// Whether every component of `root` starts `path`.
pub fn has_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Whether `path` names a zipped shaderpack, either directly or through a
/// sibling `<path>.zip` when `path` itself does not exist.
pub fn is_zip_folder(path: &Path) -> bool {
    if path.is_file() {
        return path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("zip"));
    }

    !path.exists() && zip_sibling(path).is_file()
}

/// Open the right accessor for `path`.
///
/// Directories are read directly. When `path` is not a directory, a zip
/// archive at `path` or at `<path>.zip` is tried next.
pub fn open_folder(path: &Path) -> Result<Arc<dyn FolderAccessor>> {
    if path.is_dir() {
        tracing::debug!("Opening {} as a directory", path.display());
        return Ok(Arc::new(RegularFolderAccessor::new(path)));
    }

    if is_zip_folder(path) {
        let archive = if path.is_file() {
            path.to_path_buf()
        } else {
            zip_sibling(path)
        };
        tracing::debug!("Opening {} as a zip archive", archive.display());
        return Ok(Arc::new(ZipFolderAccessor::open(&archive)?));
    }

    Err(ShaderpackError::ShaderpackNotFound(path.to_path_buf()))
}

fn zip_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".zip");
    PathBuf::from(name)
}

/// Join the normal components of `path` with `/`, as zip entry names are.
pub(crate) fn to_archive_name(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
