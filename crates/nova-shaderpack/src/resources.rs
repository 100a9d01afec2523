//! Resource lookup across an ordered list of roots.

use std::path::Path;
use std::sync::Arc;

use nova_core::shaderpack::PixelFormat;

use crate::accessor::{open_folder, FolderAccessor};
use crate::error::{Result, ShaderpackError};

/// Decoded pixels of an image resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

/// Finds resources in the first root that has them.
#[derive(Default)]
pub struct ResourceManager {
    roots: Vec<Arc<dyn FolderAccessor>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory or zip archive as the lowest-priority root.
    ///
    /// Adding a root that is already present does nothing.
    pub fn add_root(&mut self, path: &Path) -> Result<()> {
        if self.roots.iter().any(|root| root.root() == path) {
            return Ok(());
        }

        let accessor = open_folder(path)?;
        self.add_accessor(accessor);
        Ok(())
    }

    pub fn add_accessor(&mut self, accessor: Arc<dyn FolderAccessor>) {
        if self.roots.iter().any(|root| root.root() == accessor.root()) {
            return;
        }
        tracing::debug!("Adding resource root {}", accessor.root().display());
        self.roots.push(accessor);
    }

    /// Returns whether a root was removed.
    pub fn remove_root(&mut self, path: &Path) -> bool {
        let before = self.roots.len();
        self.roots.retain(|root| root.root() != path);
        self.roots.len() != before
    }

    pub fn clear_roots(&mut self) {
        self.roots.clear();
    }

    pub fn roots(&self) -> impl Iterator<Item = &Path> + '_ {
        self.roots.iter().map(|root| root.root())
    }

    fn find_root(&self, resource_path: &Path) -> Result<&Arc<dyn FolderAccessor>> {
        self.roots
            .iter()
            .find(|root| root.does_resource_exist(resource_path))
            .ok_or_else(|| ShaderpackError::MissingFile(resource_path.to_path_buf()))
    }

    pub fn read_file(&self, resource_path: &Path) -> Result<Vec<u8>> {
        self.find_root(resource_path)?.read_file(resource_path)
    }

    pub fn read_text_file(&self, resource_path: &Path) -> Result<String> {
        self.find_root(resource_path)?.read_text_file(resource_path)
    }

    /// Decode an image resource into RGBA8 pixels.
    pub fn load_image(&self, resource_path: &Path) -> Result<ImageData> {
        let bytes = self.read_file(resource_path)?;
        let image = image::load_from_memory(&bytes)?.to_rgba8();

        Ok(ImageData {
            width: image.width(),
            height: image.height(),
            pixel_format: PixelFormat::Rgba8,
            data: image.into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn earlier_roots_win() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("a.txt"), "first").unwrap();
        std::fs::write(second.path().join("a.txt"), "second").unwrap();
        std::fs::write(second.path().join("b.txt"), "only second").unwrap();

        let mut manager = ResourceManager::new();
        manager.add_root(first.path()).unwrap();
        manager.add_root(second.path()).unwrap();
        manager.add_root(first.path()).unwrap();

        assert_eq!(manager.roots().count(), 2);
        assert_eq!(manager.read_text_file(Path::new("a.txt")).unwrap(), "first");
        assert_eq!(manager.read_text_file(Path::new("b.txt")).unwrap(), "only second");

        assert!(manager.remove_root(first.path()));
        assert_eq!(manager.read_text_file(Path::new("a.txt")).unwrap(), "second");

        manager.clear_roots();
        assert!(matches!(
            manager.read_file(Path::new("a.txt")),
            Err(ShaderpackError::MissingFile(_))
        ));
    }

    #[test]
    fn images_decode_to_rgba8() {
        let dir = tempfile::tempdir().unwrap();
        let image = image::RgbImage::from_pixel(2, 1, image::Rgb([255, 0, 0]));
        image.save(dir.path().join("red.png")).unwrap();

        let mut manager = ResourceManager::new();
        manager.add_root(dir.path()).unwrap();
        let data = manager.load_image(Path::new("red.png")).unwrap();

        assert_eq!((data.width, data.height), (2, 1));
        assert_eq!(data.pixel_format, PixelFormat::Rgba8);
        assert_eq!(data.data, vec![255, 0, 0, 255, 255, 0, 0, 255]);
    }
}
