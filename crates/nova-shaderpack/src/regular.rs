//! Folder accessor for a plain directory.

use std::path::{Path, PathBuf};

use crate::accessor::{has_root, ExistenceCache, FolderAccessor};
use crate::error::{Result, ShaderpackError};

pub struct RegularFolderAccessor {
    root: PathBuf,
    existence: ExistenceCache,
}

impl RegularFolderAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            existence: ExistenceCache::default(),
        }
    }

    /// Resource paths that already start at the root are used as-is.
    fn full_path(&self, resource_path: &Path) -> PathBuf {
        if has_root(resource_path, &self.root) {
            resource_path.to_path_buf()
        } else {
            self.root.join(resource_path)
        }
    }
}

impl FolderAccessor for RegularFolderAccessor {
    fn root(&self) -> &Path {
        &self.root
    }

    fn does_resource_exist(&self, resource_path: &Path) -> bool {
        let full_path = self.full_path(resource_path);
        self.existence.get_or_check(&full_path, || full_path.exists())
    }

    fn read_file(&self, resource_path: &Path) -> Result<Vec<u8>> {
        let full_path = self.full_path(resource_path);
        if !self.does_resource_exist(resource_path) {
            tracing::error!("Resource at path {} does not exist", full_path.display());
            return Err(ShaderpackError::MissingFile(full_path));
        }

        std::fs::read(&full_path).map_err(|source| {
            // Unreadable now means unreadable later
            self.existence.mark_missing(&full_path);
            ShaderpackError::Io {
                path: full_path,
                source,
            }
        })
    }

    fn get_all_items_in_folder(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let full_path = self.full_path(folder);
        let entries = std::fs::read_dir(&full_path).map_err(|source| ShaderpackError::Io {
            path: full_path.clone(),
            source,
        })?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ShaderpackError::Io {
                path: full_path.clone(),
                source,
            })?;
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).map(Path::to_path_buf);
            items.push(relative.unwrap_or(path));
        }
        items.sort();

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_relative_and_rooted_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("passes.json"), b"[]").unwrap();
        let accessor = RegularFolderAccessor::new(dir.path());

        assert_eq!(accessor.read_text_file(Path::new("passes.json")).unwrap(), "[]");
        assert_eq!(
            accessor.read_file(&dir.path().join("passes.json")).unwrap(),
            b"[]"
        );
        assert!(matches!(
            accessor.read_file(Path::new("resources.json")),
            Err(ShaderpackError::MissingFile(_))
        ));
    }

    #[test]
    fn lists_folder_items_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("materials")).unwrap();
        std::fs::write(dir.path().join("materials/b.mat"), b"{}").unwrap();
        std::fs::write(dir.path().join("materials/a.pipeline"), b"{}").unwrap();
        let accessor = RegularFolderAccessor::new(dir.path());

        let items = accessor.get_all_items_in_folder(Path::new("materials")).unwrap();

        assert_eq!(
            items,
            vec![
                PathBuf::from("materials/a.pipeline"),
                PathBuf::from("materials/b.mat")
            ]
        );
        assert!(accessor.does_resource_exist(&items[0]));
    }

    #[test]
    fn spirv_files_must_be_whole_words() {
        let dir = tempfile::tempdir().unwrap();
        let header: Vec<u8> = [0x0723_0203_u32, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        std::fs::write(dir.path().join("good.spirv"), &header).unwrap();
        std::fs::write(dir.path().join("bad.spirv"), [0x03, 0x02, 0x23]).unwrap();
        let accessor = RegularFolderAccessor::new(dir.path());

        assert_eq!(
            accessor.read_spirv_file(Path::new("good.spirv")).unwrap(),
            vec![0x0723_0203, 0x0001_0000, 0, 1, 0]
        );
        assert!(matches!(
            accessor.read_spirv_file(Path::new("bad.spirv")),
            Err(ShaderpackError::InvalidSpirv { len: 3, .. })
        ));
    }

    #[test]
    fn spirv_shorter_than_a_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one_word.spirv"), [0x03, 0x02, 0x23, 0x07]).unwrap();
        let four_words: Vec<u8> = [0x0723_0203_u32, 0x0001_0000, 0, 1]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        std::fs::write(dir.path().join("four_words.spirv"), &four_words).unwrap();
        std::fs::write(dir.path().join("not_spirv.spirv"), [0u8; 20]).unwrap();
        let accessor = RegularFolderAccessor::new(dir.path());

        for name in ["one_word.spirv", "four_words.spirv", "not_spirv.spirv"] {
            assert!(
                matches!(
                    accessor.read_spirv_file(Path::new(name)),
                    Err(ShaderpackError::MissingSpirvHeader { .. })
                ),
                "{name} was accepted"
            );
        }
    }
}
