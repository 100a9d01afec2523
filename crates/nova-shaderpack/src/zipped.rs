//! Folder accessor for a zip archive.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use zip::ZipArchive;

use crate::accessor::{has_root, to_archive_name, ExistenceCache, FolderAccessor};
use crate::error::{Result, ShaderpackError};

/// Reads resources out of a zip archive.
///
/// The archive's entry listing is read once when it is opened.
pub struct ZipFolderAccessor {
    root: PathBuf,
    archive: Mutex<ZipArchive<File>>,
    entries: BTreeSet<String>,
    existence: ExistenceCache,
}

impl ZipFolderAccessor {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| ShaderpackError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let archive = ZipArchive::new(file)?;
        let entries: BTreeSet<String> = archive.file_names().map(str::to_owned).collect();
        tracing::debug!("Zip archive {} has {} entries", path.display(), entries.len());

        Ok(Self {
            root: path.to_path_buf(),
            archive: Mutex::new(archive),
            entries,
            existence: ExistenceCache::default(),
        })
    }

    fn entry_name(&self, resource_path: &Path) -> String {
        let relative = if has_root(resource_path, &self.root) {
            resource_path.strip_prefix(&self.root).unwrap_or(resource_path)
        } else {
            resource_path
        };
        to_archive_name(relative)
    }
}

impl FolderAccessor for ZipFolderAccessor {
    fn root(&self) -> &Path {
        &self.root
    }

    fn does_resource_exist(&self, resource_path: &Path) -> bool {
        let name = self.entry_name(resource_path);
        self.existence
            .get_or_check(Path::new(&name), || self.entries.contains(&name))
    }

    fn read_file(&self, resource_path: &Path) -> Result<Vec<u8>> {
        if !self.does_resource_exist(resource_path) {
            tracing::error!(
                "Resource {} does not exist in {}",
                resource_path.display(),
                self.root.display()
            );
            return Err(ShaderpackError::MissingFile(resource_path.to_path_buf()));
        }

        let name = self.entry_name(resource_path);
        let mut archive = self.archive.lock();
        let mut entry = archive.by_name(&name)?;

        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ShaderpackError::Io {
                path: resource_path.to_path_buf(),
                source,
            })?;

        Ok(bytes)
    }

    fn get_all_items_in_folder(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let mut prefix = self.entry_name(folder);
        if !prefix.is_empty() {
            prefix.push('/');
        }

        let children: BTreeSet<String> = self
            .entries
            .iter()
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(|child| format!("{prefix}{child}"))
            .collect();

        if children.is_empty() {
            tracing::error!("Couldn't find folder {} in {}", folder.display(), self.root.display());
        }

        Ok(children.into_iter().map(PathBuf::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, contents) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn reads_entries_and_lists_folders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Pack.zip");
        write_archive(
            &path,
            &[
                ("passes.json", b"[]"),
                ("materials/stone.mat", b"{}"),
                ("materials/gbuffer.pipeline", b"{}"),
                ("shaders/gbuffer.vert.spirv", &[0, 0, 0, 0]),
            ],
        );
        let accessor = ZipFolderAccessor::open(&path).unwrap();

        assert_eq!(accessor.read_text_file(Path::new("passes.json")).unwrap(), "[]");
        assert!(accessor.does_resource_exist(Path::new("materials/stone.mat")));
        assert!(!accessor.does_resource_exist(Path::new("materials/dirt.mat")));
        assert_eq!(
            accessor.get_all_items_in_folder(Path::new("materials")).unwrap(),
            vec![
                PathBuf::from("materials/gbuffer.pipeline"),
                PathBuf::from("materials/stone.mat")
            ]
        );
        assert_eq!(
            accessor.get_all_items_in_folder(Path::new("")).unwrap(),
            vec![
                PathBuf::from("materials"),
                PathBuf::from("passes.json"),
                PathBuf::from("shaders")
            ]
        );
    }

    #[test]
    fn missing_entries_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Pack.zip");
        write_archive(&path, &[("passes.json", b"[]")]);
        let accessor = ZipFolderAccessor::open(&path).unwrap();

        assert!(matches!(
            accessor.read_file(Path::new("resources.json")),
            Err(ShaderpackError::MissingFile(_))
        ));
    }
}
