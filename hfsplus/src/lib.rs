//! Read-only inspector for HFS+ / HFSX volumes.
//!
//! The crate layers match the on-disk indirection: a [`Source`] provides
//! positional reads against a device or image; [`Volume`] detects the
//! filesystem (including the wrapped HFS+ layout) and parses the volume
//! header; [`Fork`] maps a fork's logical bytes to allocation blocks
//! through its resolved extent list; [`BTree`] walks the catalog, extents
//! overflow, and attributes trees and decodes their records.
//!
//! Everything is read-only: nothing here mounts, repairs, or replays a
//! journal.

pub mod attributes;
pub mod btree;
pub mod catalog;
pub mod error;
pub mod extents;
pub mod fork;
pub mod source;
pub mod unicode;
pub mod volume;

#[cfg(test)]
pub(crate) mod testvol;

pub use btree::{BTree, TreeKind};
pub use error::{HfsError, Result};
pub use extents::ExtentList;
pub use fork::{Fork, ForkKind, ForkReader};
pub use source::Source;
pub use volume::{detect, hfs_time_to_unix, Volume, VolumeHeader, VolumeKind};

use std::io::{Read, Seek, Write};

use catalog::CatalogRecord;

/// Entry kind in the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// A directory entry returned by `list_directory`
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// File or folder name
    pub name: String,
    /// Catalog Node ID
    pub cnid: u32,
    /// Entry type
    pub kind: EntryKind,
    /// Data fork logical size (0 for directories)
    pub size: u64,
    /// HFS+ creation date (seconds since 1904-01-01)
    pub create_date: u32,
    /// HFS+ modification date
    pub modify_date: u32,
}

/// HFS+ permissions (BSD-style)
#[derive(Debug, Clone)]
pub struct Permissions {
    pub owner_id: u32,
    pub group_id: u32,
    pub mode: u16,
}

/// Detailed file/directory metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    pub cnid: u32,
    pub kind: EntryKind,
    pub size: u64,
    pub create_date: u32,
    pub modify_date: u32,
    pub permissions: Permissions,
    pub data_fork_extents: u32,
    pub resource_fork_size: u64,
}

/// Entry from `walk` — includes the full path
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: String,
    pub entry: DirEntry,
}

fn entry_from_record(name: String, record: &CatalogRecord) -> Option<DirEntry> {
    match record {
        CatalogRecord::Folder(folder) => Some(DirEntry {
            name,
            cnid: folder.folder_id,
            kind: EntryKind::Directory,
            size: 0,
            create_date: folder.create_date,
            modify_date: folder.content_mod_date,
        }),
        CatalogRecord::File(file) => Some(DirEntry {
            name,
            cnid: file.file_id,
            kind: if file.bsd_info.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            },
            size: file.data_fork.logical_size,
            create_date: file.create_date,
            modify_date: file.content_mod_date,
        }),
        CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => None,
    }
}

impl<R: Read + Seek> Volume<R> {
    /// List entries of the directory at `path`, thread records elided.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let (record, _) = catalog::resolve_path(self, path)?;
        let parent = match record {
            CatalogRecord::Folder(folder) => folder.folder_id,
            CatalogRecord::File(_) => return Err(HfsError::NotADirectory(path.to_string())),
            _ => return Err(HfsError::Malformed("thread record at a path".into())),
        };

        Ok(catalog::children(self, parent)?
            .into_iter()
            .filter_map(|(key, record)| entry_from_record(key.name(), &record))
            .collect())
    }

    /// Read an entire file into memory.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_file_to(path, &mut buf)?;
        Ok(buf)
    }

    /// Stream a file's data fork into a writer. Returns the bytes written.
    pub fn read_file_to<W: Write>(&self, path: &str, writer: &mut W) -> Result<u64> {
        let file = self.resolve_file(path)?;
        let fork = self.fork(&file.data_fork, ForkKind::Data, file.file_id)?;
        let written = std::io::copy(&mut fork.reader(), writer)?;
        Ok(written)
    }

    /// Open a file's data fork for streaming `Read + Seek` access.
    pub fn open_file(&self, path: &str) -> Result<ForkReader<R>> {
        let file = self.resolve_file(path)?;
        let fork = self.fork(&file.data_fork, ForkKind::Data, file.file_id)?;
        Ok(fork.reader())
    }

    /// Metadata for the file or directory at `path`.
    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let (record, _) = catalog::resolve_path(self, path)?;
        match record {
            CatalogRecord::File(file) => Ok(FileStat {
                cnid: file.file_id,
                kind: if file.bsd_info.is_symlink() {
                    EntryKind::Symlink
                } else {
                    EntryKind::File
                },
                size: file.data_fork.logical_size,
                create_date: file.create_date,
                modify_date: file.content_mod_date,
                permissions: Permissions {
                    owner_id: file.bsd_info.owner_id,
                    group_id: file.bsd_info.group_id,
                    mode: file.bsd_info.file_mode,
                },
                data_fork_extents: file
                    .data_fork
                    .extents
                    .iter()
                    .filter(|e| e.block_count > 0)
                    .count() as u32,
                resource_fork_size: file.resource_fork.logical_size,
            }),
            CatalogRecord::Folder(folder) => Ok(FileStat {
                cnid: folder.folder_id,
                kind: EntryKind::Directory,
                size: 0,
                create_date: folder.create_date,
                modify_date: folder.content_mod_date,
                permissions: Permissions {
                    owner_id: folder.bsd_info.owner_id,
                    group_id: folder.bsd_info.group_id,
                    mode: folder.bsd_info.file_mode,
                },
                data_fork_extents: 0,
                resource_fork_size: 0,
            }),
            _ => Err(HfsError::Malformed("thread record at a path".into())),
        }
    }

    /// Check whether a path exists.
    pub fn exists(&self, path: &str) -> Result<bool> {
        match catalog::resolve_path(self, path) {
            Ok(_) => Ok(true),
            Err(HfsError::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Recursive walk of every entry under the root.
    pub fn walk(&self) -> Result<Vec<WalkEntry>> {
        let mut entries = Vec::new();
        self.walk_recursive(catalog::CNID_ROOT_FOLDER, "", &mut entries)?;
        Ok(entries)
    }

    /// Names of extended attributes attached to `path`.
    pub fn list_attributes(&self, path: &str) -> Result<Vec<String>> {
        let (record, _) = catalog::resolve_path(self, path)?;
        let cnid = match record {
            CatalogRecord::Folder(folder) => folder.folder_id,
            CatalogRecord::File(file) => file.file_id,
            _ => return Err(HfsError::Malformed("thread record at a path".into())),
        };
        attributes::list_attributes(self, cnid)
    }

    fn resolve_file(&self, path: &str) -> Result<catalog::CatalogFile> {
        match catalog::resolve_path(self, path)? {
            (CatalogRecord::File(file), _) => Ok(file),
            (CatalogRecord::Folder(_), _) => Err(HfsError::NotADirectory(path.to_string())),
            _ => Err(HfsError::Malformed("thread record at a path".into())),
        }
    }

    fn walk_recursive(
        &self,
        parent_cnid: u32,
        parent_path: &str,
        entries: &mut Vec<WalkEntry>,
    ) -> Result<()> {
        for (key, record) in catalog::children(self, parent_cnid)? {
            let Some(entry) = entry_from_record(key.name(), &record) else {
                continue;
            };
            let full_path = format!("{parent_path}/{}", entry.name);
            let descend = entry.kind == EntryKind::Directory;
            let cnid = entry.cnid;

            entries.push(WalkEntry {
                path: full_path.clone(),
                entry,
            });
            if descend {
                self.walk_recursive(cnid, &full_path, entries)?;
            }
        }
        Ok(())
    }
}
