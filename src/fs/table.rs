//! The file table: every live file record,
//! addressed by a [`FileId`], and the index
//! mapping names to ids.
//!
//! Ids are handed out from a counter and never
//! reused, so a stale id can't alias a newer file.

use std::collections::HashMap;

use tracing::debug;

use super::storage::BlockChain;
use super::{Result, UfsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

#[derive(Debug)]
pub struct File {
    name: String,
    chain: BlockChain,
    refs: usize,
    /// `false` once the name was removed from the index
    linked: bool,
}

impl File {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> &BlockChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut BlockChain {
        &mut self.chain
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Result of [`FileTable::find_or_create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub id: FileId,
    pub created: bool,
}

#[derive(Debug)]
pub struct FileTable {
    block_size: usize,
    files: HashMap<FileId, File>,
    names: HashMap<String, FileId>,
    next_id: u64,
}

fn copy_name(name: &str) -> Result<String> {
    let mut owned = String::new();
    owned
        .try_reserve_exact(name.len())
        .map_err(|_| UfsError::NoMemory)?;
    owned.push_str(name);
    Ok(owned)
}

impl FileTable {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            files: HashMap::new(),
            names: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<FileId> {
        self.names.get(name).copied()
    }

    /// Resolves `name`, creating an empty file with zero
    /// references when it is missing and `wants_create` is set.
    /// A creation request for an existing name is always
    /// rejected. On failure the table is left untouched.
    pub fn find_or_create(&mut self, name: &str, wants_create: bool) -> Result<Lookup> {
        match (self.lookup(name), wants_create) {
            (Some(_), true) => Err(UfsError::FileExists),
            (Some(id), false) => Ok(Lookup { id, created: false }),
            (None, false) => Err(UfsError::NoFile),
            (None, true) => self.create(name).map(|id| Lookup { id, created: true }),
        }
    }

    fn create(&mut self, name: &str) -> Result<FileId> {
        // Reserve everything up front so nothing below can fail
        // after the first insert.
        let key = copy_name(name)?;
        let record_name = copy_name(name)?;
        self.files
            .try_reserve(1)
            .map_err(|_| UfsError::NoMemory)?;
        self.names
            .try_reserve(1)
            .map_err(|_| UfsError::NoMemory)?;

        let id = FileId(self.next_id);
        self.next_id += 1;
        self.files.insert(
            id,
            File {
                name: record_name,
                chain: BlockChain::new(self.block_size),
                refs: 0,
                linked: true,
            },
        );
        self.names.insert(key, id);
        debug!(?id, name, "Created file");
        Ok(id)
    }

    pub fn get(&self, id: FileId) -> Option<&File> {
        self.files.get(&id)
    }

    pub fn get_mut(&mut self, id: FileId) -> Option<&mut File> {
        self.files.get_mut(&id)
    }

    /// Adds a reference to a live file
    pub fn acquire(&mut self, id: FileId) -> Result<usize> {
        let file = self.files.get_mut(&id).ok_or(UfsError::NoFile)?;
        file.refs += 1;
        Ok(file.refs)
    }

    /// Drops a reference, returns the remaining count
    pub fn release(&mut self, id: FileId) -> Result<usize> {
        let file = self.files.get_mut(&id).ok_or(UfsError::NoFile)?;
        file.refs = file.refs.saturating_sub(1);
        Ok(file.refs)
    }

    /// Removes `name` from the index, the record itself
    /// stays until [`FileTable::reclaim`] is called.
    pub fn unlink(&mut self, name: &str) -> Result<FileId> {
        let id = self.names.remove(name).ok_or(UfsError::NoFile)?;
        if let Some(file) = self.files.get_mut(&id) {
            file.linked = false;
        }
        debug!(?id, name, "Unlinked file");
        Ok(id)
    }

    /// Frees the record and all of its blocks,
    /// unlinking its name if still present.
    pub fn reclaim(&mut self, id: FileId) -> Option<File> {
        let file = self.files.remove(&id)?;
        if file.linked {
            self.names.remove(&file.name);
        }
        debug!(
            ?id,
            name = %file.name,
            blocks = file.chain.blocks().len(),
            "Reclaimed file storage"
        );
        Some(file)
    }

    /// Number of records, including unlinked ones
    /// that are still referenced.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.names.clear();
    }
}

#[test]
fn test_find_or_create_cases() {
    let mut table = FileTable::new(16);
    assert_eq!(table.find_or_create("a", false), Err(UfsError::NoFile));
    assert!(table.is_empty());

    let created = table.find_or_create("a", true).unwrap();
    assert!(created.created);
    assert_eq!(table.get(created.id).unwrap().refs(), 0);

    assert_eq!(table.find_or_create("a", true), Err(UfsError::FileExists));
    let found = table.find_or_create("a", false).unwrap();
    assert_eq!(found, Lookup { id: created.id, created: false });
    assert_eq!(table.len(), 1);
}

#[test]
fn test_unlink_keeps_record_until_reclaim() {
    let mut table = FileTable::new(16);
    let id = table.find_or_create("log", true).unwrap().id;
    table.acquire(id).unwrap();
    assert_eq!(table.unlink("log"), Ok(id));
    assert_eq!(table.lookup("log"), None);
    assert!(!table.get(id).unwrap().is_linked());
    assert_eq!(table.unlink("log"), Err(UfsError::NoFile));

    // The name is free for a new, distinct file
    let other = table.find_or_create("log", true).unwrap().id;
    assert_ne!(id, other);

    let file = table.reclaim(id).unwrap();
    assert_eq!(file.name(), "log");
    assert_eq!(table.lookup("log"), Some(other));
    assert!(table.get(id).is_none());
}

#[test]
fn test_reclaim_linked_drops_name() {
    let mut table = FileTable::new(16);
    let id = table.find_or_create("x", true).unwrap().id;
    table.reclaim(id).unwrap();
    assert_eq!(table.lookup("x"), None);
    assert!(table.reclaim(id).is_none());
    assert_eq!(table.acquire(id), Err(UfsError::NoFile));
}
