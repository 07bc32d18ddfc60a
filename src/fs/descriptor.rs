//! Descriptor table: small integer handles
//! bound to files. Slots are reused lowest
//! index first, the table only grows.

use std::fmt;

use tracing::debug;

use super::table::FileId;
use super::{Result, UfsError};

/// A handle returned by [`crate::Store::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub usize);

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Default)]
pub struct DescriptorTable {
    slots: Vec<Option<FileId>>,
    /// Highest index ever bound + 1
    used: usize,
    limit: Option<usize>,
}

impl DescriptorTable {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            used: 0,
            limit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn high_water(&self) -> usize {
        self.used
    }

    /// Number of bound slots
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn grow(&mut self) -> Result<usize> {
        let capacity = self.slots.len();
        let mut new_capacity = if capacity == 0 { 1 } else { capacity * 2 };
        if let Some(limit) = self.limit {
            if capacity >= limit {
                return Err(UfsError::NoMemory);
            }
            new_capacity = new_capacity.min(limit);
        }
        self.slots
            .try_reserve_exact(new_capacity - capacity)
            .map_err(|_| UfsError::NoMemory)?;
        self.slots.resize(new_capacity, None);
        debug!(capacity, new_capacity, "Grew descriptor table");
        Ok(capacity)
    }

    /// Binds `file` to the lowest free slot,
    /// growing the table if all are taken.
    pub fn allocate(&mut self, file: FileId) -> Result<Fd> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => self.grow()?,
        };
        self.slots[index] = Some(file);
        self.used = self.used.max(index + 1);
        Ok(Fd(index))
    }

    pub fn resolve(&self, fd: Fd) -> Result<FileId> {
        if fd.0 >= self.used {
            return Err(UfsError::NoFile);
        }
        self.slots[fd.0].ok_or(UfsError::NoFile)
    }

    /// Empties the slot, returns what was bound to it
    pub fn release(&mut self, fd: Fd) -> Option<FileId> {
        self.slots.get_mut(fd.0).and_then(Option::take)
    }

    pub fn clear(&mut self) {
        self.slots = Vec::new();
        self.used = 0;
    }
}
