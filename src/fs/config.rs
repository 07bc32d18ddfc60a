use thiserror::Error;

/// What [`crate::Store::delete`] does to a file
/// that still has open descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// POSIX unlink: the name goes away at once,
    /// storage is reclaimed on the last close.
    #[default]
    Unlink,
    /// Storage is freed at once. Descriptors still
    /// bound to the file resolve to `NoFile` afterwards.
    Immediate,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("The block size must be at least 1 byte")]
    InvalidBlockSize,
    #[error("The descriptor limit must allow at least one descriptor")]
    InvalidDescriptorLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Capacity of every storage block
    pub block_size: usize,
    /// Per-file size limit. Unenforced unless set,
    /// see [`StoreConfig::MAX_FILE_SIZE`].
    pub max_file_size: Option<usize>,
    /// Cap on descriptor table capacity
    pub max_descriptors: Option<usize>,
    pub delete_policy: DeletePolicy,
}

impl StoreConfig {
    pub const BLOCK_SIZE: usize = 512;
    /// Conventional file size limit (100 MiB). Writes are
    /// only checked against it when a caller opts in with
    /// `max_file_size: Some(StoreConfig::MAX_FILE_SIZE)`.
    pub const MAX_FILE_SIZE: usize = 1024 * 1024 * 100;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize);
        }
        if self.max_descriptors == Some(0) {
            return Err(ConfigError::InvalidDescriptorLimit);
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: Self::BLOCK_SIZE,
            max_file_size: None,
            max_descriptors: None,
            delete_policy: DeletePolicy::default(),
        }
    }
}

#[test]
fn test_validate() {
    assert_eq!(StoreConfig::default().validate(), Ok(()));
    let zero_blocks = StoreConfig {
        block_size: 0,
        ..Default::default()
    };
    assert_eq!(zero_blocks.validate(), Err(ConfigError::InvalidBlockSize));
    let zero_fds = StoreConfig {
        max_descriptors: Some(0),
        ..Default::default()
    };
    assert_eq!(zero_fds.validate(), Err(ConfigError::InvalidDescriptorLimit));
}
