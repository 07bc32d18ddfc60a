use thiserror::Error;
use tracing::{debug, trace, warn};

pub mod config;
pub mod descriptor;
pub mod storage;
pub mod table;

use config::{ConfigError, DeletePolicy, StoreConfig};
use descriptor::{DescriptorTable, Fd};
use table::{FileId, FileTable};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UfsError {
    #[error("No such file or descriptor")]
    NoFile,
    #[error("The file already exists")]
    FileExists,
    #[error("Not enough memory for operation")]
    NoMemory,
}

impl UfsError {
    /// The closest POSIX errno value
    pub fn errno(&self) -> libc::c_int {
        match self {
            UfsError::NoFile => libc::ENOENT,
            UfsError::FileExists => libc::EEXIST,
            UfsError::NoMemory => libc::ENOMEM,
        }
    }
}

type Result<T> = std::result::Result<T, UfsError>;

/// Sticky status of the last failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    None,
    NoFile,
    FileExists,
    NoMemory,
}

impl From<&UfsError> for ErrorCode {
    fn from(err: &UfsError) -> Self {
        match err {
            UfsError::NoFile => ErrorCode::NoFile,
            UfsError::FileExists => ErrorCode::FileExists,
            UfsError::NoMemory => ErrorCode::NoMemory,
        }
    }
}

/// Flags accepted by [`Store::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    bits: libc::c_int,
}

impl OpenFlags {
    pub const NONE: Self = Self { bits: 0 };
    /// Create the file, failing if it exists
    pub const CREATE: Self = Self { bits: 1 };
    /// `libc::O_CREAT`, treated exactly like [`OpenFlags::CREATE`]
    pub const O_CREAT: Self = Self {
        bits: libc::O_CREAT,
    };

    /// Accepts raw flag bits. Unknown bits are kept but
    /// have no effect.
    pub const fn from_bits(bits: libc::c_int) -> Self {
        Self { bits }
    }

    pub const fn bits(&self) -> libc::c_int {
        self.bits
    }

    pub const fn wants_create(&self) -> bool {
        self.bits & (Self::CREATE.bits | Self::O_CREAT.bits) != 0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.bits | rhs.bits)
    }
}

/// An in-memory file store. Files are named, have
/// no directory structure and live until the last
/// descriptor to them is closed.
///
/// There is no per-descriptor position: writes always
/// append to the end of the file and reads always
/// start at its beginning.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    files: FileTable,
    descriptors: DescriptorTable,
    last_error: ErrorCode,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let config = StoreConfig::default();
        Self {
            files: FileTable::new(config.block_size),
            descriptors: DescriptorTable::new(config.max_descriptors),
            config,
            last_error: ErrorCode::None,
        }
    }

    pub fn with_config(config: StoreConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        debug!(?config, "Creating store");
        Ok(Self {
            files: FileTable::new(config.block_size),
            descriptors: DescriptorTable::new(config.max_descriptors),
            config,
            last_error: ErrorCode::None,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Status of the most recent failure. Successful
    /// calls never clear it.
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            trace!(%err, "Operation failed");
            self.last_error = err.into();
        }
        result
    }

    fn open_inner(&mut self, name: &str, flags: OpenFlags) -> Result<Fd> {
        let lookup = self.files.find_or_create(name, flags.wants_create())?;
        match self.descriptors.allocate(lookup.id) {
            Ok(fd) => {
                let refs = self.files.acquire(lookup.id)?;
                debug!(%fd, name, refs, "Opened file");
                Ok(fd)
            }
            Err(err) => {
                if lookup.created {
                    self.files.reclaim(lookup.id);
                }
                Err(err)
            }
        }
    }

    /// Opens `name`, binding a new descriptor to it.
    ///
    /// Without a create flag the file must exist. With one,
    /// it must not: a creation request for an existing name
    /// fails with [`UfsError::FileExists`].
    pub fn open(&mut self, name: &str, flags: OpenFlags) -> Result<Fd> {
        let result = self.open_inner(name, flags);
        self.record(result)
    }

    fn bound_file(&self, fd: Fd) -> Result<FileId> {
        let id = self.descriptors.resolve(fd)?;
        // An immediate delete may have freed the file under us
        self.files.get(id).map(|_| id).ok_or(UfsError::NoFile)
    }

    fn write_inner(&mut self, fd: Fd, bytes: &[u8]) -> Result<usize> {
        let id = self.bound_file(fd)?;
        let limit = self.config.max_file_size;
        let file = self.files.get_mut(id).ok_or(UfsError::NoFile)?;
        match file.chain_mut().append(bytes, limit) {
            Ok(written) => Ok(written),
            Err(short) if short.committed > 0 => {
                warn!(%fd, committed = short.committed, "Short write");
                self.last_error = (&short.cause).into();
                Ok(short.committed)
            }
            Err(short) => Err(short.cause),
        }
    }

    /// Appends `bytes` to the end of the file bound to `fd`,
    /// no matter which descriptor wrote last.
    ///
    /// Returns the number of bytes committed. If storage runs
    /// out part way, the bytes already stored stay in the file,
    /// the count is short and [`Store::last_error`] reports
    /// [`ErrorCode::NoMemory`]. If nothing could be stored the
    /// call fails.
    pub fn write(&mut self, fd: Fd, bytes: &[u8]) -> Result<usize> {
        let result = self.write_inner(fd, bytes);
        self.record(result)
    }

    fn read_inner(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let id = self.bound_file(fd)?;
        let file = self.files.get(id).ok_or(UfsError::NoFile)?;
        Ok(file.chain().read_from_start(buf))
    }

    /// Fills `buf` with the file's bytes from offset 0.
    /// Repeated reads return the same prefix.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let result = self.read_inner(fd, buf);
        self.record(result)
    }

    /// Like [`Store::read`], returning at most `max_len`
    /// bytes in a fresh buffer.
    pub fn read_to_vec(&mut self, fd: Fd, max_len: usize) -> Result<Vec<u8>> {
        let result = self.bound_file(fd).and_then(|id| {
            let len = self
                .files
                .get(id)
                .map_or(0, |file| file.chain().len())
                .min(max_len);
            let mut buf = Vec::new();
            buf.try_reserve_exact(len)
                .map_err(|_| UfsError::NoMemory)?;
            buf.resize(len, 0);
            let read = self.read_inner(fd, &mut buf)?;
            buf.truncate(read);
            Ok(buf)
        });
        self.record(result)
    }

    fn close_inner(&mut self, fd: Fd) -> Result<()> {
        let id = self.descriptors.resolve(fd)?;
        self.descriptors.release(fd);
        let refs = self.files.release(id)?;
        debug!(%fd, refs, "Closed descriptor");
        if refs == 0 {
            self.files.reclaim(id);
        }
        Ok(())
    }

    /// Releases `fd`. When it was the last descriptor
    /// bound to its file, the file and its storage are
    /// freed and its name disappears.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let result = self.close_inner(fd);
        self.record(result)
    }

    fn delete_inner(&mut self, name: &str) -> Result<()> {
        let id = self.files.unlink(name)?;
        let refs = self.files.get(id).map_or(0, |file| file.refs());
        match self.config.delete_policy {
            DeletePolicy::Unlink if refs > 0 => {
                debug!(name, refs, "Deferring reclaim until last close");
            }
            DeletePolicy::Unlink | DeletePolicy::Immediate => {
                self.files.reclaim(id);
            }
        }
        Ok(())
    }

    /// Removes `name` from the store. What happens to open
    /// descriptors depends on [`StoreConfig::delete_policy`].
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let result = self.delete_inner(name);
        self.record(result)
    }

    /// Frees every file and descriptor. The store is
    /// empty afterwards and can be used again; the last
    /// error is kept.
    pub fn reset(&mut self) {
        debug!(
            files = self.files.len(),
            descriptors = self.descriptors.open_count(),
            "Resetting store"
        );
        self.files.clear();
        self.descriptors.clear();
    }

    /// Size in bytes of the file bound to `fd`
    pub fn file_size(&mut self, fd: Fd) -> Result<usize> {
        let result = self
            .bound_file(fd)
            .and_then(|id| self.files.get(id).ok_or(UfsError::NoFile))
            .map(|file| file.chain().len());
        self.record(result)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.lookup(name).is_some()
    }

    /// Descriptors bound to the file currently named `name`
    pub fn refcount(&self, name: &str) -> Option<usize> {
        let id = self.files.lookup(name)?;
        self.files.get(id).map(|file| file.refs())
    }

    /// Number of files holding storage, including
    /// deleted ones that are still open.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn open_descriptors(&self) -> usize {
        self.descriptors.open_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store() -> Store {
        Store::with_config(StoreConfig {
            block_size: 4,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_hello_world_scenario() {
        let mut store = Store::new();
        assert_eq!(store.open("a", OpenFlags::CREATE), Ok(Fd(0)));
        assert_eq!(store.write(Fd(0), b"hello"), Ok(5));
        assert_eq!(store.open("a", OpenFlags::NONE), Ok(Fd(1)));
        assert_eq!(store.read_to_vec(Fd(1), 5).unwrap(), b"hello");
        store.close(Fd(0)).unwrap();
        assert_eq!(store.write(Fd(1), b"world"), Ok(5));
        assert_eq!(store.read_to_vec(Fd(1), 10).unwrap(), b"helloworld");
        assert_eq!(store.last_error(), ErrorCode::None);
    }

    #[test]
    fn test_round_trip_across_blocks() {
        let mut store = small_store();
        let fd = store.open("data", OpenFlags::CREATE).unwrap();
        let chunks: [&[u8]; 4] = [b"abc", b"defghij", b"", b"klmnopqrstu"];
        for chunk in chunks {
            assert_eq!(store.write(fd, chunk), Ok(chunk.len()));
        }
        assert_eq!(store.file_size(fd), Ok(21));
        assert_eq!(
            store.read_to_vec(fd, 21).unwrap(),
            b"abcdefghijklmnopqrstu"
        );
        let mut buf = [0; 32];
        assert_eq!(store.read(fd, &mut buf), Ok(21));
        assert_eq!(store.read(fd, &mut buf[..2]), Ok(2));
        assert_eq!(&buf[..2], b"ab");
    }

    #[test]
    fn test_shared_file_between_descriptors() {
        let mut store = small_store();
        let first = store.open("shared", OpenFlags::CREATE).unwrap();
        let second = store.open("shared", OpenFlags::NONE).unwrap();
        assert_eq!(store.refcount("shared"), Some(2));
        store.write(first, b"one").unwrap();
        store.write(second, b"two").unwrap();
        assert_eq!(store.read_to_vec(first, 100).unwrap(), b"onetwo");
        assert_eq!(store.read_to_vec(second, 100).unwrap(), b"onetwo");

        store.close(first).unwrap();
        assert_eq!(store.refcount("shared"), Some(1));
        assert_eq!(store.read_to_vec(second, 100).unwrap(), b"onetwo");

        store.close(second).unwrap();
        assert!(!store.exists("shared"));
        assert_eq!(store.file_count(), 0);
        assert_eq!(
            store.open("shared", OpenFlags::NONE),
            Err(UfsError::NoFile)
        );
    }

    #[test]
    fn test_open_flag_cases() {
        let mut store = Store::new();
        assert_eq!(store.open("f", OpenFlags::NONE), Err(UfsError::NoFile));
        assert_eq!(store.last_error(), ErrorCode::NoFile);

        let fd = store.open("f", OpenFlags::O_CREAT).unwrap();
        assert_eq!(store.refcount("f"), Some(1));
        assert_eq!(store.open("f", OpenFlags::CREATE), Err(UfsError::FileExists));
        assert_eq!(
            store.open("f", OpenFlags::CREATE | OpenFlags::O_CREAT),
            Err(UfsError::FileExists)
        );
        assert_eq!(store.last_error(), ErrorCode::FileExists);
        assert_eq!(store.refcount("f"), Some(1));

        // success leaves the sticky code alone
        store.write(fd, b"x").unwrap();
        assert_eq!(store.last_error(), ErrorCode::FileExists);
    }

    #[test]
    fn test_unknown_flag_bits_ignored() {
        let mut store = Store::new();
        let flags = OpenFlags::from_bits(libc::O_RDWR | libc::O_APPEND);
        assert!(!flags.wants_create());
        assert_eq!(store.open("f", flags), Err(UfsError::NoFile));
    }

    #[test]
    fn test_bad_descriptors() {
        let mut store = Store::new();
        let mut buf = [0; 4];
        assert_eq!(store.write(Fd(0), b"x"), Err(UfsError::NoFile));
        assert_eq!(store.read(Fd(7), &mut buf), Err(UfsError::NoFile));
        assert_eq!(store.close(Fd(0)), Err(UfsError::NoFile));

        let fd = store.open("f", OpenFlags::CREATE).unwrap();
        let keep = store.open("f", OpenFlags::NONE).unwrap();
        store.close(fd).unwrap();
        assert_eq!(store.close(fd), Err(UfsError::NoFile));
        assert_eq!(store.write(fd, b"x"), Err(UfsError::NoFile));
        assert_eq!(store.read(fd, &mut buf), Err(UfsError::NoFile));
        assert_eq!(store.last_error(), ErrorCode::NoFile);
        assert_eq!(store.refcount("f"), Some(1));
        store.close(keep).unwrap();
    }

    #[test]
    fn test_descriptor_reuse() {
        let mut store = Store::new();
        let a = store.open("a", OpenFlags::CREATE).unwrap();
        let b = store.open("b", OpenFlags::CREATE).unwrap();
        let c = store.open("c", OpenFlags::CREATE).unwrap();
        assert_eq!((a, b, c), (Fd(0), Fd(1), Fd(2)));
        store.close(b).unwrap();
        store.close(a).unwrap();
        assert_eq!(store.open("d", OpenFlags::CREATE), Ok(Fd(0)));
        assert_eq!(store.open("c", OpenFlags::NONE), Ok(Fd(1)));
        assert_eq!(store.open("e", OpenFlags::CREATE), Ok(Fd(3)));
    }

    #[test]
    fn test_delete_unlink_defers_reclaim() {
        let mut store = small_store();
        let fd = store.open("tmp", OpenFlags::CREATE).unwrap();
        store.write(fd, b"payload").unwrap();
        store.delete("tmp").unwrap();

        assert!(!store.exists("tmp"));
        assert_eq!(store.open("tmp", OpenFlags::NONE), Err(UfsError::NoFile));
        assert_eq!(store.delete("tmp"), Err(UfsError::NoFile));
        // still readable and writable through the old descriptor
        store.write(fd, b"!").unwrap();
        assert_eq!(store.read_to_vec(fd, 64).unwrap(), b"payload!");
        assert_eq!(store.file_count(), 1);

        // a new file may take the name meanwhile
        let fresh = store.open("tmp", OpenFlags::CREATE).unwrap();
        assert_eq!(store.read_to_vec(fresh, 64).unwrap(), b"");

        store.close(fd).unwrap();
        assert_eq!(store.file_count(), 1);
        assert!(store.exists("tmp"));
    }

    #[test]
    fn test_last_close_removes_name() {
        let mut store = Store::new();
        let fd = store.open("gone", OpenFlags::CREATE).unwrap();
        store.open("gone", OpenFlags::NONE).unwrap();
        store.close(fd).unwrap();
        store.close(Fd(1)).unwrap();
        assert_eq!(store.delete("gone"), Err(UfsError::NoFile));
        assert_eq!(store.last_error(), ErrorCode::NoFile);
    }

    #[test]
    fn test_delete_immediate_invalidates_descriptors() {
        let mut store = Store::with_config(StoreConfig {
            delete_policy: DeletePolicy::Immediate,
            ..Default::default()
        })
        .unwrap();
        let fd = store.open("tmp", OpenFlags::CREATE).unwrap();
        store.write(fd, b"payload").unwrap();
        store.delete("tmp").unwrap();
        assert_eq!(store.file_count(), 0);
        assert_eq!(store.write(fd, b"x"), Err(UfsError::NoFile));
        assert_eq!(store.read_to_vec(fd, 4), Err(UfsError::NoFile));

        // the stale slot is not handed out until it is closed
        let other = store.open("tmp", OpenFlags::CREATE).unwrap();
        assert_eq!(other, Fd(1));
        assert_eq!(store.read_to_vec(fd, 4), Err(UfsError::NoFile));
        assert_eq!(store.close(fd), Err(UfsError::NoFile));
        assert_eq!(store.open("tmp", OpenFlags::NONE), Ok(Fd(0)));
    }

    #[test]
    fn test_size_limit_short_write() {
        let mut store = Store::with_config(StoreConfig {
            block_size: 4,
            max_file_size: Some(10),
            ..Default::default()
        })
        .unwrap();
        let fd = store.open("capped", OpenFlags::CREATE).unwrap();
        assert_eq!(store.write(fd, b"12345678"), Ok(8));
        assert_eq!(store.last_error(), ErrorCode::None);
        assert_eq!(store.write(fd, b"abcdef"), Ok(2));
        assert_eq!(store.last_error(), ErrorCode::NoMemory);
        assert_eq!(store.write(fd, b"z"), Err(UfsError::NoMemory));
        assert_eq!(store.read_to_vec(fd, 100).unwrap(), b"12345678ab");
    }

    #[test]
    fn test_size_limit_inactive_by_default() {
        let mut store = Store::new();
        assert_eq!(store.config().max_file_size, None);
        let fd = store.open("big", OpenFlags::CREATE).unwrap();
        let chunk = vec![7; 64 * 1024];
        for _ in 0..4 {
            store.write(fd, &chunk).unwrap();
        }
        assert_eq!(store.file_size(fd), Ok(256 * 1024));
    }

    #[test]
    fn test_descriptor_exhaustion_rolls_back_create() {
        let mut store = Store::with_config(StoreConfig {
            max_descriptors: Some(2),
            ..Default::default()
        })
        .unwrap();
        store.open("a", OpenFlags::CREATE).unwrap();
        store.open("a", OpenFlags::NONE).unwrap();

        assert_eq!(store.open("b", OpenFlags::CREATE), Err(UfsError::NoMemory));
        assert_eq!(store.last_error(), ErrorCode::NoMemory);
        assert!(!store.exists("b"));
        assert_eq!(store.file_count(), 1);

        assert_eq!(store.open("a", OpenFlags::NONE), Err(UfsError::NoMemory));
        assert_eq!(store.refcount("a"), Some(2));
    }

    #[test]
    fn test_reset() {
        let mut store = Store::new();
        let fd = store.open("a", OpenFlags::CREATE).unwrap();
        store.write(fd, b"data").unwrap();
        store.open("b", OpenFlags::CREATE).unwrap();
        let _ = store.open("missing", OpenFlags::NONE);
        store.reset();

        assert_eq!(store.file_count(), 0);
        assert_eq!(store.open_descriptors(), 0);
        assert!(!store.exists("a"));
        assert_eq!(store.write(fd, b"x"), Err(UfsError::NoFile));
        assert_eq!(store.open("a", OpenFlags::CREATE), Ok(Fd(0)));
        store.reset();
        store.reset();
        assert_eq!(store.file_count(), 0);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(UfsError::NoFile.errno(), libc::ENOENT);
        assert_eq!(UfsError::FileExists.errno(), libc::EEXIST);
        assert_eq!(UfsError::NoMemory.errno(), libc::ENOMEM);
        assert_eq!(ErrorCode::from(&UfsError::NoMemory), ErrorCode::NoMemory);
    }
}
