//! An in-memory file store with POSIX-like handles.
//!
//! Files are flat, named byte strings held in fixed size
//! blocks. [`Store::open`] hands out small integer
//! descriptors that are reused lowest first. Writes always
//! append and reads always start at offset 0.
pub mod fs;
pub mod script;

pub use fs::{
    config::{ConfigError, DeletePolicy, StoreConfig},
    descriptor::Fd,
    ErrorCode, OpenFlags, Store, UfsError,
};
