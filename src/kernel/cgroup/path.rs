//! Fixed-capacity, NUL-terminated paths for controller stat files
//!
//! Stat files are opened on the fault path, so their paths are built into
//! inline buffers instead of `PathBuf`/`CString`.

use crate::config::types::{QuotaboxError, Result};
use std::ffi::CStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Capacity of a stat path, terminating NUL included
pub const PATH_CAPACITY: usize = 256;

#[derive(Clone, Copy)]
pub struct StatPath {
    buf: [u8; PATH_CAPACITY],
    len: usize,
}

impl StatPath {
    /// Copy `path` into a fixed buffer
    ///
    /// Fails with `Allocation` when the path does not fit.
    pub fn new(path: &Path) -> Result<Self> {
        let mut out = Self {
            buf: [0; PATH_CAPACITY],
            len: 0,
        };
        out.push_bytes(path.as_os_str().as_bytes())?;
        Ok(out)
    }

    /// `self/name` in a new buffer
    pub fn join(&self, name: &str) -> Result<Self> {
        let mut out = *self;
        if out.len > 0 && out.buf[out.len - 1] != b'/' {
            out.push_bytes(b"/")?;
        }
        out.push_bytes(name.as_bytes())?;
        Ok(out)
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.contains(&0) {
            return Err(QuotaboxError::Config(
                "path contains NUL byte and cannot be opened safely".to_string(),
            ));
        }
        // keep one byte for the terminator
        if self.len + bytes.len() >= PATH_CAPACITY {
            return Err(QuotaboxError::Allocation(format!(
                "path exceeds {} bytes",
                PATH_CAPACITY - 1
            )));
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        self.buf[self.len] = 0;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_path(&self) -> &Path {
        Path::new(std::ffi::OsStr::from_bytes(self.as_bytes()))
    }

    pub fn as_cstr(&self) -> &CStr {
        // push_bytes rejects interior NULs and always terminates
        CStr::from_bytes_with_nul(&self.buf[..=self.len]).unwrap_or_default()
    }
}

impl std::fmt::Debug for StatPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StatPath({})", self.as_path().display())
    }
}

impl std::fmt::Display for StatPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_path().display())
    }
}
