//! Supervisor-facing report publication
//!
//! Sinks are prepared during setup so that publishing from the fault path is a
//! plain `write(2)` on an already open descriptor.

use crate::config::types::{QuotaboxError, Result};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

/// Hands the formatted report to the external recipient
pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &str) -> Result<()>;
}

/// Report sink writing to a file descriptor, newline terminated
pub struct FdSink {
    fd: RawFd,
    // keeps `fd` open for the lifetime of the sink
    _file: Option<File>,
}

impl FdSink {
    pub fn stdout() -> Self {
        Self {
            fd: libc::STDOUT_FILENO,
            _file: None,
        }
    }

    pub fn stderr() -> Self {
        Self {
            fd: libc::STDERR_FILENO,
            _file: None,
        }
    }

    /// Create (or truncate) `path` now; the report is written at publish time
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                QuotaboxError::Publish(format!("cannot open report file {}: {}", path.display(), e))
            })?;
        Ok(Self {
            fd: file.as_raw_fd(),
            _file: Some(file),
        })
    }

    fn write_all(&self, mut bytes: &[u8]) -> std::io::Result<()> {
        while !bytes.is_empty() {
            let rc = unsafe { libc::write(self.fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if rc == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            bytes = &bytes[rc as usize..];
        }
        Ok(())
    }
}

impl ReportSink for FdSink {
    fn publish(&self, report: &str) -> Result<()> {
        self.write_all(report.as_bytes())
            .and_then(|_| self.write_all(b"\n"))
            .map_err(|e| QuotaboxError::PublishWrite {
                fd: self.fd,
                errno: e.raw_os_error().unwrap_or(libc::EIO),
            })
    }
}
