//! Per-process resource controller folder
//!
//! Layout: `<root>/<pid>/` holding one decimal counter per file. Setup happens
//! once while the sandbox is being prepared; stat reads and teardown may run
//! on the fault path and therefore use preallocated paths and stack buffers.

use crate::config::loader::StatNames;
use crate::config::types::{QuotaboxError, Result};
use crate::kernel::cgroup::path::StatPath;
use log::{debug, info, warn};
use std::io::Write;
use std::os::fd::RawFd;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use thiserror::Error;

/// Capacity of the stat read buffer; a read that fills it may be truncated
pub const STAT_BUFFER_CAPACITY: usize = 64;

/// Why a single stat could not be read
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatReadError {
    #[error("cannot open (errno {0})")]
    Open(i32),

    #[error("read failed (errno {0})")]
    Read(i32),

    #[error("empty read")]
    Empty,

    #[error("read filled the {0}-byte buffer, value could be truncated")]
    Truncated(usize),

    #[error("content is not a decimal integer")]
    Parse,
}

struct FdGuard(RawFd);

impl Drop for FdGuard {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe {
                libc::close(self.0);
            }
        }
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Open, read into a fixed buffer, close, parse
pub fn read_stat_file(path: &StatPath) -> std::result::Result<i64, StatReadError> {
    let fd = unsafe { libc::open(path.as_cstr().as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(StatReadError::Open(last_errno()));
    }
    let guard = FdGuard(fd);

    let mut buf = [0u8; STAT_BUFFER_CAPACITY];
    let mut filled = 0;
    while filled < buf.len() {
        let rc = unsafe {
            libc::read(
                guard.0,
                buf[filled..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - filled,
            )
        };
        if rc < 0 {
            let errno = last_errno();
            if errno == libc::EINTR {
                continue;
            }
            return Err(StatReadError::Read(errno));
        }
        if rc == 0 {
            break;
        }
        filled += rc as usize;
    }
    drop(guard);

    if filled == 0 {
        return Err(StatReadError::Empty);
    }
    if filled == STAT_BUFFER_CAPACITY {
        return Err(StatReadError::Truncated(STAT_BUFFER_CAPACITY));
    }

    parse_decimal(&buf[..filled])
}

fn parse_decimal(bytes: &[u8]) -> std::result::Result<i64, StatReadError> {
    let text = std::str::from_utf8(bytes).map_err(|_| StatReadError::Parse)?;
    text.trim().parse::<i64>().map_err(|_| StatReadError::Parse)
}

/// Write a decimal value into an existing file without heap allocation
fn write_decimal_file(path: &StatPath, value: i64) -> std::result::Result<(), i32> {
    let mut digits = [0u8; 24];
    let len = {
        let mut cursor: &mut [u8] = &mut digits;
        let before = cursor.len();
        write!(cursor, "{}", value).map_err(|_| libc::EOVERFLOW)?;
        before - cursor.len()
    };

    let fd = unsafe { libc::open(path.as_cstr().as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(last_errno());
    }
    let guard = FdGuard(fd);
    let rc = unsafe { libc::write(guard.0, digits.as_ptr() as *const libc::c_void, len) };
    if rc < 0 {
        return Err(last_errno());
    }
    Ok(())
}

/// Resource controller folder owned by this process
#[derive(Debug)]
pub struct ResourceController {
    pid: u32,
    folder: StatPath,
    root_tasks: StatPath,
    user_cpu: StatPath,
    memory: StatPath,
    swap: StatPath,
}

impl ResourceController {
    /// Whether extended accounting is possible under `root`
    pub fn available(root: &Path) -> bool {
        root.is_dir()
    }

    /// Create `<root>/<pid>`, attach `pid` and enable the counters
    ///
    /// Returns `Ok(None)` when `root` does not exist: extended accounting is
    /// then disabled. Path capacity problems surface as `Allocation`; any other
    /// failure as `Cgroup`.
    pub fn setup(root: &Path, pid: u32, names: &StatNames) -> Result<Option<Self>> {
        if !Self::available(root) {
            info!("Resource controller root {} missing, extended accounting disabled", root.display());
            return Ok(None);
        }

        let root_path = StatPath::new(root)?;
        let folder = root_path.join(&pid.to_string())?;
        let tasks = folder.join(&names.tasks)?;
        let controller = ResourceController {
            pid,
            folder,
            root_tasks: root_path.join(&names.tasks)?,
            user_cpu: folder.join(&names.user_cpu)?,
            memory: folder.join(&names.memory)?,
            swap: folder.join(&names.swap)?,
        };

        // a leftover folder of the same pid is reclaimed if nobody holds it
        if folder.as_path().is_dir() {
            std::fs::remove_dir(folder.as_path()).map_err(|e| {
                QuotaboxError::Cgroup(format!("'{}' in cgroups is already taken: {}", folder, e))
            })?;
        }

        std::fs::DirBuilder::new()
            .mode(0o700)
            .create(folder.as_path())
            .map_err(|e| QuotaboxError::Cgroup(format!("cannot create '{}' in cgroups: {}", folder, e)))?;

        if let Err(e) = controller.enable(&tasks) {
            let _ = std::fs::remove_dir_all(folder.as_path());
            return Err(e);
        }

        info!("Extended accounting enabled in {}", folder);
        Ok(Some(controller))
    }

    fn enable(&self, tasks: &StatPath) -> Result<()> {
        echo_to_file(tasks, &self.pid.to_string())?;
        for counter in [&self.user_cpu, &self.memory, &self.swap] {
            echo_to_file(counter, "1")?;
        }
        Ok(())
    }

    pub fn folder(&self) -> &Path {
        self.folder.as_path()
    }

    pub fn user_cpu_path(&self) -> &StatPath {
        &self.user_cpu
    }

    pub fn memory_path(&self) -> &StatPath {
        &self.memory
    }

    pub fn swap_path(&self) -> &StatPath {
        &self.swap
    }

    /// Move the process back to the root group and remove the folder
    pub fn teardown(&self) -> Result<()> {
        if let Err(errno) = write_decimal_file(&self.root_tasks, self.pid as i64) {
            debug!("cannot move pid {} to {} (errno {})", self.pid, self.root_tasks, errno);
        }

        let rc = unsafe { libc::rmdir(self.folder.as_cstr().as_ptr()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("cannot remove {}: {}", self.folder, err);
                return Err(QuotaboxError::Cgroup(format!(
                    "cannot remove {}: {}",
                    self.folder, err
                )));
            }
        }
        Ok(())
    }
}

/// Create or overwrite `path` with `content`
fn echo_to_file(path: &StatPath, content: &str) -> Result<()> {
    std::fs::write(path.as_path(), content)
        .map_err(|e| QuotaboxError::Cgroup(format!("cannot create file '{}': {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &StatPath, content: &[u8]) {
        std::fs::write(path.as_path(), content).unwrap();
    }

    #[test]
    fn test_setup_without_root_disables() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let controller = ResourceController::setup(&missing, 42, &StatNames::default()).unwrap();
        assert!(controller.is_none());
    }

    #[test]
    fn test_setup_creates_folder_and_enables_counters() {
        let dir = tempfile::tempdir().unwrap();
        let names = StatNames::default();
        let controller = ResourceController::setup(dir.path(), 42, &names).unwrap().unwrap();

        assert_eq!(controller.folder(), dir.path().join("42"));
        let tasks = std::fs::read_to_string(dir.path().join("42").join(&names.tasks)).unwrap();
        assert_eq!(tasks, "42");
        assert_eq!(read_stat_file(controller.memory_path()), Ok(1));
    }

    #[test]
    fn test_setup_reclaims_empty_leftover_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("7")).unwrap();
        let controller = ResourceController::setup(dir.path(), 7, &StatNames::default()).unwrap();
        assert!(controller.is_some());
    }

    #[test]
    fn test_setup_fails_when_leftover_folder_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("7")).unwrap();
        std::fs::write(dir.path().join("7").join("tasks"), "1").unwrap();
        let err = ResourceController::setup(dir.path(), 7, &StatNames::default()).unwrap_err();
        assert!(matches!(err, QuotaboxError::Cgroup(_)));
    }

    #[test]
    fn test_read_stat_failure_modes() {
        let dir = tempfile::tempdir().unwrap();
        let base = StatPath::new(dir.path()).unwrap();

        let missing = base.join("missing").unwrap();
        assert!(matches!(read_stat_file(&missing), Err(StatReadError::Open(_))));

        let empty = base.join("empty").unwrap();
        write(&empty, b"");
        assert_eq!(read_stat_file(&empty), Err(StatReadError::Empty));

        let full = base.join("full").unwrap();
        write(&full, &[b'1'; STAT_BUFFER_CAPACITY]);
        assert_eq!(
            read_stat_file(&full),
            Err(StatReadError::Truncated(STAT_BUFFER_CAPACITY))
        );

        let garbage = base.join("garbage").unwrap();
        write(&garbage, b"lots\n");
        assert_eq!(read_stat_file(&garbage), Err(StatReadError::Parse));

        let good = base.join("good").unwrap();
        write(&good, b"123456\n");
        assert_eq!(read_stat_file(&good), Ok(123456));
    }

    #[test]
    fn test_teardown_removes_folder() {
        let dir = tempfile::tempdir().unwrap();
        let names = StatNames::default();
        let controller = ResourceController::setup(dir.path(), 9, &names).unwrap().unwrap();

        // a real controller folder has no regular files; emulate that
        for entry in std::fs::read_dir(controller.folder()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        controller.teardown().unwrap();
        assert!(!dir.path().join("9").exists());

        // already gone is fine
        controller.teardown().unwrap();
    }
}
