//! Process exit primitive

/// Terminates the process; nothing after `exit` is expected to run
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// `_exit(2)`: no atexit handlers, no stdio flush, no destructors
pub struct ImmediateExit;

impl ProcessExit for ImmediateExit {
    fn exit(&self, code: i32) {
        log::logger().flush();
        unsafe { libc::_exit(code) }
    }
}
