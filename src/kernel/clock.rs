//! Process clock access for native accounting

/// Tick rate assumed when `sysconf(_SC_CLK_TCK)` is unavailable
pub const DEFAULT_TICKS_PER_SECOND: i64 = 100;

/// Processor time (user + system) consumed by this process, in clock ticks
///
/// Returns 0 when `times(2)` fails.
pub fn process_clock_ticks() -> i64 {
    let mut tms = libc::tms {
        tms_utime: 0,
        tms_stime: 0,
        tms_cutime: 0,
        tms_cstime: 0,
    };
    let rc = unsafe { libc::times(&mut tms) };
    if rc == -1 as libc::clock_t {
        return 0;
    }
    (tms.tms_utime as i64).wrapping_add(tms.tms_stime as i64)
}

/// Clock ticks per second as reported by `sysconf(_SC_CLK_TCK)`
pub fn ticks_per_second() -> i64 {
    let rate = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if rate <= 0 {
        log::warn!("_SC_CLK_TCK unavailable, assuming {} ticks per second", DEFAULT_TICKS_PER_SECOND);
        return DEFAULT_TICKS_PER_SECOND;
    }
    rate as i64
}

/// Convert platform clock ticks to milliseconds
pub fn ticks_to_ms(ticks: i64, ticks_per_second: i64) -> i64 {
    if ticks_per_second <= 0 {
        return 0;
    }
    ticks.wrapping_mul(1000) / ticks_per_second
}
