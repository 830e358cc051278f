/// Accounting report assembly and the write-once report slot
///
/// Text format (version 1), one record of twelve space-separated decimal
/// integers:
///
/// ```text
/// realCpuMs userCpuMs memoryBytes swapBytes
/// localGets localGetBytes localPuts localPutBytes
/// netGets netGetBytes netPuts netPutBytes
/// ```
///
/// Field order is an external contract; change it only together with
/// [`REPORT_FORMAT_VERSION`].
use crate::config::types::{
    AccountingReport, ChannelUsage, IoBucket, QuotaboxError, Result, SystemMetrics,
};
use std::cell::UnsafeCell;
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

pub const REPORT_FORMAT_VERSION: u32 = 1;

/// Capacity of the report text buffer
pub const REPORT_CAPACITY: usize = 512;

/// Accessor value before a report has been sealed
pub const BASELINE_ACCOUNTING: &str = "0 0 0 0 0 0 0 0 0 0 0 0";

/// Inline text buffer implementing `fmt::Write` without heap allocation
///
/// Writing past the capacity fails and leaves the buffer unchanged.
#[derive(Clone, Copy)]
pub struct FixedText<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedText<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    pub fn as_str(&self) -> &str {
        // only complete &str values are ever copied in
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> Default for FixedText<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Write for FixedText<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.len + bytes.len() > N {
            return Err(fmt::Error);
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

impl<const N: usize> fmt::Debug for FixedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl AccountingReport {
    /// The single formatting routine for the report text
    pub fn write_text<W: Write>(&self, out: &mut W) -> fmt::Result {
        let m = &self.metrics;
        write!(
            out,
            "{} {} {} {}",
            m.real_cpu_ms, m.user_cpu_ms, m.memory_bytes, m.swap_bytes
        )?;
        // joins the system group and the channel group
        out.write_char(' ')?;
        write!(
            out,
            "{} {} {} {} {} {} {} {}",
            self.local.gets_count,
            self.local.get_bytes,
            self.local.puts_count,
            self.local.put_bytes,
            self.network.gets_count,
            self.network.get_bytes,
            self.network.puts_count,
            self.network.put_bytes
        )
    }

    /// Report text in a fixed buffer
    pub fn to_fixed_text(&self) -> Result<FixedText<REPORT_CAPACITY>> {
        let mut text = FixedText::new();
        self.write_text(&mut text)
            .map_err(|_| QuotaboxError::Report("report exceeds text capacity".to_string()))?;
        Ok(text)
    }
}

impl fmt::Display for AccountingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_text(f)
    }
}

/// Merge system metrics and channel usage into a report
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn assemble(metrics: SystemMetrics, usage: ChannelUsage) -> AccountingReport {
        AccountingReport {
            metrics,
            local: usage.local,
            network: usage.network,
        }
    }
}

const SLOT_EMPTY: u8 = 0;
const SLOT_WRITING: u8 = 1;
const SLOT_SEALED: u8 = 2;

/// Why a report could not be sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealError {
    /// Another pass already sealed, or is sealing, the slot
    AlreadySealed,
    /// The text did not fit the buffer; the slot stays empty
    Overflow,
}

/// Write-once holder of the final report
///
/// One writer wins the `EMPTY -> WRITING` transition and publishes with
/// `SEALED`. Readers only touch the cells after observing `SEALED`, so the
/// text they see is always one complete assembly.
pub struct ReportSlot {
    state: AtomicU8,
    report: UnsafeCell<AccountingReport>,
    text: UnsafeCell<FixedText<REPORT_CAPACITY>>,
}

// SAFETY: the cells are written only by the single thread of control that won
// the EMPTY -> WRITING exchange, and read only after SEALED is observed with
// Acquire ordering. After SEALED they are never written again.
unsafe impl Sync for ReportSlot {}

impl ReportSlot {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SLOT_EMPTY),
            report: UnsafeCell::new(AccountingReport {
                metrics: SystemMetrics {
                    real_cpu_ms: 0,
                    user_cpu_ms: 0,
                    memory_bytes: 0,
                    swap_bytes: 0,
                },
                local: IoBucket {
                    gets_count: 0,
                    get_bytes: 0,
                    puts_count: 0,
                    put_bytes: 0,
                },
                network: IoBucket {
                    gets_count: 0,
                    get_bytes: 0,
                    puts_count: 0,
                    put_bytes: 0,
                },
            }),
            text: UnsafeCell::new(FixedText::new()),
        }
    }

    /// Store `report` and its text; only the first call succeeds
    pub fn seal(&self, report: &AccountingReport) -> std::result::Result<&str, SealError> {
        if self
            .state
            .compare_exchange(SLOT_EMPTY, SLOT_WRITING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SealError::AlreadySealed);
        }

        // SAFETY: we hold the WRITING state; nobody else reads or writes the cells
        let text = unsafe { &mut *self.text.get() };
        text.clear();
        if report.write_text(text).is_err() {
            text.clear();
            self.state.store(SLOT_EMPTY, Ordering::Release);
            return Err(SealError::Overflow);
        }
        unsafe {
            *self.report.get() = *report;
        }

        self.state.store(SLOT_SEALED, Ordering::Release);
        Ok(self.text())
    }

    pub fn is_sealed(&self) -> bool {
        self.state.load(Ordering::Acquire) == SLOT_SEALED
    }

    /// Sealed report text, or [`BASELINE_ACCOUNTING`]
    pub fn text(&self) -> &str {
        if self.is_sealed() {
            // SAFETY: sealed cells are immutable
            unsafe { (*self.text.get()).as_str() }
        } else {
            BASELINE_ACCOUNTING
        }
    }

    /// Sealed report, if any
    pub fn report(&self) -> Option<AccountingReport> {
        if self.is_sealed() {
            // SAFETY: sealed cells are immutable
            Some(unsafe { *self.report.get() })
        } else {
            None
        }
    }
}

impl Default for ReportSlot {
    fn default() -> Self {
        Self::new()
    }
}
