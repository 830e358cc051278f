//! Resource accounting
//!
//! - `channels`: per-class channel quota aggregation
//! - `collector`: native and extended system metrics strategies
//! - `report`: report assembly, text format, write-once slot

pub mod channels;
pub mod collector;
pub mod report;

pub use channels::ChannelQuotaAggregator;
pub use collector::{select_collector, AccountingCollector, ExtendedCollector, NativeCollector};
pub use report::{ReportAssembler, ReportSlot, BASELINE_ACCOUNTING};
