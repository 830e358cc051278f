/// Channel quota aggregation
///
/// Classifies every channel of the table into the local or network class and
/// sums its counters. Runs on the fault path: no allocation, no panics on
/// attacker-controlled counter values.
use crate::config::types::{
    ChannelDescriptor, ChannelUsage, IoBucket, QuotaboxError, Result, SourceKind,
    UnsupportedKindPolicy,
};
use log::{error, warn};

/// Class a channel's counters are accumulated into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    Local,
    Network,
}

/// Classify a source kind; `None` for kinds accounting does not support
pub fn classify(source: SourceKind) -> Option<ChannelClass> {
    match source {
        SourceKind::Regular | SourceKind::Character => Some(ChannelClass::Local),
        SourceKind::Network => Some(ChannelClass::Network),
        SourceKind::Other(_) => None,
    }
}

pub struct ChannelQuotaAggregator {
    policy: UnsupportedKindPolicy,
}

impl ChannelQuotaAggregator {
    pub fn new(policy: UnsupportedKindPolicy) -> Self {
        Self { policy }
    }

    /// Sum counters per class in table order
    ///
    /// Under `ShortCircuit` the first unsupported channel fails the whole
    /// aggregation and no partial totals are returned. Under `Partial` such
    /// channels are skipped with a warning.
    pub fn aggregate(&self, channels: &[ChannelDescriptor]) -> Result<ChannelUsage> {
        let mut local = IoBucket::default();
        let mut network = IoBucket::default();

        for (index, channel) in channels.iter().enumerate() {
            let bucket = match classify(channel.source()) {
                Some(ChannelClass::Local) => &mut local,
                Some(ChannelClass::Network) => &mut network,
                None => match self.policy {
                    UnsupportedKindPolicy::ShortCircuit => {
                        error!(
                            "internal error. source type {} of channel {} not supported",
                            channel.source(),
                            index
                        );
                        return Err(QuotaboxError::UnsupportedChannelKind {
                            channel: index,
                            kind: channel.source(),
                        });
                    }
                    UnsupportedKindPolicy::Partial => {
                        warn!(
                            "channel {} ({}) skipped by {} policy: source type {} not supported",
                            index,
                            channel.name(),
                            self.policy,
                            channel.source()
                        );
                        continue;
                    }
                },
            };
            bucket.add(channel.counters());
        }

        Ok(ChannelUsage { local, network })
    }

    /// Aggregate, falling back to all-zero buckets on failure
    pub fn aggregate_or_zero(&self, channels: &[ChannelDescriptor]) -> ChannelUsage {
        self.aggregate(channels).unwrap_or_default()
    }
}

impl Default for ChannelQuotaAggregator {
    fn default() -> Self {
        Self::new(UnsupportedKindPolicy::ShortCircuit)
    }
}
