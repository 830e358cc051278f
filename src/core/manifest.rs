//! Channel registry owned by the sandbox instance
//!
//! Teardown closes the registry and hands it to the injected
//! [`RegistryTeardown`], which releases whatever the runtime holds behind the
//! channels. The descriptors themselves stay alive, so the accounting pass
//! that follows still reads final counters.

use crate::config::types::ChannelDescriptor;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// Releases sandbox-held resources behind the channel table
///
/// Called at most once, from finalization. Counters must stay readable
/// afterwards.
pub trait RegistryTeardown: Send + Sync {
    fn release(&self, channels: &[ChannelDescriptor]);
}

impl<F> RegistryTeardown for F
where
    F: Fn(&[ChannelDescriptor]) + Send + Sync,
{
    fn release(&self, channels: &[ChannelDescriptor]) {
        self(channels)
    }
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: Vec<ChannelDescriptor>,
    closed: AtomicBool,
    release: Option<Box<dyn RegistryTeardown>>,
}

impl ChannelRegistry {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            channels,
            closed: AtomicBool::new(false),
            release: None,
        }
    }

    /// Install the release primitive run by [`teardown`](Self::teardown)
    pub fn set_teardown(&mut self, release: Box<dyn RegistryTeardown>) {
        self.release = Some(release);
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the registry and release its resources; idempotent.
    /// Returns whether this call closed it.
    pub fn teardown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(release) = &self.release {
            release.release(&self.channels);
        }
        debug!("Channel registry closed ({} channels)", self.channels.len());
        true
    }
}
