//! Versioned state channels.
//!
//! Every field of the shared pipeline state lives in its own [`Versioned`]
//! container. The version counter is bumped by the reducer layer whenever a
//! merge actually changes the channel, which makes state evolution observable
//! in checkpoints without diffing values.

use serde::{Deserialize, Serialize};

/// A value paired with a monotonically increasing version counter.
///
/// Versions start at 1. Reducers bump the version after applying a
/// non-empty update; reads never change it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    value: T,
    version: u32,
}

impl<T> Versioned<T> {
    /// Create a channel with an explicit version (used when restoring from a
    /// checkpoint).
    pub fn new(value: T, version: u32) -> Self {
        Self {
            value,
            version: version.max(1),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Record that a merge changed this channel.
    pub fn bump(&mut self) {
        self.version = self.version.saturating_add(1);
    }

    /// Consume the channel, returning its value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Clone> Versioned<T> {
    /// Clone the current value (point-in-time view).
    pub fn snapshot(&self) -> T {
        self.value.clone()
    }
}

impl<T: Default> Default for Versioned<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            version: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_start_at_one_and_bump() {
        let mut ch: Versioned<Vec<u32>> = Versioned::default();
        assert_eq!(ch.version(), 1);
        ch.get_mut().push(7);
        ch.bump();
        assert_eq!(ch.version(), 2);
        assert_eq!(ch.snapshot(), vec![7]);
    }

    #[test]
    fn restored_version_is_clamped_to_one() {
        let ch = Versioned::new(0u8, 0);
        assert_eq!(ch.version(), 1);
    }
}
