//! Runtime configuration.

/// How long clean objects stay materialized in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRetention {
    /// Keep every registered object materialized.
    Strong,
    /// Keep at most `max_clean` COMMITTED objects materialized; the least
    /// recently used beyond the bound are turned HOLLOW. Dirty objects are
    /// never evicted.
    Bounded {
        /// Maximum number of clean materialized objects.
        max_clean: usize,
    },
}

/// Configuration shared by a data domain and its contexts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the shared snapshot cache.
    pub snapshot_cache_size: usize,

    /// Retention policy of each context's identity map.
    pub object_retention: ObjectRetention,

    /// Whether to detect phantom modifications before committing.
    pub validate_before_commit: bool,

    /// Whether committed changes are broadcast to sibling contexts.
    pub notify_peers: bool,

    /// Maximum rows per batch (0 = unbounded).
    pub max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_cache_size: 10_000,
            object_retention: ObjectRetention::Strong,
            validate_before_commit: true,
            notify_peers: true,
            max_batch_size: 0,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snapshot cache capacity.
    #[must_use]
    pub const fn snapshot_cache_size(mut self, size: usize) -> Self {
        self.snapshot_cache_size = size;
        self
    }

    /// Sets the identity map retention policy.
    #[must_use]
    pub const fn object_retention(mut self, retention: ObjectRetention) -> Self {
        self.object_retention = retention;
        self
    }

    /// Sets whether phantom modifications are detected before commit.
    #[must_use]
    pub const fn validate_before_commit(mut self, value: bool) -> Self {
        self.validate_before_commit = value;
        self
    }

    /// Sets whether sibling contexts are notified of commits.
    #[must_use]
    pub const fn notify_peers(mut self, value: bool) -> Self {
        self.notify_peers = value;
        self
    }

    /// Sets the maximum number of rows per batch.
    #[must_use]
    pub const fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.snapshot_cache_size, 10_000);
        assert_eq!(config.object_retention, ObjectRetention::Strong);
        assert!(config.validate_before_commit);
        assert!(config.notify_peers);
        assert_eq!(config.max_batch_size, 0);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .snapshot_cache_size(16)
            .object_retention(ObjectRetention::Bounded { max_clean: 4 })
            .notify_peers(false)
            .max_batch_size(100);

        assert_eq!(config.snapshot_cache_size, 16);
        assert_eq!(
            config.object_retention,
            ObjectRetention::Bounded { max_clean: 4 }
        );
        assert!(!config.notify_peers);
        assert_eq!(config.max_batch_size, 100);
    }
}
