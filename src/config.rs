//! Storage settings for an engine instance
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub path: Option<PathBuf>, // ignored when `temporary` is set
    pub temporary: bool,
    pub flush_every_ms: Option<u64>,
    pub cache_capacity: u64, // bytes handed to sled's page cache
    pub seed_standard_catalog: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            path: None,
            temporary: false,
            flush_every_ms: Some(500),
            cache_capacity: 64 * 1024 * 1024,
            seed_standard_catalog: true,
        }
    }
}

impl LifecycleConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
    pub fn set_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }
    pub fn set_flush_every_ms(mut self, every: Option<u64>) -> Self {
        self.flush_every_ms = every;
        self
    }
    pub fn set_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }
    pub fn set_seed_standard_catalog(mut self, seed: bool) -> Self {
        self.seed_standard_catalog = seed;
        self
    }

    pub fn to_sled(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .temporary(self.temporary)
            .flush_every_ms(self.flush_every_ms)
            .cache_capacity(self.cache_capacity);
        if let Some(path) = &self.path {
            config = config.path(path);
        }
        config
    }

    pub fn open_db(&self) -> sled::Result<sled::Db> {
        self.to_sled().open()
    }
}
