use std::path::PathBuf;

use mxw_shader::profile::Profile;
use mxw_shader::Backend;

/// Settings for a [PipelineCache](crate::PipelineCache) chosen by the caller when creating the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineCacheConfig {
    /// The code generated for each stage before linking.
    pub backend: Backend,
    /// Host capabilities used for every program.
    pub profile: Profile,
    /// The number of disk cache compiler workers.
    /// Defaults to one less than the available parallelism.
    pub worker_count: Option<usize>,
    /// Write each new pipeline to the cache file and load the file on startup.
    pub disk_cache: bool,
    /// The folder containing one pipeline cache file for each title.
    pub cache_dir: PathBuf,
    /// Build disk cache pipelines on the worker threads instead of the calling thread.
    pub use_asynchronous_shaders: bool,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Spirv,
            profile: Profile::default(),
            worker_count: None,
            disk_cache: true,
            cache_dir: PathBuf::from("shader"),
            use_asynchronous_shaders: true,
        }
    }
}

impl PipelineCacheConfig {
    pub fn worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get().saturating_sub(1))
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// The cache file for the title with id `title_id`.
    pub fn cache_file(&self, title_id: u64) -> PathBuf {
        self.cache_dir.join(format!("{title_id:016x}.bin"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn worker_count_is_at_least_one() {
        let config = PipelineCacheConfig {
            worker_count: Some(0),
            ..Default::default()
        };
        assert_eq!(1, config.worker_count());
        assert!(PipelineCacheConfig::default().worker_count() >= 1);
    }

    #[test]
    fn cache_file_per_title() {
        let config = PipelineCacheConfig {
            cache_dir: PathBuf::from("cache"),
            ..Default::default()
        };
        assert_eq!(
            PathBuf::from("cache").join("0100f2c0115b6000.bin"),
            config.cache_file(0x0100f2c0115b6000)
        );
    }
}
