use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    pub paths: PathsSection,
    pub proxy: ProxySection,
    pub download: DownloadSection,
    pub cover: CoverSection,
    pub driver: DriverSection,
}

impl BatchConfig {
    /// Input CSV for a batch: `<input_dir>/<batch>`.
    pub fn worklist_path(&self, batch: &str) -> PathBuf {
        Path::new(&self.paths.input_dir).join(batch)
    }

    /// Output root for a batch: `<output_dir>/<batch>`. Ledgers, the run
    /// log and the per-item directories all live under this root.
    pub fn output_root(&self, batch: &str) -> PathBuf {
        Path::new(&self.paths.output_dir).join(batch)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub input_dir: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    pub api_url: String,
    pub lease_ttl_seconds: u64,
    pub max_attempts: usize,
    pub retry_delay_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub tool: String,
    pub site: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverSection {
    pub tool: String,
    pub timeout_seconds: u64,
    pub video_extension: String,
    pub image_extension: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverSection {
    pub checkpoint_interval: usize,
}

pub fn load_batch_config<P: AsRef<Path>>(path: P) -> Result<BatchConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/avfetch.toml");
        let config = load_batch_config(path).expect("config should parse");
        assert_eq!(config.proxy.lease_ttl_seconds, 300);
        assert_eq!(config.proxy.max_attempts, 5);
        assert_eq!(config.download.timeout_seconds, 180);
        assert_eq!(config.cover.video_extension, "mp4");
        assert_eq!(config.driver.checkpoint_interval, 1000);
    }

    #[test]
    fn batch_paths_derive_from_name() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/avfetch.toml");
        let config = load_batch_config(path).unwrap();
        assert_eq!(
            config.worklist_path("week_03.csv"),
            Path::new("batches").join("week_03.csv")
        );
        assert_eq!(
            config.output_root("week_03.csv"),
            Path::new("small_output").join("week_03.csv")
        );
    }
}
