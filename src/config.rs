use std::path::PathBuf;

use serde::Deserialize;

use crate::uploads::UploadPolicy;

const ENV_PREFIX: &str = "CARHIRE_";

fn def_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn def_log_level() -> String {
    String::from("info")
}

fn def_compact_threshold() -> u64 {
    1000
}

fn def_compact_interval_secs() -> u64 {
    30
}

fn def_allowed_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "pdf"].map(String::from).to_vec()
}

fn def_seed_sample_catalog() -> bool {
    true
}

/// Host settings, read from `CARHIRE_*` environment variables.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// directory holding the journal
    #[serde(default = "def_data_dir")]
    pub data_dir: PathBuf,

    /// default tracing filter, overridden by `RUST_LOG`
    #[serde(default = "def_log_level")]
    pub log_level: String,

    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,

    /// appends since the last compaction before the compactor rewrites the journal
    #[serde(default = "def_compact_threshold")]
    pub compact_threshold: u64,

    #[serde(default = "def_compact_interval_secs")]
    pub compact_interval_secs: u64,

    /// where identity documents are written, `<data_dir>/uploads` when unset
    pub upload_dir: Option<PathBuf>,

    #[serde(default)]
    pub upload_policy: UploadPolicy,

    /// comma separated, compared case-insensitively
    #[serde(default = "def_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// add the sample cars when the catalog is empty
    #[serde(default = "def_seed_sample_catalog")]
    pub seed_sample_catalog: bool,
}

impl Config {
    pub fn from_env() -> Result<Config, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env::<Config>()
    }

    /// Same as `from_env` but over explicit `(KEY, value)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Result<Config, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(pairs)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("carhire.wal")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }
}
