use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG: &str = "RAPORD_LOG";
pub const ENV_WORKSPACE: &str = "RAPORD_WORKSPACE";
pub const ENV_CLASS_TAG_FALLBACK: &str = "RAPORD_CLASS_TAG_FALLBACK";

const DEFAULT_LOG_FILTER: &str = "rapord=info,warn";
const DEFAULT_CLASS_TAG: &str = "-";

/// Subjects used for a scope that has no curriculum of its own yet.
pub const BUILTIN_CURRICULUM: [&str; 14] = [
    "Pendidikan Agama",
    "PPKn",
    "Bahasa Indonesia",
    "Matematika",
    "Sejarah Indonesia",
    "Bahasa Inggris",
    "Seni Budaya",
    "PJOK",
    "Prakarya",
    "Fisika",
    "Kimia",
    "Biologi",
    "Ekonomi",
    "Geografi",
];

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
    pub class_tag_fallback: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            workspace: None,
            class_tag_fallback: DEFAULT_CLASS_TAG.to_string(),
        }
    }
}

impl DaemonConfig {
    /// Reads the process environment, after loading `.env` when one exists.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            log_filter: non_empty(ENV_LOG).unwrap_or(defaults.log_filter),
            workspace: non_empty(ENV_WORKSPACE).map(PathBuf::from),
            class_tag_fallback: non_empty(ENV_CLASS_TAG_FALLBACK)
                .unwrap_or(defaults.class_tag_fallback),
        }
    }
}

/// Logs go to stderr; stdout is reserved for protocol responses.
pub fn init_tracing(cfg: &DaemonConfig) {
    let filter = EnvFilter::try_new(&cfg.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}
