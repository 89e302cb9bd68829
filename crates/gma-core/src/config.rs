use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.groupme.com/v3";

const TOKEN_FILE: &str = "token.txt";

/// Typed runtime configuration.
///
/// Everything is overridable from the environment; `.env` is honored without
/// clobbering variables that are already set. The access token itself is an
/// opaque string — where it comes from (flag, env, token file) is resolved
/// here and nowhere else.
#[derive(Clone, Debug)]
pub struct Config {
    pub token: Option<String>,
    pub api_base: String,

    // Fetcher tuning
    pub page_size: u32,
    pub page_delay: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub http_timeout: Duration,

    /// Default parent directory for archive output.
    pub archive_root: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let token = env_str("GROUPME_ACCESS_TOKEN")
            .and_then(non_empty)
            .or_else(|| token_from_file(Path::new(TOKEN_FILE)));

        Ok(Self {
            token,
            api_base: env_str("GROUPME_API_BASE")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            page_size: env_u32("GMA_PAGE_SIZE").unwrap_or(100),
            page_delay: Duration::from_millis(env_u64("GMA_PAGE_DELAY_MS").unwrap_or(100)),
            max_retries: env_u32("GMA_MAX_RETRIES").unwrap_or(3),
            retry_backoff: Duration::from_millis(env_u64("GMA_RETRY_BACKOFF_MS").unwrap_or(500)),
            http_timeout: Duration::from_secs(env_u64("GMA_HTTP_TIMEOUT_SECS").unwrap_or(30)),
            archive_root: PathBuf::from(
                env_str("GMA_ARCHIVE_ROOT").unwrap_or_else(|| "archives".to_string()),
            ),
        })
    }

    /// Resolve the access token: an explicit flag wins over the environment
    /// and the token file.
    pub fn resolve_token(&self, flag: Option<String>) -> Result<String> {
        flag.and_then(non_empty)
            .or_else(|| self.token.clone())
            .ok_or_else(|| {
                Error::Config(
                    "access token not found: pass --token, set GROUPME_ACCESS_TOKEN, \
                     or create token.txt"
                        .to_string(),
                )
            })
    }
}

/// First line of the token file, if present and non-empty.
fn token_from_file(path: &Path) -> Option<String> {
    let txt = fs::read_to_string(path).ok()?;
    txt.lines()
        .next()
        .map(|l| l.trim().to_string())
        .and_then(non_empty)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
