//! Runtime settings resolved from CLI overrides, the process environment and
//! an optional `.env` file, in that order of precedence.

use anyhow::{Context, Result, bail};
use clap::Args;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::fetcher::DEFAULT_USER_AGENT;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DB_PATH: &str = "subfeed.db";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SYNC_CONCURRENCY: usize = 1;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const KEY_DB_PATH: &str = "SUBFEED_DB_PATH";
const KEY_HOST: &str = "SUBFEED_HOST";
const KEY_PORT: &str = "SUBFEED_PORT";
const KEY_SYNC_CONCURRENCY: &str = "SUBFEED_SYNC_CONCURRENCY";
const KEY_USER_AGENT: &str = "SUBFEED_USER_AGENT";
const KEY_LOG: &str = "SUBFEED_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub sync_concurrency: usize,
    pub user_agent: String,
    pub log_level: String,
}

impl RuntimeSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Values given on the command line. `None` falls through to the
/// environment, then the `.env` file, then the defaults.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub db_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub sync_concurrency: Option<usize>,
    pub env_path: Option<PathBuf>,
}

/// Flags shared by every binary.
#[derive(Debug, Clone, Default, Args)]
pub struct CliArgs {
    /// SQLite database file
    #[arg(long = "db", value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Channels synced at once by a full refresh
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Settings file read before the environment
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
}

impl From<CliArgs> for RuntimeOverrides {
    fn from(args: CliArgs) -> Self {
        Self {
            db_path: args.db_path,
            host: args.host,
            port: args.port,
            sync_concurrency: args.concurrency,
            env_path: args.env_file,
        }
    }
}

pub fn resolve_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_settings(&file_vars, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let lookup = |key: &str| {
        env_lookup(key)
            .or_else(|| file_vars.get(key).cloned())
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    };

    let db_path = overrides
        .db_path
        .or_else(|| lookup(KEY_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
    let host = non_blank(overrides.host)
        .or_else(|| lookup(KEY_HOST))
        .unwrap_or_else(|| DEFAULT_HOST.to_owned());
    let port = match overrides.port {
        Some(port) => port,
        None => parse_number(KEY_PORT, lookup(KEY_PORT))?.unwrap_or(DEFAULT_PORT),
    };
    let sync_concurrency = match overrides.sync_concurrency {
        Some(value) => value,
        None => parse_number(KEY_SYNC_CONCURRENCY, lookup(KEY_SYNC_CONCURRENCY))?
            .unwrap_or(DEFAULT_SYNC_CONCURRENCY),
    };
    if sync_concurrency == 0 {
        bail!("{KEY_SYNC_CONCURRENCY} must be at least 1");
    }

    Ok(RuntimeSettings {
        db_path,
        host,
        port,
        sync_concurrency,
        user_agent: lookup(KEY_USER_AGENT).unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
        log_level: lookup(KEY_LOG).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned()),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|value| {
        value
            .parse::<T>()
            .ok()
            .with_context(|| format!("{key} has an invalid value {value:?}"))
    })
    .transpose()
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Reads `KEY=value` pairs. Blank lines, `#` comments and lines without `=`
/// are skipped; an `export ` prefix and one level of matching quotes are
/// stripped. A missing file yields no values.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content.lines().filter_map(parse_env_line).collect())
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|quote| value.strip_prefix(*quote)?.strip_suffix(*quote))
        .unwrap_or(value);
    Some((key.to_owned(), unquoted.to_owned()))
}
