//! Connection parameter discovery.
//!
//! Parameters come from environment variables first, then from an optional
//! secret JSON file (credentials), then from a public JSON file (bucket,
//! endpoint, prefix). The result is a single validated [`ConnectionParams`].

use crate::error::{Result, SyncError};
use crate::types::{ConnectionParams, DEFAULT_KEY_PREFIX};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const ACCOUNT_ID_VARS: &[&str] = &["AF_R2_ACCOUNT_ID", "R2_ACCOUNT_ID"];
const BUCKET_VARS: &[&str] = &["AF_R2_BUCKET", "R2_BUCKET"];
const ENDPOINT_VARS: &[&str] = &["AF_R2_ENDPOINT", "R2_ENDPOINT"];
const ACCESS_KEY_VARS: &[&str] = &[
    "AF_R2_ACCESS_KEY",
    "AF_R2_ACCESS_KEY_ID",
    "R2_ACCESS_KEY",
    "R2_ACCESS_KEY_ID",
];
const SECRET_KEY_VARS: &[&str] = &[
    "AF_R2_SECRET_KEY",
    "AF_R2_SECRET_ACCESS_KEY",
    "AF_R2_SECRET_KEY_ID",
    "R2_SECRET_KEY",
    "R2_SECRET_ACCESS_KEY",
];
const TOKEN_VARS: &[&str] = &["AF_R2_TOKEN", "R2_TOKEN"];
const PREFIX_VARS: &[&str] = &["AF_R2_PREFIX_WORKSPACE", "R2_PREFIX_WORKSPACE"];
const PUBLIC_CONFIG_VARS: &[&str] = &["AF_R2_PUBLIC_CONFIG", "R2_PUBLIC_CONFIG"];
const SECRET_CONFIG_VARS: &[&str] = &["AF_R2_CONFIG", "R2_CONFIG"];
const ALLOW_FILE_SECRETS_VARS: &[&str] = &["AF_R2_ALLOW_FILE_SECRETS", "R2_ALLOW_FILE_SECRETS"];

/// Environment variable overriding the workspace root.
pub const WORKSPACE_ROOT_VAR: &str = "AF_WORKSPACE_ROOT";

/// Source of environment variables.
///
/// The process environment in production; a plain map in tests.
pub trait EnvSource {
    /// Value of `name`, or `None` when unset or empty.
    fn var(&self, name: &str) -> Option<String>;

    /// First non-empty value among `names`.
    fn first(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.var(name))
    }
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

/// Fields shared by the public and secret JSON config files.
#[derive(Debug, Clone, Default)]
struct FileConfig {
    account_id: Option<String>,
    bucket: Option<String>,
    endpoint: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    token: Option<String>,
    prefix_workspace: Option<String>,
}

impl FileConfig {
    /// Reads a config object whose fields may use either the short names
    /// (`access_key`) or the environment variable names (`AF_R2_ACCESS_KEY`,
    /// `R2_SECRET_ACCESS_KEY`, ...). The first non-empty string wins.
    fn from_json(value: Value) -> FileConfig {
        let Value::Object(fields) = value else {
            return FileConfig::default();
        };
        FileConfig {
            account_id: pick(&fields, "account_id", ACCOUNT_ID_VARS),
            bucket: pick(&fields, "bucket", BUCKET_VARS),
            endpoint: pick(&fields, "endpoint", ENDPOINT_VARS),
            access_key: pick(&fields, "access_key", ACCESS_KEY_VARS),
            secret_key: pick(&fields, "secret_key", SECRET_KEY_VARS),
            token: pick(&fields, "token", TOKEN_VARS),
            prefix_workspace: pick(&fields, "prefix_workspace", PREFIX_VARS),
        }
    }

    /// Fields set in `other` win over fields set in `self`.
    fn overlay(self, other: FileConfig) -> FileConfig {
        FileConfig {
            account_id: other.account_id.or(self.account_id),
            bucket: other.bucket.or(self.bucket),
            endpoint: other.endpoint.or(self.endpoint),
            access_key: other.access_key.or(self.access_key),
            secret_key: other.secret_key.or(self.secret_key),
            token: other.token.or(self.token),
            prefix_workspace: other.prefix_workspace.or(self.prefix_workspace),
        }
    }
}

fn pick(
    fields: &Map<String, Value>,
    name: &'static str,
    aliases: &[&'static str],
) -> Option<String> {
    std::iter::once(name)
        .chain(aliases.iter().copied())
        .filter_map(|field| fields.get(field).and_then(Value::as_str))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolves the workspace root: `AF_WORKSPACE_ROOT` (with `~` expansion) or
/// the current directory.
pub fn workspace_root(env: &impl EnvSource) -> PathBuf {
    match env.var(WORKSPACE_ROOT_VAR) {
        Some(path) => PathBuf::from(shellexpand::tilde(&path).into_owned()),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn public_config_paths(env: &impl EnvSource, root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = env.first(PUBLIC_CONFIG_VARS) {
        paths.push(PathBuf::from(path));
    }
    paths.push(root.join("AlphaForecasting").join("config").join("r2_public.json"));
    paths.push(root.join("AlphaMorphing").join("config").join("r2_public.json"));
    paths
}

fn secret_config_paths(env: &impl EnvSource, root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = env.first(SECRET_CONFIG_VARS) {
        paths.push(PathBuf::from(path));
    }
    paths.push(root.join("AlphaForecasting").join(".secrets").join("r2.json"));
    paths.push(root.join("AlphaMorphing").join(".secrets").join("r2.json"));
    paths.push(root.join("runpod_tricks").join(".secrets").join("r2.json"));
    paths.push(root.join("secrets_bundle.json"));
    paths
}

/// Loads the first candidate that exists and parses; broken files are skipped.
fn load_first_json(paths: &[PathBuf]) -> FileConfig {
    for path in paths {
        if !path.exists() {
            continue;
        }
        match read_json(path) {
            Ok(cfg) => {
                debug!("Loaded R2 config file {:?}", path);
                return cfg;
            }
            Err(e) => debug!("Ignoring unreadable config file {:?}: {}", path, e),
        }
    }
    FileConfig::default()
}

fn read_json(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)?;
    Ok(FileConfig::from_json(serde_json::from_str(&content)?))
}

fn file_secrets_allowed(env: &impl EnvSource) -> bool {
    match env.first(ALLOW_FILE_SECRETS_VARS) {
        Some(flag) => matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => true,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Assembles connection parameters from the environment and config files
/// found under `root`.
///
/// Fails with [`SyncError::Config`] naming every missing required parameter
/// (bucket, endpoint, access key, secret key).
pub fn load_connection_params(env: &impl EnvSource, root: &Path) -> Result<ConnectionParams> {
    let public = load_first_json(&public_config_paths(env, root));
    let secrets_allowed = file_secrets_allowed(env);
    let secret = if secrets_allowed {
        load_first_json(&secret_config_paths(env, root))
    } else {
        FileConfig::default()
    };

    // Credentials only ever come from the secret file.
    let access_from_file = secret.access_key.clone();
    let secret_from_file = secret.secret_key.clone();
    let token_from_file = secret.token.clone();
    let merged = public.overlay(secret);

    let account_id = non_empty(env.first(ACCOUNT_ID_VARS).or(merged.account_id));
    let bucket = non_empty(env.first(BUCKET_VARS).or(merged.bucket));
    let mut endpoint = non_empty(env.first(ENDPOINT_VARS).or(merged.endpoint));
    let access_key = non_empty(env.first(ACCESS_KEY_VARS).or(access_from_file));
    let secret_key = non_empty(env.first(SECRET_KEY_VARS).or(secret_from_file));
    let token = non_empty(env.first(TOKEN_VARS).or(token_from_file));
    let key_prefix = non_empty(env.first(PREFIX_VARS).or(merged.prefix_workspace))
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

    if endpoint.is_none() {
        if let Some(account) = &account_id {
            endpoint = Some(format!("https://{}.r2.cloudflarestorage.com", account));
        }
    }

    let mut missing = Vec::new();
    if bucket.is_none() {
        missing.push("AF_R2_BUCKET".to_string());
    }
    if endpoint.is_none() {
        missing.push("AF_R2_ENDPOINT".to_string());
    }
    if access_key.is_none() {
        missing.push("AF_R2_ACCESS_KEY".to_string());
    }
    if secret_key.is_none() {
        missing.push("AF_R2_SECRET_KEY".to_string());
    }

    match (bucket, endpoint, access_key, secret_key) {
        (Some(bucket), Some(endpoint), Some(access_key), Some(secret_key)) => {
            let params = ConnectionParams {
                account_id,
                bucket,
                endpoint,
                access_key,
                secret_key,
                token,
                key_prefix,
            };
            debug!(
                "R2 config loaded for bucket={} endpoint={} prefix={}",
                params.bucket, params.endpoint, params.key_prefix
            );
            Ok(params)
        }
        _ => Err(SyncError::Config { missing }),
    }
}
