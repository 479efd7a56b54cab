#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::catalog::CatalogSettings;
use crate::extractor::DEFAULT_PROGRAM;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_NEONTUBE_PORT: u16 = 5000;
pub const DEFAULT_NEONTUBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_WWW_ROOT: &str = "static";
pub const DEFAULT_CARDS_DIR: &str = "static/temp_cards";
pub const DEFAULT_COUNTRY: &str = "TR";
pub const DEFAULT_LANGUAGE: &str = "tr";
pub const DEFAULT_MUSIC_API_BASE: &str = "https://anonmusic.glitch.me";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    pub www_root: PathBuf,
    pub cards_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub default_country: String,
    pub language: String,
    pub music_api_base: String,
}

impl RuntimeSettings {
    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            default_country: self.default_country.clone(),
            language: self.language.clone(),
        }
    }
}

/// Values supplied on the command line; they win over both the environment
/// and the env file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub cards_dir: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub country: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings(&file_vars, env_var_string, overrides))
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let value = |key: &str, override_value: Option<String>, default: &str| -> String {
        override_value
            .and_then(non_blank)
            .or_else(|| lookup_value(key, file_vars, &env_lookup))
            .unwrap_or_else(|| default.to_string())
    };
    let path_value = |key: &str, override_value: Option<PathBuf>, default: &str| -> PathBuf {
        PathBuf::from(value(
            key,
            override_value.map(|path| path.to_string_lossy().into_owned()),
            default,
        ))
    };

    let port = overrides
        .port
        .or_else(|| {
            lookup_value("NEONTUBE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_NEONTUBE_PORT);

    RuntimeSettings {
        host: value("NEONTUBE_HOST", overrides.host, DEFAULT_NEONTUBE_HOST),
        port,
        www_root: path_value("WWW_ROOT", overrides.www_root, DEFAULT_WWW_ROOT),
        cards_dir: path_value("CARDS_DIR", overrides.cards_dir, DEFAULT_CARDS_DIR),
        ytdlp_path: path_value("YTDLP_PATH", overrides.ytdlp_path, DEFAULT_PROGRAM),
        default_country: value("NEONTUBE_COUNTRY", overrides.country, DEFAULT_COUNTRY)
            .to_ascii_uppercase(),
        language: value("NEONTUBE_LANGUAGE", None, DEFAULT_LANGUAGE),
        music_api_base: value("MUSIC_API_BASE", None, DEFAULT_MUSIC_API_BASE)
            .trim_end_matches('/')
            .to_string(),
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
