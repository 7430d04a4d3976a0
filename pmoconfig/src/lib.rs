//! # PMORadio Configuration Module
//!
//! Gestion de la configuration de PMORadio :
//! - valeurs par défaut embarquées (`pmoradio.yaml`)
//! - fusion avec le fichier `config.yaml` du répertoire de configuration
//! - surcharges par variables d'environnement (`PMORADIO_CONFIG__HOST__HTTP_PORT=9000`)
//! - accesseurs typés pour les valeurs de l'hôte (port, URL, logger)
//! - accès singleton thread-safe
//!
//! Les crates métier lisent leur propre sous-arbre avec [`Config::get_section`]
//! et l'interprètent dans leurs structures typées.
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let segments = config.get_managed_dir(&["radio", "segments_dir"], "static")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmoradio.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMORadio configuration"));
}

const ENV_CONFIG_DIR: &str = "PMORADIO_CONFIG";
const ENV_PREFIX: &str = "PMORADIO_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmoradio";
const CONFIG_FILE_NAME: &str = "config.yaml";

const DEFAULT_HTTP_PORT: u16 = 8582;
const DEFAULT_BASE_URL: &str = "localhost";
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Configuration manager for PMORadio
///
/// The whole tree is kept as a lower-cased YAML value behind a mutex and
/// written back to `config.yaml` after every change.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    ///
    /// 1. the provided `directory` if not empty
    /// 2. the `PMORADIO_CONFIG` environment variable
    /// 3. `.pmoradio` in the current directory
    /// 4. `.pmoradio` in the user's home directory
    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Using config directory from env");
            return PathBuf::from(env_path);
        }

        let local = Path::new(CONFIG_DIR_NAME);
        if local.exists() {
            return local.to_path_buf();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        local.to_path_buf()
    }

    /// Creates the directory if needed and checks it is readable and writable
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Cannot create config directory {}", path.display()))?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} n'est pas un répertoire", path.display()));
        }

        let probe = path.join(".write_test");
        fs::write(&probe, b"test")?;
        fs::remove_file(&probe)?;
        fs::read_dir(path)?;

        Ok(())
    }

    /// Loads the configuration from the specified directory
    ///
    /// Embedded defaults are merged with `config.yaml` (if present), keys are
    /// lower-cased, environment overrides are applied and the merged result is
    /// saved back so the file always documents every known key.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join(CONFIG_FILE_NAME);
        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)
                    .with_context(|| format!("Invalid YAML in {}", path.display()))?;
                merge_yaml(&mut merged, &external);
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using embedded defaults");
            }
        }

        let mut value = lower_keys(merged);
        apply_env_overrides(&mut value, env::vars());

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(value),
        };
        config.save()?;
        Ok(config)
    }

    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Répertoire de configuration effectivement utilisé
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Saves the current configuration to `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)
            .with_context(|| format!("Cannot write {}", self.path.display()))?;
        Ok(())
    }

    /// Sets a value at `path` (e.g. `&["host", "http_port"]`) and saves
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data();
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets the value at `path`, or an error if a segment is missing
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data();
        get_value_internal(&data, path)
    }

    /// Désérialise un sous-arbre dans une structure typée.
    ///
    /// Un chemin absent ou une valeur invalide retombe sur `T::default()`,
    /// l'erreur de désérialisation est journalisée.
    pub fn get_section<T>(&self, path: &[&str]) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.get_value(path) {
            Ok(value) => serde_yaml::from_value(value).unwrap_or_else(|err| {
                warn!(section = %path.join("."), "Invalid configuration section: {}", err);
                T::default()
            }),
            Err(_) => T::default(),
        }
    }

    /// Résout un chemin relatif par rapport au répertoire de configuration
    /// et crée le répertoire s'il n'existe pas.
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<PathBuf> {
        let path = Path::new(dir_path);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        };

        if !absolute.exists() {
            fs::create_dir_all(&absolute)
                .with_context(|| format!("Cannot create directory {}", absolute.display()))?;
            info!(directory = %absolute.display(), "Created managed directory");
        }

        Ok(absolute)
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le chemin configuré peut être absolu ou relatif au répertoire de
    /// configuration ; s'il est absent, `default` est enregistré puis utilisé.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_managed_dir(path, default)?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Définit un répertoire géré par la configuration
    pub fn set_managed_dir(&self, path: &[&str], directory: &str) -> Result<()> {
        self.set_value(path, Value::String(directory.to_string()))
    }

    /// Host name or IP advertised in logs and URLs
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_BASE_URL.to_string(),
        }
    }

    /// HTTP port, accepting either a number or a numeric string
    pub fn get_http_port(&self) -> u16 {
        let port = match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Ok(Value::String(s)) => s.trim().parse::<u16>().ok(),
            _ => None,
        };

        port.unwrap_or_else(|| {
            warn!("Invalid or missing host.http_port, using default {}", DEFAULT_HTTP_PORT);
            DEFAULT_HTTP_PORT
        })
    }

    /// Capacité du buffer circulaire de logs
    pub fn get_log_cache_size(&self) -> usize {
        match self.get_value(&["host", "logger", "buffer_capacity"]) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_LOG_BUFFER_CAPACITY),
            _ => DEFAULT_LOG_BUFFER_CAPACITY,
        }
    }

    pub fn get_log_enable_console(&self) -> bool {
        match self.get_value(&["host", "logger", "enable_console"]) {
            Ok(Value::Bool(b)) => b,
            _ => DEFAULT_LOG_ENABLE_CONSOLE,
        }
    }

    /// Niveau de log minimum (ERROR, WARN, INFO, DEBUG, TRACE)
    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }
}

/// Returns the global configuration instance, loaded on first access
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        *data = value;
        return Ok(());
    };

    let Value::Mapping(map) = data else {
        return Err(anyhow!("Cannot set '{}': parent is not a mapping", head));
    };

    let key = Value::String(head.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        Ok(())
    } else {
        let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
        set_value_internal(entry, rest, value)
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        let Value::Mapping(map) = current else {
            return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
        };
        current = map
            .get(Value::String(key.to_lowercase()))
            .ok_or_else(|| anyhow!("Path {} does not exist", path[..=i].join(".")))?;
    }
    Ok(current.clone())
}

/// `PMORADIO_CONFIG__RADIO__IDLE_POLL_SECONDS=10` devient `radio.idle_poll_seconds: 10`
fn apply_env_overrides(config: &mut Value, vars: impl Iterator<Item = (String, String)>) {
    for (key, raw) in vars {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<&str> = suffix.split("__").filter(|s| !s.is_empty()).collect();
        if path.is_empty() {
            continue;
        }
        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw.clone()));
        if let Err(err) = set_value_internal(config, &path, value) {
            warn!(env_var = %key, "Ignoring environment override: {}", err);
        }
    }
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lower_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

/// Fusion récursive : les mappings sont fusionnés clé par clé,
/// les scalaires et les séquences externes remplacent les valeurs par défaut.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Number;

    fn load_in(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn defaults_are_written_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        assert_eq!(config.get_http_port(), 8582);
        assert_eq!(config.get_log_min_level(), "INFO");
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn external_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "host:\n  HTTP_PORT: 9100\nradio:\n  idle_poll_seconds: 1\n",
        )
        .unwrap();

        let config = load_in(&dir);
        assert_eq!(config.get_http_port(), 9100);
        assert_eq!(
            config.get_value(&["radio", "idle_poll_seconds"]).unwrap(),
            Value::Number(Number::from(1))
        );
        // untouched defaults survive the merge
        assert!(config.get_value(&["radio", "transcoder", "bitrate"]).is_ok());
    }

    #[test]
    fn env_overrides_parse_yaml_scalars() {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        let vars = vec![
            ("PMORADIO_CONFIG__HOST__HTTP_PORT".to_string(), "9000".to_string()),
            ("PMORADIO_CONFIG__RADIO__MUSIC_DIR".to_string(), "/srv/music".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        apply_env_overrides(&mut value, vars.into_iter());

        assert_eq!(
            get_value_internal(&value, &["host", "http_port"]).unwrap(),
            Value::Number(Number::from(9000))
        );
        assert_eq!(
            get_value_internal(&value, &["radio", "music_dir"]).unwrap(),
            Value::String("/srv/music".into())
        );
    }

    #[test]
    fn managed_dir_is_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        let segments = config.get_managed_dir(&["radio", "segments_dir"], "static").unwrap();
        assert_eq!(segments, dir.path().join("static"));
        assert!(segments.is_dir());

        let fresh = config.get_managed_dir(&["radio", "scratch"], "scratch").unwrap();
        assert!(fresh.ends_with("scratch"));
        assert_eq!(
            config.get_value(&["radio", "scratch"]).unwrap(),
            Value::String("scratch".into())
        );
    }

    #[test]
    fn string_port_is_accepted_and_garbage_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        config
            .set_value(&["host", "http_port"], Value::String("8123".into()))
            .unwrap();
        assert_eq!(config.get_http_port(), 8123);

        config
            .set_value(&["host", "http_port"], Value::String("eighty".into()))
            .unwrap();
        assert_eq!(config.get_http_port(), DEFAULT_HTTP_PORT);
    }

    #[test]
    fn get_section_falls_back_to_default() {
        #[derive(serde::Deserialize, Default, Debug, PartialEq)]
        struct Probe {
            #[serde(default)]
            idle_poll_seconds: u64,
        }

        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        let probe: Probe = config.get_section(&["radio"]);
        assert_eq!(probe.idle_poll_seconds, 5);

        let missing: Probe = config.get_section(&["nowhere"]);
        assert_eq!(missing, Probe::default());
    }
}
