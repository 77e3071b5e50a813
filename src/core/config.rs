// 配置读取与覆盖合并：YAML 基础配置 + 覆盖文件 + 环境变量占位符。
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/behavior.yaml";
pub const DEFAULT_OVERRIDE_PATH: &str = "data/config/behavior.override.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub i18n: I18nConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_u16_from_any")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    pub allow_origins: Option<Vec<String>>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct I18nConfig {
    pub default_language: String,
    pub supported_languages: Vec<String>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            default_language: "zh-CN".to_string(),
            supported_languages: vec!["zh-CN".to_string(), "en-US".to_string()],
            aliases: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub db_path: String,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostgresConfig {
    #[serde(default)]
    pub dsn: String,
    #[serde(default)]
    pub connect_timeout_s: u64,
    #[serde(default)]
    pub pool_size: usize,
}

/// 行为服务的批量与分页上限。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

fn default_max_batch_size() -> usize {
    100
}

fn default_page_size() -> i64 {
    10
}

fn default_max_page_size() -> i64 {
    100
}

fn default_batch_concurrency() -> usize {
    8
}

fn deserialize_u16_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    struct U16Visitor;

    impl<'de> Visitor<'de> for U16Visitor {
        type Value = u16;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("u16 or numeric string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u16::try_from(value).map_err(|_| E::custom("u16 out of range"))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if value < 0 {
                return Err(E::custom("u16 must be non-negative"));
            }
            self.visit_u64(value as u64)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(E::custom("u16 string is empty"));
            }
            trimmed
                .parse::<u16>()
                .map_err(|_| E::custom("invalid u16 string"))
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            self.visit_str(&value)
        }
    }

    deserializer.deserialize_any(U16Visitor)
}

pub fn base_config_path() -> String {
    env::var("BEHAVIOR_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

pub fn load_config() -> Config {
    let override_path = env::var("BEHAVIOR_CONFIG_OVERRIDE_PATH")
        .unwrap_or_else(|_| DEFAULT_OVERRIDE_PATH.to_string());
    load_config_from(&base_config_path(), Some(&override_path))
}

/// 读取基础配置并叠加覆盖文件，解析失败时回退默认配置。
pub fn load_config_from(base_path: &str, override_path: Option<&str>) -> Config {
    let mut merged = read_yaml(base_path);
    if let Some(override_path) = override_path {
        if Path::new(override_path).exists() {
            let override_value = read_yaml(override_path);
            // 只对非空字段做递归覆盖，避免误清空已有配置。
            merge_yaml(&mut merged, override_value);
        }
    }

    expand_yaml_env(&mut merged);

    if merged.is_null() {
        return Config::default();
    }
    serde_yaml::from_value::<Config>(merged).unwrap_or_else(|err| {
        warn!("配置解析失败，使用默认配置: {err}");
        Config::default()
    })
}

fn read_yaml(path: &str) -> Value {
    // 配置文件允许不存在，避免开发环境首次启动失败。
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("读取配置失败: {path}, {err}");
            return Value::Null;
        }
    };
    serde_yaml::from_str(&content).unwrap_or_else(|err| {
        warn!("解析 YAML 失败: {path}, {err}");
        Value::Null
    })
}

fn merge_yaml(base: &mut Value, override_value: Value) {
    match (base, override_value) {
        (Value::Mapping(base_map), Value::Mapping(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, override_value) => {
            if !override_value.is_null() {
                *base_slot = override_value;
            }
        }
    }
}

fn expand_yaml_env(value: &mut Value) {
    match value {
        Value::String(text) => {
            *text = expand_env_placeholders(text);
        }
        Value::Sequence(items) => {
            for item in items {
                expand_yaml_env(item);
            }
        }
        Value::Mapping(map) => {
            for (_, value) in map.iter_mut() {
                expand_yaml_env(value);
            }
        }
        _ => {}
    }
}

fn expand_env_placeholders(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        let Some(end) = rest.find('}') else {
            output.push_str("${");
            output.push_str(rest);
            return output;
        };
        let inner = &rest[..end];
        rest = &rest[end + 1..];
        let (name, default_value) = match inner.split_once(":-") {
            Some((name, default_value)) => (name.trim(), Some(default_value)),
            None => (inner.trim(), None),
        };
        if name.is_empty() {
            output.push_str("${");
            output.push_str(inner);
            output.push('}');
            continue;
        }
        let resolved = env::var(name).ok().filter(|value| !value.is_empty());
        match (resolved, default_value) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(default_value)) => output.push_str(default_value),
            (None, None) => {}
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_placeholders() {
        std::env::remove_var("BEHAVIOR_TEST_PLACEHOLDER");
        assert_eq!(
            expand_env_placeholders("${BEHAVIOR_TEST_PLACEHOLDER:-default}"),
            "default"
        );
        assert_eq!(
            expand_env_placeholders("postgres://${BEHAVIOR_TEST_PLACEHOLDER:-db}:5432/b"),
            "postgres://db:5432/b"
        );

        std::env::set_var("BEHAVIOR_TEST_PLACEHOLDER", "value");
        assert_eq!(
            expand_env_placeholders("prefix-${BEHAVIOR_TEST_PLACEHOLDER}-suffix"),
            "prefix-value-suffix"
        );

        std::env::remove_var("BEHAVIOR_TEST_PLACEHOLDER");
        assert_eq!(expand_env_placeholders("${BEHAVIOR_TEST_PLACEHOLDER}"), "");
        assert_eq!(expand_env_placeholders("${unterminated"), "${unterminated");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config_from("/nonexistent/behavior.yaml", None);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.behavior.max_batch_size, 100);
        assert_eq!(config.behavior.default_page_size, 10);
        assert_eq!(config.behavior.max_page_size, 100);
    }

    #[test]
    fn override_file_merges_over_base() {
        let dir = tempfile::tempdir().expect("temp dir");
        let base = dir.path().join("base.yaml");
        let overrides = dir.path().join("override.yaml");
        fs::write(
            &base,
            "server:\n  host: 127.0.0.1\n  port: \"9001\"\nstorage:\n  backend: sqlite\n  db_path: ./a.db\nbehavior:\n  batch_concurrency: 4\n",
        )
        .unwrap();
        fs::write(&overrides, "storage:\n  db_path: ./b.db\n").unwrap();

        let config = load_config_from(
            &base.to_string_lossy(),
            Some(overrides.to_string_lossy().as_ref()),
        );
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.storage.db_path, "./b.db");
        assert_eq!(config.behavior.batch_concurrency, 4);
        assert_eq!(config.behavior.max_page_size, 100);
    }
}
