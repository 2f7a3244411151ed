// Configuration loading: YAML base file + env placeholder expansion.
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::env;
use std::fs;
use tracing::warn;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub file_storage: FileStorageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub worker_concurrency: usize,
    pub jobs_per_minute: u32,
    pub job_max_attempts: u32,
    pub job_backoff_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 1,
            jobs_per_minute: 5,
            job_max_attempts: 3,
            job_backoff_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default)]
    pub dsn: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_s: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_pool_size() -> usize {
    4
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            connect_timeout_s: default_connect_timeout(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> String {
    "./data/quizforge.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
            postgres: PostgresConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub priority: u8,
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub primary: ProviderConfig,
    pub secondary: ProviderConfig,
    pub tertiary: ProviderConfig,
    pub last_resort: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig {
                priority: 0,
                batch_size: 40,
                max_retries: default_max_retries(),
                ..Default::default()
            },
            secondary: ProviderConfig {
                priority: 1,
                batch_size: 30,
                max_retries: default_max_retries(),
                ..Default::default()
            },
            tertiary: ProviderConfig {
                priority: 2,
                batch_size: 30,
                max_retries: default_max_retries(),
                ..Default::default()
            },
            last_resort: ProviderConfig {
                priority: 3,
                batch_size: 15,
                max_retries: default_max_retries(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_prompt_cap")]
    pub prompt_injection_max_chars: usize,
    #[serde(default = "default_section")]
    pub section_default: String,
    #[serde(default = "default_chunk_size")]
    pub orchestrator_chunk_size: usize,
}

fn default_prompt_cap() -> usize {
    50_000
}

fn default_section() -> String {
    "Nội dung chung".to_string()
}

fn default_chunk_size() -> usize {
    30
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            prompt_injection_max_chars: default_prompt_cap(),
            section_default: default_section(),
            orchestrator_chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    #[serde(default = "default_fs_backend")]
    pub backend: String,
    #[serde(default = "default_local_root")]
    pub local_root: String,
    #[serde(default = "default_drive_retries")]
    pub drive_connect_retries: u32,
}

fn default_fs_backend() -> String {
    "local".to_string()
}

fn default_local_root() -> String {
    "./data/uploads".to_string()
}

fn default_drive_retries() -> u32 {
    3
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            backend: default_fs_backend(),
            local_root: default_local_root(),
            drive_connect_retries: default_drive_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    /// Directory for daily-rotating log files, in addition to stdout. Empty
    /// disables file logging (the default, for local/dev runs).
    #[serde(default)]
    pub log_dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            log_dir: String::new(),
        }
    }
}

pub fn load_config() -> Config {
    let base_path =
        env::var("QUIZFORGE_CONFIG_PATH").unwrap_or_else(|_| "config/quizforge.yaml".to_string());
    let mut value = read_yaml(&base_path);
    apply_provider_env_fallbacks(&mut value);
    expand_yaml_env(&mut value);

    serde_yaml::from_value::<Config>(value).unwrap_or_else(|err| {
        warn!("failed to parse config, falling back to defaults: {err}");
        Config::default()
    })
}

fn read_yaml(path: &str) -> Value {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("could not read config file {path}: {err}");
            return Value::Null;
        }
    };
    serde_yaml::from_str(&content).unwrap_or_else(|err| {
        warn!("failed to parse YAML {path}: {err}");
        Value::Null
    })
}

/// §6's environment variable table (GEMINI_API_KEYS, GITHUB_TOKEN, ...) is
/// honored even when the YAML file omits `providers.*.api_keys` entirely.
fn apply_provider_env_fallbacks(value: &mut Value) {
    if !matches!(value, Value::Mapping(_)) {
        *value = Value::Mapping(Default::default());
    }
    let map = value.as_mapping_mut().expect("just normalized to mapping");
    let providers = map
        .entry(Value::String("providers".to_string()))
        .or_insert_with(|| Value::Mapping(Default::default()));
    if !matches!(providers, Value::Mapping(_)) {
        *providers = Value::Mapping(Default::default());
    }
    let providers = providers.as_mapping_mut().unwrap();

    fill_keys_from_env(providers, "primary", &["GEMINI_API_KEYS", "GEMINI_API_KEY"]);
    fill_keys_from_env(providers, "secondary", &["GITHUB_TOKEN"]);
    fill_keys_from_env(providers, "tertiary", &["GROQ_API_KEY"]);
    fill_keys_from_env(providers, "last_resort", &["HF_ACCESS_TOKEN"]);

    if let Ok(model) = env::var("GITHUB_MODEL") {
        let entry = providers
            .entry(Value::String("secondary".to_string()))
            .or_insert_with(|| Value::Mapping(Default::default()));
        if let Value::Mapping(entry) = entry {
            entry
                .entry(Value::String("model".to_string()))
                .or_insert_with(|| Value::String(model));
        }
    }
}

fn fill_keys_from_env(providers: &mut serde_yaml::Mapping, provider: &str, env_vars: &[&str]) {
    let entry = providers
        .entry(Value::String(provider.to_string()))
        .or_insert_with(|| Value::Mapping(Default::default()));
    if !matches!(entry, Value::Mapping(_)) {
        *entry = Value::Mapping(Default::default());
    }
    let entry = entry.as_mapping_mut().unwrap();
    let has_keys = matches!(
        entry.get(Value::String("api_keys".to_string())),
        Some(Value::Sequence(seq)) if !seq.is_empty()
    );
    if has_keys {
        return;
    }
    for var in env_vars {
        if let Ok(raw) = env::var(var) {
            let keys: Vec<Value> = raw
                .split(',')
                .map(|key| key.trim())
                .filter(|key| !key.is_empty())
                .map(|key| Value::String(key.to_string()))
                .collect();
            if !keys.is_empty() {
                entry.insert(Value::String("api_keys".to_string()), Value::Sequence(keys));
                return;
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

/// Initializes the global subscriber: stdout always, plus a daily-rotating
/// file appender under `observability.log_dir` when configured. The returned
/// guard flushes the file writer's background thread on drop — the caller
/// must hold it for the process's lifetime.
pub fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.observability.log_level.clone()))
    };

    if config.observability.log_dir.trim().is_empty() {
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter());
        let result = if config.observability.log_json {
            subscriber.json().try_init()
        } else {
            subscriber.try_init()
        };
        if let Err(err) = result {
            warn!("tracing already initialized: {err}");
        }
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&config.observability.log_dir, "quizforge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stdout.and(non_blocking));
    let result = if config.observability.log_json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if let Err(err) = result {
        warn!("tracing already initialized: {err}");
    }
    Some(guard)
}
