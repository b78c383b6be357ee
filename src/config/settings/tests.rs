use super::*;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use tempfile::TempDir;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn service_config() -> (Config, Credentials) {
    let mut config = Config::default();
    config.apply_env(lookup_from(&[
        (ENV_OPENAI_ENDPOINT, "https://example.openai.azure.com/"),
        (ENV_CHAT_DEPLOYMENT, "gpt-4o"),
        (ENV_EMBEDDING_DEPLOYMENT, "text-embedding-ada-002"),
    ]));
    let credentials = Credentials::from_lookup(lookup_from(&[(ENV_OPENAI_KEY, "secret-key")]));
    (config, credentials)
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.openai.api_version, "2024-02-01");
    assert_eq!(config.store.backend, StoreBackend::Lancedb);
    assert_eq!(config.store.collection, "sk-rag-container");
    assert_eq!(config.store.vector_dimension, 1536);
    assert_eq!(config.store.similarity, "COS");
    assert_eq!(config.store.num_lists, 1);
    assert_eq!(config.ingest.workers, 1);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.openai.endpoint = "not a url".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.openai.timeout_secs = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chat.temperature = 2.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chat.top_p = 1.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chat.search_limit = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.store.similarity = "cosine".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.store.collection = "bad name; drop".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.ingest.workers = 0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn toml_serialization() {
    let mut config = Config::default();
    config.openai.endpoint = "https://example.openai.azure.com/".to_string();
    config.store.backend = StoreBackend::CosmosMongo;
    config.chat.prompt_template_file = Some(PathBuf::from("prompt.txt"));

    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
    assert!(toml_str.contains("backend = \"cosmos-mongo\""));
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
            [store]
            collection = "movies"
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.store.collection, "movies");
    assert_eq!(parsed.store.vector_dimension, DEFAULT_EMBEDDING_DIMENSION);
    assert_eq!(parsed.chat, ChatConfig::default());
}

#[test]
fn env_overrides_file_values() {
    let mut config = Config::default();
    config.store.collection = "from-file".to_string();

    config.apply_env(lookup_from(&[
        (ENV_CONTAINER_NAME, "from-env"),
        (ENV_DATABASE_NAME, "moviesdb"),
        (ENV_STORE_RESOURCE, "cluster01"),
        (ENV_STORE_USERNAME, "  "),
    ]));

    assert_eq!(config.store.collection, "from-env");
    assert_eq!(config.store.database_name, "moviesdb");
    assert_eq!(config.store.resource_name, "cluster01");
    // blank values do not override
    assert!(config.store.username.is_empty());
}

#[test]
fn credentials_are_redacted_in_debug_output() {
    let credentials = Credentials::from_lookup(lookup_from(&[
        (ENV_OPENAI_KEY, "sk-very-secret"),
        (ENV_STORE_PASSWORD, "p@ssw0rd"),
    ]));

    let rendered = format!("{:?}", credentials);
    assert!(!rendered.contains("sk-very-secret"));
    assert!(!rendered.contains("p@ssw0rd"));

    let key = credentials.openai_api_key.expect("api key present");
    assert_eq!(key.expose_secret(), "sk-very-secret");
}

#[test]
fn require_services_reports_first_missing_key() {
    let config = Config::default();
    let err = config
        .require_services(&Credentials::default())
        .expect_err("empty config should be rejected");
    assert!(matches!(err, ConfigError::MissingSetting(ENV_OPENAI_ENDPOINT)));

    let (config, _) = service_config();
    let err = config
        .require_services(&Credentials::default())
        .expect_err("missing api key should be rejected");
    assert!(matches!(err, ConfigError::MissingSetting(ENV_OPENAI_KEY)));

    let (config, credentials) = service_config();
    assert!(config.require_services(&credentials).is_ok());
}

#[test]
fn require_services_checks_store_credentials_for_cosmos() {
    let (mut config, credentials) = service_config();
    config.store.backend = StoreBackend::CosmosMongo;

    let err = config
        .require_services(&credentials)
        .expect_err("cosmos without username should be rejected");
    assert!(matches!(err, ConfigError::MissingSetting(ENV_STORE_USERNAME)));

    config.store.username = "admin".to_string();
    let err = config
        .require_services(&credentials)
        .expect_err("cosmos without password should be rejected");
    assert!(matches!(err, ConfigError::MissingSetting(ENV_STORE_PASSWORD)));
}

#[test]
fn load_missing_config_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load_file(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.store, StoreConfig::default());
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        ..Config::default()
    };
    config.chat.pause_ms = 250;
    config.ingest.data_file = PathBuf::from("/data/movies.json");

    config.save().expect("should save config");
    let loaded = Config::load_file(temp_dir.path().join("nested")).expect("should reload");

    assert_eq!(config, loaded);
    assert_eq!(loaded.data_file_path(), PathBuf::from("/data/movies.json"));
}

#[test]
fn relative_data_file_resolves_against_base_dir() {
    let config = Config {
        base_dir: PathBuf::from("/srv/rag"),
        ..Config::default()
    };
    assert_eq!(config.data_file_path(), PathBuf::from("/srv/rag/data.json"));
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::MissingSetting(ENV_OPENAI_KEY),
        ConfigError::InvalidUrl("invalid-url".to_string()),
        ConfigError::InvalidTemperature(3.0),
        ConfigError::InvalidSimilarity("cosine".to_string()),
        ConfigError::InvalidWorkers(0),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10, "message too short: {message}");
    }
}
