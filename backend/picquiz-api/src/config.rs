use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            other => bail!("Unknown storage backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app_env: String,
    pub bind_addr: String,
    pub frontend_url: String,
    pub storage_backend: StorageBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub jwt_secret: String,
    pub session_ttl_secs: u64,
    pub cookie_secure: bool,
    pub bcrypt_cost: u32,
    /// Lowercased admin emails, parsed from a comma separated list.
    pub admin_emails: Vec<String>,
    pub workflow: WorkflowSettings,
    pub object_storage: ObjectStorageSettings,
    pub quiz: QuizSettings,
    pub migration: MigrationSettings,
}

/// External workflow API that produces one picture question per run.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub workflow_id: Option<String>,
    pub trigger_input: String,
    pub timeout_ms: u64,
    pub pacing_ms: u64,
    pub failure_backoff_ms: u64,
}

impl WorkflowSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.coze.cn".to_string(),
            api_key: None,
            workflow_id: None,
            trigger_input: "开始".to_string(),
            timeout_ms: 60_000,
            pacing_ms: 1_000,
            failure_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub key_prefix: String,
    /// Public base for uploaded objects; defaults to `{endpoint}/{bucket}`.
    pub public_base_url: Option<String>,
}

impl ObjectStorageSettings {
    pub const DEFAULT_ENDPOINT: &'static str = "https://storage.yandexcloud.net";

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(Self::DEFAULT_ENDPOINT)
    }

    pub fn public_url_base(&self) -> String {
        match &self.public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.endpoint().trim_end_matches('/'), self.bucket),
        }
    }
}

impl Default for ObjectStorageSettings {
    fn default() -> Self {
        Self {
            bucket: "picquiz-images".to_string(),
            region: "ru-central1".to_string(),
            endpoint: None,
            access_key: String::new(),
            secret_key: String::new(),
            key_prefix: String::new(),
            public_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizSettings {
    /// Generation is triggered once a user has this many unanswered questions or fewer.
    pub supply_threshold: u64,
    pub supply_batch_size: usize,
    /// Size of the window a random question is drawn from.
    pub page_size: usize,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            supply_threshold: 5,
            supply_batch_size: 5,
            page_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    pub page_size: usize,
    pub max_redirects: usize,
    pub download_timeout_ms: u64,
    pub content_type: String,
    pub cache_control: String,
    /// Substring identifying URLs that already live in permanent storage.
    pub domain_marker: Option<String>,
}

impl MigrationSettings {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_redirects: 5,
            download_timeout_ms: 60_000,
            content_type: "image/png".to_string(),
            cache_control: "max-age=31536000".to_string(),
            domain_marker: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_env: "dev".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            storage_backend: StorageBackend::Memory,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "picquiz".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            jwt_secret: "dev-secret-only-for-local-testing".to_string(),
            session_ttl_secs: 24 * 60 * 60,
            cookie_secure: false,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            admin_emails: Vec::new(),
            workflow: WorkflowSettings::default(),
            object_storage: ObjectStorageSettings::default(),
            quiz: QuizSettings::default(),
            migration: MigrationSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Root .env first, then the working directory
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/<env>.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()
            .context("Failed to build configuration sources")?;

        let defaults = Config::default();
        let get = |key: &str, env_key: &str| lookup(&settings, key, env_key);

        let storage_backend = match get("storage.backend", "STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::Mongo,
        };

        let jwt_secret = match get("auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if app_env == "prod" => bail!("JWT_SECRET must be set in production"),
            None => {
                tracing::warn!("Using default JWT_SECRET (dev mode only)");
                defaults.jwt_secret.clone()
            }
        };

        let workflow = WorkflowSettings {
            base_url: get("workflow.base_url", "COZE_BASE_URL")
                .unwrap_or(defaults.workflow.base_url),
            api_key: get("workflow.api_key", "COZE_API_KEY"),
            workflow_id: get("workflow.workflow_id", "COZE_WORKFLOW_ID"),
            trigger_input: get("workflow.trigger_input", "COZE_TRIGGER_INPUT")
                .unwrap_or(defaults.workflow.trigger_input),
            timeout_ms: parsed(
                get("workflow.timeout_ms", "COZE_TIMEOUT_MS"),
                defaults.workflow.timeout_ms,
            )?,
            pacing_ms: parsed(
                get("workflow.pacing_ms", "COZE_PACING_MS"),
                defaults.workflow.pacing_ms,
            )?,
            failure_backoff_ms: parsed(
                get("workflow.failure_backoff_ms", "COZE_FAILURE_BACKOFF_MS"),
                defaults.workflow.failure_backoff_ms,
            )?,
        };

        let object_storage = ObjectStorageSettings {
            bucket: get("object_storage.bucket", "OBJECT_STORAGE_BUCKET")
                .unwrap_or(defaults.object_storage.bucket),
            region: get("object_storage.region", "OBJECT_STORAGE_REGION")
                .unwrap_or(defaults.object_storage.region),
            endpoint: get("object_storage.endpoint", "OBJECT_STORAGE_ENDPOINT"),
            access_key: get("object_storage.access_key", "OBJECT_STORAGE_ACCESS_KEY")
                .unwrap_or_default(),
            secret_key: get("object_storage.secret_key", "OBJECT_STORAGE_SECRET_KEY")
                .unwrap_or_default(),
            key_prefix: get("object_storage.key_prefix", "OBJECT_STORAGE_PREFIX")
                .unwrap_or_default(),
            public_base_url: get("object_storage.public_base_url", "OBJECT_STORAGE_PUBLIC_URL"),
        };

        let quiz = QuizSettings {
            supply_threshold: parsed(
                get("quiz.supply_threshold", "QUIZ_SUPPLY_THRESHOLD"),
                defaults.quiz.supply_threshold,
            )?,
            supply_batch_size: parsed(
                get("quiz.supply_batch_size", "QUIZ_SUPPLY_BATCH_SIZE"),
                defaults.quiz.supply_batch_size,
            )?,
            page_size: parsed(
                get("quiz.page_size", "QUIZ_PAGE_SIZE"),
                defaults.quiz.page_size,
            )?,
        };

        let migration = MigrationSettings {
            page_size: parsed(
                get("migration.page_size", "MIGRATION_PAGE_SIZE"),
                defaults.migration.page_size,
            )?,
            max_redirects: parsed(
                get("migration.max_redirects", "MIGRATION_MAX_REDIRECTS"),
                defaults.migration.max_redirects,
            )?,
            download_timeout_ms: parsed(
                get("migration.download_timeout_ms", "MIGRATION_DOWNLOAD_TIMEOUT_MS"),
                defaults.migration.download_timeout_ms,
            )?,
            content_type: get("migration.content_type", "MIGRATION_CONTENT_TYPE")
                .unwrap_or(defaults.migration.content_type),
            cache_control: get("migration.cache_control", "MIGRATION_CACHE_CONTROL")
                .unwrap_or(defaults.migration.cache_control),
            domain_marker: get("migration.domain_marker", "MIGRATION_DOMAIN_MARKER"),
        };

        // A zero page would mean "unbounded" to MongoDB and "empty" elsewhere.
        if quiz.page_size == 0 {
            bail!("quiz.page_size (QUIZ_PAGE_SIZE) must be at least 1");
        }
        if migration.page_size == 0 {
            bail!("migration.page_size (MIGRATION_PAGE_SIZE) must be at least 1");
        }

        Ok(Config {
            bind_addr: get("server.bind_addr", "BIND_ADDR").unwrap_or_else(|| {
                let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
                format!("0.0.0.0:{}", port)
            }),
            frontend_url: get("server.frontend_url", "FRONTEND_URL")
                .unwrap_or(defaults.frontend_url),
            storage_backend,
            mongo_uri: get("database.mongo_uri", "MONGO_URI").unwrap_or(defaults.mongo_uri),
            mongo_database: get("database.mongo_database", "MONGO_DATABASE")
                .unwrap_or(defaults.mongo_database),
            redis_uri: get("redis.uri", "REDIS_URI").unwrap_or(defaults.redis_uri),
            jwt_secret,
            session_ttl_secs: parsed(
                get("auth.session_ttl_secs", "SESSION_TTL_SECONDS"),
                defaults.session_ttl_secs,
            )?,
            cookie_secure: parsed(
                get("auth.cookie_secure", "COOKIE_SECURE"),
                app_env == "prod",
            )?,
            bcrypt_cost: parsed(
                get("auth.bcrypt_cost", "BCRYPT_COST"),
                defaults.bcrypt_cost,
            )?,
            admin_emails: parse_admin_emails(
                &get("auth.admin_emails", "ADMIN_EMAILS").unwrap_or_default(),
            ),
            workflow,
            object_storage,
            quiz,
            migration,
            app_env,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "prod"
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        !email.is_empty() && self.admin_emails.iter().any(|admin| *admin == email)
    }

    /// Marker used to tell permanent image URLs apart from temporary upstream ones.
    pub fn permanent_url_marker(&self) -> String {
        if let Some(marker) = &self.migration.domain_marker {
            return marker.clone();
        }

        let base = self.object_storage.public_url_base();
        Url::parse(&base)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or(base)
    }
}

fn lookup(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<T>(value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid configuration value {:?}: {}", raw, e)),
        None => Ok(default),
    }
}

pub fn parse_admin_emails(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn admin_emails_are_trimmed_and_lowercased() {
        let emails = parse_admin_emails(" Admin@Example.com, ,ops@example.com ");
        assert_eq!(emails, vec!["admin@example.com", "ops@example.com"]);
    }

    #[test]
    fn admin_check_is_case_insensitive() {
        let config = Config {
            admin_emails: parse_admin_emails("admin@example.com"),
            ..Config::default()
        };

        assert!(config.is_admin_email("ADMIN@example.com"));
        assert!(!config.is_admin_email("user@example.com"));
        assert!(!config.is_admin_email(""));
    }

    #[test]
    fn permanent_marker_defaults_to_public_host() {
        let mut config = Config::default();
        assert_eq!(config.permanent_url_marker(), "storage.yandexcloud.net");

        config.object_storage.public_base_url = Some("https://cdn.picquiz.test/images/".into());
        assert_eq!(config.permanent_url_marker(), "cdn.picquiz.test");

        config.migration.domain_marker = Some("supabase".into());
        assert_eq!(config.permanent_url_marker(), "supabase");
    }

    #[test]
    fn storage_backend_parses_aliases() {
        assert_eq!(
            "MongoDB".parse::<StorageBackend>().unwrap(),
            StorageBackend::Mongo
        );
        assert_eq!(
            "memory".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    #[serial]
    fn load_reads_workflow_credentials_from_env() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP_ENV", "test-config-load");
        std::env::set_var("STORAGE_BACKEND", "memory");
        std::env::set_var("COZE_API_KEY", "key-123");
        std::env::set_var("COZE_WORKFLOW_ID", "wf-456");
        std::env::set_var("QUIZ_SUPPLY_THRESHOLD", "7");

        let config = Config::load().unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.workflow.api_key.as_deref(), Some("key-123"));
        assert_eq!(config.workflow.workflow_id.as_deref(), Some("wf-456"));
        assert_eq!(config.quiz.supply_threshold, 7);
        assert_eq!(config.quiz.supply_batch_size, 5);

        for key in [
            "SKIP_ROOT_ENV",
            "APP_ENV",
            "STORAGE_BACKEND",
            "COZE_API_KEY",
            "COZE_WORKFLOW_ID",
            "QUIZ_SUPPLY_THRESHOLD",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn load_rejects_zero_page_sizes() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP_ENV", "test-config-pages");
        std::env::set_var("STORAGE_BACKEND", "memory");

        std::env::set_var("QUIZ_PAGE_SIZE", "0");
        assert!(Config::load().is_err());
        std::env::remove_var("QUIZ_PAGE_SIZE");

        std::env::set_var("MIGRATION_PAGE_SIZE", "0");
        assert!(Config::load().is_err());
        std::env::set_var("MIGRATION_PAGE_SIZE", "3");
        assert_eq!(Config::load().unwrap().migration.page_size, 3);

        for key in ["SKIP_ROOT_ENV", "APP_ENV", "STORAGE_BACKEND", "MIGRATION_PAGE_SIZE"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn load_rejects_missing_jwt_secret_in_prod() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP_ENV", "prod");
        std::env::remove_var("JWT_SECRET");

        let result = Config::load();
        assert!(result.is_err());

        std::env::remove_var("SKIP_ROOT_ENV");
        std::env::remove_var("APP_ENV");
    }
}
