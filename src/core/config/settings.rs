use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_positive_u32, parse_positive_u64, parse_u16, parse_u32, parse_u64, parse_webhook_url,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, EngineSettings, EventSettings,
    RedisSettings, RuntimeSettings, S3Settings, SecuritySettings, ServerHost, ServerPort,
    ServerSettings, Settings, StorageSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EVAL_HOST", "0.0.0.0");
        let port = env_or_default("EVAL_PORT", "8000");

        let environment =
            parse_environment(env_optional("EVAL_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("EVAL_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Evaluation Engine");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None if strict_config => return Err(ConfigError::MissingSecret("SECRET_KEY")),
            None => load_or_create_secret_key(),
        };
        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "10080"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "eval_engine");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "eval_engine");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_positive_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "30"),
        )?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let max_upload_size_mb =
            parse_positive_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "50"))?;

        let s3_endpoint = env_or_default("S3_ENDPOINT", "http://localhost:9000");
        let s3_access_key = env_or_default("S3_ACCESS_KEY", "");
        let s3_secret_key = env_or_default("S3_SECRET_KEY", "");
        let s3_bucket = env_or_default("S3_BUCKET", "evaluation-submissions");
        let s3_region = env_or_default("S3_REGION", "us-east-1");

        let sweep_interval_seconds = parse_positive_u64(
            "SWEEP_INTERVAL_SECONDS",
            env_or_default("SWEEP_INTERVAL_SECONDS", "15"),
        )?;
        let sweep_batch_size =
            parse_positive_u32("SWEEP_BATCH_SIZE", env_or_default("SWEEP_BATCH_SIZE", "200"))?;
        let sweep_max_retries =
            parse_u32("SWEEP_MAX_RETRIES", env_or_default("SWEEP_MAX_RETRIES", "3"))?;
        let operation_timeout_ms = parse_positive_u64(
            "OPERATION_TIMEOUT_MS",
            env_or_default("OPERATION_TIMEOUT_MS", "5000"),
        )?;
        let max_commit_retries =
            parse_positive_u32("MAX_COMMIT_RETRIES", env_or_default("MAX_COMMIT_RETRIES", "5"))?;
        let definition_cache_ttl_seconds = parse_u64(
            "DEFINITION_CACHE_TTL_SECONDS",
            env_or_default("DEFINITION_CACHE_TTL_SECONDS", "60"),
        )?;

        let webhook_url = parse_webhook_url(env_optional("CERTIFICATE_WEBHOOK_URL"))?;
        let delivery_interval_seconds = parse_positive_u64(
            "EVENT_DELIVERY_INTERVAL_SECONDS",
            env_or_default("EVENT_DELIVERY_INTERVAL_SECONDS", "10"),
        )?;
        let max_delivery_attempts = parse_positive_u32(
            "EVENT_MAX_DELIVERY_ATTEMPTS",
            env_or_default("EVENT_MAX_DELIVERY_ATTEMPTS", "12"),
        )?;
        let request_timeout_seconds = parse_positive_u64(
            "EVENT_REQUEST_TIMEOUT_SECONDS",
            env_or_default("EVENT_REQUEST_TIMEOUT_SECONDS", "10"),
        )?;
        let event_batch_size =
            parse_positive_u32("EVENT_BATCH_SIZE", env_or_default("EVENT_BATCH_SIZE", "50"))?;

        let log_level = env_or_default("EVAL_LOG_LEVEL", "info");
        let json = env_optional("EVAL_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, access_token_expire_minutes, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            storage: StorageSettings { max_upload_size_mb },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                bucket: s3_bucket,
                region: s3_region,
            },
            engine: EngineSettings {
                sweep_interval_seconds,
                sweep_batch_size,
                sweep_max_retries,
                operation_timeout_ms,
                max_commit_retries,
                definition_cache_ttl_seconds,
            },
            events: EventSettings {
                webhook_url,
                delivery_interval_seconds,
                max_delivery_attempts,
                request_timeout_seconds,
                batch_size: event_batch_size,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub(crate) fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub(crate) fn events(&self) -> &EventSettings {
        &self.events
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.security.algorithm != "HS256" {
            return Err(ConfigError::InvalidValue {
                field: "ALGORITHM",
                value: self.security.algorithm.clone(),
            });
        }

        if !self.api.api_v1_str.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "API_V1_STR",
                value: self.api.api_v1_str.clone(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.s3.access_key.is_empty() || self.s3.secret_key.is_empty() {
            return Err(ConfigError::MissingSecret("S3_ACCESS_KEY/S3_SECRET_KEY"));
        }

        Ok(())
    }
}
