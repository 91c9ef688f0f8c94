use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::redis::RedisHandle;
use crate::db::models::EvaluationDefinition;
use crate::repositories::definitions;
use crate::repositories::store::StoreError;

/// Read-only access to evaluation definitions owned by catalog administration.
#[async_trait]
pub(crate) trait DefinitionCatalog: Send + Sync {
    async fn get(&self, definition_id: &str) -> Result<Option<EvaluationDefinition>, StoreError>;
}

/// Postgres catalog with a Redis read-through cache. Cache failures only cost
/// a database read.
#[derive(Clone)]
pub(crate) struct PgDefinitionCatalog {
    pool: PgPool,
    redis: RedisHandle,
    ttl_seconds: u64,
}

impl PgDefinitionCatalog {
    pub(crate) fn new(pool: PgPool, redis: RedisHandle, ttl_seconds: u64) -> Self {
        Self { pool, redis, ttl_seconds }
    }

    async fn cached(&self, key: &str) -> Option<EvaluationDefinition> {
        let raw = match self.redis.get_string(key).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(error = %err, key, "Definition cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(definition) => Some(definition),
            Err(err) => {
                tracing::warn!(error = %err, key, "Discarding undecodable cached definition");
                None
            }
        }
    }

    async fn remember(&self, key: &str, definition: &EvaluationDefinition) {
        if self.ttl_seconds == 0 {
            return;
        }

        let payload = match serde_json::to_string(definition) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, key, "Failed to encode definition for cache");
                return;
            }
        };

        if let Err(err) = self.redis.set_string_with_ttl(key, &payload, self.ttl_seconds).await {
            tracing::warn!(error = %err, key, "Definition cache write failed");
        }
    }
}

#[async_trait]
impl DefinitionCatalog for PgDefinitionCatalog {
    async fn get(&self, definition_id: &str) -> Result<Option<EvaluationDefinition>, StoreError> {
        let key = cache_key(definition_id);
        if self.ttl_seconds > 0 {
            if let Some(definition) = self.cached(&key).await {
                return Ok(Some(definition));
            }
        }

        let definition = definitions::find_by_id(&self.pool, definition_id).await?;
        if let Some(definition) = &definition {
            self.remember(&key, definition).await;
        }

        Ok(definition)
    }
}

fn cache_key(definition_id: &str) -> String {
    format!("definition:{definition_id}")
}
