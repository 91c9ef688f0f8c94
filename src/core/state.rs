use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::pg_store::PgSessionStore;
use crate::services::catalog::PgDefinitionCatalog;
use crate::services::engine::EvaluationEngine;
use crate::services::session_clock::SystemClock;
use crate::services::storage::BlobStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    engine: EvaluationEngine,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        let catalog = PgDefinitionCatalog::new(
            db.clone(),
            redis.clone(),
            settings.engine().definition_cache_ttl_seconds,
        );
        let engine = EvaluationEngine::new(
            Arc::new(PgSessionStore::new(db.clone())),
            Arc::new(catalog),
            blobs,
            Arc::new(SystemClock),
            settings.engine().clone(),
        );

        Self::with_engine(settings, db, redis, engine)
    }

    /// Wires a prebuilt engine, used by tests to swap in in-memory collaborators.
    pub(crate) fn with_engine(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        engine: EvaluationEngine,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, redis, engine }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn engine(&self) -> &EvaluationEngine {
        &self.inner.engine
    }
}
