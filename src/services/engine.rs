use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::core::config::EngineSettings;
use crate::db::models::{EvaluationDefinition, EvaluationSession};
use crate::db::types::SessionState;
use crate::repositories::store::{ExpiredKey, SessionStore, StoreError};
use crate::services::catalog::DefinitionCatalog;
use crate::services::definition::DefinitionError;
use crate::services::session_clock::Clock;
use crate::services::storage::BlobStore;

#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("evaluation is outside its availability window")]
    OutOfWindow,
    #[error("maximum attempts reached ({max_attempts})")]
    AttemptsExhausted { max_attempts: i32 },
    #[error("session is not active (state: {})", .0.as_str())]
    SessionNotActive(SessionState),
    #[error("time expired, submission finalized")]
    DeadlinePassed,
    #[error("time expired, submission finalized")]
    Expired(Box<EvaluationSession>),
    #[error("file exceeds the {limit_bytes} byte limit")]
    FileTooLarge { limit_bytes: i64 },
    #[error("file type {0} is not accepted")]
    UnsupportedType(String),
    #[error("not yet submitted")]
    NotSubmitted(SessionState),
    #[error("session is not graded (state: {})", .0.as_str())]
    NotGraded(SessionState),
    #[error("score must be between 0 and {max}")]
    ScoreOutOfRange { max: f64 },
    #[error("stale revision, current revision is {current_revision}")]
    StaleRevision { current_revision: i64 },
    #[error("exams cannot be returned for revision")]
    RevisionNotSupported,
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),
    #[error("invalid evaluation definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),
    #[error("evaluation definition not found")]
    DefinitionNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("file storage is not configured")]
    BlobStoreUnavailable,
    #[error("temporarily unavailable: {0}")]
    Transient(String),
    #[error("engine failure: {0}")]
    Fatal(String),
}

impl EngineError {
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => {
                Self::Transient("session was modified concurrently, retry".to_string())
            }
            StoreError::Transient(message) => Self::Transient(message),
            StoreError::Fatal(message) => Self::Fatal(message),
        }
    }
}

/// Entry point for every session operation. The operations themselves live
/// next to the component they belong to (controller, answer store, finalizer,
/// grading); this type carries the collaborators they share.
#[derive(Clone)]
pub(crate) struct EvaluationEngine {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn DefinitionCatalog>,
    blobs: Option<Arc<dyn BlobStore>>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl EvaluationEngine {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn DefinitionCatalog>,
        blobs: Option<Arc<dyn BlobStore>>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self { store, catalog, blobs, clock, settings }
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(super) fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub(super) fn blobs(&self) -> Result<&dyn BlobStore, EngineError> {
        self.blobs.as_deref().ok_or(EngineError::BlobStoreUnavailable)
    }

    pub(super) fn commit_attempts(&self) -> u32 {
        self.settings.max_commit_retries.max(1)
    }

    /// Runs one store call under the configured operation timeout.
    pub(super) async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.settings.operation_timeout(), operation).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "store operation exceeded {}ms",
                self.settings.operation_timeout_ms
            ))),
        }
    }

    pub(crate) async fn definition(
        &self,
        definition_id: &str,
    ) -> Result<EvaluationDefinition, EngineError> {
        let definition = self
            .bounded(self.catalog.get(definition_id))
            .await?
            .ok_or(EngineError::DefinitionNotFound)?;

        if let Err(err) = definition.validate() {
            tracing::error!(definition_id, error = %err, "Refusing to serve invalid definition");
            return Err(err.into());
        }

        Ok(definition)
    }

    pub(crate) async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<EvaluationSession, EngineError> {
        self.bounded(self.store.find_session(session_id))
            .await?
            .ok_or(EngineError::SessionNotFound)
    }

    /// One page of expired in-progress sessions, resuming after `after`.
    pub(crate) async fn expired_sessions(
        &self,
        after: Option<&ExpiredKey>,
        limit: u32,
    ) -> Result<Vec<ExpiredKey>, EngineError> {
        let now = self.clock.now();
        Ok(self.bounded(self.store.list_expired(now, after, i64::from(limit))).await?)
    }
}
