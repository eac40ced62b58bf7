//! Composition root: wires clients, persistence, the flow engine and the
//! session manager together.

use lectern_conversation::{ContextAssembler, SessionManager};
use lectern_core::RunId;
use lectern_error::{ConfigError, LecternResult};
use lectern_flow::{BackgroundSupervisor, FlowEngine, FlowRegistry, StepExecutor};
use lectern_interface::{
    EmptySources, LessonMaterialSource, ModelClient, PersistenceProvider, ProgressSource,
    ResourceSummarySource,
};
use lectern_models::{OpenAiCompatibleClient, ScriptedModelClient};
use lectern_rate_limit::LecternConfig;
use lectern_storage::InMemoryPersistence;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Provider name that selects the deterministic scripted client.
pub const SCRIPTED_PROVIDER: &str = "scripted";

/// Model client for the configured provider.
///
/// `scripted` answers locally by echoing the last user message; any other
/// provider is treated as an OpenAI-compatible endpoint.
pub fn client_for(config: &LecternConfig) -> Arc<dyn ModelClient> {
    if config.client.provider == SCRIPTED_PROVIDER {
        Arc::new(ScriptedModelClient::new().with_provider(SCRIPTED_PROVIDER))
    } else {
        Arc::new(OpenAiCompatibleClient::from_config(&config.client))
    }
}

/// Persistence selected from the environment.
///
/// PostgreSQL (with migrations applied) when `DATABASE_URL` is set and the
/// `database` feature is enabled; in-memory otherwise.
#[instrument]
pub async fn persistence_from_env() -> LecternResult<Arc<dyn PersistenceProvider>> {
    match std::env::var("DATABASE_URL") {
        #[cfg(feature = "database")]
        Ok(_) => {
            let persistence = lectern_database::PgPersistence::from_env()?;
            let applied = persistence.run_migrations().await?;
            info!(applied, "Using PostgreSQL persistence");
            Ok(Arc::new(persistence))
        }
        #[cfg(not(feature = "database"))]
        Ok(_) => {
            warn!("DATABASE_URL is set but the database feature is disabled; using memory");
            Ok(Arc::new(InMemoryPersistence::new()))
        }
        Err(_) => {
            info!("DATABASE_URL not set; runs and sessions are kept in memory");
            Ok(Arc::new(InMemoryPersistence::new()))
        }
    }
}

/// A fully wired Lectern instance.
///
/// # Examples
///
/// ```rust,ignore
/// use lectern::{Lectern, LecternConfig};
///
/// let config = LecternConfig::load()?;
/// let lectern = Lectern::builder(config)
///     .persistence(lectern::persistence_from_env().await?)
///     .build()?;
/// lectern.recover_stale_runs().await?;
/// ```
#[derive(Clone)]
pub struct Lectern {
    config: LecternConfig,
    persistence: Arc<dyn PersistenceProvider>,
    engine: Arc<FlowEngine>,
    sessions: Arc<SessionManager>,
}

impl std::fmt::Debug for Lectern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lectern")
            .field("provider", &self.config.client.provider)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl Lectern {
    /// Start building an instance.
    pub fn builder(config: LecternConfig) -> LecternBuilder {
        LecternBuilder::new(config)
    }

    /// Active configuration.
    pub fn config(&self) -> &LecternConfig {
        &self.config
    }

    /// Persistence provider shared by every component.
    pub fn persistence(&self) -> &Arc<dyn PersistenceProvider> {
        &self.persistence
    }

    /// The flow engine.
    pub fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    /// The conversation session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Fail runs left non-terminal by an earlier process.
    ///
    /// Uses `flow.stale_run_after_secs` as the idle threshold.
    pub async fn recover_stale_runs(&self) -> LecternResult<Vec<RunId>> {
        let recovered = self
            .engine
            .recover_stale_runs(self.config.flow.stale_run_after())
            .await?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "Recovered interrupted runs");
        }
        Ok(recovered)
    }

    /// Wait for every background run to finish.
    pub async fn shutdown(&self) {
        let active = self.engine.supervisor().active_runs().await.len();
        info!(active, "Waiting for background runs");
        self.engine.supervisor().drain().await;
    }
}

/// Builder for [`Lectern`].
pub struct LecternBuilder {
    config: LecternConfig,
    client: Option<Arc<dyn ModelClient>>,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    registry: FlowRegistry,
    lessons: Arc<dyn LessonMaterialSource>,
    progress: Arc<dyn ProgressSource>,
    resources: Arc<dyn ResourceSummarySource>,
}

impl std::fmt::Debug for LecternBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LecternBuilder")
            .field("provider", &self.config.client.provider)
            .field("flows", &self.registry.names())
            .finish_non_exhaustive()
    }
}

impl LecternBuilder {
    fn new(config: LecternConfig) -> Self {
        let empty = Arc::new(EmptySources);
        Self {
            config,
            client: None,
            persistence: None,
            registry: FlowRegistry::new(),
            lessons: empty.clone(),
            progress: empty.clone(),
            resources: empty,
        }
    }

    /// Use this model client instead of the configured provider.
    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use this persistence provider; defaults to in-memory.
    pub fn persistence(mut self, persistence: Arc<dyn PersistenceProvider>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Flows the engine can run.
    pub fn flows(mut self, registry: FlowRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Learner context providers for conversations.
    pub fn sources(
        mut self,
        lessons: Arc<dyn LessonMaterialSource>,
        progress: Arc<dyn ProgressSource>,
        resources: Arc<dyn ResourceSummarySource>,
    ) -> Self {
        self.lessons = lessons;
        self.progress = progress;
        self.resources = resources;
        self
    }

    /// Wire everything together.
    #[instrument(skip(self), fields(provider = %self.config.client.provider))]
    pub fn build(self) -> LecternResult<Lectern> {
        let conversation = &self.config.conversation;
        if conversation.min_quick_replies > conversation.max_quick_replies {
            return Err(ConfigError::new(format!(
                "min_quick_replies ({}) exceeds max_quick_replies ({})",
                conversation.min_quick_replies, conversation.max_quick_replies
            ))
            .into());
        }
        if self.config.flow.default_batch_concurrency == 0 {
            return Err(ConfigError::new("default_batch_concurrency must be at least 1").into());
        }

        let client = self.client.unwrap_or_else(|| client_for(&self.config));
        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(InMemoryPersistence::new()) as Arc<dyn PersistenceProvider>);
        let executor = Arc::new(StepExecutor::new(client, &self.config));

        let engine = FlowEngine::new(
            self.registry,
            Arc::clone(&executor),
            Arc::clone(&persistence),
            BackgroundSupervisor::new(Arc::clone(&persistence)),
        );
        let sessions = SessionManager::new(
            executor,
            Arc::clone(&persistence),
            ContextAssembler::new(self.lessons, self.progress, self.resources),
            self.config.conversation.clone(),
        );
        info!(flows = ?engine.registry().names(), "Lectern ready");

        Ok(Lectern {
            config: self.config,
            persistence,
            engine: Arc::new(engine),
            sessions: Arc::new(sessions),
        })
    }
}
