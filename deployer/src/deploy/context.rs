//! Everything a pipeline needs to act on one target

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::deploy::compose::Compose;
use crate::deploy::events::EventBus;
use crate::deploy::health::{HealthPolicy, HealthProbe, RemoteCurlProbe};
use crate::remote::RemoteExecutor;
use crate::storage::layout::RemoteLayout;
use crate::storage::settings::{ComposeSettings, Settings};
use crate::terminal::prompt::Confirmer;

/// Injected sleep, so the health loop can run on a fake clock in tests
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Real sleep on the tokio timer
pub fn tokio_sleep() -> SleepFn {
    Arc::new(|duration| Box::pin(tokio::time::sleep(duration)))
}

/// Shared collaborators of the deploy and rollback pipelines
#[derive(Clone)]
pub struct PipelineContext {
    pub executor: Arc<dyn RemoteExecutor>,
    pub layout: RemoteLayout,
    pub compose: ComposeSettings,
    pub health_policy: HealthPolicy,
    pub health_probe: Arc<dyn HealthProbe>,
    pub stale_after: Duration,
    pub bus: EventBus,
    pub sleeper: SleepFn,
    pub confirmer: Arc<dyn Confirmer>,
}

impl PipelineContext {
    /// Context with the host-local curl probe and the tokio timer
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        settings: &Settings,
        bus: EventBus,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let health_probe: Arc<dyn HealthProbe> =
            Arc::new(RemoteCurlProbe::new(executor.clone(), settings.health.url.clone()));
        Self {
            executor,
            layout: RemoteLayout::new(settings.app_dir.clone()),
            compose: settings.compose.clone(),
            health_policy: HealthPolicy::from(&settings.health),
            health_probe,
            stale_after: Duration::from_secs(settings.lock.stale_after_secs),
            bus,
            sleeper: tokio_sleep(),
            confirmer,
        }
    }

    pub fn with_sleeper(mut self, sleeper: SleepFn) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = probe;
        self
    }

    pub fn with_health_policy(mut self, policy: HealthPolicy) -> Self {
        self.health_policy = policy;
        self
    }

    /// Compose command builder for the app directory
    pub fn compose(&self) -> Compose<'_> {
        Compose::new(&self.layout.app_dir, &self.compose)
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("target", &self.executor.describe())
            .field("layout", &self.layout)
            .field("health_probe", &self.health_probe.describe())
            .field("health_policy", &self.health_policy)
            .finish()
    }
}
