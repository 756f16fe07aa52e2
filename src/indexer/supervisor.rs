//! Lifecycle binding for the ingestion engine and read API.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::store::SqliteStore;
use crate::upstream::UpstreamClient;

use super::admission::Admission;
use super::engine::Indexer;
use super::limiter::RateLimiter;
use super::reconciler::Reconciler;

/// Binds stores, upstream client, limiter, admission, reconciler, and the
/// read API; owns the root cancellation signal and the worker tracker.
pub struct Supervisor {
    config: Config,
    cancel: CancellationToken,
    tracker: TaskTracker,
    admission: Arc<Admission>,
    reconciler: Arc<Reconciler>,
    state: AppState,
}

impl Supervisor {
    /// Wire all components over the given store and upstream client.
    pub fn new(config: Config, store: Arc<SqliteStore>, upstream: Arc<UpstreamClient>) -> Self {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let limiter = Arc::new(RateLimiter::new());

        let indexer = Arc::new(Indexer::new(
            store.clone(),
            store.clone(),
            store.clone(),
            upstream.clone(),
            limiter,
        ));

        let admission = Arc::new(Admission::new(
            store.clone(),
            upstream,
            Arc::clone(&indexer),
            tracker.clone(),
            cancel.clone(),
            config.default_start_date,
        ));

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            indexer,
            config.monitor_interval(),
            config.worker_pool_size,
            config.resume_from_checkpoint,
        ));

        let state = AppState::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::clone(&admission),
        );

        Self {
            config,
            cancel,
            tracker,
            admission,
            reconciler,
            state,
        }
    }

    /// The root cancellation token; cancel it to begin shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The admission entry point.
    #[must_use]
    pub fn admission(&self) -> &Arc<Admission> {
        &self.admission
    }

    /// Run the service until the cancellation token fires.
    ///
    /// Startup order: seed an empty store, start the reconciler, then
    /// serve the read API in the foreground. On cancellation the server
    /// drains, the tracker closes, and every in-flight pass is awaited so
    /// its last checkpoint lands before the process exits.
    pub async fn run(&self) -> std::io::Result<()> {
        match self.admission.seed(&self.config.default_repo).await {
            Ok(Some(repo)) => info!(repo = %repo.coordinate(), "seeded default repository"),
            Ok(None) => {}
            // A failed seed leaves a usable service; admission can still
            // happen through the API and the next startup retries.
            Err(e) => error!(error = %e, "seeding default repository failed"),
        }

        {
            let reconciler = Arc::clone(&self.reconciler);
            let cancel = self.cancel.clone();
            self.tracker.spawn(async move { reconciler.run(cancel).await });
        }

        info!(addr = %self.config.bind_addr, "read api listening");
        api::serve(self.state.clone(), self.config.bind_addr, self.cancel.clone()).await?;

        self.join().await;
        info!("shutdown complete");
        Ok(())
    }

    /// Wait for all spawned workers to finish their current checkpoint.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RepoStore;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn supervisor_with_mock(server: &MockServer) -> (Supervisor, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let upstream = Arc::new(UpstreamClient::new(server.uri(), None).unwrap());

        let config = Config {
            default_repo: "owner/repo".to_string(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Config::default()
        };

        (Supervisor::new(config, store.clone(), upstream), store)
    }

    #[tokio::test]
    async fn test_run_seeds_and_shuts_down_cleanly() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/owner/repo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "repo",
                "html_url": "https://github.com/owner/repo",
                "owner": { "login": "owner" },
                "created_at": "2020-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let (supervisor, store) = supervisor_with_mock(&server).await;
        let cancel = supervisor.cancellation_token();

        let run = tokio::spawn(async move { supervisor.run().await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        // The empty store was seeded and the seed backfill completed.
        let repo = store.get_by_name("repo").await.unwrap().unwrap();
        assert_eq!(repo.owner_name, "owner");
        assert!(!repo.indexing);
    }

    #[tokio::test]
    async fn test_run_survives_seed_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/owner/repo"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (supervisor, store) = supervisor_with_mock(&server).await;
        let cancel = supervisor.cancellation_token();

        let run = tokio::spawn(async move { supervisor.run().await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert!(store.get_all().await.unwrap().is_empty());
    }
}
