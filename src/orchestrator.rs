// Export orchestration
// Drives one structural object through submit -> poll -> download

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{Authenticator, CredentialSet};
use crate::error::{ExportError, ExportOutcome, Result};
use crate::http_client::ExportApi;
use crate::timing::Sleeper;

/// Delays and attempt budget for an export run
#[derive(Debug, Clone, PartialEq)]
pub struct TimingPolicy {
    /// Wait after a job is accepted before the first poll
    pub settle_delay: Duration,
    /// Wait before every progress check
    pub poll_interval: Duration,
    /// Progress checks allowed before giving up
    pub max_poll_attempts: u32,
    /// Wait after completion so the package can finalize server-side
    pub completion_delay: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 15,
            completion_delay: Duration::from_secs(60),
        }
    }
}

/// How a non-200 progress check is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPolicy {
    /// Abort the run on the first non-200 response
    #[default]
    AbortOnFirstNonReady,
    /// Treat non-200 as still running and poll until the budget is spent
    KeepPolling,
}

/// An export job accepted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub structural_object_id: String,
    pub progress_token: String,
}

/// Interpretation of one progress check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    Pending,
    Complete,
    Failed(u16),
}

impl ProgressOutcome {
    pub fn from_status(status: u16, policy: PollPolicy) -> Self {
        match (status, policy) {
            (200, _) => ProgressOutcome::Complete,
            (_, PollPolicy::KeepPolling) => ProgressOutcome::Pending,
            (code, PollPolicy::AbortOnFirstNonReady) => ProgressOutcome::Failed(code),
        }
    }
}

/// Package bytes waiting to be written
#[derive(Debug, Clone)]
pub struct DownloadedPackage {
    pub bytes: Bytes,
    pub file_name: String,
}

impl DownloadedPackage {
    pub fn new(structural_object_id: &str, bytes: Bytes) -> Self {
        Self {
            bytes,
            file_name: package_file_name(structural_object_id),
        }
    }

    /// Write the package into `dir`, returning the written path
    ///
    /// Goes through a temp file and a rename, so `<uuid>.zip` is either
    /// absent or complete.
    pub async fn persist(self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        let temp_path = dir.join(format!("{}.tmp.{}", self.file_name, Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&temp_path, &self.bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(path)
    }
}

/// File name of the package for a structural object
pub fn package_file_name(structural_object_id: &str) -> String {
    format!("{}.zip", structural_object_id)
}

/// Orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportState {
    Submitting,
    Polling(ExportJob),
    Downloading(ExportJob),
    Done(PathBuf),
    Aborted(String),
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Done(_) | ExportState::Aborted(_))
    }
}

/// Export orchestrator
/// Runs a single export job to completion, one state transition per step
pub struct ExportOrchestrator<A: ExportApi> {
    api: A,
    authenticator: Arc<Authenticator>,
    sleeper: Arc<dyn Sleeper>,
    credentials: CredentialSet,
    structural_object_id: String,
    output_dir: PathBuf,
    timing: TimingPolicy,
    poll_policy: PollPolicy,

    state: ExportState,
    /// Token obtained when the run starts, reused for every call
    token: Option<String>,
}

impl<A: ExportApi> ExportOrchestrator<A> {
    pub fn new(
        api: A,
        authenticator: Arc<Authenticator>,
        sleeper: Arc<dyn Sleeper>,
        credentials: CredentialSet,
        structural_object_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            authenticator,
            sleeper,
            credentials,
            structural_object_id: structural_object_id.into(),
            output_dir: PathBuf::from("."),
            timing: TimingPolicy::default(),
            poll_policy: PollPolicy::default(),
            state: ExportState::Submitting,
            token: None,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn state(&self) -> &ExportState {
        &self.state
    }

    /// Run until Done or Aborted
    pub async fn run(&mut self) -> ExportOutcome {
        tracing::info!(
            "Starting export of structural object {}",
            self.structural_object_id
        );

        while !self.state.is_terminal() {
            self.step().await;
        }

        match &self.state {
            ExportState::Done(path) => {
                tracing::info!("✅ Export saved to {}", path.display());
                ExportOutcome::succeeded()
            }
            ExportState::Aborted(detail) => {
                tracing::error!("❌ Export aborted: {}", detail);
                ExportOutcome::failed(detail.clone())
            }
            state => ExportOutcome::failed(format!("Export stopped in state {:?}", state)),
        }
    }

    /// Advance exactly one state; terminal states are left unchanged
    pub async fn step(&mut self) {
        let next = match self.state.clone() {
            ExportState::Submitting => self.submit().await.map(ExportState::Polling),
            ExportState::Polling(job) => self
                .poll(&job)
                .await
                .map(|_| ExportState::Downloading(job)),
            ExportState::Downloading(job) => self.download(&job).await.map(ExportState::Done),
            ExportState::Done(_) | ExportState::Aborted(_) => return,
        };

        self.state = next.unwrap_or_else(|e| ExportState::Aborted(e.to_string()));
    }

    async fn token(&mut self) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let token = self.authenticator.get_token(&self.credentials).await?;
        self.token = Some(token.clone());
        Ok(token)
    }

    async fn submit(&mut self) -> Result<ExportJob> {
        let token = self.token().await?;
        let response = self
            .api
            .submit_export(&self.structural_object_id, &token)
            .await?;

        // 202 without a progress token leaves nothing to poll
        if response.status != 202 || response.body.trim().is_empty() {
            return Err(ExportError::SubmitRejected {
                status: response.status,
                body: response.body,
            });
        }

        let job = ExportJob {
            structural_object_id: self.structural_object_id.clone(),
            progress_token: response.body,
        };
        tracing::info!("Export accepted, progress token {}", job.progress_token);

        self.sleeper.sleep(self.timing.settle_delay).await;
        Ok(job)
    }

    async fn poll(&mut self, job: &ExportJob) -> Result<()> {
        let token = self.token().await?;
        let max_attempts = self.timing.max_poll_attempts;

        for attempt in 1..=max_attempts {
            self.sleeper.sleep(self.timing.poll_interval).await;

            let response = self.api.check_progress(&job.progress_token, &token).await?;
            tracing::debug!(
                attempt = attempt,
                max_attempts = max_attempts,
                status = response.status,
                "Progress check"
            );

            match ProgressOutcome::from_status(response.status, self.poll_policy) {
                ProgressOutcome::Complete => {
                    tracing::info!(
                        "Export complete after {} progress checks, waiting {}s for the package",
                        attempt,
                        self.timing.completion_delay.as_secs()
                    );
                    self.sleeper.sleep(self.timing.completion_delay).await;
                    return Ok(());
                }
                ProgressOutcome::Pending => {
                    tracing::info!(
                        "Export still running (status {}, attempt {}/{})",
                        response.status,
                        attempt,
                        max_attempts
                    );
                }
                ProgressOutcome::Failed(status) => {
                    return Err(ExportError::ProgressNotReady { status });
                }
            }
        }

        Err(ExportError::PollTimeout {
            attempts: max_attempts,
        })
    }

    async fn download(&mut self, job: &ExportJob) -> Result<PathBuf> {
        let token = self.token().await?;
        let response = self
            .api
            .download_export(&job.progress_token, &token)
            .await?;

        if response.status != 200 {
            return Err(ExportError::DownloadFailure(format!(
                "content request returned {}",
                response.status
            )));
        }

        tracing::info!("Downloaded {} bytes", response.bytes.len());
        let package = DownloadedPackage::new(&job.structural_object_id, response.bytes);
        Ok(package.persist(&self.output_dir).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CachedToken;
    use crate::cache::{MemoryTokenCache, TokenCache};
    use crate::http_client::{DownloadResponse, ProgressResponse, SubmitResponse};
    use crate::timing::Clock;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const SO_ID: &str = "d8ba26ae-e915-4071-8d27-4838ee73f0d7";

    /// Replays canned responses and counts calls
    #[derive(Default)]
    struct ScriptedApi {
        submit: Mutex<VecDeque<std::result::Result<SubmitResponse, ExportError>>>,
        progress: Mutex<VecDeque<u16>>,
        download: Mutex<VecDeque<std::result::Result<DownloadResponse, ExportError>>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedApi {
        fn submit(self, status: u16, body: &str) -> Self {
            self.submit.lock().unwrap().push_back(Ok(SubmitResponse {
                status,
                body: body.to_string(),
            }));
            self
        }

        fn progress(self, statuses: &[u16]) -> Self {
            self.progress.lock().unwrap().extend(statuses);
            self
        }

        fn download(self, status: u16, bytes: &'static [u8]) -> Self {
            self.download.lock().unwrap().push_back(Ok(DownloadResponse {
                status,
                bytes: Bytes::from_static(bytes),
            }));
            self
        }

        fn download_error(self, err: ExportError) -> Self {
            self.download.lock().unwrap().push_back(Err(err));
            self
        }

        fn count(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
        }
    }

    #[async_trait]
    impl ExportApi for ScriptedApi {
        async fn submit_export(
            &self,
            _structural_object_id: &str,
            _token: &str,
        ) -> std::result::Result<SubmitResponse, ExportError> {
            self.calls.lock().unwrap().push("submit");
            self.submit.lock().unwrap().pop_front().expect("unexpected submit")
        }

        async fn check_progress(
            &self,
            _progress_token: &str,
            _token: &str,
        ) -> std::result::Result<ProgressResponse, ExportError> {
            self.calls.lock().unwrap().push("progress");
            let status = self.progress.lock().unwrap().pop_front().expect("unexpected poll");
            Ok(ProgressResponse { status })
        }

        async fn download_export(
            &self,
            _progress_token: &str,
            _token: &str,
        ) -> std::result::Result<DownloadResponse, ExportError> {
            self.calls.lock().unwrap().push("download");
            self.download.lock().unwrap().pop_front().expect("unexpected download")
        }
    }

    // Shared handle so tests can inspect calls after the orchestrator takes ownership
    #[async_trait]
    impl ExportApi for Arc<ScriptedApi> {
        async fn submit_export(
            &self,
            id: &str,
            token: &str,
        ) -> std::result::Result<SubmitResponse, ExportError> {
            self.as_ref().submit_export(id, token).await
        }

        async fn check_progress(
            &self,
            progress_token: &str,
            token: &str,
        ) -> std::result::Result<ProgressResponse, ExportError> {
            self.as_ref().check_progress(progress_token, token).await
        }

        async fn download_export(
            &self,
            progress_token: &str,
            token: &str,
        ) -> std::result::Result<DownloadResponse, ExportError> {
            self.as_ref().download_export(progress_token, token).await
        }
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> f64 {
            1000.0
        }
    }

    /// Records requested sleeps without waiting
    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn creds() -> CredentialSet {
        CredentialSet::new("jane", "secret", "nypl")
    }

    /// Authenticator whose cache already holds a valid token, so it never logs in
    fn authenticator() -> Arc<Authenticator> {
        let cache = MemoryTokenCache::new();
        cache.store(&creds(), &CachedToken::new(990.0, "tok")).unwrap();
        Arc::new(Authenticator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Arc::new(cache),
            Arc::new(FixedClock),
        ))
    }

    fn orchestrator(
        api: &Arc<ScriptedApi>,
        sleeper: &Arc<RecordingSleeper>,
        dir: &Path,
    ) -> ExportOrchestrator<Arc<ScriptedApi>> {
        ExportOrchestrator::new(
            api.clone(),
            authenticator(),
            sleeper.clone(),
            creds(),
            SO_ID,
        )
        .with_output_dir(dir)
    }

    #[tokio::test]
    async fn test_accepted_submit_moves_to_polling() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::default().submit(202, "abc-123"));
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path());

        orch.step().await;

        assert_eq!(
            orch.state(),
            &ExportState::Polling(ExportJob {
                structural_object_id: SO_ID.to_string(),
                progress_token: "abc-123".to_string(),
            })
        );
        assert_eq!(*sleeper.0.lock().unwrap(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn test_rejected_submit_aborts_without_polling() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::default().submit(500, "boom"));
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path());

        let outcome = orch.run().await;

        assert!(!outcome.success);
        assert!(outcome.error_detail.unwrap().contains("500"));
        assert_eq!(api.count("progress"), 0);
        assert_eq!(api.count("download"), 0);
        assert!(sleeper.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_submit_without_progress_token_aborts() {
        for body in ["", "  \n"] {
            let dir = tempfile::tempdir().unwrap();
            let api = Arc::new(ScriptedApi::default().submit(202, body));
            let sleeper = Arc::new(RecordingSleeper::default());
            let mut orch = orchestrator(&api, &sleeper, dir.path());

            let outcome = orch.run().await;

            assert!(!outcome.success);
            assert!(outcome
                .error_detail
                .unwrap()
                .starts_with("Export request rejected: 202"));
            assert_eq!(api.count("progress"), 0);
            assert_eq!(api.count("download"), 0);
            assert!(sleeper.0.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_first_non_200_poll_aborts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::default().submit(202, "abc-123").progress(&[503, 200]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path());

        let outcome = orch.run().await;

        assert_eq!(
            outcome,
            ExportOutcome::failed("Export not ready: progress check returned 503")
        );
        assert_eq!(api.count("progress"), 1);
        assert_eq!(api.count("download"), 0);
    }

    #[tokio::test]
    async fn test_keep_polling_retries_until_complete() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            ScriptedApi::default()
                .submit(202, "abc-123")
                .progress(&[202, 202, 200])
                .download(200, b"PK\x03\x04"),
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path())
            .with_poll_policy(PollPolicy::KeepPolling);

        let outcome = orch.run().await;

        assert!(outcome.success);
        assert_eq!(api.count("progress"), 3);
    }

    #[tokio::test]
    async fn test_keep_polling_times_out_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::default().submit(202, "abc-123").progress(&[503; 15]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path())
            .with_poll_policy(PollPolicy::KeepPolling);

        let outcome = orch.run().await;

        assert_eq!(
            outcome,
            ExportOutcome::failed("Export did not complete after 15 progress checks")
        );
        assert_eq!(api.count("progress"), 15);
        // settle delay plus one interval per attempt
        assert_eq!(sleeper.0.lock().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_successful_run_writes_package() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            ScriptedApi::default()
                .submit(202, "abc-123")
                .progress(&[200])
                .download(200, b"PK\x03\x04rest-of-zip"),
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path());

        let outcome = orch.run().await;

        assert_eq!(outcome, ExportOutcome::succeeded());
        let path = dir.path().join(format!("{}.zip", SO_ID));
        assert_eq!(orch.state(), &ExportState::Done(path.clone()));
        assert_eq!(std::fs::read(path).unwrap(), b"PK\x03\x04rest-of-zip");
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(5),
                Duration::from_secs(60)
            ]
        );
    }

    #[tokio::test]
    async fn test_download_non_200_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            ScriptedApi::default()
                .submit(202, "abc-123")
                .progress(&[200])
                .download(404, b""),
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path());

        let outcome = orch.run().await;

        assert_eq!(
            outcome,
            ExportOutcome::failed("Download failed: content request returned 404")
        );
        assert!(!dir.path().join(format!("{}.zip", SO_ID)).exists());
    }

    #[tokio::test]
    async fn test_download_transport_error_becomes_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            ScriptedApi::default()
                .submit(202, "abc-123")
                .progress(&[200])
                .download_error(ExportError::DownloadFailure("connection reset".to_string())),
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path());

        let outcome = orch.run().await;

        assert_eq!(outcome, ExportOutcome::failed("Download failed: connection reset"));
        assert!(matches!(orch.state(), ExportState::Aborted(_)));
    }

    #[tokio::test]
    async fn test_terminal_state_step_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::default().submit(400, "bad"));
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut orch = orchestrator(&api, &sleeper, dir.path());

        orch.run().await;
        assert!(orch.state().is_terminal());
        let state = orch.state().clone();
        orch.step().await;

        assert_eq!(orch.state(), &state);
        assert_eq!(api.count("submit"), 1);
    }

    #[tokio::test]
    async fn test_persist_replaces_existing_package_whole() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(package_file_name(SO_ID));
        std::fs::write(&target, b"stale partial").unwrap();

        let package = DownloadedPackage::new(SO_ID, Bytes::from_static(b"PK\x03\x04fresh"));
        let path = package.persist(dir.path()).await.unwrap();

        assert_eq!(path, target);
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04fresh");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(package_file_name(SO_ID))]);
    }

    #[tokio::test]
    async fn test_persist_creates_missing_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("exports").join("today");

        let package = DownloadedPackage::new(SO_ID, Bytes::from_static(b"zip"));
        let path = package.persist(&nested).await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"zip");
    }

    #[test]
    fn test_progress_outcome_from_status() {
        assert_eq!(
            ProgressOutcome::from_status(200, PollPolicy::AbortOnFirstNonReady),
            ProgressOutcome::Complete
        );
        assert_eq!(
            ProgressOutcome::from_status(503, PollPolicy::AbortOnFirstNonReady),
            ProgressOutcome::Failed(503)
        );
        assert_eq!(
            ProgressOutcome::from_status(503, PollPolicy::KeepPolling),
            ProgressOutcome::Pending
        );
    }

    #[test]
    fn test_package_file_name() {
        assert_eq!(package_file_name(SO_ID), format!("{}.zip", SO_ID));
    }
}
