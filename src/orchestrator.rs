use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use rand::RngCore;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::attempt::{AttemptRequest, AttemptStatus, AttendanceAttempt, SessionKind};
use crate::automation::{AttendanceAutomation, AutomationOutcome};
use crate::error::AgentError;
use crate::render::Renderer;
use crate::store::{RecordFields, RecordStore, StoredRecord};
use crate::transform::CodeTransformer;

/// What the caller gets back as soon as Phase 1 finishes.
#[derive(Debug, Clone, Serialize)]
pub struct Phase1Response {
    pub attempt_id: String,
    pub kind: SessionKind,
    pub original_link: String,
    pub converted_link: String,
    pub image_path: PathBuf,
}

/// A submitted attempt: the immediate response plus the running Phase 2.
pub struct Submission {
    pub response: Phase1Response,
    pub phase_two: JoinHandle<AttendanceAttempt>,
}

/// Sequences code recovery and rendering (Phase 1) with browser automation
/// and record keeping (Phase 2).
pub struct AttendanceOrchestrator {
    transformer: CodeTransformer,
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn RecordStore>,
    automation: Arc<dyn AttendanceAutomation>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    link_prefix: String,
}

impl AttendanceOrchestrator {
    pub fn new(
        transformer: CodeTransformer,
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn RecordStore>,
        automation: Arc<dyn AttendanceAutomation>,
        rng: Box<dyn RngCore + Send>,
        link_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transformer,
            renderer,
            store,
            automation,
            rng: Mutex::new(rng),
            link_prefix: link_prefix.into(),
        }
    }

    /// Validates the request, runs Phase 1 and schedules Phase 2.
    ///
    /// Returns as soon as the QR image exists; Phase 2 keeps running on the
    /// runtime and yields the terminal attempt through the handle.
    pub fn submit(
        self: &Arc<Self>,
        kind: SessionKind,
        request: &AttemptRequest,
    ) -> Result<Submission, AgentError> {
        request.validate(&self.link_prefix)?;
        let (response, attempt) = self.prepare(kind, request)?;
        let phase_two = self.spawn_phase_two(attempt);
        Ok(Submission {
            response,
            phase_two,
        })
    }

    /// Runs Phase 2 for a link the caller already holds, skipping code
    /// recovery and rendering. `request.link` is the original code's link.
    pub fn mark(
        self: &Arc<Self>,
        kind: SessionKind,
        request: &AttemptRequest,
        link: &str,
    ) -> Result<(AttendanceAttempt, JoinHandle<AttendanceAttempt>), AgentError> {
        request.validate(&self.link_prefix)?;
        if !link.starts_with(&self.link_prefix) {
            return Err(AgentError::Validation(format!(
                "Invalid QR link format - expected a link starting with {}",
                self.link_prefix
            )));
        }
        let attempt = AttendanceAttempt::new(kind, request, link.to_string());
        tracing::info!(attempt_id = %attempt.id, %kind, module = %attempt.module_name, "manual attempt");
        let handle = self.spawn_phase_two(attempt.clone());
        Ok((attempt, handle))
    }

    /// Phase 1: derive the link for `kind` and render it.
    pub fn prepare(
        &self,
        kind: SessionKind,
        request: &AttemptRequest,
    ) -> Result<(Phase1Response, AttendanceAttempt), AgentError> {
        let converted = match kind {
            SessionKind::Morning => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.transformer.convert_expired(&request.link, &mut **rng)?
            }
            SessionKind::Evening => self.transformer.create_evening(&request.link)?,
        };

        let label = kind.label(request.module_name.trim());
        let image_path = self.renderer.render(&converted, Some(&label))?;
        let attempt = AttendanceAttempt::new(kind, request, converted);

        tracing::info!(
            attempt_id = %attempt.id,
            %kind,
            module = %attempt.module_name,
            image = %image_path.display(),
            "phase 1 complete"
        );
        let response = Phase1Response {
            attempt_id: attempt.id.clone(),
            kind,
            original_link: attempt.original_link.clone(),
            converted_link: attempt.converted_link.clone(),
            image_path,
        };
        Ok((response, attempt))
    }

    /// Phase 2: mark attendance, then write exactly one record.
    pub fn spawn_phase_two(self: &Arc<Self>, attempt: AttendanceAttempt) -> JoinHandle<AttendanceAttempt> {
        let span = tracing::info_span!(
            "attempt",
            id = %attempt.id,
            module = %attempt.module_name,
            kind = %attempt.kind
        );
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_phase_two(attempt).await }.instrument(span))
    }

    async fn run_phase_two(&self, mut attempt: AttendanceAttempt) -> AttendanceAttempt {
        attempt.phase = 2;
        tracing::info!(link = %attempt.converted_link, "phase 2 started");

        let outcome = self.automate(&attempt).await;
        settle(&mut attempt, &outcome);

        let fields = record_fields(&attempt);
        match self.store.create_record(&fields).await {
            Ok(id) => {
                tracing::info!(record_id = %id, status = %fields.status, "attempt recorded");
                attempt.record_id = Some(id);
            }
            Err(e) => {
                tracing::error!(error = %e, status = %fields.status, "failed to record attempt");
            }
        }
        attempt
    }

    // Runs the automation on its own task so a panic inside it still ends
    // the attempt as failed and gets recorded.
    async fn automate(&self, attempt: &AttendanceAttempt) -> AutomationOutcome {
        let automation = Arc::clone(&self.automation);
        let link = attempt.converted_link.clone();
        let credentials = attempt.credentials.clone();
        let task = tokio::spawn(
            async move { automation.mark_attendance(&link, &credentials).await }
                .in_current_span(),
        );
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = AgentError::Browser {
                    error: "automation aborted".into(),
                    message: e.to_string(),
                };
                tracing::error!(error = %error, "automation task did not complete");
                AutomationOutcome {
                    success: false,
                    message: format!("{}: {error}", error.class()),
                    error_class: Some(error.class()),
                    screenshot_path: None,
                    states: Vec::new(),
                    finished_at: Local::now(),
                }
            }
        }
    }

    /// Up to `count` links with distinct replacement digits.
    pub fn variants(&self, link: &str, count: usize) -> Result<Vec<String>, AgentError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.transformer.convert_multiple(link, count, &mut **rng)
    }

    pub fn convert_to_digit(&self, link: &str, digit: u32) -> Result<String, AgentError> {
        self.transformer.convert_to_digit(link, digit)
    }

    /// Renders an arbitrary payload without scheduling any automation.
    pub fn render_only(&self, payload: &str, label: Option<&str>) -> Result<PathBuf, AgentError> {
        self.renderer.render(payload, label)
    }

    pub async fn records_for_date(&self, date: &str) -> Result<Vec<StoredRecord>, AgentError> {
        self.store.query_by_date(date).await
    }

    pub async fn records_for_today(&self) -> Result<Vec<StoredRecord>, AgentError> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        self.store.query_by_date(&today).await
    }

    pub async fn records_for_module(&self, module: &str) -> Result<Vec<StoredRecord>, AgentError> {
        self.store.query_by_module(module).await
    }
}

fn settle(attempt: &mut AttendanceAttempt, outcome: &AutomationOutcome) {
    attempt.status = if outcome.success {
        AttemptStatus::Success
    } else {
        AttemptStatus::Failed
    };
    attempt.message = outcome.message.clone();
    attempt.screenshot_path = outcome.screenshot_path.clone();
    attempt.timestamp = outcome.finished_at;
}

fn record_fields(attempt: &AttendanceAttempt) -> RecordFields {
    let mut fields = RecordFields::new(
        &attempt.module_name,
        &attempt.original_link,
        attempt.status.into(),
        attempt.timestamp,
    );
    match attempt.kind {
        SessionKind::Morning => fields.converted_link = Some(attempt.converted_link.clone()),
        SessionKind::Evening => fields.evening_link = Some(attempt.converted_link.clone()),
    }
    fields.screenshot = attempt
        .screenshot_path
        .as_ref()
        .map(|path| path.display().to_string());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::Credentials;
    use crate::automation::State;
    use crate::error::ErrorClass;
    use crate::store::RecordStatus;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const PREFIX: &str = "https://students.nsbm.ac.lk/attendence/";
    const PORTAL: &str = "https://students.nsbm.ac.lk/attendence/index.php";
    const LINK: &str = "https://students.nsbm.ac.lk/attendence/index.php?id=52202002751_84783";

    struct FakeRenderer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Renderer for FakeRenderer {
        fn render(&self, payload: &str, _label: Option<&str>) -> Result<PathBuf, AgentError> {
            if self.fail {
                return Err(AgentError::Render(format!("payload too long: {}", payload.len())));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!("qr_codes/qr_code_{n}.png")))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<RecordFields>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn create_record(&self, fields: &RecordFields) -> Result<String, AgentError> {
            if self.fail {
                return Err(AgentError::Store("Airtable returned status 503".into()));
            }
            let mut records = self.records.lock().unwrap();
            records.push(fields.clone());
            Ok(format!("rec{}", records.len()))
        }

        async fn query_by_date(&self, date: &str) -> Result<Vec<StoredRecord>, AgentError> {
            Ok(self.matching(|f| f.date == date))
        }

        async fn query_by_module(&self, module: &str) -> Result<Vec<StoredRecord>, AgentError> {
            Ok(self.matching(|f| f.module == module))
        }
    }

    impl MemoryStore {
        fn matching(&self, keep: impl Fn(&RecordFields) -> bool) -> Vec<StoredRecord> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|f| keep(f))
                .enumerate()
                .map(|(i, f)| StoredRecord {
                    id: format!("rec{i}"),
                    created_time: None,
                    fields: f.clone(),
                })
                .collect()
        }
    }

    struct FakeAutomation {
        success: bool,
        panics: bool,
        gate: Option<Arc<Notify>>,
        links: Mutex<Vec<String>>,
    }

    impl FakeAutomation {
        fn new(success: bool) -> Self {
            Self {
                success,
                panics: false,
                gate: None,
                links: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AttendanceAutomation for FakeAutomation {
        async fn mark_attendance(&self, link: &str, _credentials: &Credentials) -> AutomationOutcome {
            self.links.lock().unwrap().push(link.to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.panics {
                panic!("driver state corrupted");
            }
            if self.success {
                AutomationOutcome {
                    success: true,
                    message: "Attendance marked successfully".into(),
                    error_class: None,
                    screenshot_path: Some(PathBuf::from("screenshots/confirmation_1.png")),
                    states: vec![State::Init, State::Captured],
                    finished_at: Local::now(),
                }
            } else {
                AutomationOutcome {
                    success: false,
                    message: "TimeoutError: marker never appeared".into(),
                    error_class: Some(ErrorClass::Timeout),
                    screenshot_path: Some(PathBuf::from("screenshots/error_1.png")),
                    states: vec![State::Init, State::Failed],
                    finished_at: Local::now(),
                }
            }
        }
    }

    struct Harness {
        orchestrator: Arc<AttendanceOrchestrator>,
        store: Arc<MemoryStore>,
        automation: Arc<FakeAutomation>,
    }

    fn harness(automation: FakeAutomation, store: MemoryStore, render_fails: bool) -> Harness {
        let store = Arc::new(store);
        let automation = Arc::new(automation);
        let orchestrator = Arc::new(AttendanceOrchestrator::new(
            CodeTransformer::new(PORTAL, 800_504),
            Arc::new(FakeRenderer {
                calls: AtomicUsize::new(0),
                fail: render_fails,
            }),
            store.clone(),
            automation.clone(),
            Box::new(StdRng::seed_from_u64(7)),
            PREFIX,
        ));
        Harness {
            orchestrator,
            store,
            automation,
        }
    }

    fn request(link: &str) -> AttemptRequest {
        AttemptRequest {
            link: link.into(),
            module_name: "Networks".into(),
            credentials: Credentials::new("kasun", "secret"),
        }
    }

    #[tokio::test]
    async fn morning_success_writes_one_success_record() {
        let h = harness(FakeAutomation::new(true), MemoryStore::default(), false);

        let submission = h
            .orchestrator
            .submit(SessionKind::Morning, &request(LINK))
            .unwrap();
        assert_eq!(submission.response.original_link, LINK);
        assert_ne!(submission.response.converted_link, LINK);
        assert!(submission.response.converted_link.ends_with("_84783"));

        let attempt = submission.phase_two.await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Success);
        assert_eq!(attempt.phase, 2);
        assert_eq!(attempt.id, submission.response.attempt_id);
        assert_eq!(attempt.record_id.as_deref(), Some("rec1"));

        let records = h.store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, RecordStatus::Success);
        assert_eq!(record.module, "Networks");
        assert_eq!(record.original_link, LINK);
        assert_eq!(record.converted_link.as_deref(), Some(attempt.converted_link.as_str()));
        assert!(record.evening_link.is_none());
        assert_eq!(record.screenshot.as_deref(), Some("screenshots/confirmation_1.png"));

        assert_eq!(
            h.automation.links.lock().unwrap().as_slice(),
            [submission.response.converted_link.clone()]
        );
    }

    #[tokio::test]
    async fn evening_failure_writes_failed_record_with_evening_link() {
        let h = harness(FakeAutomation::new(false), MemoryStore::default(), false);

        let submission = h
            .orchestrator
            .submit(SessionKind::Evening, &request(LINK))
            .unwrap();
        assert_eq!(
            submission.response.converted_link,
            "https://students.nsbm.ac.lk/attendence/index.php?id=52202803255_84783"
        );

        let attempt = submission.phase_two.await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert!(attempt.message.starts_with("TimeoutError"));

        let records = h.store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Failed);
        assert_eq!(records[0].original_link, LINK);
        assert_eq!(
            records[0].evening_link.as_deref(),
            Some("https://students.nsbm.ac.lk/attendence/index.php?id=52202803255_84783")
        );
        assert!(records[0].converted_link.is_none());
    }

    #[tokio::test]
    async fn phase_one_returns_before_automation_finishes() {
        let gate = Arc::new(Notify::new());
        let automation = FakeAutomation {
            gate: Some(gate.clone()),
            ..FakeAutomation::new(true)
        };
        let h = harness(automation, MemoryStore::default(), false);

        let submission = h
            .orchestrator
            .submit(SessionKind::Morning, &request(LINK))
            .unwrap();
        assert!(submission.response.image_path.ends_with("qr_code_0.png"));

        tokio::task::yield_now().await;
        assert!(!submission.phase_two.is_finished());
        assert!(h.store.records.lock().unwrap().is_empty());

        gate.notify_one();
        let attempt = submission.phase_two.await.unwrap();
        assert!(attempt.is_terminal());
        assert_eq!(h.store.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let h = harness(FakeAutomation::new(true), store, false);

        let submission = h
            .orchestrator
            .submit(SessionKind::Morning, &request(LINK))
            .unwrap();
        let attempt = submission.phase_two.await.unwrap();

        assert_eq!(attempt.status, AttemptStatus::Success);
        assert!(attempt.record_id.is_none());
    }

    #[tokio::test]
    async fn automation_panic_still_records_failure() {
        let automation = FakeAutomation {
            panics: true,
            ..FakeAutomation::new(true)
        };
        let h = harness(automation, MemoryStore::default(), false);

        let submission = h
            .orchestrator
            .submit(SessionKind::Morning, &request(LINK))
            .unwrap();
        let attempt = submission.phase_two.await.unwrap();

        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert!(attempt.message.starts_with("BrowserError"), "{}", attempt.message);
        let records = h.store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn mark_reuses_given_evening_link() {
        let h = harness(FakeAutomation::new(true), MemoryStore::default(), false);
        let evening = "https://students.nsbm.ac.lk/attendence/index.php?id=52202803255_84783";

        let (pending, handle) = h
            .orchestrator
            .mark(SessionKind::Evening, &request(LINK), evening)
            .unwrap();
        assert_eq!(pending.status, AttemptStatus::Pending);

        let attempt = handle.await.unwrap();
        assert_eq!(attempt.id, pending.id);
        assert_eq!(attempt.status, AttemptStatus::Success);
        assert_eq!(h.automation.links.lock().unwrap().as_slice(), [evening.to_string()]);

        let records = h.store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_link, LINK);
        assert_eq!(records[0].evening_link.as_deref(), Some(evening));
        assert!(records[0].converted_link.is_none());
    }

    #[tokio::test]
    async fn mark_rejects_foreign_link_and_blank_credentials() {
        let h = harness(FakeAutomation::new(true), MemoryStore::default(), false);

        let foreign = h
            .orchestrator
            .mark(SessionKind::Morning, &request(LINK), "https://elsewhere.test/?id=1_2");
        assert!(matches!(foreign.err(), Some(AgentError::Validation(_))));

        let mut blank = request(LINK);
        blank.credentials.username = String::new();
        let blank = h.orchestrator.mark(SessionKind::Morning, &blank, LINK);
        assert!(matches!(blank.err(), Some(AgentError::Validation(_))));

        tokio::task::yield_now().await;
        assert!(h.automation.links.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_automation() {
        let h = harness(FakeAutomation::new(true), MemoryStore::default(), false);

        let foreign = h
            .orchestrator
            .submit(SessionKind::Morning, &request("https://elsewhere.test/?id=1_2"));
        assert!(matches!(foreign.err(), Some(AgentError::Validation(_))));

        let no_id = h.orchestrator.submit(
            SessionKind::Morning,
            &request("https://students.nsbm.ac.lk/attendence/index.php"),
        );
        assert!(matches!(no_id.err(), Some(AgentError::Format(_))));

        let mut blank = request(LINK);
        blank.credentials.password = "  ".into();
        let blank = h.orchestrator.submit(SessionKind::Morning, &blank);
        assert!(matches!(blank.err(), Some(AgentError::Validation(_))));

        assert!(h.automation.links.lock().unwrap().is_empty());
        assert!(h.store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn render_failure_schedules_nothing() {
        let h = harness(FakeAutomation::new(true), MemoryStore::default(), true);

        let result = h.orchestrator.submit(SessionKind::Morning, &request(LINK));
        assert!(matches!(result.err(), Some(AgentError::Render(_))));
        tokio::task::yield_now().await;
        assert!(h.automation.links.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_submission_is_a_new_attempt() {
        let h = harness(FakeAutomation::new(true), MemoryStore::default(), false);

        let a = h.orchestrator.submit(SessionKind::Morning, &request(LINK)).unwrap();
        let b = h.orchestrator.submit(SessionKind::Morning, &request(LINK)).unwrap();
        assert_ne!(a.response.attempt_id, b.response.attempt_id);

        a.phase_two.await.unwrap();
        b.phase_two.await.unwrap();
        assert_eq!(h.store.records.lock().unwrap().len(), 2);

        let by_module = h.orchestrator.records_for_module("Networks").await.unwrap();
        assert_eq!(by_module.len(), 2);
        let today = h.orchestrator.records_for_today().await.unwrap();
        assert_eq!(today.len(), 2);
    }

    #[test]
    fn pass_throughs_use_transformer() {
        let h = harness(FakeAutomation::new(true), MemoryStore::default(), false);

        let variants = h.orchestrator.variants(LINK, 9).unwrap();
        assert_eq!(variants.len(), 9);
        assert!(!variants.contains(&LINK.to_string()));

        assert_eq!(
            h.orchestrator.convert_to_digit(LINK, 4).unwrap(),
            "https://students.nsbm.ac.lk/attendence/index.php?id=52202002754_84783"
        );
        assert!(h.orchestrator.render_only("hello", Some("label")).is_ok());
    }
}
