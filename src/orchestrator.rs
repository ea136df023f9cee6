//! Plan orchestration: one session, two sequential generation calls.
//!
//! The session moves through [`SessionPhase`]; loading flags are derived from the
//! phase, so combinations like "image loading without a plan" cannot exist. Every
//! submission gets an id, and results arriving for an id that is no longer current
//! (after a start over) are dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExportError, SubmitError};
use crate::export::plan_to_text;
use crate::generation::{ImageGenerator, Infographic, PlanGenerator};
use crate::models::{GeneratedPlan, Notice, PlanRequest};
use crate::validation::validate_goal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    GeneratingText,
    TextReady { plan: GeneratedPlan },
    GeneratingImage { plan: GeneratedPlan },
    Settled(Settlement),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ready { plan: GeneratedPlan, infographic_url: Option<String> },
    Failed { message: String },
}

impl SessionPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            SessionPhase::Idle => PhaseKind::Idle,
            SessionPhase::GeneratingText => PhaseKind::GeneratingText,
            SessionPhase::TextReady { .. } => PhaseKind::TextReady,
            SessionPhase::GeneratingImage { .. } => PhaseKind::GeneratingImage,
            SessionPhase::Settled(Settlement::Ready { .. }) => PhaseKind::Ready,
            SessionPhase::Settled(Settlement::Failed { .. }) => PhaseKind::Failed,
        }
    }

    /// New submissions are refused while this is true.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionPhase::GeneratingText | SessionPhase::TextReady { .. } | SessionPhase::GeneratingImage { .. }
        )
    }

    pub fn plan(&self) -> Option<&GeneratedPlan> {
        match self {
            SessionPhase::TextReady { plan }
            | SessionPhase::GeneratingImage { plan }
            | SessionPhase::Settled(Settlement::Ready { plan, .. }) => Some(plan),
            _ => None,
        }
    }

    pub fn infographic_url(&self) -> Option<&str> {
        match self {
            SessionPhase::Settled(Settlement::Ready { infographic_url, .. }) => infographic_url.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PhaseKind {
    Idle,
    GeneratingText,
    TextReady,
    GeneratingImage,
    Ready,
    Failed,
}

/// What the view layer sees.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: PhaseKind,
    pub submission_id: Option<Uuid>,
    pub goal: Option<String>,
    pub timeframe: Option<String>,
    pub plan: Option<GeneratedPlan>,
    pub infographic_url: Option<String>,
    pub is_loading_text: bool,
    pub is_loading_image: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub notice: Option<Notice>,
    pub updated_at: DateTime<Utc>,
}

/// Handle for a submission accepted by [`PlanOrchestrator::begin`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub request: PlanRequest,
}

struct Session {
    submission: Option<Uuid>,
    request: Option<PlanRequest>,
    phase: SessionPhase,
    notice: Option<Notice>,
    updated_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self { submission: None, request: None, phase: SessionPhase::Idle, notice: None, updated_at: Utc::now() }
    }
}

impl Session {
    fn snapshot(&self) -> SessionSnapshot {
        let is_loading_text = matches!(self.phase, SessionPhase::GeneratingText);
        let is_loading_image = matches!(self.phase, SessionPhase::TextReady { .. } | SessionPhase::GeneratingImage { .. });
        let error = match &self.phase {
            SessionPhase::Settled(Settlement::Failed { message }) => Some(message.clone()),
            _ => None,
        };
        SessionSnapshot {
            phase: self.phase.kind(),
            submission_id: self.submission,
            goal: self.request.as_ref().map(|r| r.goal.clone()),
            timeframe: self.request.as_ref().and_then(|r| r.timeframe.clone()),
            plan: self.phase.plan().cloned(),
            infographic_url: self.phase.infographic_url().map(str::to_string),
            is_loading_text,
            is_loading_image,
            is_loading: is_loading_text || is_loading_image,
            error,
            notice: self.notice.clone(),
            updated_at: self.updated_at,
        }
    }
}

pub struct PlanOrchestrator {
    plans: Arc<dyn PlanGenerator>,
    images: Arc<dyn ImageGenerator>,
    session: RwLock<Session>,
}

impl PlanOrchestrator {
    pub fn new(plans: Arc<dyn PlanGenerator>, images: Arc<dyn ImageGenerator>) -> Self {
        Self { plans, images, session: RwLock::new(Session::default()) }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.read().snapshot()
    }

    /// Validate the goal and move to `GeneratingText`. Refused while a generation is running.
    pub fn begin(&self, goal: &str, timeframe: Option<&str>) -> Result<Submission, SubmitError> {
        let goal = validate_goal(goal)?;
        let request = PlanRequest::compose(goal, timeframe);

        let mut session = self.session.write();
        if session.phase.is_busy() {
            warn!("Ignoring submission while {:?} is active", session.phase.kind());
            return Err(SubmitError::Busy);
        }

        let id = Uuid::new_v4();
        *session = Session {
            submission: Some(id),
            request: Some(request.clone()),
            phase: SessionPhase::GeneratingText,
            notice: None,
            updated_at: Utc::now(),
        };
        info!(%id, "🎯 Accepted goal: {}", request.goal);
        Ok(Submission { id, request })
    }

    /// Drive an accepted submission to `Settled`. Text first; the image prompt comes from the text.
    pub async fn run(&self, submission: Submission) {
        let Submission { id, request } = submission;

        let plan = match self.plans.generate_plan(&request).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(%id, "❌ Plan generation failed: {}", e);
                let message = e.user_message().to_string();
                self.apply(id, |session| {
                    session.notice = Some(Notice::error("Error Generating Plan", message.clone()));
                    session.phase = SessionPhase::Settled(Settlement::Failed { message });
                });
                return;
            }
        };

        let prompt = plan.infographic_prompt.clone();
        if !self.apply(id, |session| session.phase = SessionPhase::TextReady { plan }) {
            return;
        }
        info!(%id, "✅ Plan published, starting infographic");

        if !self.apply(id, |session| {
            session.phase = match std::mem::replace(&mut session.phase, SessionPhase::Idle) {
                SessionPhase::TextReady { plan } => SessionPhase::GeneratingImage { plan },
                other => other,
            };
        }) {
            return;
        }

        let infographic = self.images.generate_image(&prompt).await;

        self.apply(id, |session| {
            session.phase = match std::mem::replace(&mut session.phase, SessionPhase::Idle) {
                SessionPhase::GeneratingImage { plan } => {
                    if infographic == Infographic::Empty {
                        session.notice = Some(Notice::info(
                            "Infographic Generation Issue",
                            "Could not generate the infographic image, but your text plan is ready.",
                        ));
                    }
                    SessionPhase::Settled(Settlement::Ready { plan, infographic_url: infographic.into_url() })
                }
                other => other,
            };
        });
        info!(%id, "🏁 Submission settled");
    }

    /// `begin` followed by `run`; returns the settled snapshot.
    pub async fn submit(&self, goal: &str, timeframe: Option<&str>) -> Result<SessionSnapshot, SubmitError> {
        let submission = self.begin(goal, timeframe)?;
        self.run(submission).await;
        Ok(self.snapshot())
    }

    /// Back to `Idle` from anywhere. In-flight work keeps running but its results are dropped.
    pub fn start_over(&self) -> SessionSnapshot {
        let mut session = self.session.write();
        if let Some(id) = session.submission {
            debug!(%id, "Discarding submission on start over");
        }
        *session = Session::default();
        session.snapshot()
    }

    pub fn dismiss_notice(&self) -> SessionSnapshot {
        let mut session = self.session.write();
        session.notice = None;
        session.updated_at = Utc::now();
        session.snapshot()
    }

    /// Clipboard text for the current plan. A missing plan posts an error notice.
    pub fn plan_text(&self) -> Result<String, ExportError> {
        let text = self.session.read().phase.plan().map(plan_to_text);
        text.ok_or_else(|| {
            self.notify(Notice::error("Copy Failed", "There is no plan to copy yet."));
            ExportError::NoPlan
        })
    }

    /// The infographic data URI and the goal it was made for.
    pub fn infographic(&self) -> Result<(String, Option<String>), ExportError> {
        let (has_plan, url, goal) = {
            let session = self.session.read();
            (
                session.phase.plan().is_some(),
                session.phase.infographic_url().map(str::to_string),
                session.request.as_ref().map(|r| r.goal.clone()),
            )
        };
        if !has_plan {
            self.notify(Notice::error("Download Failed", "There is no plan yet."));
            return Err(ExportError::NoPlan);
        }
        match url {
            Some(url) => Ok((url, goal)),
            None => {
                self.notify(Notice::error("Download Error", "Infographic image is not available for download."));
                Err(ExportError::NoInfographic)
            }
        }
    }

    pub fn notify(&self, notice: Notice) {
        let mut session = self.session.write();
        session.notice = Some(notice);
        session.updated_at = Utc::now();
    }

    fn apply<F>(&self, id: Uuid, update: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let mut session = self.session.write();
        if session.submission != Some(id) {
            debug!(%id, "Dropping result for a submission that is no longer current");
            return false;
        }
        update(&mut session);
        session.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::models::tests::sample_plan;
    use crate::models::NoticeLevel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakePlans {
        calls: AtomicUsize,
        missing_field: bool,
        upstream_status: bool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl PlanGenerator for FakePlans {
        async fn generate_plan(&self, request: &PlanRequest) -> Result<GeneratedPlan, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.missing_field {
                return Err(GenerationError::MissingField("dailyAffirmation"));
            }
            if self.upstream_status {
                return Err(GenerationError::Status {
                    status: 500,
                    body: r#"{"error":{"message":"backend shard 7 exhausted"}}"#.to_string(),
                });
            }
            let mut plan = sample_plan();
            if let Some(timeframe) = &request.timeframe {
                plan.timeframe_used = timeframe.clone();
            }
            Ok(plan)
        }
    }

    struct FakeImages {
        url: &'static str,
        prompts: parking_lot::Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeImages {
        fn returning(url: &'static str) -> Self {
            Self { url, prompts: parking_lot::Mutex::new(Vec::new()), gate: None }
        }

        fn gated(url: &'static str, gate: Arc<Notify>) -> Self {
            Self { gate: Some(gate), ..Self::returning(url) }
        }
    }

    #[async_trait]
    impl ImageGenerator for FakeImages {
        async fn generate_image(&self, prompt: &str) -> Infographic {
            self.prompts.lock().push(prompt.to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Infographic::from_url(self.url)
        }
    }

    /// Yields until the spawned run reaches `phase`.
    async fn wait_for_phase(orch: &PlanOrchestrator, phase: PhaseKind) -> SessionSnapshot {
        for _ in 0..1000 {
            let snapshot = orch.snapshot();
            if snapshot.phase == phase {
                return snapshot;
            }
            tokio::task::yield_now().await;
        }
        panic!("session never reached {phase:?}, last seen {:?}", orch.snapshot().phase);
    }

    fn orchestrator(plans: FakePlans, images: FakeImages) -> (Arc<PlanOrchestrator>, Arc<FakePlans>, Arc<FakeImages>) {
        let plans = Arc::new(plans);
        let images = Arc::new(images);
        let orch = Arc::new(PlanOrchestrator::new(plans.clone(), images.clone()));
        (orch, plans, images)
    }

    #[tokio::test]
    async fn end_to_end_with_image() {
        let (orch, _, images) = orchestrator(FakePlans::default(), FakeImages::returning("data:image/png;base64,AAAA"));

        let snapshot = orch.submit("Get fit in 90 days", None).await.unwrap();

        assert_eq!(snapshot.phase, PhaseKind::Ready);
        let plan = snapshot.plan.unwrap();
        assert_eq!(plan.timeframe_used, "90 days");
        assert_eq!(plan.action_plan.len(), 5);
        assert_eq!(snapshot.infographic_url.as_deref(), Some("data:image/png;base64,AAAA"));
        assert!(!snapshot.is_loading_text && !snapshot.is_loading_image && !snapshot.is_loading);
        assert!(snapshot.notice.is_none());
        assert_eq!(images.prompts.lock().as_slice(), &[plan.infographic_prompt.clone()]);
    }

    #[tokio::test]
    async fn empty_image_keeps_plan_with_info_notice() {
        let (orch, _, _) = orchestrator(FakePlans::default(), FakeImages::returning(""));

        let snapshot = orch.submit("Get fit in 90 days", Some("90 days")).await.unwrap();

        assert_eq!(snapshot.phase, PhaseKind::Ready);
        assert!(snapshot.plan.is_some());
        assert!(snapshot.infographic_url.is_none());
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.notice.unwrap().level, NoticeLevel::Info);
    }

    #[tokio::test]
    async fn text_failure_settles_with_error_and_skips_image() {
        let plans = FakePlans { missing_field: true, ..Default::default() };
        let (orch, _, images) = orchestrator(plans, FakeImages::returning("data:image/png;base64,AAAA"));

        let snapshot = orch.submit("Get fit in 90 days", None).await.unwrap();

        assert_eq!(snapshot.phase, PhaseKind::Failed);
        assert!(snapshot.plan.is_none());
        assert!(snapshot.infographic_url.is_none());
        assert!(!snapshot.is_loading);
        let error = snapshot.error.unwrap();
        assert!(!error.contains("dailyAffirmation"));
        let notice = snapshot.notice.unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.title, "Error Generating Plan");
        assert_eq!(notice.description, error);
        assert!(images.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn upstream_error_body_stays_out_of_the_session() {
        let plans = FakePlans { upstream_status: true, ..Default::default() };
        let (orch, _, _) = orchestrator(plans, FakeImages::returning(""));

        let snapshot = orch.submit("Get fit in 90 days", None).await.unwrap();

        assert_eq!(snapshot.phase, PhaseKind::Failed);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("The plan service is unavailable right now. Please try again.")
        );
        let notice = snapshot.notice.unwrap();
        assert!(!notice.description.contains("shard"));
        assert!(!notice.description.contains("500"));
    }

    #[tokio::test]
    async fn plan_is_published_while_the_image_is_pending() {
        let gate = Arc::new(Notify::new());
        let (orch, _, _) = orchestrator(FakePlans::default(), FakeImages::gated("data:image/png;base64,AAAA", gate.clone()));

        let submission = orch.begin("Get fit in 90 days", None).unwrap();
        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run(submission).await }
        });

        let pending = wait_for_phase(&orch, PhaseKind::GeneratingImage).await;
        assert_eq!(pending.plan.map(|p| p.daily_affirmation).as_deref(), Some("I get stronger every day."));
        assert!(!pending.is_loading_text);
        assert!(pending.is_loading_image);
        assert!(pending.is_loading);
        assert!(pending.infographic_url.is_none());

        gate.notify_one();
        running.await.unwrap();
        let settled = orch.snapshot();
        assert_eq!(settled.phase, PhaseKind::Ready);
        assert!(!settled.is_loading_image);
        assert_eq!(settled.infographic_url.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[tokio::test]
    async fn submission_during_image_generation_is_rejected() {
        let gate = Arc::new(Notify::new());
        let (orch, plans, images) = orchestrator(FakePlans::default(), FakeImages::gated("", gate.clone()));

        let first = orch.begin("Get fit in 90 days", None).unwrap();
        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run(first).await }
        });
        let pending = wait_for_phase(&orch, PhaseKind::GeneratingImage).await;

        assert!(matches!(orch.begin("Read twelve books this year", None), Err(SubmitError::Busy)));
        let after = orch.snapshot();
        assert_eq!(after.phase, PhaseKind::GeneratingImage);
        assert_eq!(after.submission_id, pending.submission_id);
        assert_eq!(plans.calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        running.await.unwrap();
        assert_eq!(plans.calls.load(Ordering::SeqCst), 1);
        assert_eq!(images.prompts.lock().len(), 1);
        assert_eq!(orch.snapshot().goal.as_deref(), Some("Get fit in 90 days"));
    }

    #[tokio::test]
    async fn start_over_during_image_generation_drops_the_late_image() {
        let gate = Arc::new(Notify::new());
        let (orch, _, images) = orchestrator(FakePlans::default(), FakeImages::gated("data:image/png;base64,AAAA", gate.clone()));

        let submission = orch.begin("Get fit in 90 days", None).unwrap();
        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run(submission).await }
        });
        wait_for_phase(&orch, PhaseKind::GeneratingImage).await;

        let reset = orch.start_over();
        assert_eq!(reset.phase, PhaseKind::Idle);
        assert!(reset.plan.is_none());

        gate.notify_one();
        running.await.unwrap();

        let snapshot = orch.snapshot();
        assert_eq!(snapshot.phase, PhaseKind::Idle);
        assert!(snapshot.plan.is_none());
        assert!(snapshot.infographic_url.is_none());
        assert!(snapshot.notice.is_none());
        assert_eq!(images.prompts.lock().len(), 1);
    }

    #[tokio::test]
    async fn invalid_goal_never_reaches_the_generator() {
        let (orch, plans, _) = orchestrator(FakePlans::default(), FakeImages::returning(""));

        let err = orch.submit("too short", None).await.unwrap_err();

        assert!(matches!(err, SubmitError::Invalid(_)));
        assert_eq!(plans.calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.snapshot().phase, PhaseKind::Idle);
    }

    #[tokio::test]
    async fn submission_while_generating_is_rejected() {
        let gate = Arc::new(Notify::new());
        let plans = FakePlans { gate: Some(gate.clone()), ..Default::default() };
        let (orch, plans, _) = orchestrator(plans, FakeImages::returning(""));

        let first = orch.begin("Learn to play the guitar", None).unwrap();
        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run(first).await }
        });

        let snapshot = orch.snapshot();
        assert!(snapshot.is_loading_text);
        assert!(snapshot.plan.is_none());

        assert!(matches!(orch.begin("Read twelve books this year", None), Err(SubmitError::Busy)));
        assert_eq!(orch.snapshot().submission_id, snapshot.submission_id);
        assert_eq!(orch.snapshot().goal.as_deref(), Some("Learn to play the guitar"));

        gate.notify_one();
        running.await.unwrap();
        assert_eq!(plans.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.snapshot().phase, PhaseKind::Ready);
    }

    #[tokio::test]
    async fn start_over_discards_in_flight_results() {
        let gate = Arc::new(Notify::new());
        let plans = FakePlans { gate: Some(gate.clone()), ..Default::default() };
        let (orch, _, images) = orchestrator(plans, FakeImages::returning("data:image/png;base64,AAAA"));

        let submission = orch.begin("Learn to play the guitar", None).unwrap();
        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run(submission).await }
        });

        let reset = orch.start_over();
        assert_eq!(reset.phase, PhaseKind::Idle);

        gate.notify_one();
        running.await.unwrap();

        let snapshot = orch.snapshot();
        assert_eq!(snapshot.phase, PhaseKind::Idle);
        assert!(snapshot.plan.is_none());
        assert!(snapshot.infographic_url.is_none());
        assert!(snapshot.submission_id.is_none());
        assert!(images.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn start_over_after_settling_resets_everything() {
        let (orch, _, _) = orchestrator(FakePlans::default(), FakeImages::returning("data:image/png;base64,AAAA"));
        orch.submit("Get fit in 90 days", None).await.unwrap();

        let snapshot = orch.start_over();

        assert_eq!(snapshot.phase, PhaseKind::Idle);
        assert!(snapshot.plan.is_none());
        assert!(snapshot.infographic_url.is_none());
        assert!(!snapshot.is_loading_text && !snapshot.is_loading_image);
        assert!(snapshot.goal.is_none());
    }

    #[tokio::test]
    async fn settled_session_accepts_a_new_submission() {
        let (orch, plans, _) = orchestrator(FakePlans::default(), FakeImages::returning(""));
        let first = orch.submit("Get fit in 90 days", None).await.unwrap();
        assert!(first.notice.is_some());

        let second = orch.begin("Read twelve books this year", Some("1 year")).unwrap();
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.submission_id, Some(second.id));
        assert!(snapshot.plan.is_none());
        assert!(snapshot.notice.is_none());
        orch.run(second).await;

        assert_eq!(plans.calls.load(Ordering::SeqCst), 2);
        assert_eq!(orch.snapshot().plan.unwrap().timeframe_used, "1 year");
    }

    #[tokio::test]
    async fn exports_require_a_plan() {
        let (orch, _, _) = orchestrator(FakePlans::default(), FakeImages::returning(""));
        assert!(matches!(orch.plan_text(), Err(ExportError::NoPlan)));
        assert_eq!(orch.snapshot().notice.unwrap().level, NoticeLevel::Error);
        let noticed = orch.snapshot();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let dismissed = orch.dismiss_notice();
        assert_eq!(dismissed.notice, None);
        assert!(dismissed.updated_at > noticed.updated_at);

        orch.submit("Get fit in 90 days", None).await.unwrap();
        assert!(orch.plan_text().unwrap().contains("I get stronger every day."));
        assert!(matches!(orch.infographic(), Err(ExportError::NoInfographic)));
        assert!(orch.snapshot().plan.is_some());
    }
}
