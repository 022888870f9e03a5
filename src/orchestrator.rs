use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::analysis::{AnalysisError, BrandAnalyzer};
use crate::credential::{CredentialGate, CredentialMode, GateState};
use crate::logo::{GenerationError, LogoPainter};
use crate::models::{BrandRequest, FormView, GeneratedLogo};

pub const PERMISSION_HINT: &str = "API Key 验证失败或权限不足。请检查您的配置。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Analyzing,
    Painting,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Error, PartialEq)]
pub enum SubmitError {
    #[error("store name is required")]
    MissingStoreName,
    #[error("a submission is already in progress ({0:?})")]
    Busy(Stage),
}

/// Form, progress and last outcome of the single wizard session.
#[derive(Debug, Default)]
pub struct Session {
    pub form: BrandRequest,
    stage: Stage,
    result: Option<GeneratedLogo>,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub form: FormView,
    pub stage: Stage,
    pub error: Option<String>,
    pub result: Option<GeneratedLogo>,
}

impl Session {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn result(&self) -> Option<&GeneratedLogo> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Idle -> Analyzing. Returns the snapshot of the form to submit.
    pub fn begin(&mut self) -> Result<BrandRequest, SubmitError> {
        if self.stage != Stage::Idle {
            return Err(SubmitError::Busy(self.stage));
        }
        if !self.form.is_submittable() {
            return Err(SubmitError::MissingStoreName);
        }
        self.error = None;
        self.result = None;
        self.stage = Stage::Analyzing;
        Ok(self.form.clone())
    }

    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn succeed(&mut self, logo: GeneratedLogo) {
        self.result = Some(logo);
        self.error = None;
        self.stage = Stage::Idle;
    }

    pub fn fail(&mut self, message: String) {
        self.result = None;
        self.error = Some(message);
        self.stage = Stage::Idle;
    }

    /// Start a new design: drops the result and error, keeps the form.
    pub fn reset(&mut self) {
        self.result = None;
        self.error = None;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            form: self.form.summary(),
            stage: self.stage,
            error: self.error.clone(),
            result: self.result.clone(),
        }
    }
}

/// Heuristic for provider messages that mean the key is invalid or lacks
/// access. Kept in one place so it can be replaced by a structured code.
pub fn is_permission_failure(message: &str) -> bool {
    message.contains("Requested entity was not found")
        || message.to_ascii_lowercase().contains("not found")
        || message.contains("403")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub message: String,
    pub gate: GateState,
}

/// Maps a failure to the user-facing message and the next gate state.
pub fn recover(message: &str, gate: GateState, mode: CredentialMode) -> Recovery {
    if !is_permission_failure(message) {
        return Recovery { message: message.to_string(), gate };
    }
    let gate = if mode.is_interactive() { GateState::Locked } else { gate };
    Recovery { message: PERMISSION_HINT.to_string(), gate }
}

pub struct Orchestrator {
    analyzer: BrandAnalyzer,
    painter: LogoPainter,
}

impl Orchestrator {
    pub fn new(analyzer: BrandAnalyzer, painter: LogoPainter) -> Self {
        Self { analyzer, painter }
    }

    /// Analysis then image generation, strictly in sequence. `on_stage` is
    /// told when painting begins. Nothing from a failed run is kept.
    pub async fn run(
        &self,
        request: &BrandRequest,
        mut on_stage: impl FnMut(Stage) + Send,
    ) -> Result<GeneratedLogo, PipelineError> {
        info!("🚀 Starting logo pipeline for '{}'", request.store_name);
        let analysis = self.analyzer.analyze(request).await?;

        on_stage(Stage::Painting);
        let (image_url, prompt_used) = self.painter.generate(request, &analysis).await?;

        let logo = GeneratedLogo {
            id: Uuid::new_v4(),
            image_url,
            prompt_used,
            analysis,
            created_at: Utc::now(),
        };
        info!("✅ Pipeline finished, logo {}", logo.id);
        Ok(logo)
    }

    /// Runs a submission against the session and applies the outcome,
    /// returning the gate state the failure handler settled on.
    ///
    /// The pipeline runs on its own task, so dropping the returned future
    /// (a client disconnect) does not leave the session stuck mid-stage.
    pub async fn submit(
        self: Arc<Self>,
        session: Arc<RwLock<Session>>,
        gate: Arc<CredentialGate>,
    ) -> Result<GateState, SubmitError> {
        let request = session.write().begin()?;

        let task = {
            let session = session.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                let outcome = self.run(&request, |stage| session.write().enter(stage)).await;
                match outcome {
                    Ok(logo) => session.write().succeed(logo),
                    Err(e) => {
                        error!("❌ Logo pipeline failed: {}", e);
                        let recovery = recover(&e.to_string(), gate.state(), gate.mode());
                        gate.apply(recovery.gate);
                        session.write().fail(recovery.message);
                    }
                }
            })
        };

        if let Err(e) = task.await {
            error!("❌ Logo pipeline task aborted: {}", e);
            session.write().fail(format!("logo pipeline aborted: {e}"));
        }
        Ok(gate.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::KeyStore;
    use crate::gemini::testing::{response_with_parts, text_response, ScriptedModel};
    use crate::gemini::{GeminiError, GenerateContentRequest, GenerateContentResponse, GenerativeModel, Part};
    use crate::models::{AnalysisResult, SpaStyle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn orchestrator(model: Arc<dyn GenerativeModel>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            BrandAnalyzer::new(model.clone(), "gemini-2.5-flash"),
            LogoPainter::new(model, "gemini-3-pro-image-preview", "2K"),
        ))
    }

    fn gate(mode: CredentialMode) -> Arc<CredentialGate> {
        Arc::new(CredentialGate::initialize(mode, Arc::new(KeyStore::with_key(Some("key".into())))))
    }

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            visual_symbols: vec!["莲花".into(), "云纹".into(), "足印".into()],
            color_palette: "黛青与暖金".into(),
            english_translation: "Cloud Hermit Foot Spa · Wellness SPA".into(),
            design_reasoning: "以云纹呼应店名，莲花象征净化。".into(),
        }
    }

    fn scenario_form() -> BrandRequest {
        let mut form = BrandRequest {
            store_name: "云隐足道".into(),
            sub_text: "养生·SPA".into(),
            style: SpaStyle::Traditional,
            ..Default::default()
        };
        form.toggle_service("足疗");
        form.toggle_service("中式推拿");
        form
    }

    fn scenario_session() -> Arc<RwLock<Session>> {
        Arc::new(RwLock::new(Session { form: scenario_form(), ..Default::default() }))
    }

    /// Notes the session stage at the moment each remote call is made.
    struct StageObserver {
        session: Arc<RwLock<Session>>,
        seen: Mutex<Vec<Stage>>,
        inner: ScriptedModel,
    }

    #[async_trait]
    impl GenerativeModel for StageObserver {
        async fn generate_content(
            &self,
            model: &str,
            request: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, GeminiError> {
            self.seen.lock().push(self.session.read().stage());
            self.inner.generate_content(model, request).await
        }
    }

    /// Answers only after a long delay.
    struct SlowModel(Duration);

    #[async_trait]
    impl GenerativeModel for SlowModel {
        async fn generate_content(
            &self,
            _model: &str,
            _request: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, GeminiError> {
            tokio::time::sleep(self.0).await;
            Err(GeminiError::Http("upstream timed out".into()))
        }
    }

    #[tokio::test]
    async fn end_to_end_submission_produces_png_data_uri() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(text_response(&serde_json::to_string(&analysis()).unwrap())),
            Ok(response_with_parts(vec![Part::inline("image/png", vec![0x89, 0x50, 0x4E, 0x47])])),
        ]));
        let session = scenario_session();

        let state = orchestrator(model.clone())
            .submit(session.clone(), gate(CredentialMode::Environment))
            .await
            .unwrap();

        assert_eq!(state, GateState::Unlocked);
        let session = session.read();
        assert_eq!(session.stage(), Stage::Idle);
        assert_eq!(session.error(), None);
        let logo = session.result().unwrap();
        assert!(logo.image_url.starts_with("data:image/png;base64,"));
        assert_eq!(logo.analysis, analysis());

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "gemini-2.5-flash");
        assert_eq!(calls[1].0, "gemini-3-pro-image-preview");
        let analysis_prompt = calls[0].1.contents[0].parts[0].text.clone().unwrap();
        assert!(analysis_prompt.contains("Services: 足疗, 中式推拿"));
    }

    #[tokio::test]
    async fn stages_advance_from_analyzing_to_painting() {
        let session = scenario_session();
        let model = Arc::new(StageObserver {
            session: session.clone(),
            seen: Mutex::default(),
            inner: ScriptedModel::new(vec![
                Ok(text_response(&serde_json::to_string(&analysis()).unwrap())),
                Ok(response_with_parts(vec![Part::inline("image/png", vec![1])])),
            ]),
        });

        orchestrator(model.clone())
            .submit(session.clone(), gate(CredentialMode::Environment))
            .await
            .unwrap();

        assert_eq!(*model.seen.lock(), vec![Stage::Analyzing, Stage::Painting]);
        assert_eq!(session.read().stage(), Stage::Idle);
    }

    #[tokio::test]
    async fn failed_analysis_never_enters_painting() {
        let session = scenario_session();
        let model = Arc::new(StageObserver {
            session: session.clone(),
            seen: Mutex::default(),
            inner: ScriptedModel::new(vec![Ok(text_response("no json here"))]),
        });

        orchestrator(model.clone())
            .submit(session.clone(), gate(CredentialMode::Environment))
            .await
            .unwrap();
        assert_eq!(*model.seen.lock(), vec![Stage::Analyzing]);

        let mut reported = Vec::new();
        let failing = orchestrator(Arc::new(ScriptedModel::new(vec![Ok(text_response("still no json"))])));
        assert!(failing.run(&scenario_form(), |stage| reported.push(stage)).await.is_err());
        assert!(reported.is_empty());
    }

    #[tokio::test]
    async fn dropped_submission_still_returns_session_to_idle() {
        let session = scenario_session();
        let pending = orchestrator(Arc::new(SlowModel(Duration::from_millis(100))))
            .submit(session.clone(), gate(CredentialMode::Environment));

        assert!(tokio::time::timeout(Duration::from_millis(20), pending).await.is_err());
        assert_eq!(session.read().stage(), Stage::Analyzing);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut session = session.write();
        assert_eq!(session.stage(), Stage::Idle);
        assert_eq!(session.error(), Some("HTTP error: upstream timed out"));
        assert!(session.begin().is_ok());
    }

    #[tokio::test]
    async fn empty_store_name_never_calls_the_model() {
        let model = Arc::new(ScriptedModel::default());
        let session = Arc::new(RwLock::new(Session::default()));
        let err = orchestrator(model.clone())
            .submit(session.clone(), gate(CredentialMode::Environment))
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::MissingStoreName);
        assert!(model.calls().is_empty());
        assert_eq!(session.read().stage(), Stage::Idle);
    }

    #[tokio::test]
    async fn image_failure_discards_analysis() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(text_response(&serde_json::to_string(&analysis()).unwrap())),
            Ok(text_response("Here is a description of your logo instead.")),
        ]));
        let session = scenario_session();
        orchestrator(model)
            .submit(session.clone(), gate(CredentialMode::Interactive))
            .await
            .unwrap();
        let session = session.read();
        assert!(session.result().is_none());
        assert_eq!(session.stage(), Stage::Idle);
        assert_eq!(session.error(), Some("Model generated text instead of image. Please try again."));
    }

    #[tokio::test]
    async fn forbidden_analysis_locks_interactive_gate() {
        let model = Arc::new(ScriptedModel::new(vec![Err(GeminiError::Api { status: 403, message: "The caller does not have permission".into() })]));
        let session = scenario_session();
        let gate = gate(CredentialMode::Interactive);
        let state = orchestrator(model.clone())
            .submit(session.clone(), gate.clone())
            .await
            .unwrap();
        assert_eq!(state, GateState::Locked);
        assert_eq!(gate.state(), GateState::Locked);
        assert_eq!(session.read().error(), Some(PERMISSION_HINT));
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn forbidden_analysis_keeps_environment_gate_open() {
        let model = Arc::new(ScriptedModel::new(vec![Err(GeminiError::Api { status: 403, message: "forbidden".into() })]));
        let state = orchestrator(model)
            .submit(scenario_session(), gate(CredentialMode::Environment))
            .await
            .unwrap();
        assert_eq!(state, GateState::Unlocked);
    }

    #[test]
    fn permission_failure_in_environment_mode_keeps_gate() {
        let recovery = recover("HTTP 403: forbidden", GateState::Unlocked, CredentialMode::Environment);
        assert_eq!(recovery, Recovery { message: PERMISSION_HINT.into(), gate: GateState::Unlocked });
        let recovery = recover("HTTP 403: forbidden", GateState::Unlocked, CredentialMode::Interactive);
        assert_eq!(recovery.gate, GateState::Locked);
    }

    #[test]
    fn ordinary_failures_pass_through() {
        let recovery = recover("No image generated.", GateState::Unlocked, CredentialMode::Interactive);
        assert_eq!(recovery, Recovery { message: "No image generated.".into(), gate: GateState::Unlocked });
    }

    #[test]
    fn permission_heuristic_matches_known_phrases() {
        assert!(is_permission_failure("HTTP 404: Requested entity was not found."));
        assert!(is_permission_failure("models/foo is NOT FOUND"));
        assert!(is_permission_failure("status=403"));
        assert!(!is_permission_failure("HTTP 500: internal"));
    }

    #[test]
    fn begin_is_rejected_while_busy() {
        let mut session = Session { form: scenario_form(), ..Default::default() };
        assert!(session.begin().is_ok());
        assert_eq!(session.begin(), Err(SubmitError::Busy(Stage::Analyzing)));
        session.enter(Stage::Painting);
        session.fail("boom".into());
        assert_eq!(session.stage(), Stage::Idle);
        session.reset();
        assert_eq!(session.error(), None);
        assert_eq!(session.form, scenario_form());
    }
}
