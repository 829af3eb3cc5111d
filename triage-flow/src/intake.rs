//! Patient intake screen as a step graph:
//! `assess` then `appointment_request` for serious results, `otc_advice` otherwise.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::{
    appointment::{AppointmentDraft, AppointmentWorkflow},
    assessment::AssessmentEngine,
    context::{Context, keys},
    error::{Result, TriageError},
    flow::{Flow, FlowBuilder, NextAction, Step, StepResult},
    medication,
    models::{Assessment, AssessmentForm, FocusHint},
    session::Session,
};

pub const ASSESS: &str = "assess";
pub const APPOINTMENT_REQUEST: &str = "appointment_request";
pub const OTC_ADVICE: &str = "otc_advice";

/// Stores the typed form where the `assess` step picks it up.
pub fn provide_form(session: &Session, form: &AssessmentForm) -> Result<()> {
    session.context.set(keys::INTAKE_FORM, form)
}

/// Stores a submitted appointment draft for the `appointment_request` step.
pub fn submit_draft(session: &Session, mut draft: AppointmentDraft) -> Result<()> {
    draft.submitted = true;
    AppointmentWorkflow::save_draft(session, &draft)
}

pub struct AssessStep {
    engine: Arc<AssessmentEngine>,
}

impl AssessStep {
    pub fn new(engine: Arc<AssessmentEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Step for AssessStep {
    fn id(&self) -> &str {
        ASSESS
    }

    async fn run(&self, session: &Session) -> Result<StepResult> {
        let form = session
            .context
            .get::<AssessmentForm>(keys::INTAKE_FORM)
            .filter(|f| !f.symptoms.trim().is_empty());
        let Some(form) = form else {
            return Ok(StepResult::new(
                Some("Please describe your symptoms.".to_string()),
                NextAction::WaitForInput,
            ));
        };

        let outcome = self.engine.assess(session, form).await?;
        let assessment = outcome.assessment;
        Ok(StepResult::new(
            Some(format!("Severity: {}. {}", assessment.severity, assessment.advice)),
            NextAction::ContinueAndExecute,
        )
        .with_status_message(format!("assessed as {}", assessment.severity)))
    }
}

pub struct OtcAdviceStep;

#[async_trait]
impl Step for OtcAdviceStep {
    fn id(&self) -> &str {
        OTC_ADVICE
    }

    async fn run(&self, session: &Session) -> Result<StepResult> {
        let assessment = AssessmentEngine::active(session)
            .ok_or_else(|| TriageError::Validation("No assessment available".to_string()))?;
        let suggestions = medication::resolve(&assessment);
        session.context.set(keys::OTC_SUGGESTIONS, &suggestions)?;

        let response = format!(
            "{}\nSuggested over-the-counter options:\n- {}",
            assessment.advice,
            suggestions.join("\n- ")
        );
        Ok(StepResult::new(Some(response), NextAction::End))
    }
}

pub struct AppointmentRequestStep {
    workflow: Arc<AppointmentWorkflow>,
}

impl AppointmentRequestStep {
    pub fn new(workflow: Arc<AppointmentWorkflow>) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl Step for AppointmentRequestStep {
    fn id(&self) -> &str {
        APPOINTMENT_REQUEST
    }

    async fn run(&self, session: &Session) -> Result<StepResult> {
        let draft = AppointmentWorkflow::draft(session).filter(|d| d.submitted);
        let Some(draft) = draft else {
            let severity = AssessmentEngine::active(session)
                .map(|a| a.severity.to_string())
                .unwrap_or_default();
            return Ok(StepResult::new(
                Some(format!(
                    "Your assessment is {severity}. Choose a preferred date to request an appointment."
                )),
                NextAction::WaitForInput,
            )
            .with_focus(FocusHint::AppointmentDate));
        };

        let appointment = match self
            .workflow
            .request_for_active(session, draft.desired_date, &draft.notes)
            .await
        {
            Ok(appointment) => appointment,
            Err(e) => {
                // let the patient fix the draft and submit again
                AppointmentWorkflow::save_draft(
                    session,
                    &AppointmentDraft {
                        submitted: false,
                        ..draft
                    },
                )?;
                return Err(e);
            }
        };
        session.context.set(keys::REQUESTED_APPOINTMENT, &appointment)?;
        info!(session_id = %session.id, appointment_id = %appointment.id, "Intake finished with appointment");

        Ok(StepResult::new(
            Some(format!("Appointment requested ({}).", appointment.status)),
            NextAction::End,
        )
        .with_status_message("appointment requested"))
    }
}

fn active_is_serious(context: &Context) -> bool {
    context
        .get::<Assessment>(keys::ACTIVE_ASSESSMENT)
        .is_some_and(|a| a.is_serious())
}

pub fn build_intake_flow(engine: Arc<AssessmentEngine>, workflow: Arc<AppointmentWorkflow>) -> Flow {
    FlowBuilder::new("intake")
        .add_step(Arc::new(AssessStep::new(engine)))
        .add_step(Arc::new(AppointmentRequestStep::new(workflow)))
        .add_step(Arc::new(OtcAdviceStep))
        .add_conditional_edge(ASSESS, APPOINTMENT_REQUEST, active_is_serious)
        .add_edge(ASSESS, OTC_ADVICE)
        .set_start_step(ASSESS)
        .build()
}
