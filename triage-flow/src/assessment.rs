use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    backend::Classifier,
    busy::BusyFlag,
    context::keys,
    error::{Result, TriageError},
    medication,
    models::{Assessment, AssessmentForm, FocusHint},
    session::Session,
};

/// What the caller gets back from a successful assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentOutcome {
    pub assessment: Assessment,
    /// Set when the assessment is serious enough to request an appointment.
    pub focus: Option<FocusHint>,
    /// OTC options, only for non-urgent assessments.
    pub otc_suggestions: Vec<String>,
}

/// Submits symptoms to the classifier and keeps the latest result as the
/// session's active assessment.
pub struct AssessmentEngine {
    classifier: Arc<dyn Classifier>,
    busy: BusyFlag,
}

impl AssessmentEngine {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            busy: BusyFlag::new("assessment"),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    pub async fn assess(&self, session: &Session, form: AssessmentForm) -> Result<AssessmentOutcome> {
        if form.symptoms.trim().is_empty() {
            return Err(TriageError::Validation("Please enter symptoms".to_string()));
        }
        session.context.set(keys::INTAKE_FORM, &form)?;

        let _guard = self.busy.try_begin()?;
        info!(session_id = %session.id, "Submitting assessment");

        let verdict = match self.classifier.assess(&session.identity, &form).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Assessment failed");
                return Err(match e {
                    TriageError::Validation(_) | TriageError::Authorization(_) => e,
                    other => TriageError::Remote(format!("Assessment failed: {}", other.reason())),
                });
            }
        };

        let assessment = Assessment {
            id: verdict.assessment_id,
            severity: verdict.severity,
            advice: verdict.advice,
            suggested_meds: verdict.suggested_meds,
            raw_model_meds: verdict.model_meds_raw.filter(|raw| !raw.trim().is_empty()),
            form,
        };
        session.context.set(keys::ACTIVE_ASSESSMENT, &assessment)?;

        info!(
            session_id = %session.id,
            assessment_id = %assessment.id,
            severity = %assessment.severity,
            "Assessment received"
        );

        let (focus, otc_suggestions) = if assessment.is_serious() {
            (Some(FocusHint::AppointmentDate), Vec::new())
        } else {
            (None, medication::resolve(&assessment))
        };

        Ok(AssessmentOutcome {
            assessment,
            focus,
            otc_suggestions,
        })
    }

    /// The most recent assessment of this session, if any.
    pub fn active(session: &Session) -> Option<Assessment> {
        session.context.get(keys::ACTIVE_ASSESSMENT)
    }
}
