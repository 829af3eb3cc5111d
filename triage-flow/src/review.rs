use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    api::DoctorSuggestion,
    appointment::{AppointmentWorkflow, urgent_only},
    backend::WorkflowBackend,
    error::{Result, TriageError},
    models::{Appointment, AppointmentReport, AppointmentStatus, HistoryEntry},
    session::Session,
};

/// What the doctor currently sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueView {
    pub appointments: Vec<Appointment>,
    pub urgent_only: bool,
    /// Appointment selected automatically on load: the first urgent one listed.
    pub focus: Option<String>,
    pub report: Option<AppointmentReport>,
}

/// Cross-patient appointment queue for doctors.
pub struct DoctorReviewQueue {
    backend: Arc<dyn WorkflowBackend>,
    workflow: AppointmentWorkflow,
    view: RwLock<QueueView>,
}

fn require_doctor(session: &Session) -> Result<()> {
    if session.identity.is_doctor() {
        Ok(())
    } else {
        Err(TriageError::Authorization(
            "Forbidden - insufficient role".to_string(),
        ))
    }
}

impl DoctorReviewQueue {
    pub fn new(backend: Arc<dyn WorkflowBackend>) -> Self {
        Self {
            workflow: AppointmentWorkflow::new(backend.clone()),
            backend,
            view: RwLock::new(QueueView::default()),
        }
    }

    pub async fn view(&self) -> QueueView {
        self.view.read().await.clone()
    }

    /// Fetches the queue and opens the first urgent appointment, decided or not.
    pub async fn load(&self, session: &Session, urgent: bool) -> Result<QueueView> {
        require_doctor(session)?;
        let all = self.workflow.list_appointments(session, false).await?;
        let appointments = if urgent { urgent_only(all) } else { all };

        let focus = appointments
            .iter()
            .find(|a| a.is_urgent())
            .map(|a| a.id.clone());

        let report = match &focus {
            Some(id) => match self.workflow.get_appointment(session, id).await {
                Ok(appointment) => Some(AppointmentReport::from(appointment)),
                Err(e) => {
                    warn!(session_id = %session.id, appointment_id = %id, error = %e, "Opening report failed");
                    None
                }
            },
            None => None,
        };

        debug!(
            session_id = %session.id,
            count = appointments.len(),
            urgent,
            focus = ?focus,
            "Queue loaded"
        );

        let view = QueueView {
            appointments,
            urgent_only: urgent,
            focus,
            report,
        };
        *self.view.write().await = view.clone();
        Ok(view)
    }

    /// Renders the appointment's snapshot, never the patient's current assessment.
    pub async fn view_report(&self, session: &Session, appointment_id: &str) -> Result<AppointmentReport> {
        require_doctor(session)?;
        let appointment = self.workflow.get_appointment(session, appointment_id).await?;
        let report = AppointmentReport::from(appointment);
        self.view.write().await.report = Some(report.clone());
        Ok(report)
    }

    /// Full record of a patient, oldest first.
    pub async fn view_history(&self, session: &Session, patient_id: &str) -> Result<Vec<HistoryEntry>> {
        require_doctor(session)?;
        self.backend
            .patient_history(&session.identity, patient_id)
            .await
    }

    /// Accepts or declines, then refreshes the queue.
    pub async fn decide(
        &self,
        session: &Session,
        appointment_id: &str,
        status: AppointmentStatus,
        note: Option<&str>,
    ) -> Result<()> {
        self.workflow
            .set_status(session, appointment_id, status, note)
            .await?;

        let urgent = self.view.read().await.urgent_only;
        if let Err(e) = self.load(session, urgent).await {
            warn!(session_id = %session.id, error = %e, "Queue reload after decision failed");
            let note = note.filter(|n| !n.trim().is_empty()).map(str::to_string);
            let mut view = self.view.write().await;
            if let Some(local) = view.appointments.iter_mut().find(|a| a.id == appointment_id) {
                local.status = status;
                if note.is_some() {
                    local.doctor_note = note.clone();
                }
            }
            if let Some(report) = view
                .report
                .as_mut()
                .filter(|r| r.appointment_id == appointment_id)
            {
                report.status = status;
                if note.is_some() {
                    report.doctor_note = note;
                }
            }
        }
        Ok(())
    }

    /// Sends a note that shows up in the patient's chat thread.
    pub async fn suggest_to_patient(&self, session: &Session, patient_id: &str, text: &str) -> Result<()> {
        require_doctor(session)?;
        if text.trim().is_empty() {
            return Err(TriageError::Validation("suggestion required".to_string()));
        }
        self.backend
            .suggest_to_patient(
                &session.identity,
                patient_id,
                &DoctorSuggestion {
                    suggestion: text.to_string(),
                },
            )
            .await?;
        info!(session_id = %session.id, %patient_id, "Suggestion sent");
        Ok(())
    }
}
