use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    api::{AppointmentRequest, StatusUpdate},
    assessment::AssessmentEngine,
    backend::WorkflowBackend,
    busy::BusyFlag,
    context::keys,
    error::{Result, TriageError},
    models::{Appointment, AppointmentStatus, Assessment},
    session::Session,
};

/// What the patient has typed for an appointment request so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentDraft {
    pub desired_date: Option<NaiveDateTime>,
    pub notes: String,
    /// Set once the patient presses submit.
    #[serde(default)]
    pub submitted: bool,
}

/// Keeps only appointments whose snapshot is urgent or critical, in order.
pub fn urgent_only(appointments: Vec<Appointment>) -> Vec<Appointment> {
    appointments.into_iter().filter(Appointment::is_urgent).collect()
}

/// Severity-gated appointment requests and doctor decisions.
pub struct AppointmentWorkflow {
    backend: Arc<dyn WorkflowBackend>,
    request_busy: BusyFlag,
    status_busy: BusyFlag,
}

impl AppointmentWorkflow {
    pub fn new(backend: Arc<dyn WorkflowBackend>) -> Self {
        Self {
            backend,
            request_busy: BusyFlag::new("appointment request"),
            status_busy: BusyFlag::new("appointment status"),
        }
    }

    pub fn save_draft(session: &Session, draft: &AppointmentDraft) -> Result<()> {
        session.context.set(keys::APPOINTMENT_DRAFT, draft)
    }

    pub fn draft(session: &Session) -> Option<AppointmentDraft> {
        session.context.get(keys::APPOINTMENT_DRAFT)
    }

    /// Requests an appointment for `assessment`, which must be urgent or critical.
    pub async fn request_appointment(
        &self,
        session: &Session,
        assessment: &Assessment,
        desired_date: Option<NaiveDateTime>,
        notes: &str,
    ) -> Result<Appointment> {
        if !assessment.is_serious() {
            return Err(TriageError::Ineligible(
                "Only serious assessments can request appointments".to_string(),
            ));
        }
        let _guard = self.request_busy.try_begin()?;

        let request = AppointmentRequest {
            assessment_id: assessment.id.clone(),
            desired_date,
            notes: notes.to_string(),
        };
        let created = self
            .backend
            .create_appointment(&session.identity, &request)
            .await
            .inspect_err(|e| {
                warn!(
                    session_id = %session.id,
                    assessment_id = %assessment.id,
                    error = %e,
                    "Appointment request failed"
                )
            })?;

        session.context.remove(keys::APPOINTMENT_DRAFT);
        session.context.remove(keys::INTAKE_FORM);

        info!(
            session_id = %session.id,
            appointment_id = %created.appointment_id,
            severity = %assessment.severity,
            "Appointment requested"
        );

        Ok(Appointment {
            id: created.appointment_id,
            patient_id: session.identity.id.clone(),
            assessment_snapshot: assessment.snapshot(),
            desired_date,
            notes: request.notes,
            status: created.status,
            doctor_note: None,
            patient_name: None,
            patient_email: None,
            created_at: Some(Utc::now()),
        })
    }

    /// Requests an appointment against the session's active assessment.
    pub async fn request_for_active(
        &self,
        session: &Session,
        desired_date: Option<NaiveDateTime>,
        notes: &str,
    ) -> Result<Appointment> {
        let assessment = AssessmentEngine::active(session)
            .ok_or_else(|| TriageError::Validation("No assessment available".to_string()))?;
        self.request_appointment(session, &assessment, desired_date, notes)
            .await
    }

    /// Moves a pending appointment to `accepted` or `declined`. Doctors only.
    ///
    /// Repeating a decision is a new transition attempt; the backend rejects it
    /// once the appointment is terminal and the error is returned as-is.
    pub async fn set_status(
        &self,
        session: &Session,
        appointment_id: &str,
        status: AppointmentStatus,
        note: Option<&str>,
    ) -> Result<()> {
        if !session.identity.is_doctor() {
            return Err(TriageError::Authorization(
                "only doctors can decide on appointments".to_string(),
            ));
        }
        if !status.is_terminal() {
            return Err(TriageError::Validation(format!("invalid status '{status}'")));
        }
        let _guard = self.status_busy.try_begin()?;

        let update = StatusUpdate {
            status,
            note: note.unwrap_or_default().to_string(),
        };
        self.backend
            .set_appointment_status(&session.identity, appointment_id, &update)
            .await?;

        info!(
            session_id = %session.id,
            %appointment_id,
            %status,
            "Appointment decided"
        );
        Ok(())
    }

    /// Appointments visible to the caller, optionally restricted to urgent ones.
    pub async fn list_appointments(
        &self,
        session: &Session,
        urgent: bool,
    ) -> Result<Vec<Appointment>> {
        let appointments = self.backend.list_appointments(&session.identity).await?;
        Ok(if urgent {
            urgent_only(appointments)
        } else {
            appointments
        })
    }

    pub async fn get_appointment(&self, session: &Session, appointment_id: &str) -> Result<Appointment> {
        self.backend
            .get_appointment(&session.identity, appointment_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::InMemoryBackend,
        models::{AssessmentForm, AssessmentSnapshot, Role, Severity},
    };

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        engine: AssessmentEngine,
        workflow: AppointmentWorkflow,
        patient: Session,
        doctor: Session,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let patient = backend.register("Ann", Role::Patient).await.unwrap();
        let doctor = backend.register("Dr Grey", Role::Doctor).await.unwrap();
        Fixture {
            engine: AssessmentEngine::new(backend.clone()),
            workflow: AppointmentWorkflow::new(backend.clone()),
            backend,
            patient: Session::new(patient, "assess"),
            doctor: Session::new(doctor, "assess"),
        }
    }

    async fn assess(f: &Fixture, symptoms: &str) -> Assessment {
        f.engine
            .assess(&f.patient, AssessmentForm::with_symptoms(symptoms))
            .await
            .unwrap()
            .assessment
    }

    #[tokio::test]
    async fn critical_assessment_can_request() {
        let f = fixture().await;
        let critical = assess(&f, "sudden weakness and slurred speech").await;
        assert_eq!(critical.severity, Severity::Critical);

        AppointmentWorkflow::save_draft(
            &f.patient,
            &AppointmentDraft {
                desired_date: None,
                notes: "mornings".into(),
                submitted: false,
            },
        )
        .unwrap();

        let appt = f
            .workflow
            .request_appointment(&f.patient, &critical, None, "mornings")
            .await
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.assessment_snapshot.assessment_id, critical.id);
        assert!(AppointmentWorkflow::draft(&f.patient).is_none());
    }

    #[tokio::test]
    async fn non_urgent_assessment_is_ineligible() {
        let f = fixture().await;
        let mild = assess(&f, "mild sore throat").await;
        assert_eq!(mild.severity, Severity::NonUrgent);

        let err = f
            .workflow
            .request_for_active(&f.patient, None, "")
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Ineligible(_)));
        assert!(f.backend.list_appointments(&f.patient.identity).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_assessment_id_is_not_found() {
        let f = fixture().await;
        let mut stale = assess(&f, "seizure").await;
        stale.id = "gone".into();

        let err = f
            .workflow
            .request_appointment(&f.patient, &stale, None, "")
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::NotFound(_)));
    }

    #[tokio::test]
    async fn request_without_assessment_is_a_validation_error() {
        let f = fixture().await;
        let err = f
            .workflow
            .request_for_active(&f.patient, None, "")
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
    }

    #[tokio::test]
    async fn only_doctors_decide_and_only_once() {
        let f = fixture().await;
        let critical = assess(&f, "chest pain").await;
        let appt = f
            .workflow
            .request_appointment(&f.patient, &critical, None, "")
            .await
            .unwrap();

        let err = f
            .workflow
            .set_status(&f.patient, &appt.id, AppointmentStatus::Accepted, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Authorization(_)));

        let err = f
            .workflow
            .set_status(&f.doctor, &appt.id, AppointmentStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));

        f.workflow
            .set_status(&f.doctor, &appt.id, AppointmentStatus::Declined, Some("see pharmacist"))
            .await
            .unwrap();

        let again = f
            .workflow
            .set_status(&f.doctor, &appt.id, AppointmentStatus::Declined, None)
            .await
            .unwrap_err();
        assert_eq!(
            again,
            TriageError::InvalidTransition {
                from: AppointmentStatus::Declined,
                to: AppointmentStatus::Declined,
            }
        );

        let stored = f.workflow.get_appointment(&f.doctor, &appt.id).await.unwrap();
        assert_eq!(stored.status, AppointmentStatus::Declined);
        assert_eq!(stored.doctor_note.as_deref(), Some("see pharmacist"));
    }

    #[tokio::test]
    async fn snapshot_does_not_follow_later_assessments() {
        let f = fixture().await;
        let critical = assess(&f, "severe bleeding").await;
        let appt = f
            .workflow
            .request_appointment(&f.patient, &critical, None, "")
            .await
            .unwrap();
        assess(&f, "feeling fine now").await;

        let stored = f.workflow.get_appointment(&f.doctor, &appt.id).await.unwrap();
        assert_eq!(stored.assessment_snapshot.severity, Severity::Critical);
        assert_eq!(stored.assessment_snapshot.form.symptoms, "severe bleeding");
    }

    #[test]
    fn urgent_filter_keeps_order() {
        let make = |id: &str, severity| Appointment {
            id: id.to_string(),
            patient_id: "p".into(),
            assessment_snapshot: AssessmentSnapshot {
                assessment_id: format!("s-{id}"),
                severity,
                advice: String::new(),
                form: AssessmentForm::default(),
            },
            desired_date: None,
            notes: String::new(),
            status: AppointmentStatus::Pending,
            doctor_note: None,
            patient_name: None,
            patient_email: None,
            created_at: None,
        };
        let all = vec![
            make("a", Severity::Critical),
            make("b", Severity::NonUrgent),
            make("c", Severity::Urgent),
            make("d", Severity::NonUrgent),
        ];
        let ids: Vec<String> = urgent_only(all).into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
