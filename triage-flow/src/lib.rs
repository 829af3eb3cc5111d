pub mod api;
pub mod appointment;
pub mod assessment;
pub mod auth;
pub mod backend;
pub mod busy;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
#[cfg(feature = "http")]
pub mod http;
pub mod intake;
pub mod medication;
pub mod memory;
pub mod models;
pub mod review;
pub mod session;

// Re-export commonly used types
pub use appointment::{AppointmentDraft, AppointmentWorkflow};
pub use assessment::{AssessmentEngine, AssessmentOutcome};
pub use auth::AuthClient;
pub use backend::{AuthService, Classifier, WorkflowBackend};
pub use chat::ChatThread;
pub use config::ClientConfig;
pub use context::Context;
pub use error::{Result, TriageError};
pub use flow::{
    ExecutionResult, ExecutionStatus, Flow, FlowBuilder, FlowRunner, NextAction, Step, StepResult,
};
#[cfg(feature = "http")]
pub use http::HttpBackend;
pub use intake::build_intake_flow;
pub use memory::InMemoryBackend;
pub use models::{
    Appointment, AppointmentReport, AppointmentStatus, Assessment, AssessmentForm, ChatMessage,
    FocusHint, FromRole, HistoryEntry, Identity, Role, Severity,
};
pub use review::{DoctorReviewQueue, QueueView};
pub use session::{InMemorySessionStorage, Session, SessionStorage, SessionStore};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn patient_and_doctor_round_trip() {
        let backend = Arc::new(InMemoryBackend::new());
        let auth = AuthClient::new(backend.clone());
        let store = SessionStore::in_memory(intake::ASSESS);

        // patient: assess, request, chat
        let ann = auth
            .signup("Ann", "ann@gmail.com", "pw", Role::Patient)
            .await
            .unwrap();
        let patient = store.sign_in(ann).await.unwrap();
        let engine = AssessmentEngine::new(backend.clone());
        let outcome = engine
            .assess(&patient, AssessmentForm::with_symptoms("shortness of breath"))
            .await
            .unwrap();
        assert_eq!(outcome.assessment.severity, Severity::Critical);
        assert_eq!(outcome.focus, Some(FocusHint::AppointmentDate));

        let workflow = AppointmentWorkflow::new(backend.clone());
        let appointment = workflow
            .request_for_active(&patient, None, "any time")
            .await
            .unwrap();

        let thread = ChatThread::new(backend.clone(), patient.clone());
        thread.ask("Can I walk to the clinic?").await.unwrap();

        // doctor: review and accept with a note
        store.sign_out().await.unwrap();
        let grey = auth
            .signup("Dr Grey", "grey@gmail.com", "pw", Role::Doctor)
            .await
            .unwrap();
        let doctor = store.sign_in(grey).await.unwrap();
        let queue = DoctorReviewQueue::new(backend.clone());
        let view = queue.load(&doctor, true).await.unwrap();
        assert_eq!(view.focus.as_deref(), Some(appointment.id.as_str()));

        queue
            .decide(&doctor, &appointment.id, AppointmentStatus::Accepted, Some("Come at 9am"))
            .await
            .unwrap();

        // the patient thread now shows the doctor's note after their own question
        let messages = thread.load_history().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].from_role, FromRole::Doctor);
        assert_eq!(messages[1].answer.as_deref(), Some("Appointment update: Come at 9am"));
    }
}
