use async_trait::async_trait;

use crate::{
    api::{
        AppointmentCreated, AppointmentRequest, AskReply, AskRequest, AuthGrant, ClassifierVerdict,
        DoctorSuggestion, LoginRequest, MessageUpdate, SignupRequest, StatusUpdate,
    },
    error::Result,
    models::{Appointment, AssessmentForm, ChatMessage, HistoryEntry, Identity},
};

/// Opaque remote classifier: symptoms in, severity and advice out.
///
/// Nothing in the client assumes how the verdict is reached.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn assess(&self, identity: &Identity, form: &AssessmentForm) -> Result<ClassifierVerdict>;
}

/// The remote authority that stores and serializes every workflow mutation.
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    async fn create_appointment(
        &self,
        identity: &Identity,
        request: &AppointmentRequest,
    ) -> Result<AppointmentCreated>;

    async fn list_appointments(&self, identity: &Identity) -> Result<Vec<Appointment>>;

    async fn get_appointment(&self, identity: &Identity, appointment_id: &str)
    -> Result<Appointment>;

    async fn set_appointment_status(
        &self,
        identity: &Identity,
        appointment_id: &str,
        update: &StatusUpdate,
    ) -> Result<()>;

    /// Messages of the caller, oldest first.
    async fn chat_history(&self, identity: &Identity) -> Result<Vec<ChatMessage>>;

    async fn ask(&self, identity: &Identity, request: &AskRequest) -> Result<AskReply>;

    async fn update_message(
        &self,
        identity: &Identity,
        message_id: &str,
        update: &MessageUpdate,
    ) -> Result<()>;

    async fn delete_message(&self, identity: &Identity, message_id: &str) -> Result<()>;

    /// Assessments and chat entries of one patient, oldest first.
    async fn patient_history(
        &self,
        identity: &Identity,
        patient_id: &str,
    ) -> Result<Vec<HistoryEntry>>;

    async fn suggest_to_patient(
        &self,
        identity: &Identity,
        patient_id: &str,
        suggestion: &DoctorSuggestion,
    ) -> Result<()>;
}

/// Account endpoints of the remote service.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn signup(&self, request: &SignupRequest) -> Result<AuthGrant>;
    async fn login(&self, request: &LoginRequest) -> Result<AuthGrant>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::{error::TriageError, memory::InMemoryBackend};
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    /// Delegates to an in-memory backend; selected reads can be made to fail
    /// while every mutation keeps succeeding.
    pub struct FlakyReads {
        inner: Arc<InMemoryBackend>,
        history_down: AtomicBool,
        listing_down: AtomicBool,
        fetch_down: AtomicBool,
    }

    impl FlakyReads {
        pub fn new(inner: Arc<InMemoryBackend>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                history_down: AtomicBool::new(false),
                listing_down: AtomicBool::new(false),
                fetch_down: AtomicBool::new(false),
            })
        }

        pub fn fail_history(&self) {
            self.history_down.store(true, Ordering::SeqCst);
        }

        pub fn fail_listing(&self) {
            self.listing_down.store(true, Ordering::SeqCst);
        }

        pub fn fail_fetch(&self) {
            self.fetch_down.store(true, Ordering::SeqCst);
        }

        fn check(flag: &AtomicBool) -> Result<()> {
            if flag.load(Ordering::SeqCst) {
                Err(TriageError::Remote("connection reset".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl WorkflowBackend for FlakyReads {
        async fn create_appointment(
            &self,
            identity: &Identity,
            request: &AppointmentRequest,
        ) -> Result<AppointmentCreated> {
            self.inner.create_appointment(identity, request).await
        }

        async fn list_appointments(&self, identity: &Identity) -> Result<Vec<Appointment>> {
            Self::check(&self.listing_down)?;
            self.inner.list_appointments(identity).await
        }

        async fn get_appointment(&self, identity: &Identity, appointment_id: &str) -> Result<Appointment> {
            Self::check(&self.fetch_down)?;
            self.inner.get_appointment(identity, appointment_id).await
        }

        async fn set_appointment_status(
            &self,
            identity: &Identity,
            appointment_id: &str,
            update: &StatusUpdate,
        ) -> Result<()> {
            self.inner
                .set_appointment_status(identity, appointment_id, update)
                .await
        }

        async fn chat_history(&self, identity: &Identity) -> Result<Vec<ChatMessage>> {
            Self::check(&self.history_down)?;
            self.inner.chat_history(identity).await
        }

        async fn ask(&self, identity: &Identity, request: &AskRequest) -> Result<AskReply> {
            self.inner.ask(identity, request).await
        }

        async fn update_message(
            &self,
            identity: &Identity,
            message_id: &str,
            update: &MessageUpdate,
        ) -> Result<()> {
            self.inner.update_message(identity, message_id, update).await
        }

        async fn delete_message(&self, identity: &Identity, message_id: &str) -> Result<()> {
            self.inner.delete_message(identity, message_id).await
        }

        async fn patient_history(
            &self,
            identity: &Identity,
            patient_id: &str,
        ) -> Result<Vec<HistoryEntry>> {
            self.inner.patient_history(identity, patient_id).await
        }

        async fn suggest_to_patient(
            &self,
            identity: &Identity,
            patient_id: &str,
            suggestion: &DoctorSuggestion,
        ) -> Result<()> {
            self.inner
                .suggest_to_patient(identity, patient_id, suggestion)
                .await
        }
    }
}
