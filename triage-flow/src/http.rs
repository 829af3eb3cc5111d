//! reqwest client for the remote workflow service.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    api::{
        Ack, AppointmentCreated, AppointmentEnvelope, AppointmentList, AppointmentRequest,
        AskReply, AskRequest, AuthGrant, ChatHistory, ClassifierVerdict, DoctorSuggestion,
        ErrorBody, LoginRequest, MessageUpdate, PatientHistory, SignupRequest, StatusUpdate,
    },
    backend::{AuthService, Classifier, WorkflowBackend},
    config::ClientConfig,
    error::{Result, TriageError},
    models::{Appointment, AppointmentStatus, AssessmentForm, ChatMessage, HistoryEntry, Identity},
};

/// Which call an error response belongs to; some statuses mean different things per call.
#[derive(Debug, Clone, Copy)]
enum Scope {
    General,
    AppointmentCreation,
    StatusChange(AppointmentStatus),
}

fn map_status(status: StatusCode, body: Option<ErrorBody>, scope: Scope) -> TriageError {
    let current = body.as_ref().and_then(|b| b.current_status);
    let reason = body
        .map(|b| b.error)
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    match (status, scope) {
        (StatusCode::BAD_REQUEST, _) => TriageError::Validation(reason),
        (StatusCode::UNAUTHORIZED, _) => TriageError::Authorization(reason),
        (StatusCode::FORBIDDEN, Scope::AppointmentCreation) => TriageError::Ineligible(reason),
        (StatusCode::FORBIDDEN, _) => TriageError::Authorization(reason),
        (StatusCode::NOT_FOUND, _) => TriageError::NotFound(reason),
        (StatusCode::CONFLICT, Scope::StatusChange(to)) => match current {
            Some(from) => TriageError::InvalidTransition { from, to },
            None => TriageError::Remote(reason),
        },
        _ => TriageError::Remote(reason),
    }
}

pub struct HttpBackend {
    client: Client,
    config: ClientConfig,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str, identity: Option<&Identity>) -> RequestBuilder {
        let builder = self.client.request(method, self.config.endpoint(path));
        match identity {
            Some(identity) => builder.bearer_auth(&identity.token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, scope: Scope) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        debug!(url = %response.url(), %status, "Workflow service responded");

        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let body = response.json::<ErrorBody>().await.ok();
        Err(map_status(status, body, scope))
    }
}

#[async_trait]
impl AuthService for HttpBackend {
    async fn signup(&self, request: &SignupRequest) -> Result<AuthGrant> {
        let builder = self.request(Method::POST, "auth/signup", None).json(request);
        self.send(builder, Scope::General).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthGrant> {
        let builder = self.request(Method::POST, "auth/login", None).json(request);
        self.send(builder, Scope::General).await
    }
}

#[async_trait]
impl Classifier for HttpBackend {
    async fn assess(&self, identity: &Identity, form: &AssessmentForm) -> Result<ClassifierVerdict> {
        let builder = self
            .request(Method::POST, "chat/assess", Some(identity))
            .json(form);
        self.send(builder, Scope::General).await
    }
}

#[async_trait]
impl WorkflowBackend for HttpBackend {
    async fn create_appointment(
        &self,
        identity: &Identity,
        request: &AppointmentRequest,
    ) -> Result<AppointmentCreated> {
        let builder = self
            .request(Method::POST, "chat/appointments", Some(identity))
            .json(request);
        self.send(builder, Scope::AppointmentCreation).await
    }

    async fn list_appointments(&self, identity: &Identity) -> Result<Vec<Appointment>> {
        let builder = self.request(Method::GET, "chat/appointments", Some(identity));
        let list: AppointmentList = self.send(builder, Scope::General).await?;
        Ok(list.appointments)
    }

    async fn get_appointment(&self, identity: &Identity, appointment_id: &str) -> Result<Appointment> {
        let path = format!("chat/appointments/{appointment_id}");
        let builder = self.request(Method::GET, &path, Some(identity));
        let envelope: AppointmentEnvelope = self.send(builder, Scope::General).await?;
        Ok(envelope.appointment)
    }

    async fn set_appointment_status(
        &self,
        identity: &Identity,
        appointment_id: &str,
        update: &StatusUpdate,
    ) -> Result<()> {
        let path = format!("chat/appointments/{appointment_id}/status");
        let builder = self.request(Method::PUT, &path, Some(identity)).json(update);
        let _: Ack = self.send(builder, Scope::StatusChange(update.status)).await?;
        Ok(())
    }

    async fn chat_history(&self, identity: &Identity) -> Result<Vec<ChatMessage>> {
        let builder = self.request(Method::GET, "chat/history", Some(identity));
        let history: ChatHistory = self.send(builder, Scope::General).await?;
        Ok(history.history)
    }

    async fn ask(&self, identity: &Identity, request: &AskRequest) -> Result<AskReply> {
        let builder = self
            .request(Method::POST, "chat/ask", Some(identity))
            .json(request);
        self.send(builder, Scope::General).await
    }

    async fn update_message(
        &self,
        identity: &Identity,
        message_id: &str,
        update: &MessageUpdate,
    ) -> Result<()> {
        let path = format!("chat/message/{message_id}");
        let builder = self.request(Method::PUT, &path, Some(identity)).json(update);
        let _: Ack = self.send(builder, Scope::General).await?;
        Ok(())
    }

    async fn delete_message(&self, identity: &Identity, message_id: &str) -> Result<()> {
        let path = format!("chat/message/{message_id}");
        let builder = self.request(Method::DELETE, &path, Some(identity));
        let _: Ack = self.send(builder, Scope::General).await?;
        Ok(())
    }

    async fn patient_history(&self, identity: &Identity, patient_id: &str) -> Result<Vec<HistoryEntry>> {
        let path = format!("chat/patient/{patient_id}/history");
        let builder = self.request(Method::GET, &path, Some(identity));
        let history: PatientHistory = self.send(builder, Scope::General).await?;
        Ok(history.history)
    }

    async fn suggest_to_patient(
        &self,
        identity: &Identity,
        patient_id: &str,
        suggestion: &DoctorSuggestion,
    ) -> Result<()> {
        let path = format!("chat/patient/{patient_id}/suggest");
        let builder = self
            .request(Method::POST, &path, Some(identity))
            .json(suggestion);
        let _: Ack = self.send(builder, Scope::General).await?;
        Ok(())
    }
}
