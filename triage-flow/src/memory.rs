//! Deterministic in-process stand-in for the remote workflow service.
//!
//! Enforces the same rules the real service does (ownership, doctor-only
//! endpoints, severity gate, terminal appointment states) so that workflow
//! code can be exercised without a network. The dev server wraps it in HTTP.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    api::{
        AppointmentCreated, AppointmentRequest, AskReply, AskRequest, AuthGrant, ChatContext,
        ClassifierVerdict, DoctorSuggestion, LoginRequest, MessageUpdate, SignupRequest,
        StatusUpdate,
    },
    backend::{AuthService, Classifier, WorkflowBackend},
    error::{Result, TriageError},
    models::{
        Appointment, AppointmentStatus, AssessmentForm, AssessmentRecord, AssessmentSnapshot,
        ChatMessage, FromRole, HistoryEntry, Identity, Role, Severity,
    },
};

/// Symptoms that make an assessment critical regardless of anything else.
const RED_FLAGS: &[&str] = &[
    "chest pain",
    "shortness of breath",
    "difficulty breathing",
    "fainting",
    "loss of consciousness",
    "slurred speech",
    "sudden weakness",
    "severe bleeding",
    "severe allergic reaction",
    "severe abdominal pain",
    "seizure",
];

/// Produces chat answers for the in-memory authority.
pub trait Responder: Send + Sync {
    fn answer(&self, question: &str, role: Role, context: &ChatContext) -> Result<String>;
}

impl<F> Responder for F
where
    F: Fn(&str, Role, &ChatContext) -> Result<String> + Send + Sync,
{
    fn answer(&self, question: &str, role: Role, context: &ChatContext) -> Result<String> {
        self(question, role, context)
    }
}

/// Default responder: restates the question and the assessment it was asked under.
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn answer(&self, question: &str, _role: Role, context: &ChatContext) -> Result<String> {
        Ok(match &context.assessment {
            Some(a) => format!("[{}] About \"{}\": {}", a.severity, question.trim(), a.advice),
            None => format!("About \"{}\": please describe your symptoms in detail.", question.trim()),
        })
    }
}

/// Severity rules of the stand-in classifier.
pub fn classify(form: &AssessmentForm) -> Severity {
    let text = format!("{} {}", form.symptoms, form.conditions).to_lowercase();
    if RED_FLAGS.iter().any(|flag| text.contains(flag)) {
        return Severity::Critical;
    }
    let infant = form.age.trim().parse::<u32>().map(|a| a < 2).unwrap_or(false);
    if text.contains("fever") && infant {
        return Severity::Urgent;
    }
    if form.duration.trim().parse::<u32>().map(|d| d >= 7).unwrap_or(false) {
        return Severity::Urgent;
    }
    Severity::NonUrgent
}

fn advice_for(severity: Severity) -> String {
    let advice = match severity {
        Severity::Critical => {
            "Your symptoms include warning signs. Seek emergency care now and request an appointment."
        }
        Severity::Urgent => "Your symptoms should be reviewed by a doctor soon. Request an appointment.",
        Severity::NonUrgent => {
            "Rest, stay hydrated and monitor your symptoms. See a doctor if they worsen."
        }
    };
    advice.to_string()
}

#[derive(Debug, Clone)]
struct UserRecord {
    id: String,
    name: String,
    email: String,
    password: String,
    role: Role,
}

#[derive(Debug, Clone)]
struct StoredAssessment {
    owner: String,
    record: AssessmentRecord,
    seq: u64,
}

#[derive(Debug, Clone)]
struct StoredAppointment {
    appointment: Appointment,
    seq: u64,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message: ChatMessage,
    context: ChatContext,
    seq: u64,
}

/// In-memory workflow authority.
pub struct InMemoryBackend {
    users: DashMap<String, UserRecord>,
    tokens: DashMap<String, String>,
    assessments: DashMap<String, StoredAssessment>,
    appointments: DashMap<String, StoredAppointment>,
    messages: DashMap<String, StoredMessage>,
    seq: AtomicU64,
    responder: Arc<dyn Responder>,
    medications: Vec<String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_responder(Arc::new(EchoResponder))
    }

    pub fn with_responder(responder: Arc<dyn Responder>) -> Self {
        Self {
            users: DashMap::new(),
            tokens: DashMap::new(),
            assessments: DashMap::new(),
            appointments: DashMap::new(),
            messages: DashMap::new(),
            seq: AtomicU64::new(0),
            responder,
            medications: Vec::new(),
        }
    }

    /// Structured suggestions returned with every verdict.
    pub fn with_medications(mut self, medications: Vec<String>) -> Self {
        self.medications = medications;
        self
    }

    /// Signs up an account directly and returns its identity.
    pub async fn register(&self, name: &str, role: Role) -> Result<Identity> {
        let email = format!("{}@gmail.com", name.to_lowercase().replace(' ', "."));
        let grant = self
            .signup(&SignupRequest {
                name: name.to_string(),
                email,
                password: "secret".to_string(),
                role,
            })
            .await?;
        Ok(Identity::new(grant.user_id, grant.role.unwrap_or(role), grant.token))
    }

    /// Resolves a bearer token to the identity it was issued for.
    pub fn authenticate(&self, token: &str) -> Result<Identity> {
        let user_id = self
            .tokens
            .get(token)
            .map(|e| e.value().clone())
            .ok_or_else(|| TriageError::Authorization("Invalid token".to_string()))?;
        let user = self
            .users
            .get(&user_id)
            .ok_or_else(|| TriageError::Authorization("User not found".to_string()))?;
        Ok(Identity::new(user.id.clone(), user.role, token))
    }

    fn verify(&self, identity: &Identity) -> Result<Identity> {
        let known = self.authenticate(&identity.token)?;
        if known.id != identity.id {
            return Err(TriageError::Authorization("Invalid token".to_string()));
        }
        Ok(known)
    }

    fn verify_doctor(&self, identity: &Identity) -> Result<Identity> {
        let known = self.verify(identity)?;
        if !known.is_doctor() {
            return Err(TriageError::Authorization(
                "Forbidden - insufficient role".to_string(),
            ));
        }
        Ok(known)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn enrich(&self, mut appointment: Appointment) -> Appointment {
        if let Some(user) = self.users.get(&appointment.patient_id) {
            appointment.patient_name = Some(user.name.clone());
            appointment.patient_email = Some(user.email.clone());
        }
        appointment
    }

    fn insert_message(&self, message: ChatMessage, context: ChatContext) {
        let seq = self.next_seq();
        self.messages.insert(
            message.id.clone(),
            StoredMessage {
                message,
                context,
                seq,
            },
        );
    }

    fn messages_of(&self, user_id: &str) -> Vec<(u64, ChatMessage)> {
        self.messages
            .iter()
            .filter(|e| e.message.user_id.as_deref() == Some(user_id))
            .map(|e| (e.seq, e.message.clone()))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !email.ends_with("@gmail.com") {
        return Err(TriageError::Validation(
            "Email must be a @gmail.com address".to_string(),
        ));
    }
    Ok(email)
}

#[async_trait]
impl AuthService for InMemoryBackend {
    async fn signup(&self, request: &SignupRequest) -> Result<AuthGrant> {
        let name = request.name.trim();
        if name.is_empty() || request.email.trim().is_empty() || request.password.is_empty() {
            return Err(TriageError::Validation(
                "Name, email and password are required".to_string(),
            ));
        }
        let email = validate_email(&request.email)?;
        if self.users.iter().any(|u| u.email == email) {
            return Err(TriageError::Validation("User already exists".to_string()));
        }

        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email,
            password: request.password.clone(),
            role: request.role,
        };
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(token.clone(), user.id.clone());
        let grant = AuthGrant {
            token,
            user_id: user.id.clone(),
            role: Some(user.role),
        };
        info!(user_id = %user.id, role = %user.role, "Account created");
        self.users.insert(user.id.clone(), user);
        Ok(grant)
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthGrant> {
        let email = validate_email(&request.email)?;
        let user = self
            .users
            .iter()
            .find(|u| u.email == email && u.password == request.password)
            .map(|u| u.value().clone())
            .ok_or_else(|| TriageError::Authorization("Invalid credentials".to_string()))?;

        let token = Uuid::new_v4().to_string();
        self.tokens.insert(token.clone(), user.id.clone());
        Ok(AuthGrant {
            token,
            user_id: user.id,
            role: Some(user.role),
        })
    }
}

#[async_trait]
impl Classifier for InMemoryBackend {
    async fn assess(&self, identity: &Identity, form: &AssessmentForm) -> Result<ClassifierVerdict> {
        let caller = self.verify(identity)?;
        if form.symptoms.trim().is_empty() {
            return Err(TriageError::Validation("symptoms required".to_string()));
        }

        let severity = classify(form);
        let record = AssessmentRecord {
            id: Uuid::new_v4().to_string(),
            severity,
            advice: advice_for(severity),
            form: form.clone(),
            suggested_meds: self.medications.clone(),
            created_at: Self::now(),
        };
        let verdict = ClassifierVerdict {
            assessment_id: record.id.clone(),
            severity,
            advice: record.advice.clone(),
            suggested_meds: record.suggested_meds.clone(),
            model_meds_raw: (!self.medications.is_empty()).then(|| self.medications.join(", ")),
        };

        debug!(user_id = %caller.id, assessment_id = %record.id, %severity, "Assessment stored");
        let seq = self.next_seq();
        self.assessments.insert(
            record.id.clone(),
            StoredAssessment {
                owner: caller.id,
                record,
                seq,
            },
        );
        Ok(verdict)
    }
}

#[async_trait]
impl WorkflowBackend for InMemoryBackend {
    async fn create_appointment(
        &self,
        identity: &Identity,
        request: &AppointmentRequest,
    ) -> Result<AppointmentCreated> {
        let caller = self.verify(identity)?;
        if request.assessment_id.trim().is_empty() {
            return Err(TriageError::Validation("assessment_id required".to_string()));
        }

        let record = self
            .assessments
            .get(&request.assessment_id)
            .filter(|a| a.owner == caller.id)
            .map(|a| a.record.clone())
            .ok_or_else(|| {
                TriageError::NotFound(
                    "Assessment not found or not owned by the current user. Please re-run the assessment and try again."
                        .to_string(),
                )
            })?;

        if !record.severity.is_serious() {
            return Err(TriageError::Ineligible(
                "Only serious assessments can request appointments".to_string(),
            ));
        }

        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            patient_id: caller.id.clone(),
            assessment_snapshot: AssessmentSnapshot {
                assessment_id: record.id.clone(),
                severity: record.severity,
                advice: record.advice.clone(),
                form: record.form.clone(),
            },
            desired_date: request.desired_date,
            notes: request.notes.clone(),
            status: AppointmentStatus::Pending,
            doctor_note: None,
            patient_name: None,
            patient_email: None,
            created_at: Some(Self::now()),
        };
        let created = AppointmentCreated {
            appointment_id: appointment.id.clone(),
            status: appointment.status,
        };

        info!(
            appointment_id = %appointment.id,
            patient_id = %caller.id,
            severity = %record.severity,
            "Appointment created"
        );
        let seq = self.next_seq();
        self.appointments
            .insert(appointment.id.clone(), StoredAppointment { appointment, seq });
        Ok(created)
    }

    async fn list_appointments(&self, identity: &Identity) -> Result<Vec<Appointment>> {
        let caller = self.verify(identity)?;
        let mut visible: Vec<(u64, Appointment)> = self
            .appointments
            .iter()
            .filter(|e| caller.is_doctor() || e.appointment.patient_id == caller.id)
            .map(|e| (e.seq, e.appointment.clone()))
            .collect();
        visible.sort_by_key(|(seq, _)| *seq);
        Ok(visible.into_iter().map(|(_, a)| self.enrich(a)).collect())
    }

    async fn get_appointment(
        &self,
        identity: &Identity,
        appointment_id: &str,
    ) -> Result<Appointment> {
        let caller = self.verify_doctor(identity)?;
        let appointment = self
            .appointments
            .get(appointment_id)
            .map(|e| e.appointment.clone())
            .ok_or_else(|| TriageError::NotFound("Not found".to_string()))?;
        debug!(doctor_id = %caller.id, %appointment_id, "Appointment fetched");
        Ok(self.enrich(appointment))
    }

    async fn set_appointment_status(
        &self,
        identity: &Identity,
        appointment_id: &str,
        update: &StatusUpdate,
    ) -> Result<()> {
        let doctor = self.verify_doctor(identity)?;
        let patient_id = {
            let mut entry = self
                .appointments
                .get_mut(appointment_id)
                .ok_or_else(|| TriageError::NotFound("Not found".to_string()))?;
            let appointment = &mut entry.appointment;
            appointment.status = appointment.status.transition(update.status)?;
            if !update.note.trim().is_empty() {
                appointment.doctor_note = Some(update.note.clone());
            }
            appointment.patient_id.clone()
        };

        info!(
            %appointment_id,
            doctor_id = %doctor.id,
            status = %update.status,
            "Appointment status updated"
        );

        if update.status == AppointmentStatus::Accepted && !update.note.trim().is_empty() {
            self.insert_message(
                ChatMessage {
                    id: Uuid::new_v4().to_string(),
                    user_id: Some(patient_id),
                    doctor_id: Some(doctor.id),
                    question: None,
                    answer: Some(format!("Appointment update: {}", update.note)),
                    from_role: FromRole::Doctor,
                    timestamp: Self::now(),
                },
                ChatContext::default(),
            );
        }
        Ok(())
    }

    async fn chat_history(&self, identity: &Identity) -> Result<Vec<ChatMessage>> {
        let caller = self.verify(identity)?;
        let mut history = self.messages_of(&caller.id);
        history.sort_by_key(|(seq, _)| *seq);
        Ok(history.into_iter().map(|(_, m)| m).collect())
    }

    async fn ask(&self, identity: &Identity, request: &AskRequest) -> Result<AskReply> {
        let caller = self.verify(identity)?;
        if request.question.trim().is_empty() {
            return Err(TriageError::Validation("question required".to_string()));
        }

        let answer = self
            .responder
            .answer(&request.question, caller.role, &request.context)?;
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            user_id: Some(caller.id),
            doctor_id: None,
            question: Some(request.question.clone()),
            answer: Some(answer.clone()),
            from_role: FromRole::System,
            timestamp: Self::now(),
        };
        let reply = AskReply {
            answer,
            message_id: message.id.clone(),
        };
        self.insert_message(message, request.context.clone());
        Ok(reply)
    }

    async fn update_message(
        &self,
        identity: &Identity,
        message_id: &str,
        update: &MessageUpdate,
    ) -> Result<()> {
        let caller = self.verify(identity)?;
        let stored = self
            .messages
            .get(message_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TriageError::NotFound("Not found".to_string()))?;
        if !stored.message.is_authored_by(&caller) {
            return Err(TriageError::Authorization("Forbidden".to_string()));
        }

        // Compute first so a responder failure leaves the message untouched.
        let answer = if update.rerun {
            Some(
                self.responder
                    .answer(&update.question, caller.role, &stored.context)?,
            )
        } else {
            None
        };
        let seq = answer.as_ref().map(|_| self.next_seq());

        let mut entry = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| TriageError::NotFound("Not found".to_string()))?;
        entry.message.question = Some(update.question.clone());
        if let (Some(answer), Some(seq)) = (answer, seq) {
            entry.message.answer = Some(answer);
            entry.message.timestamp = Self::now();
            entry.seq = seq;
        }
        Ok(())
    }

    async fn delete_message(&self, identity: &Identity, message_id: &str) -> Result<()> {
        let caller = self.verify(identity)?;
        let authored = self
            .messages
            .get(message_id)
            .map(|e| e.message.is_authored_by(&caller))
            .ok_or_else(|| TriageError::NotFound("Not found".to_string()))?;
        if !authored {
            return Err(TriageError::Authorization("Forbidden".to_string()));
        }
        self.messages.remove(message_id);
        Ok(())
    }

    async fn patient_history(
        &self,
        identity: &Identity,
        patient_id: &str,
    ) -> Result<Vec<HistoryEntry>> {
        self.verify_doctor(identity)?;
        let mut entries: Vec<(u64, HistoryEntry)> = self
            .assessments
            .iter()
            .filter(|e| e.owner == patient_id)
            .map(|e| (e.seq, HistoryEntry::Assessment(e.record.clone())))
            .collect();
        entries.extend(
            self.messages_of(patient_id)
                .into_iter()
                .map(|(seq, m)| (seq, HistoryEntry::Message(m))),
        );
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, e)| e).collect())
    }

    async fn suggest_to_patient(
        &self,
        identity: &Identity,
        patient_id: &str,
        suggestion: &DoctorSuggestion,
    ) -> Result<()> {
        let doctor = self.verify_doctor(identity)?;
        if suggestion.suggestion.trim().is_empty() {
            return Err(TriageError::Validation("suggestion required".to_string()));
        }
        self.insert_message(
            ChatMessage {
                id: Uuid::new_v4().to_string(),
                user_id: Some(patient_id.to_string()),
                doctor_id: Some(doctor.id),
                question: None,
                answer: Some(suggestion.suggestion.clone()),
                from_role: FromRole::Doctor,
                timestamp: Self::now(),
            },
            ChatContext::default(),
        );
        Ok(())
    }
}
