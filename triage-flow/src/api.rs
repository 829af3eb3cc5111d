//! Request and response bodies of the remote workflow service.
//!
//! Shared by the HTTP client, the in-memory authority and the dev server so
//! that all three agree on field names.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::{
    Appointment, AppointmentStatus, Assessment, ChatMessage, HistoryEntry, Role, Severity,
};

/// `POST chat/assess` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub assessment_id: String,
    pub severity: Severity,
    pub advice: String,
    #[serde(default)]
    pub suggested_meds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_meds_raw: Option<String>,
}

/// `POST chat/appointments` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub assessment_id: String,
    #[serde(default)]
    pub desired_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentCreated {
    pub appointment_id: String,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentList {
    #[serde(default)]
    pub appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentEnvelope {
    pub appointment: Appointment,
}

/// `PUT chat/appointments/{id}/status` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: AppointmentStatus,
    #[serde(default)]
    pub note: String,
}

/// What the responder may take into account when answering a chat question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
}

/// `POST chat/ask` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub context: ChatContext,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskReply {
    pub answer: String,
    pub message_id: String,
}

/// `PUT chat/message/{id}` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub question: String,
    #[serde(default)]
    pub rerun: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientHistory {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// `POST chat/patient/{id}/suggest` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorSuggestion {
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    pub user_id: String,
    /// Absent from some signup responses; login always carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Every non-2xx response carries one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Status the appointment is already in, on a rejected transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<AppointmentStatus>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            current_status: None,
        }
    }
}
