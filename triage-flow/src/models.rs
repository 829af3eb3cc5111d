use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TriageError};

/// Role attached to an authenticated identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Patient,
    Doctor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient => write!(f, "patient"),
            Self::Doctor => write!(f, "doctor"),
        }
    }
}

/// Who the client is acting as. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub token: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: Role, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            token: token.into(),
        }
    }

    pub fn is_doctor(&self) -> bool {
        self.role == Role::Doctor
    }

    pub fn has_credential(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

/// Severity tier returned by the remote classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    NonUrgent,
    Urgent,
    Critical,
}

impl Severity {
    /// Urgent and critical assessments may request an appointment.
    pub fn is_serious(self) -> bool {
        matches!(self, Self::Urgent | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonUrgent => write!(f, "non_urgent"),
            Self::Urgent => write!(f, "urgent"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Patient-reported condition form. Every field is free text, as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentForm {
    pub age: String,
    pub symptoms: String,
    pub duration: String,
    pub allergies: String,
    pub conditions: String,
}

impl AssessmentForm {
    pub fn with_symptoms(symptoms: impl Into<String>) -> Self {
        Self {
            symptoms: symptoms.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub severity: Severity,
    pub advice: String,
    #[serde(default)]
    pub suggested_meds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_model_meds: Option<String>,
    #[serde(default)]
    pub form: AssessmentForm,
}

impl Assessment {
    pub fn is_serious(&self) -> bool {
        self.severity.is_serious()
    }

    pub fn snapshot(&self) -> AssessmentSnapshot {
        AssessmentSnapshot {
            assessment_id: self.id.clone(),
            severity: self.severity,
            advice: self.advice.clone(),
            form: self.form.clone(),
        }
    }
}

/// Point-in-time copy of an assessment, frozen when an appointment is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSnapshot {
    pub assessment_id: String,
    pub severity: Severity,
    pub advice: String,
    #[serde(default)]
    pub form: AssessmentForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Accepted,
    Declined,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only `pending -> accepted` and `pending -> declined` exist.
    pub fn transition(self, to: AppointmentStatus) -> Result<AppointmentStatus> {
        match (self, to) {
            (Self::Pending, Self::Accepted | Self::Declined) => Ok(to),
            (from, to) => Err(TriageError::InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" | "accept" => Ok(Self::Accepted),
            "declined" | "decline" => Ok(Self::Declined),
            other => Err(TriageError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(alias = "_id")]
    pub id: String,
    pub patient_id: String,
    pub assessment_snapshot: AssessmentSnapshot,
    #[serde(default, deserialize_with = "lenient::opt_naive")]
    pub desired_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub notes: String,
    pub status: AppointmentStatus,
    #[serde(default, alias = "note", skip_serializing_if = "Option::is_none")]
    pub doctor_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_email: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_utc",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn severity(&self) -> Severity {
        self.assessment_snapshot.severity
    }

    pub fn is_urgent(&self) -> bool {
        self.severity().is_serious()
    }
}

/// Accepts `YYYY-MM-DDTHH:MM` (what a datetime picker produces) or with seconds.
pub fn parse_desired_date(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    raw.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .map_err(|_| TriageError::Validation(format!("invalid desired date '{raw}'")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FromRole {
    Patient,
    Doctor,
    System,
}

/// One request/response unit of the chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    pub from_role: FromRole,
    /// Missing on some doctor notes; those sort first.
    #[serde(default, deserialize_with = "lenient::utc")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Authors may edit and delete; a doctor also owns the notes they wrote.
    pub fn is_authored_by(&self, identity: &Identity) -> bool {
        if self.user_id.as_deref() == Some(identity.id.as_str()) {
            return true;
        }
        identity.is_doctor()
            && self.from_role == FromRole::Doctor
            && self.doctor_id.as_deref() == Some(identity.id.as_str())
    }
}

/// Assessment as stored in a patient's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: String,
    pub severity: Severity,
    pub advice: String,
    #[serde(default)]
    pub form: AssessmentForm,
    #[serde(default)]
    pub suggested_meds: Vec<String>,
    #[serde(default, deserialize_with = "lenient::utc")]
    pub created_at: DateTime<Utc>,
}

/// Entry of a patient's chronological record as seen by a doctor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    Assessment(AssessmentRecord),
    Message(ChatMessage),
}

impl HistoryEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Assessment(a) => a.created_at,
            Self::Message(m) => m.timestamp,
        }
    }
}

/// Doctor-facing report of one appointment. Built from the snapshot only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentReport {
    pub appointment_id: String,
    pub patient_id: String,
    pub patient_name: Option<String>,
    pub patient_email: Option<String>,
    pub status: AppointmentStatus,
    pub desired_date: Option<NaiveDateTime>,
    pub notes: String,
    pub doctor_note: Option<String>,
    pub snapshot: AssessmentSnapshot,
}

impl AppointmentReport {
    pub fn patient_label(&self) -> &str {
        self.patient_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.patient_email.as_deref())
            .unwrap_or("Unknown")
    }
}

impl From<Appointment> for AppointmentReport {
    fn from(a: Appointment) -> Self {
        Self {
            appointment_id: a.id,
            patient_id: a.patient_id,
            patient_name: a.patient_name,
            patient_email: a.patient_email,
            status: a.status,
            desired_date: a.desired_date,
            notes: a.notes,
            doctor_note: a.doctor_note,
            snapshot: a.assessment_snapshot,
        }
    }
}

/// Post-condition hints for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusHint {
    /// A serious assessment came back; the appointment date input should take focus.
    AppointmentDate,
}

/// Decoders for timestamps from services that write naive ISO strings, nulls,
/// empty strings or nothing at all. Naive values are taken as UTC.
mod lenient {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .ok()
            .or_else(|| super::parse_desired_date(raw).ok().map(|at| at.and_utc()))
    }

    fn non_blank<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()))
    }

    pub fn opt_utc<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match non_blank(deserializer)? {
            Some(raw) => parse_utc(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'"))),
            None => Ok(None),
        }
    }

    pub fn utc<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        Ok(opt_utc(deserializer)?.unwrap_or_default())
    }

    pub fn opt_naive<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match non_blank(deserializer)? {
            Some(raw) => super::parse_desired_date(&raw)
                .map(Some)
                .map_err(|e| D::Error::custom(e.reason())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_wire_names() {
        assert_eq!(serde_json::to_string(&Severity::NonUrgent).unwrap(), "\"non_urgent\"");
        let s: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert!(s.is_serious());
        assert!(!Severity::NonUrgent.is_serious());
    }

    #[test]
    fn status_machine_only_leaves_pending() {
        use AppointmentStatus::*;
        assert_eq!(Pending.transition(Accepted).unwrap(), Accepted);
        assert_eq!(Pending.transition(Declined).unwrap(), Declined);
        assert!(Pending.transition(Pending).is_err());
        assert!(Accepted.transition(Declined).is_err());
        assert!(Declined.transition(Declined).is_err());
        assert!(Accepted.is_terminal());
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn appointment_accepts_mongo_style_ids() {
        let raw = r#"{
            "_id": "a1",
            "patient_id": "p1",
            "assessment_snapshot": {"assessment_id": "s1", "severity": "urgent", "advice": "rest"},
            "status": "pending",
            "note": "bring your inhaler"
        }"#;
        let appt: Appointment = serde_json::from_str(raw).unwrap();
        assert_eq!(appt.id, "a1");
        assert!(appt.is_urgent());
        assert_eq!(appt.doctor_note.as_deref(), Some("bring your inhaler"));
        assert!(appt.desired_date.is_none());
    }

    #[test]
    fn desired_date_accepts_picker_format() {
        let d = parse_desired_date("2025-03-04T09:30").unwrap();
        assert_eq!(d.to_string(), "2025-03-04 09:30:00");
        assert!(parse_desired_date("next tuesday").is_err());
    }

    #[test]
    fn flask_style_timestamps_decode() {
        let raw = r#"[
            {"_id": "m1", "user_id": "p1", "question": "ok?", "answer": "yes",
             "from_role": "system", "timestamp": "2025-03-04T09:30:12.345678"},
            {"_id": "m2", "user_id": "p1", "doctor_id": "d1",
             "answer": "drink water", "from_role": "doctor"}
        ]"#;
        let messages: Vec<ChatMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            messages[0].timestamp.to_rfc3339(),
            "2025-03-04T09:30:12.345678+00:00"
        );
        assert_eq!(messages[1].timestamp, DateTime::<Utc>::default());
        assert!(messages[1].question.is_none());
    }

    #[test]
    fn appointment_keeps_raw_picker_date() {
        let raw = r#"{
            "_id": "a1",
            "patient_id": "p1",
            "assessment_snapshot": {"assessment_id": "s1", "severity": "critical", "advice": "go"},
            "desired_date": "2025-03-04T09:30",
            "status": "pending",
            "created_at": "2025-03-01T08:00:00.5"
        }"#;
        let appt: Appointment = serde_json::from_str(raw).unwrap();
        assert_eq!(appt.desired_date.unwrap().to_string(), "2025-03-04 09:30:00");
        assert!(appt.created_at.is_some());

        let blank = raw
            .replace(r#""2025-03-04T09:30""#, r#""""#)
            .replace(r#""2025-03-01T08:00:00.5""#, "null");
        let appt: Appointment = serde_json::from_str(&blank).unwrap();
        assert!(appt.desired_date.is_none());
        assert!(appt.created_at.is_none());

        let bad = raw.replace("2025-03-04T09:30", "soon");
        assert!(serde_json::from_str::<Appointment>(&bad).is_err());
    }

    #[test]
    fn doctor_owns_their_notes() {
        let doctor = Identity::new("d1", Role::Doctor, "t");
        let note = ChatMessage {
            id: "m1".into(),
            user_id: Some("p1".into()),
            doctor_id: Some("d1".into()),
            question: None,
            answer: Some("Appointment update: see you monday".into()),
            from_role: FromRole::Doctor,
            timestamp: Utc::now(),
        };
        assert!(note.is_authored_by(&doctor));
        assert!(note.is_authored_by(&Identity::new("p1", Role::Patient, "t")));
        assert!(!note.is_authored_by(&Identity::new("p2", Role::Patient, "t")));
    }

    #[test]
    fn history_entries_are_tagged() {
        let raw = r#"{"kind": "assessment", "id": "s1", "severity": "non_urgent",
            "advice": "fluids", "created_at": "2025-01-01T00:00:00Z"}"#;
        let entry: HistoryEntry = serde_json::from_str(raw).unwrap();
        assert!(matches!(entry, HistoryEntry::Assessment(ref a) if a.id == "s1"));
    }
}
