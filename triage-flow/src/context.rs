use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

/// Well-known context keys shared by the workflow components.
pub mod keys {
    /// Most recent assessment of this session; replaced on every submission.
    pub const ACTIVE_ASSESSMENT: &str = "active_assessment";
    /// Intake form as last submitted or typed.
    pub const INTAKE_FORM: &str = "intake_form";
    /// Desired date and notes typed for an appointment request.
    pub const APPOINTMENT_DRAFT: &str = "appointment_draft";
    /// OTC suggestions resolved for a non-urgent assessment.
    pub const OTC_SUGGESTIONS: &str = "otc_suggestions";
    /// Appointment created by the intake flow.
    pub const REQUESTED_APPOINTMENT: &str = "requested_appointment";
}

/// Workflow state shared between the components of one session.
///
/// Cloning is cheap and every clone sees the same entries.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    /// Returns `None` when the key is absent or holds a value of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Copy of every entry, for diagnostics.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.data
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
