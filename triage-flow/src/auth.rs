use std::sync::Arc;
use tracing::info;

use crate::{
    api::{LoginRequest, SignupRequest},
    backend::AuthService,
    error::{Result, TriageError},
    models::{Identity, Role},
};

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !email.ends_with("@gmail.com") {
        return Err(TriageError::Validation(
            "Email must be a valid @gmail.com address".to_string(),
        ));
    }
    Ok(email)
}

/// Signup and login with the client-side format checks; credentials are the
/// service's business.
pub struct AuthClient {
    service: Arc<dyn AuthService>,
}

impl AuthClient {
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        Self { service }
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str, role: Role) -> Result<Identity> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(TriageError::Validation(
                "Name, email and password are required".to_string(),
            ));
        }
        let request = SignupRequest {
            name: name.trim().to_string(),
            email: normalize_email(email)?,
            password: password.to_string(),
            role,
        };
        let grant = self.service.signup(&request).await?;
        let role = grant.role.unwrap_or(role);
        info!(user_id = %grant.user_id, %role, "Signed up");
        Ok(Identity::new(grant.user_id, role, grant.token))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Identity> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(TriageError::Validation(
                "Email and password are required".to_string(),
            ));
        }
        let request = LoginRequest {
            email: normalize_email(email)?,
            password: password.to_string(),
        };
        let grant = self.service.login(&request).await?;
        let role = grant.role.unwrap_or_default();
        info!(user_id = %grant.user_id, %role, "Logged in");
        Ok(Identity::new(grant.user_id, role, grant.token))
    }
}
