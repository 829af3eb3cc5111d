use axum::{
    Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::Json,
    routing::{get, post, put},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use triage_flow::{
    AuthService, Classifier, Identity, InMemoryBackend, TriageError, WorkflowBackend,
    api::{
        Ack, AppointmentCreated, AppointmentEnvelope, AppointmentList, AppointmentRequest,
        AskReply, AskRequest, AuthGrant, ChatHistory, ClassifierVerdict, DoctorSuggestion,
        ErrorBody, LoginRequest, MessageUpdate, PatientHistory, SignupRequest, StatusUpdate,
    },
    models::AssessmentForm,
};

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn unauthorized(message: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(ErrorBody::new(message)))
}

/// Maps workflow errors raised behind an authenticated request.
fn api_error(err: TriageError) -> ApiError {
    let mut body = ErrorBody::new(err.reason());
    let status = match err {
        TriageError::Validation(_) | TriageError::ContextError(_) => StatusCode::BAD_REQUEST,
        TriageError::Authorization(_) | TriageError::Ineligible(_) => StatusCode::FORBIDDEN,
        TriageError::NotFound(_) => StatusCode::NOT_FOUND,
        TriageError::InvalidTransition { from, .. } => {
            body.current_status = Some(from);
            StatusCode::CONFLICT
        }
        other => {
            error!(error = %other, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(body))
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<InMemoryBackend>,
}

impl AppState {
    pub fn new(backend: Arc<InMemoryBackend>) -> Self {
        Self { backend }
    }
}

/// Identity behind the request's bearer token.
pub struct Caller(pub Identity);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| unauthorized("Token is missing"))?;

        state
            .backend
            .authenticate(token)
            .map(Caller)
            .map_err(|e| unauthorized(&e.reason()))
    }
}

pub fn build_router(app_state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/chat/assess", post(assess))
        .route(
            "/chat/appointments",
            post(create_appointment).get(list_appointments),
        )
        .route("/chat/appointments/{id}", get(get_appointment))
        .route("/chat/appointments/{id}/status", put(set_appointment_status))
        .route("/chat/history", get(chat_history))
        .route("/chat/ask", post(ask))
        .route("/chat/message/{id}", put(update_message).delete(delete_message))
        .route("/chat/patient/{id}/history", get(patient_history))
        .route("/chat/patient/{id}/suggest", post(suggest_to_patient));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> ApiResult<AuthGrant> {
    state.backend.signup(&request).await.map(Json).map_err(api_error)
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<AuthGrant> {
    state
        .backend
        .login(&request)
        .await
        .map(Json)
        // bad credentials are an authentication failure, not a forbidden action
        .map_err(|e| match e {
            TriageError::Authorization(m) => unauthorized(&m),
            other => api_error(other),
        })
}

async fn assess(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(form): Json<AssessmentForm>,
) -> ApiResult<ClassifierVerdict> {
    let verdict = state.backend.assess(&caller, &form).await.map_err(api_error)?;
    info!(user_id = %caller.id, severity = %verdict.severity, "Assessed");
    Ok(Json(verdict))
}

async fn create_appointment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<AppointmentRequest>,
) -> ApiResult<AppointmentCreated> {
    state
        .backend
        .create_appointment(&caller, &request)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn list_appointments(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<AppointmentList> {
    let appointments = state
        .backend
        .list_appointments(&caller)
        .await
        .map_err(api_error)?;
    Ok(Json(AppointmentList { appointments }))
}

async fn get_appointment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<AppointmentEnvelope> {
    let appointment = state
        .backend
        .get_appointment(&caller, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(AppointmentEnvelope { appointment }))
}

async fn set_appointment_status(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Ack> {
    state
        .backend
        .set_appointment_status(&caller, &id, &update)
        .await
        .map_err(api_error)?;
    Ok(Json(Ack::new("Status updated")))
}

async fn chat_history(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<ChatHistory> {
    let history = state.backend.chat_history(&caller).await.map_err(api_error)?;
    Ok(Json(ChatHistory { history }))
}

async fn ask(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<AskRequest>,
) -> ApiResult<AskReply> {
    state.backend.ask(&caller, &request).await.map(Json).map_err(api_error)
}

async fn update_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(update): Json<MessageUpdate>,
) -> ApiResult<Ack> {
    state
        .backend
        .update_message(&caller, &id, &update)
        .await
        .map_err(api_error)?;
    Ok(Json(Ack::new("Updated")))
}

async fn delete_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<Ack> {
    state
        .backend
        .delete_message(&caller, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(Ack::new("Deleted")))
}

async fn patient_history(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<PatientHistory> {
    let history = state
        .backend
        .patient_history(&caller, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(PatientHistory { history }))
}

async fn suggest_to_patient(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(suggestion): Json<DoctorSuggestion>,
) -> ApiResult<Ack> {
    state
        .backend
        .suggest_to_patient(&caller, &id, &suggestion)
        .await
        .map_err(api_error)?;
    Ok(Json(Ack::new("Suggestion sent")))
}
