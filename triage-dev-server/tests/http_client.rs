//! The reqwest client against the dev server over a real socket.

use std::sync::Arc;
use tokio::net::TcpListener;
use triage_dev_server::{AppState, build_router};
use triage_flow::{
    AppointmentStatus, AppointmentWorkflow, AssessmentEngine, AuthClient, ChatThread,
    ClientConfig, DoctorReviewQueue, HttpBackend, InMemoryBackend, Role, Session, Severity,
    TriageError, WorkflowBackend,
    api::AppointmentRequest,
    models::AssessmentForm,
};

async fn spawn_server() -> Arc<HttpBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    let app = build_router(AppState::new(backend));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ClientConfig {
        base_url: format!("http://{addr}/api"),
        timeout_secs: 5,
    };
    Arc::new(HttpBackend::new(config).unwrap())
}

async fn sign_up(http: &Arc<HttpBackend>, name: &str, role: Role) -> Session {
    let email = format!("{}@gmail.com", name.to_lowercase());
    let identity = AuthClient::new(http.clone())
        .signup(name, &email, "pw", role)
        .await
        .unwrap();
    Session::new(identity, "assess")
}

#[tokio::test]
async fn appointment_creation_maps_not_found_and_ineligible() {
    let http = spawn_server().await;
    let ann = sign_up(&http, "Ann", Role::Patient).await;
    let engine = AssessmentEngine::new(http.clone());

    let mild = engine
        .assess(&ann, AssessmentForm::with_symptoms("runny nose"))
        .await
        .unwrap();
    assert_eq!(mild.assessment.severity, Severity::NonUrgent);
    assert!(!mild.otc_suggestions.is_empty());

    // straight to the backend, past the local severity gate
    let err = http
        .create_appointment(
            &ann.identity,
            &AppointmentRequest {
                assessment_id: mild.assessment.id.clone(),
                desired_date: None,
                notes: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::Ineligible(_)));

    let err = http
        .create_appointment(
            &ann.identity,
            &AppointmentRequest {
                assessment_id: "not-a-real-id".into(),
                desired_date: None,
                notes: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::NotFound(_)));
}

#[tokio::test]
async fn doctor_decides_once() {
    let http = spawn_server().await;
    let ann = sign_up(&http, "Ann", Role::Patient).await;
    let grey = sign_up(&http, "Grey", Role::Doctor).await;

    AssessmentEngine::new(http.clone())
        .assess(&ann, AssessmentForm::with_symptoms("seizure"))
        .await
        .unwrap();
    let appointment = AppointmentWorkflow::new(http.clone())
        .request_for_active(&ann, None, "")
        .await
        .unwrap();

    let queue = DoctorReviewQueue::new(http.clone());
    let view = queue.load(&grey, true).await.unwrap();
    let report = view.report.unwrap();
    assert_eq!(report.patient_label(), "Ann");
    assert_eq!(report.snapshot.severity, Severity::Critical);

    queue
        .decide(&grey, &appointment.id, AppointmentStatus::Declined, Some("see pharmacist"))
        .await
        .unwrap();
    let err = queue
        .decide(&grey, &appointment.id, AppointmentStatus::Declined, None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TriageError::InvalidTransition {
            from: AppointmentStatus::Declined,
            to: AppointmentStatus::Declined,
        }
    );

    // patients are forbidden from doctor endpoints
    let err = http
        .get_appointment(&ann.identity, &appointment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::Authorization(_)));
}

#[tokio::test]
async fn chat_thread_over_http() {
    let http = spawn_server().await;
    let ann = sign_up(&http, "Ann", Role::Patient).await;
    let bob = sign_up(&http, "Bob", Role::Patient).await;
    let thread = ChatThread::new(http.clone(), ann.clone());

    let first = thread.ask("Is rest enough?").await.unwrap();
    thread.ask("And fluids?").await.unwrap();
    thread.edit(&first.id, "Is sleep enough?", true).await.unwrap();

    let view = thread.messages().await;
    assert_eq!(view.len(), 2);
    assert_eq!(view[1].id, first.id);
    assert!(view[1].answer.as_deref().unwrap().contains("Is sleep enough?"));

    let err = http.delete_message(&bob.identity, &first.id).await.unwrap_err();
    assert!(matches!(err, TriageError::Authorization(_)));

    assert!(thread.delete(&first.id, |_| true).await.unwrap());
    assert_eq!(thread.load_history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn bad_credentials_and_tokens() {
    let http = spawn_server().await;
    sign_up(&http, "Ann", Role::Patient).await;

    let err = AuthClient::new(http.clone())
        .login("ann@gmail.com", "wrong")
        .await
        .unwrap_err();
    assert_eq!(err, TriageError::Authorization("Invalid credentials".into()));

    let forged = triage_flow::Identity::new("x", Role::Patient, "forged-token");
    let err = http.chat_history(&forged).await.unwrap_err();
    assert_eq!(err, TriageError::Authorization("Invalid token".into()));
}

#[tokio::test]
async fn unreachable_service_is_a_remote_error() {
    let config = ClientConfig {
        base_url: "http://127.0.0.1:9/api".into(),
        timeout_secs: 2,
    };
    let http = Arc::new(HttpBackend::new(config).unwrap());
    let session = Session::new(triage_flow::Identity::new("p", Role::Patient, "t"), "assess");

    let err = AssessmentEngine::new(http.clone())
        .assess(&session, AssessmentForm::with_symptoms("cough"))
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::Remote(ref m) if m.starts_with("Assessment failed")));

    // chat keeps the question with an error answer instead
    let thread = ChatThread::new(http, session);
    let message = thread.ask("What dose of ibuprofen?").await.unwrap();
    assert!(message.answer.unwrap().starts_with("Error:"));
}
