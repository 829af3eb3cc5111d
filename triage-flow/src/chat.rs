use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::{AskRequest, ChatContext, MessageUpdate},
    assessment::AssessmentEngine,
    backend::WorkflowBackend,
    busy::{BusyFlag, BusySet},
    error::{Result, TriageError},
    models::{ChatMessage, FromRole},
    session::Session,
};

/// Id prefix of answers that never reached the backend.
const LOCAL_ERROR_PREFIX: &str = "local-error-";

fn is_local(message_id: &str) -> bool {
    message_id.starts_with(LOCAL_ERROR_PREFIX)
}

/// The signed-in identity's question/answer thread.
///
/// The local view is a convenience: after every mutation it is rebuilt from
/// the backend's history. Questions whose answer failed stay visible locally,
/// annotated with the failure, until deleted.
pub struct ChatThread {
    backend: Arc<dyn WorkflowBackend>,
    session: Session,
    messages: RwLock<Vec<ChatMessage>>,
    ask_busy: BusyFlag,
    message_busy: BusySet,
}

impl ChatThread {
    pub fn new(backend: Arc<dyn WorkflowBackend>, session: Session) -> Self {
        Self {
            backend,
            session,
            messages: RwLock::new(Vec::new()),
            ask_busy: BusyFlag::new("ask"),
            message_busy: BusySet::new("message"),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current view, oldest first.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    async fn find(&self, message_id: &str) -> Result<ChatMessage> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| TriageError::NotFound(format!("message {message_id}")))
    }

    fn ensure_author(&self, message: &ChatMessage, action: &str) -> Result<()> {
        if message.is_authored_by(&self.session.identity) {
            Ok(())
        } else {
            Err(TriageError::Authorization(format!(
                "only the author can {action} this message"
            )))
        }
    }

    /// Replaces the view with the authoritative history.
    pub async fn load_history(&self) -> Result<Vec<ChatMessage>> {
        let history = self.backend.chat_history(&self.session.identity).await?;

        let mut messages = self.messages.write().await;
        let undelivered: Vec<ChatMessage> =
            messages.drain(..).filter(|m| is_local(&m.id)).collect();
        let mut merged = history;
        merged.extend(undelivered);
        // stable: server order wins among equal timestamps
        merged.sort_by_key(|m| m.timestamp);
        *messages = merged;

        debug!(session_id = %self.session.id, count = messages.len(), "Chat history loaded");
        Ok(messages.clone())
    }

    async fn refresh(&self) {
        if let Err(e) = self.load_history().await {
            warn!(session_id = %self.session.id, error = %e, "Chat history refresh failed");
        }
    }

    /// Asks a question, informed by the session's active assessment.
    ///
    /// A failed answer still yields a message: the question is kept and the
    /// answer reads `Error: <reason>`.
    pub async fn ask(&self, question: &str) -> Result<ChatMessage> {
        if question.trim().is_empty() {
            return Err(TriageError::Validation("question required".to_string()));
        }
        let _guard = self.ask_busy.try_begin()?;

        let identity = &self.session.identity;
        let request = AskRequest {
            question: question.to_string(),
            context: ChatContext {
                assessment: AssessmentEngine::active(&self.session),
            },
            role: identity.role,
        };

        let reply = self.backend.ask(identity, &request).await;
        let (message, delivered) = match reply {
            Ok(reply) => (
                ChatMessage {
                    id: reply.message_id,
                    user_id: Some(identity.id.clone()),
                    doctor_id: None,
                    question: Some(request.question),
                    answer: Some(reply.answer),
                    from_role: FromRole::System,
                    timestamp: Utc::now(),
                },
                true,
            ),
            Err(e) => {
                warn!(session_id = %self.session.id, error = %e, "Answering failed");
                (
                    ChatMessage {
                        id: format!("{LOCAL_ERROR_PREFIX}{}", Uuid::new_v4()),
                        user_id: Some(identity.id.clone()),
                        doctor_id: None,
                        question: Some(request.question),
                        answer: Some(format!("Error: {}", e.reason())),
                        from_role: FromRole::System,
                        timestamp: Utc::now(),
                    },
                    false,
                )
            }
        };

        self.messages.write().await.push(message.clone());
        if delivered {
            self.refresh().await;
        }
        Ok(message)
    }

    /// Replaces a question the caller wrote; with `rerun` the backend
    /// recomputes the answer from the new text.
    pub async fn edit(&self, message_id: &str, new_question: &str, rerun: bool) -> Result<()> {
        let message = self.find(message_id).await?;
        self.ensure_author(&message, "edit")?;
        if new_question.trim().is_empty() {
            return Err(TriageError::Validation("question required".to_string()));
        }
        if is_local(message_id) {
            return Err(TriageError::Validation(
                "this question was never delivered; ask it again".to_string(),
            ));
        }
        let _guard = self.message_busy.try_begin(message_id)?;

        let update = MessageUpdate {
            question: new_question.to_string(),
            rerun,
        };
        self.backend
            .update_message(&self.session.identity, message_id, &update)
            .await?;
        info!(session_id = %self.session.id, %message_id, rerun, "Message edited");

        if let Err(e) = self.load_history().await {
            warn!(session_id = %self.session.id, error = %e, "Reload after edit failed");
            let mut messages = self.messages.write().await;
            if let Some(local) = messages.iter_mut().find(|m| m.id == message_id) {
                local.question = Some(update.question);
                if rerun {
                    // the recomputed answer only exists server side
                    local.answer = None;
                }
            }
        }
        Ok(())
    }

    /// Permanently deletes a message the caller wrote, once `confirm` agrees.
    ///
    /// Returns `false` when the confirmation was declined; nothing is sent then.
    pub async fn delete<F>(&self, message_id: &str, confirm: F) -> Result<bool>
    where
        F: FnOnce(&ChatMessage) -> bool,
    {
        let message = self.find(message_id).await?;
        self.ensure_author(&message, "delete")?;
        if !confirm(&message) {
            return Ok(false);
        }

        if !is_local(message_id) {
            let _guard = self.message_busy.try_begin(message_id)?;
            self.backend
                .delete_message(&self.session.identity, message_id)
                .await?;
        }
        self.messages.write().await.retain(|m| m.id != message_id);
        info!(session_id = %self.session.id, %message_id, "Message deleted");

        if !is_local(message_id) {
            self.refresh().await;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::DoctorSuggestion,
        backend::testing::FlakyReads,
        memory::InMemoryBackend,
        models::{AssessmentForm, Role},
    };

    async fn thread_with(backend: Arc<InMemoryBackend>, name: &str) -> ChatThread {
        let identity = backend.register(name, Role::Patient).await.unwrap();
        ChatThread::new(backend, Session::new(identity, "assess"))
    }

    fn failing_backend() -> Arc<InMemoryBackend> {
        Arc::new(InMemoryBackend::with_responder(Arc::new(
            |_: &str, _: Role, _: &ChatContext| -> Result<String> {
                Err(TriageError::Remote("model offline".to_string()))
            },
        )))
    }

    #[tokio::test]
    async fn ask_appends_one_answered_message() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend, "Ann").await;

        let message = thread.ask("Can I take ibuprofen?").await.unwrap();
        assert_eq!(message.question.as_deref(), Some("Can I take ibuprofen?"));
        assert!(message.answer.as_deref().unwrap().contains("ibuprofen"));

        let view = thread.messages().await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, message.id);
    }

    #[tokio::test]
    async fn blank_question_is_a_no_op() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend.clone(), "Ann").await;

        let err = thread.ask("  ").await.unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
        assert!(thread.messages().await.is_empty());
        assert!(
            backend
                .chat_history(&thread.session().identity)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn failed_answer_keeps_the_question() {
        let thread = thread_with(failing_backend(), "Ann").await;

        let message = thread.ask("What dose of ibuprofen?").await.unwrap();
        assert!(message.answer.as_deref().unwrap().starts_with("Error:"));
        assert_eq!(message.question.as_deref(), Some("What dose of ibuprofen?"));
        assert_eq!(message.from_role, FromRole::System);

        // survives a resync with the backend, which never saw it
        let view = thread.load_history().await.unwrap();
        assert_eq!(view, vec![message.clone()]);

        assert!(thread.delete(&message.id, |_| true).await.unwrap());
        assert!(thread.messages().await.is_empty());
    }

    #[tokio::test]
    async fn active_assessment_is_sent_as_context() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend.clone(), "Ann").await;
        let engine = AssessmentEngine::new(backend);
        engine
            .assess(thread.session(), AssessmentForm::with_symptoms("chest pain"))
            .await
            .unwrap();

        let message = thread.ask("Should I worry?").await.unwrap();
        assert!(message.answer.as_deref().unwrap().starts_with("[critical]"));
    }

    #[tokio::test]
    async fn edit_without_rerun_keeps_the_answer() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend, "Ann").await;
        let original = thread.ask("Is rest enough?").await.unwrap();

        thread
            .edit(&original.id, "Is rest enough for a cold?", false)
            .await
            .unwrap();

        let view = thread.messages().await;
        assert_eq!(view[0].question.as_deref(), Some("Is rest enough for a cold?"));
        assert_eq!(view[0].answer, original.answer);
    }

    #[tokio::test]
    async fn edit_with_rerun_shows_the_recomputed_answer() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend, "Ann").await;
        let original = thread.ask("Is rest enough?").await.unwrap();

        thread
            .edit(&original.id, "Is honey good for a cough?", true)
            .await
            .unwrap();

        let edited = thread
            .messages()
            .await
            .into_iter()
            .find(|m| m.id == original.id)
            .unwrap();
        assert_eq!(edited.question.as_deref(), Some("Is honey good for a cough?"));
        let answer = edited.answer.unwrap();
        assert!(answer.contains("Is honey good for a cough?"));
        assert_ne!(Some(answer), original.answer);
    }

    #[tokio::test]
    async fn rerun_with_failed_reload_drops_the_stale_answer() {
        let backend = Arc::new(InMemoryBackend::new());
        let identity = backend.register("Ann", Role::Patient).await.unwrap();
        let flaky = FlakyReads::new(backend);
        let thread = ChatThread::new(flaky.clone(), Session::new(identity, "assess"));
        let kept = thread.ask("Is rest enough?").await.unwrap();
        let rerun = thread.ask("Do I need fluids?").await.unwrap();
        assert!(rerun.answer.is_some());

        flaky.fail_history();
        thread.edit(&kept.id, "Is rest enough for a cold?", false).await.unwrap();
        thread.edit(&rerun.id, "Is honey good for a cough?", true).await.unwrap();

        let view = thread.messages().await;
        assert_eq!(view[0].question.as_deref(), Some("Is rest enough for a cold?"));
        assert_eq!(view[0].answer, kept.answer);
        assert_eq!(view[1].question.as_deref(), Some("Is honey good for a cough?"));
        assert_eq!(view[1].answer, None);
    }

    #[tokio::test]
    async fn concurrent_edit_of_same_message_is_rejected() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend, "Ann").await;
        let message = thread.ask("first").await.unwrap();

        let _in_flight = thread.message_busy.try_begin(&message.id).unwrap();
        let err = thread.edit(&message.id, "second", true).await.unwrap_err();
        assert!(matches!(err, TriageError::Busy(_)));
    }

    #[tokio::test]
    async fn non_author_cannot_edit_or_delete() {
        let backend = Arc::new(InMemoryBackend::new());
        let ann = thread_with(backend.clone(), "Ann").await;
        let bob = thread_with(backend.clone(), "Bob").await;
        let anns = ann.ask("private question").await.unwrap();

        // Bob somehow sees Ann's message
        bob.messages.write().await.push(anns.clone());

        let err = bob.edit(&anns.id, "hijacked", true).await.unwrap_err();
        assert!(matches!(err, TriageError::Authorization(_)));
        let err = bob.delete(&anns.id, |_| true).await.unwrap_err();
        assert!(matches!(err, TriageError::Authorization(_)));

        // and the authority agrees
        let err = backend
            .delete_message(&bob.session().identity, &anns.id)
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Authorization(_)));

        let view = ann.load_history().await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].question.as_deref(), Some("private question"));
    }

    #[tokio::test]
    async fn delete_requires_confirmation() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend, "Ann").await;
        let message = thread.ask("to be removed").await.unwrap();

        assert!(!thread.delete(&message.id, |_| false).await.unwrap());
        assert_eq!(thread.load_history().await.unwrap().len(), 1);

        assert!(thread.delete(&message.id, |m| m.id == message.id).await.unwrap());
        assert!(thread.messages().await.is_empty());
        assert!(thread.load_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn doctor_notes_appear_answer_only() {
        let backend = Arc::new(InMemoryBackend::new());
        let thread = thread_with(backend.clone(), "Ann").await;
        let doctor = backend.register("Dr Grey", Role::Doctor).await.unwrap();
        backend
            .suggest_to_patient(
                &doctor,
                &thread.session().identity.id,
                &DoctorSuggestion {
                    suggestion: "Drink plenty of water".into(),
                },
            )
            .await
            .unwrap();

        let view = thread.load_history().await.unwrap();
        assert_eq!(view.len(), 1);
        assert!(view[0].question.is_none());
        assert_eq!(view[0].from_role, FromRole::Doctor);
    }
}
