// ============================================================================
// Coordinator: session -> context -> routing -> handlers -> persist -> deliver
// ============================================================================
//
// One incoming message walks the whole pipeline inside a per-user lock, so
// messages from the same user are processed to completion in arrival order
// while different users proceed concurrently. Handler failures are isolated
// per domain; only an unresolvable user or a store failure during session
// resolution aborts the request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::{DomainHandler, HandlerRequest};
use crate::channel::{prepare_outbound, OutboundChannel};
use crate::error::MotusError;
use crate::intent::{classify, Domain, DomainMatch};
use crate::memory::ContextCompressor;
use crate::models::MessageRole;
use crate::session::SessionManager;
use crate::store::{ConversationStore, NewMessage, StoreError};

/// Sent when every matched domain handler failed.
const ALL_FAILED_APOLOGY: &str =
    "Lo siento, estoy teniendo problemas para responder ahora mismo. Intenta de nuevo en unos minutos.";

fn domain_fallback(domain: Domain) -> &'static str {
    match domain {
        Domain::FitnessAction | Domain::FitnessQuestion => {
            "No pude procesar tu consulta de fitness ahora mismo, intenta de nuevo."
        }
        Domain::NutritionLog | Domain::NutritionQuery => {
            "No pude procesar tu consulta de nutrición ahora mismo, intenta de nuevo."
        }
        Domain::General => "Lo siento, no pude responder ahora mismo, intenta de nuevo.",
    }
}

/// What one pipeline run produced. `failed_domains` lists domains whose
/// handler was replaced by a fallback string.
#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    pub session_id: Uuid,
    pub response: String,
    pub delivered: bool,
    pub degraded_context: bool,
    pub failed_domains: Vec<&'static str>,
}

pub struct Coordinator {
    store: Arc<dyn ConversationStore>,
    sessions: Arc<SessionManager>,
    compressor: ContextCompressor,
    fitness: Arc<dyn DomainHandler>,
    nutrition: Arc<dyn DomainHandler>,
    general: Arc<dyn DomainHandler>,
    channel: Arc<dyn OutboundChannel>,
    handler_timeout: Duration,
    request_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        sessions: Arc<SessionManager>,
        compressor: ContextCompressor,
        fitness: Arc<dyn DomainHandler>,
        nutrition: Arc<dyn DomainHandler>,
        general: Arc<dyn DomainHandler>,
        channel: Arc<dyn OutboundChannel>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            compressor,
            fitness,
            nutrition,
            general,
            channel,
            handler_timeout,
            request_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn handler_for(&self, domain: Domain) -> &Arc<dyn DomainHandler> {
        match domain {
            Domain::FitnessAction | Domain::FitnessQuestion => &self.fitness,
            Domain::NutritionLog | Domain::NutritionQuery => &self.nutrition,
            Domain::General => &self.general,
        }
    }

    fn request_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.request_locks.lock().expect("lock map poisoned");
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run the full pipeline for one incoming message and deliver the reply
    /// to `user_id` over the outbound channel.
    pub async fn handle_message(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<CoordinatorOutcome, MotusError> {
        // Queue messages from the same user behind each other.
        let lock = self.request_lock(user_id);
        let _guard = lock.lock().await;

        let session = self.sessions.get_or_create_active(user_id).await?;
        let mut session_id = session.id;

        let window = self.compressor.load(session_id).await;
        if window.degraded {
            warn!(%user_id, %session_id, "responding with empty context window");
        }

        let decision = classify(text);
        info!(
            %user_id,
            %session_id,
            domains = ?decision.matches.iter().map(|m| m.domain.as_str()).collect::<Vec<_>>(),
            "message routed"
        );

        let (response, agent_names, failed_domains) = self
            .invoke_handlers(user_id, text, &window.rendered, &decision.matches)
            .await;

        session_id = self
            .persist_turn(session_id, user_id, text, &response, &agent_names)
            .await?;

        let prepared = prepare_outbound(&response);
        if prepared.was_truncated {
            warn!(%user_id, "outbound response truncated to channel limit");
        }
        if prepared.was_replaced {
            warn!(%user_id, "outbound response failed validation, sending apology");
        }

        let delivered = match self.channel.send_text(user_id, &prepared.body).await {
            Ok(()) => true,
            Err(e) => {
                // Reported but never rolled back; the turn is already stored.
                error!(%user_id, error = %e, "outbound delivery failed");
                false
            }
        };

        Ok(CoordinatorOutcome {
            session_id,
            response: prepared.body,
            delivered,
            degraded_context: window.degraded,
            failed_domains,
        })
    }

    /// Fan out to the matched handlers concurrently, wait for all of them,
    /// and aggregate replies in match order. A failing or timed-out handler
    /// contributes its domain fallback string instead.
    async fn invoke_handlers(
        &self,
        user_id: &str,
        text: &str,
        context: &str,
        matches: &[DomainMatch],
    ) -> (String, String, Vec<&'static str>) {
        let invocations = matches.iter().map(|m| {
            let handler = self.handler_for(m.domain).clone();
            let request = HandlerRequest {
                user_id: user_id.to_string(),
                message: text.to_string(),
                context: context.to_string(),
                domain: m.domain,
                requires_tool: m.requires_tool,
            };
            let timeout = self.handler_timeout;
            async move {
                let result =
                    tokio::time::timeout(timeout, handler.handle(&request)).await;
                (m.domain, handler.name(), result)
            }
        });

        let mut sections = Vec::new();
        let mut agent_names = Vec::new();
        let mut failed = Vec::new();

        for (domain, name, result) in join_all(invocations).await {
            agent_names.push(name);
            match result {
                Ok(Ok(reply)) => sections.push(reply),
                Ok(Err(e)) => {
                    error!(domain = domain.as_str(), error = %e, "handler failed");
                    failed.push(domain.as_str());
                    sections.push(domain_fallback(domain).to_string());
                }
                Err(_) => {
                    error!(domain = domain.as_str(), "handler timed out");
                    failed.push(domain.as_str());
                    sections.push(domain_fallback(domain).to_string());
                }
            }
        }

        let response = if failed.len() == matches.len() && !matches.is_empty() {
            ALL_FAILED_APOLOGY.to_string()
        } else {
            sections.join("\n\n")
        };

        (response, agent_names.join("+"), failed)
    }

    /// Append the user message then the assistant reply, in that order. If
    /// either append hits a session that went inactive mid-request, rotate
    /// once and write the whole turn to the fresh session.
    async fn persist_turn(
        &self,
        session_id: Uuid,
        user_id: &str,
        text: &str,
        response: &str,
        agent_names: &str,
    ) -> Result<Uuid, MotusError> {
        match self.append_turn(session_id, text, response, agent_names).await {
            Ok(()) => Ok(session_id),
            Err(StoreError::InvalidSession { .. }) => {
                warn!(%user_id, %session_id, "session went inactive mid-request, rotating and retrying");
                let fresh = self.sessions.rotate(user_id).await?;
                self.append_turn(fresh.id, text, response, agent_names)
                    .await?;
                Ok(fresh.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_turn(
        &self,
        session_id: Uuid,
        text: &str,
        response: &str,
        agent_names: &str,
    ) -> Result<(), StoreError> {
        self.store
            .append(NewMessage::new(session_id, MessageRole::User, text))
            .await?;
        self.store
            .append(
                NewMessage::new(session_id, MessageRole::Assistant, response)
                    .with_agent(agent_names),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentError;
    use crate::channel::ChannelError;
    use crate::config::MemorySettings;
    use crate::llm::LlmError;
    use crate::models::Message;
    use crate::store::InMemoryConversationStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeHandler {
        handler_name: &'static str,
        reply: Option<String>,
        requests: StdMutex<Vec<HandlerRequest>>,
    }

    impl FakeHandler {
        fn replying(handler_name: &'static str, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                handler_name,
                reply: Some(reply.to_string()),
                requests: StdMutex::new(Vec::new()),
            })
        }

        fn failing(handler_name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                handler_name,
                reply: None,
                requests: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DomainHandler for FakeHandler {
        fn name(&self) -> &'static str {
            self.handler_name
        }

        async fn handle(&self, request: &HandlerRequest) -> Result<String, AgentError> {
            self.requests
                .lock()
                .expect("fake lock poisoned")
                .push(request.clone());
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(AgentError::Llm(LlmError::RetryExhausted { attempts: 1 })),
            }
        }
    }

    struct FakeChannel {
        sent: StdMutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl FakeChannel {
        fn working() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl OutboundChannel for FakeChannel {
        async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::Api {
                    code: 500,
                    message: "down".to_string(),
                });
            }
            self.sent
                .lock()
                .expect("fake lock poisoned")
                .push((to.to_string(), body.to_string()));
            Ok(())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct Fixture {
        store: Arc<InMemoryConversationStore>,
        fitness: Arc<FakeHandler>,
        nutrition: Arc<FakeHandler>,
        general: Arc<FakeHandler>,
        channel: Arc<FakeChannel>,
        coordinator: Coordinator,
    }

    fn fixture_with(
        store: Arc<dyn ConversationStore>,
        plain: Arc<InMemoryConversationStore>,
        fitness: Arc<FakeHandler>,
        nutrition: Arc<FakeHandler>,
        general: Arc<FakeHandler>,
        channel: Arc<FakeChannel>,
    ) -> Fixture {
        let settings = MemorySettings::default();
        let sessions = Arc::new(SessionManager::new(store.clone(), &settings));
        let compressor = ContextCompressor::new(store.clone(), &settings);
        let coordinator = Coordinator::new(
            store,
            sessions,
            compressor,
            fitness.clone(),
            nutrition.clone(),
            general.clone(),
            channel.clone(),
            Duration::from_secs(5),
        );
        Fixture {
            store: plain,
            fitness,
            nutrition,
            general,
            channel,
            coordinator,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryConversationStore::new());
        fixture_with(
            store.clone(),
            store,
            FakeHandler::replying("fitness", "respuesta fitness"),
            FakeHandler::replying("nutrition", "respuesta nutrición"),
            FakeHandler::replying("general", "respuesta general"),
            FakeChannel::working(),
        )
    }

    async fn stored_messages(store: &InMemoryConversationStore, session_id: Uuid) -> Vec<Message> {
        store
            .recent(session_id, chrono::Duration::minutes(60), 50)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fitness_action_reaches_the_fitness_handler_with_the_tool_flag() {
        let f = fixture();
        let outcome = f
            .coordinator
            .handle_message("user-1", "empezar rutina de piernas")
            .await
            .unwrap();

        assert_eq!(outcome.response, "respuesta fitness");
        assert!(outcome.delivered);
        assert!(outcome.failed_domains.is_empty());

        let requests = f.fitness.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].domain, Domain::FitnessAction);
        assert!(requests[0].requires_tool);
        assert!(f.nutrition.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn informational_question_carries_no_tool_flag() {
        let f = fixture();
        f.coordinator
            .handle_message("user-1", "¿cómo hacer sentadillas?")
            .await
            .unwrap();

        let requests = f.fitness.requests.lock().unwrap();
        assert_eq!(requests[0].domain, Domain::FitnessQuestion);
        assert!(!requests[0].requires_tool);
    }

    #[tokio::test]
    async fn mixed_message_aggregates_nutrition_before_fitness() {
        let f = fixture();
        let outcome = f
            .coordinator
            .handle_message("user-1", "¿qué comidas tengo hoy y cómo progresar en sentadillas?")
            .await
            .unwrap();

        assert_eq!(outcome.response, "respuesta nutrición\n\nrespuesta fitness");
        assert_eq!(f.nutrition.requests.lock().unwrap().len(), 1);
        assert_eq!(f.fitness.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unmatched_message_routes_to_general() {
        let f = fixture();
        let outcome = f.coordinator.handle_message("user-1", "Hola").await.unwrap();
        assert_eq!(outcome.response, "respuesta general");
        assert_eq!(f.general.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn turn_is_persisted_user_before_assistant() {
        let f = fixture();
        let outcome = f.coordinator.handle_message("user-1", "Hola").await.unwrap();

        let messages = stored_messages(&f.store, outcome.session_id).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "Hola");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "respuesta general");
        assert_eq!(messages[1].agent_name.as_deref(), Some("general"));
    }

    #[tokio::test]
    async fn one_failing_handler_is_replaced_by_its_fallback_only() {
        let store = Arc::new(InMemoryConversationStore::new());
        let f = fixture_with(
            store.clone(),
            store,
            FakeHandler::failing("fitness"),
            FakeHandler::replying("nutrition", "respuesta nutrición"),
            FakeHandler::replying("general", "respuesta general"),
            FakeChannel::working(),
        );

        let outcome = f
            .coordinator
            .handle_message("user-1", "¿qué comidas tengo hoy y cómo progresar en sentadillas?")
            .await
            .unwrap();

        assert_eq!(outcome.failed_domains, vec!["fitness_question"]);
        assert!(outcome.response.starts_with("respuesta nutrición"));
        assert!(outcome.response.ends_with(domain_fallback(Domain::FitnessQuestion)));
    }

    #[tokio::test]
    async fn all_handlers_failing_yields_the_fixed_apology() {
        let store = Arc::new(InMemoryConversationStore::new());
        let f = fixture_with(
            store.clone(),
            store,
            FakeHandler::failing("fitness"),
            FakeHandler::failing("nutrition"),
            FakeHandler::failing("general"),
            FakeChannel::working(),
        );

        let outcome = f.coordinator.handle_message("user-1", "Hola").await.unwrap();
        assert_eq!(outcome.response, ALL_FAILED_APOLOGY);
        assert!(outcome.delivered);
    }

    #[tokio::test]
    async fn delivery_failure_is_reported_but_persistence_stands() {
        let store = Arc::new(InMemoryConversationStore::new());
        let f = fixture_with(
            store.clone(),
            store,
            FakeHandler::replying("fitness", "respuesta fitness"),
            FakeHandler::replying("nutrition", "respuesta nutrición"),
            FakeHandler::replying("general", "respuesta general"),
            FakeChannel::failing(),
        );

        let outcome = f.coordinator.handle_message("user-1", "Hola").await.unwrap();
        assert!(!outcome.delivered);

        let messages = stored_messages(&f.store, outcome.session_id).await;
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn oversize_response_is_truncated_before_delivery() {
        let store = Arc::new(InMemoryConversationStore::new());
        let long = "a".repeat(5000);
        let f = fixture_with(
            store.clone(),
            store,
            FakeHandler::replying("fitness", &long),
            FakeHandler::replying("nutrition", "x"),
            FakeHandler::replying("general", "x"),
            FakeChannel::working(),
        );

        let outcome = f
            .coordinator
            .handle_message("user-1", "empezar rutina")
            .await
            .unwrap();

        assert!(outcome.response.chars().count() <= crate::channel::MAX_BODY_CHARS);
        let sent = f.channel.sent.lock().unwrap();
        assert_eq!(sent[0].1, outcome.response);

        // Stored assistant message keeps the untruncated text.
        let messages = stored_messages(&f.store, outcome.session_id).await;
        assert_eq!(messages[1].content, long);
    }

    #[tokio::test]
    async fn blank_user_aborts_before_any_persistence() {
        let f = fixture();
        let err = f.coordinator.handle_message("  ", "Hola").await.unwrap_err();
        assert!(matches!(err, MotusError::UnresolvedUser));
        assert_eq!(f.store.message_count(), 0);
    }

    // Store whose `recent` always fails while everything else works.
    struct RecentFailsStore {
        inner: Arc<InMemoryConversationStore>,
    }

    #[async_trait]
    impl ConversationStore for RecentFailsStore {
        async fn active_session(
            &self,
            user_id: &str,
        ) -> Result<Option<crate::models::Session>, StoreError> {
            self.inner.active_session(user_id).await
        }
        async fn create_session(
            &self,
            user_id: &str,
        ) -> Result<crate::models::Session, StoreError> {
            self.inner.create_session(user_id).await
        }
        async fn deactivate_session(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.deactivate_session(id).await
        }
        async fn deactivate_idle_sessions(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.inner.deactivate_idle_sessions(cutoff).await
        }
        async fn touch_session(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.touch_session(id).await
        }
        async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
            self.inner.append(message).await
        }
        async fn recent(
            &self,
            _session_id: Uuid,
            _within: chrono::Duration,
            _max: usize,
        ) -> Result<Vec<Message>, StoreError> {
            Err(StoreError::Unavailable("recent unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn unreachable_history_degrades_to_empty_context_but_responds() {
        let inner = Arc::new(InMemoryConversationStore::new());
        let wrapped = Arc::new(RecentFailsStore { inner: inner.clone() });
        let f = fixture_with(
            wrapped,
            inner,
            FakeHandler::replying("fitness", "respuesta fitness"),
            FakeHandler::replying("nutrition", "respuesta nutrición"),
            FakeHandler::replying("general", "respuesta general"),
            FakeChannel::working(),
        );

        let outcome = f.coordinator.handle_message("user-1", "Hola").await.unwrap();
        assert!(outcome.degraded_context);
        assert_eq!(outcome.response, "respuesta general");

        let requests = f.general.requests.lock().unwrap();
        assert!(requests[0].context.is_empty());
    }

    // Store that reports InvalidSession on the first append, then delegates.
    struct FirstAppendFailsStore {
        inner: Arc<InMemoryConversationStore>,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl ConversationStore for FirstAppendFailsStore {
        async fn active_session(
            &self,
            user_id: &str,
        ) -> Result<Option<crate::models::Session>, StoreError> {
            self.inner.active_session(user_id).await
        }
        async fn create_session(
            &self,
            user_id: &str,
        ) -> Result<crate::models::Session, StoreError> {
            self.inner.create_session(user_id).await
        }
        async fn deactivate_session(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.deactivate_session(id).await
        }
        async fn deactivate_idle_sessions(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.inner.deactivate_idle_sessions(cutoff).await
        }
        async fn touch_session(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.touch_session(id).await
        }
        async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(StoreError::InvalidSession {
                    session_id: message.session_id,
                });
            }
            self.inner.append(message).await
        }
        async fn recent(
            &self,
            session_id: Uuid,
            within: chrono::Duration,
            max: usize,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.recent(session_id, within, max).await
        }
    }

    #[tokio::test]
    async fn invalid_session_on_append_rotates_and_retries_once() {
        let inner = Arc::new(InMemoryConversationStore::new());
        let wrapped = Arc::new(FirstAppendFailsStore {
            inner: inner.clone(),
            tripped: AtomicBool::new(false),
        });
        let f = fixture_with(
            wrapped,
            inner.clone(),
            FakeHandler::replying("fitness", "respuesta fitness"),
            FakeHandler::replying("nutrition", "respuesta nutrición"),
            FakeHandler::replying("general", "respuesta general"),
            FakeChannel::working(),
        );

        let first = inner.create_session("user-1").await.unwrap();
        let outcome = f.coordinator.handle_message("user-1", "Hola").await.unwrap();

        // The turn landed in a freshly rotated session.
        assert_ne!(outcome.session_id, first.id);
        let messages = stored_messages(&inner, outcome.session_id).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hola");
    }
}
