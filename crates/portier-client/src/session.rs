//! Chat session controller.
//!
//! A [`ChatSession`] owns the conversation currently on screen, the selected
//! model and the local database. Every change to the current conversation is
//! written through to the [`ConversationStore`](portier_store::ConversationStore)
//! before the call returns, so the view can be rebuilt from storage at any
//! point.
//!
//! Only one completion runs at a time. While a reply streams in, the target
//! assistant message belongs to the [`PendingReply`] and cannot be removed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portier_shared::constants::{FALLBACK_NAME, PLACEHOLDER_NAME, TITLE_MAX_TOKENS, TITLE_MODEL};
use portier_shared::models::{self, ModelSpec};
use portier_shared::protocol::{ChatTurn, CompletionRequest};
use portier_shared::tokens;
use portier_shared::types::{Conversation, Message, Role};
use portier_store::{exchange, Database};

use crate::backend::{CompletionBackend, ReplyChunk};
use crate::error::ClientError;
use crate::pending::PendingReply;

struct SessionState {
    conversation: Conversation,
    model: &'static ModelSpec,
    pending: PendingReply,
}

impl SessionState {
    fn reset(&mut self, conversation: Conversation) {
        self.conversation = conversation;
        self.pending = PendingReply::Absent;
    }
}

/// Clears the busy flag when the operation holding it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ClientError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(flag))
            .map_err(|_| ClientError::Busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ChatSession {
    // Lock order: `state` before `db`. Neither is held across an await.
    state: Mutex<SessionState>,
    db: Mutex<Database>,
    backend: Arc<dyn CompletionBackend>,
    busy: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl ChatSession {
    pub fn new(db: Database, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            state: Mutex::new(SessionState {
                conversation: Conversation::new("", Utc::now()),
                model: models::default_model(),
                pending: PendingReply::Absent,
            }),
            db: Mutex::new(db),
            backend,
            busy: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- View --

    /// Snapshot of the current conversation.
    pub fn conversation(&self) -> Conversation {
        self.state().conversation.clone()
    }

    /// Id of the current conversation, `None` until it has been stored.
    pub fn conversation_id(&self) -> Option<String> {
        let state = self.state();
        (!state.conversation.id.is_empty()).then(|| state.conversation.id.clone())
    }

    pub fn model(&self) -> &'static ModelSpec {
        self.state().model
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Stored conversations, newest first.
    pub fn history(&self) -> Result<Vec<Conversation>, ClientError> {
        let history = self.db().conversations().get_all()?;
        Ok(history.by_recent().into_iter().cloned().collect())
    }

    pub fn total_tokens(&self) -> Result<u64, ClientError> {
        Ok(self.db().ledger().current()?)
    }

    // -- Messages --

    /// Append a user message and wait for the assistant's reply.
    ///
    /// The first message of a conversation also requests a title. The title
    /// runs next to the reply and never delays it. Upstream failures are
    /// recorded as an assistant message rather than returned.
    pub async fn send(&self, content: &str) -> Result<(), ClientError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let cancel = self.fresh_token();

        let (request, model, conversation_id, first) = {
            let mut state = self.state();
            let id = state.conversation.next_message_id();
            state.conversation.messages.push(Message::user(id, content));
            let first = state.conversation.messages.len() == 1;
            if first && state.conversation.name.is_empty() {
                state.conversation.name = PLACEHOLDER_NAME.to_string();
            }
            let conversation_id = self.persist(&mut state)?;
            let model = state.model;
            (
                build_request(&state.conversation.messages, model),
                model,
                conversation_id,
                first,
            )
        };
        self.record_usage(estimate_request(&request));
        debug!(conversation = %conversation_id, model = model.id, "message sent");

        let title = async {
            if first {
                self.generate_title(&conversation_id, content).await;
            }
        };
        let (reply, ()) = tokio::join!(self.stream_reply(request, model, &cancel), title);
        self.finish(reply, model)
    }

    /// Drop the last message and ask again.
    ///
    /// The request uses the model that produced the dropped message when it
    /// is still in the catalog, the selected model otherwise.
    pub async fn regenerate(&self) -> Result<(), ClientError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let cancel = self.fresh_token();

        let (request, model) = {
            let mut state = self.state();
            let Some(last) = state.conversation.messages.pop() else {
                return Ok(());
            };
            let model = last
                .model
                .as_deref()
                .and_then(models::find)
                .unwrap_or(state.model);
            self.persist(&mut state)?;
            if state.conversation.messages.is_empty() {
                return Ok(());
            }
            (build_request(&state.conversation.messages, model), model)
        };
        self.record_usage(estimate_request(&request));
        debug!(model = model.id, "regenerating reply");

        let reply = self.stream_reply(request, model, &cancel).await;
        self.finish(reply, model)
    }

    /// Remove one message from the current conversation.
    pub fn remove_message(&self, id: u32) -> Result<bool, ClientError> {
        let mut state = self.state();
        if state.pending.blocks(id) {
            return Err(ClientError::MessageStreaming(id));
        }

        let before = state.conversation.messages.len();
        state.conversation.messages.retain(|m| m.id != id);
        let removed = state.conversation.messages.len() != before;
        if removed && !state.conversation.id.is_empty() {
            self.persist(&mut state)?;
        }
        Ok(removed)
    }

    /// Stop the in-flight completion, if any. Text already received is kept.
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    // -- Conversations --

    /// Start and store an empty conversation. Returns its id.
    pub fn new_conversation(&self) -> Result<String, ClientError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let mut state = self.state();
        state.reset(Conversation::new(PLACEHOLDER_NAME, Utc::now()));
        let id = self.persist(&mut state)?;
        info!(id = %id, "conversation created");
        Ok(id)
    }

    /// Make a stored conversation the current one.
    pub fn load(&self, id: &str) -> Result<(), ClientError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let mut state = self.state();
        let conversation = self
            .db()
            .conversations()
            .get(id)?
            .ok_or_else(|| ClientError::ConversationNotFound(id.to_string()))?;
        state.reset(conversation);
        Ok(())
    }

    pub fn rename(&self, id: &str, name: &str) -> Result<(), ClientError> {
        if self.apply_name(id, name.trim())? {
            Ok(())
        } else {
            Err(ClientError::ConversationNotFound(id.to_string()))
        }
    }

    /// Delete a stored conversation, clearing the view if it was current.
    pub fn delete(&self, id: &str) -> Result<bool, ClientError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let mut state = self.state();
        let removed = self.db().conversations().delete(id)?;
        if state.conversation.id == id {
            state.reset(Conversation::new("", Utc::now()));
        }
        Ok(removed)
    }

    /// Delete every stored conversation. The token total is kept.
    pub fn clear_all(&self) -> Result<(), ClientError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let mut state = self.state();
        self.db().conversations().clear()?;
        state.reset(Conversation::new("", Utc::now()));
        Ok(())
    }

    pub fn select_model(&self, id: &str) -> Result<&'static ModelSpec, ClientError> {
        let model = models::find(id).ok_or_else(|| ClientError::UnknownModel(id.to_string()))?;
        self.state().model = model;
        Ok(model)
    }

    // -- Exchange --

    /// Store an exported conversation under a fresh id.
    pub fn import(&self, raw: &str) -> Result<String, ClientError> {
        Ok(self.db().conversations().import(raw)?)
    }

    pub fn export_json(&self, id: &str) -> Result<String, ClientError> {
        Ok(exchange::export_json(&self.stored(id)?)?)
    }

    pub fn export_transcript(&self, id: &str) -> Result<String, ClientError> {
        Ok(exchange::export_transcript(&self.stored(id)?))
    }

    // -- Internals --

    fn stored(&self, id: &str) -> Result<Conversation, ClientError> {
        self.db()
            .conversations()
            .get(id)?
            .ok_or_else(|| ClientError::ConversationNotFound(id.to_string()))
    }

    /// Write the current conversation through, minting its id on first save.
    fn persist(&self, state: &mut SessionState) -> Result<String, ClientError> {
        state.conversation.last_message = Utc::now();
        let id = self
            .db()
            .conversations()
            .store(&state.conversation.id, state.conversation.clone())?;
        state.conversation.id = id.clone();
        Ok(id)
    }

    fn record_usage(&self, usage: u64) {
        if let Err(e) = self.db().ledger().add(usage) {
            warn!(error = %e, usage, "failed to record token usage");
        }
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    async fn stream_reply(
        &self,
        request: CompletionRequest,
        model: &'static ModelSpec,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            result = self.backend.stream(request) => result?,
        };

        {
            let mut state = self.state();
            let id = state.conversation.next_message_id();
            state.conversation.messages.push(Message::assistant(id, "", model.id));
            state.pending.begin(id);
        }

        let result = loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break Err(ClientError::Cancelled),
                item = stream.next() => item,
            };
            match item {
                None => break Ok(()),
                Some(Ok(ReplyChunk::Text(text))) => {
                    if let Err(e) = self.append_chunk(&text) {
                        break Err(e);
                    }
                }
                Some(Ok(ReplyChunk::Usage(usage))) => self.record_usage(usage),
                Some(Err(e)) => break Err(e),
            }
        };

        self.settle(result.is_err())?;
        result
    }

    fn append_chunk(&self, text: &str) -> Result<(), ClientError> {
        let mut guard = self.state();
        let state = &mut *guard;
        if let Some((id, content)) = state.pending.push(text) {
            if let Some(message) = state.conversation.message_mut(id) {
                message.content = content.to_owned();
            }
        }
        self.persist(state)?;
        Ok(())
    }

    /// Hand the streamed message back. An interrupted reply that produced no
    /// text is removed.
    fn settle(&self, interrupted: bool) -> Result<(), ClientError> {
        let mut guard = self.state();
        let state = &mut *guard;
        if let Some((id, content)) = state.pending.settle() {
            if interrupted && content.is_empty() {
                state.conversation.messages.retain(|m| m.id != id);
            }
        }
        self.persist(state)?;
        Ok(())
    }

    fn finish(&self, reply: Result<(), ClientError>, model: &'static ModelSpec) -> Result<(), ClientError> {
        match reply {
            Ok(()) => Ok(()),
            Err(ClientError::Cancelled) => {
                info!("completion cancelled");
                Ok(())
            }
            Err(e @ ClientError::Store(_)) => Err(e),
            Err(e) => {
                warn!(error = %e, model = model.id, "completion failed");
                let mut state = self.state();
                let id = state.conversation.next_message_id();
                state
                    .conversation
                    .messages
                    .push(Message::assistant(id, e.to_string(), model.id));
                self.persist(&mut state)?;
                Ok(())
            }
        }
    }

    async fn generate_title(&self, conversation_id: &str, text: &str) {
        let request = CompletionRequest {
            model: TITLE_MODEL.to_string(),
            max_completion_tokens: Some(TITLE_MAX_TOKENS),
            messages: vec![ChatTurn {
                role: Role::User,
                content: title_prompt(text),
            }],
        };

        let name = match self.backend.complete(request).await {
            Ok(reply) => {
                self.record_usage(reply.token_usage);
                let title = clean_title(&reply.reply);
                if title.is_empty() {
                    FALLBACK_NAME.to_string()
                } else {
                    title
                }
            }
            Err(e) => {
                warn!(error = %e, "title generation failed");
                FALLBACK_NAME.to_string()
            }
        };

        match self.apply_name(conversation_id, &name) {
            Ok(true) => debug!(conversation = %conversation_id, name = %name, "conversation titled"),
            Ok(false) => debug!(conversation = %conversation_id, "titled conversation no longer exists"),
            Err(e) => warn!(error = %e, "failed to store conversation title"),
        }
    }

    fn apply_name(&self, id: &str, name: &str) -> Result<bool, ClientError> {
        let mut state = self.state();
        if state.conversation.id == id {
            state.conversation.name = name.to_string();
        }
        Ok(self.db().conversations().update_name(id, name)?)
    }
}

fn build_request(messages: &[Message], model: &ModelSpec) -> CompletionRequest {
    CompletionRequest {
        model: model.id.to_string(),
        max_completion_tokens: Some(model.max_limit),
        messages: messages.iter().map(ChatTurn::from).collect(),
    }
}

fn estimate_request(request: &CompletionRequest) -> u64 {
    request
        .messages
        .iter()
        .map(|turn| tokens::estimate(&turn.content))
        .sum()
}

fn title_prompt(text: &str) -> String {
    format!(
        "Summarize the following text in exactly three words, maintaining the language of the statement (usually french):\n<TEXT>\n{text}\n</TEXT>"
    )
}

fn clean_title(reply: &str) -> String {
    reply
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '.')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream;
    use tokio::sync::Notify;

    use crate::backend::ReplyStream;

    #[derive(Default)]
    struct FakeBackend {
        requests: Mutex<Vec<CompletionRequest>>,
        reply: Vec<&'static str>,
        usage: u64,
        fail_with: Option<&'static str>,
        title: Option<&'static str>,
        /// Held before the reply stream is returned.
        hold_reply: Option<Arc<Notify>>,
        /// Held after the reply text, before the usage chunk.
        hold_usage: Option<Arc<Notify>>,
        hold_title: Option<Arc<Notify>>,
    }

    impl FakeBackend {
        fn is_title(request: &CompletionRequest) -> bool {
            request
                .messages
                .first()
                .is_some_and(|m| m.content.starts_with("Summarize the following text"))
        }

        fn title_requests(&self) -> usize {
            self.requests.lock().unwrap().iter().filter(|r| Self::is_title(r)).count()
        }

        fn chat_requests(&self) -> Vec<CompletionRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| !Self::is_title(r))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        async fn stream(&self, request: CompletionRequest) -> Result<ReplyStream, ClientError> {
            let is_title = Self::is_title(&request);
            self.requests.lock().unwrap().push(request);

            if is_title {
                if let Some(gate) = &self.hold_title {
                    gate.notified().await;
                }
                return match self.title {
                    Some(title) => Ok(stream::iter(vec![
                        Ok(ReplyChunk::Text(title.to_string())),
                        Ok(ReplyChunk::Usage(3)),
                    ])
                    .boxed()),
                    None => Err(ClientError::Api {
                        status: 502,
                        message: "title unavailable".into(),
                    }),
                };
            }

            if let Some(gate) = &self.hold_reply {
                gate.notified().await;
            }
            if let Some(message) = self.fail_with {
                return Err(ClientError::Api {
                    status: 502,
                    message: message.into(),
                });
            }

            let text: Vec<Result<ReplyChunk, ClientError>> = self
                .reply
                .iter()
                .map(|t| Ok(ReplyChunk::Text(t.to_string())))
                .collect();
            let usage = self.usage;
            let tail: ReplyStream = match self.hold_usage.clone() {
                Some(gate) => stream::once(async move {
                    gate.notified().await;
                    Ok(ReplyChunk::Usage(usage))
                })
                .boxed(),
                None => stream::iter(vec![Ok(ReplyChunk::Usage(usage))]).boxed(),
            };
            Ok(stream::iter(text).chain(tail).boxed())
        }
    }

    fn session(backend: FakeBackend) -> (Arc<ChatSession>, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let session = ChatSession::new(Database::open_in_memory().unwrap(), backend.clone());
        (Arc::new(session), backend)
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn first_message_is_titled_once_without_blocking_the_reply() {
        let title_gate = Arc::new(Notify::new());
        let (session, backend) = session(FakeBackend {
            reply: vec!["Bon", "jour"],
            usage: 10,
            title: Some("Salutations Très Simples"),
            hold_title: Some(title_gate.clone()),
            ..Default::default()
        });

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.send("Salut").await })
        };

        wait_until(|| {
            let messages = session.conversation().messages;
            messages.len() == 2 && messages[1].content == "Bonjour"
        })
        .await;
        let current = session.conversation();
        assert_eq!(current.name, PLACEHOLDER_NAME);
        assert!(session.conversation_id().is_some());
        assert_eq!(session.history().unwrap()[0].messages[1].content, "Bonjour");

        title_gate.notify_one();
        task.await.unwrap().unwrap();

        assert_eq!(session.conversation().name, "Salutations Très Simples");
        assert_eq!(session.history().unwrap()[0].name, "Salutations Très Simples");
        assert_eq!(backend.title_requests(), 1);

        session.send("Encore").await.unwrap();
        assert_eq!(backend.title_requests(), 1);
        assert_eq!(session.conversation().messages.len(), 4);
    }

    #[tokio::test]
    async fn title_request_uses_the_title_model() {
        let (session, backend) = session(FakeBackend {
            reply: vec!["ok"],
            title: Some("Trois Mots Ici"),
            ..Default::default()
        });
        session.send("Bonjour à tous").await.unwrap();

        let requests = backend.requests.lock().unwrap().clone();
        let title = requests.iter().find(|r| FakeBackend::is_title(r)).unwrap();
        assert_eq!(title.model, TITLE_MODEL);
        assert_eq!(title.max_completion_tokens, Some(TITLE_MAX_TOKENS));
        assert!(title.messages[0].content.contains("<TEXT>\nBonjour à tous\n</TEXT>"));
    }

    #[tokio::test]
    async fn usage_and_estimates_reach_the_ledger() {
        let (session, _) = session(FakeBackend {
            reply: vec!["Bonjour"],
            usage: 10,
            title: Some("Un Petit Titre"),
            ..Default::default()
        });
        session.send("Salut").await.unwrap();

        // Outbound estimate, reply usage, title usage.
        assert_eq!(session.total_tokens().unwrap(), tokens::estimate("Salut") + 10 + 3);
    }

    #[tokio::test]
    async fn upstream_failure_becomes_an_assistant_message() {
        let (session, _) = session(FakeBackend {
            fail_with: Some("Upstream unavailable"),
            ..Default::default()
        });
        session.send("Salut").await.unwrap();

        let current = session.conversation();
        assert_eq!(current.messages.len(), 2);
        let reply = &current.messages[1];
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "Upstream unavailable");
        assert_eq!(reply.model.as_deref(), Some(models::DEFAULT_MODEL));
        assert_eq!(current.name, FALLBACK_NAME);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn concurrent_send_is_rejected() {
        let gate = Arc::new(Notify::new());
        let (session, _) = session(FakeBackend {
            reply: vec!["ok"],
            title: Some("Titre"),
            hold_reply: Some(gate.clone()),
            ..Default::default()
        });

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.send("one").await })
        };
        wait_until(|| session.is_busy()).await;

        assert!(matches!(session.send("two").await, Err(ClientError::Busy)));
        assert!(matches!(session.new_conversation(), Err(ClientError::Busy)));

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert!(!session.is_busy());
        assert_eq!(session.conversation().messages.len(), 2);
    }

    #[tokio::test]
    async fn streaming_message_cannot_be_removed() {
        let gate = Arc::new(Notify::new());
        let (session, _) = session(FakeBackend {
            reply: vec!["partial"],
            title: Some("Titre"),
            hold_usage: Some(gate.clone()),
            ..Default::default()
        });

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.send("question").await })
        };
        wait_until(|| {
            let messages = session.conversation().messages;
            messages.len() == 2 && messages[1].content == "partial"
        })
        .await;

        assert!(matches!(session.remove_message(1), Err(ClientError::MessageStreaming(1))));
        assert!(session.remove_message(0).unwrap());

        gate.notify_one();
        task.await.unwrap().unwrap();

        assert!(session.remove_message(1).unwrap());
        assert!(session.conversation().messages.is_empty());
        assert!(!session.remove_message(1).unwrap());
    }

    #[tokio::test]
    async fn cancel_stops_waiting_for_the_reply() {
        let gate = Arc::new(Notify::new());
        let (session, _) = session(FakeBackend {
            reply: vec!["never"],
            title: Some("Titre"),
            hold_reply: Some(gate),
            ..Default::default()
        });

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.send("question").await })
        };
        wait_until(|| session.is_busy()).await;

        session.cancel();
        task.await.unwrap().unwrap();

        let current = session.conversation();
        assert_eq!(current.messages.len(), 1);
        assert_eq!(current.messages[0].role, Role::User);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn regenerate_uses_the_model_of_the_dropped_reply() {
        let (session, backend) = session(FakeBackend {
            reply: vec!["first answer"],
            title: Some("Titre"),
            ..Default::default()
        });
        session.select_model("o1-mini-2024-09-12").unwrap();
        session.send("question").await.unwrap();
        session.select_model("gpt-4o-mini").unwrap();

        session.regenerate().await.unwrap();

        let chats = backend.chat_requests();
        assert_eq!(chats.len(), 2);
        let retry = &chats[1];
        assert_eq!(retry.model, "o1-mini-2024-09-12");
        assert_eq!(retry.max_completion_tokens, Some(65_536));
        assert_eq!(retry.messages.len(), 1);

        let current = session.conversation();
        assert_eq!(current.messages.len(), 2);
        assert_eq!(current.messages[1].model.as_deref(), Some("o1-mini-2024-09-12"));
    }

    #[tokio::test]
    async fn regenerate_on_an_empty_conversation_does_nothing() {
        let (session, backend) = session(FakeBackend::default());
        session.new_conversation().unwrap();
        session.regenerate().await.unwrap();
        assert!(backend.chat_requests().is_empty());
        assert!(session.conversation().messages.is_empty());
    }

    #[test]
    fn unknown_model_is_rejected() {
        let (session, _) = session(FakeBackend::default());
        assert!(matches!(session.select_model("gpt-2"), Err(ClientError::UnknownModel(_))));
        assert_eq!(session.model().id, models::DEFAULT_MODEL);
    }

    #[test]
    fn conversation_management() {
        let (session, _) = session(FakeBackend::default());

        let first = session.new_conversation().unwrap();
        assert_eq!(session.conversation().name, PLACEHOLDER_NAME);
        session.rename(&first, "  Plans  ").unwrap();
        assert_eq!(session.conversation().name, "Plans");

        std::thread::sleep(Duration::from_millis(5));
        let second = session.new_conversation().unwrap();
        let listed: Vec<String> = session.history().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(listed, vec![second.clone(), first.clone()]);

        session.load(&first).unwrap();
        assert_eq!(session.conversation_id().as_deref(), Some(first.as_str()));
        assert!(matches!(session.load("missing"), Err(ClientError::ConversationNotFound(_))));
        assert!(matches!(
            session.rename("missing", "x"),
            Err(ClientError::ConversationNotFound(_))
        ));

        // Deleting another conversation keeps the view.
        assert!(session.delete(&second).unwrap());
        assert_eq!(session.conversation_id().as_deref(), Some(first.as_str()));

        assert!(session.delete(&first).unwrap());
        assert_eq!(session.conversation_id(), None);
        assert!(!session.delete(&first).unwrap());
    }

    #[tokio::test]
    async fn clear_all_keeps_the_token_total() {
        let (session, _) = session(FakeBackend {
            reply: vec!["ok"],
            usage: 40,
            title: Some("Titre"),
            ..Default::default()
        });
        session.send("question").await.unwrap();
        let total = session.total_tokens().unwrap();
        assert!(total >= 40);

        session.clear_all().unwrap();
        assert!(session.history().unwrap().is_empty());
        assert_eq!(session.conversation_id(), None);
        assert_eq!(session.total_tokens().unwrap(), total);
    }

    #[tokio::test]
    async fn export_and_import() {
        let (session, _) = session(FakeBackend {
            reply: vec!["<b>bold</b>"],
            title: Some("Titre"),
            ..Default::default()
        });
        session.send("question").await.unwrap();
        let id = session.conversation_id().unwrap();

        let transcript = session.export_transcript(&id).unwrap();
        assert!(transcript.starts_with("# Titre\n\n"));
        assert!(transcript.contains("user: question"));
        assert!(transcript.contains(&format!("assistant ({}): <b>bold</b>", models::DEFAULT_MODEL)));

        let json = session.export_json(&id).unwrap();
        let imported = session.import(&json).unwrap();
        assert_ne!(imported, id);
        assert_eq!(session.history().unwrap().len(), 2);

        assert!(session.import("not json").is_err());
        assert_eq!(session.history().unwrap().len(), 2);
        assert!(matches!(
            session.export_json("missing"),
            Err(ClientError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn conversation_survives_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portier.db");

        let id = {
            let backend = Arc::new(FakeBackend {
                reply: vec!["Grüezi"],
                usage: 7,
                title: Some("Salut en Suisse"),
                ..Default::default()
            });
            let session = ChatSession::new(Database::open_at(&path).unwrap(), backend);
            session.send("Salut").await.unwrap();
            session.conversation_id().unwrap()
        };

        let session = ChatSession::new(Database::open_at(&path).unwrap(), Arc::new(FakeBackend::default()));
        session.load(&id).unwrap();
        let current = session.conversation();
        assert_eq!(current.name, "Salut en Suisse");
        assert_eq!(current.messages[1].content, "Grüezi");
        assert!(session.total_tokens().unwrap() >= 7 + 3);
    }

    #[test]
    fn title_cleanup() {
        assert_eq!(clean_title("  \"Voyage en Suisse.\" "), "Voyage en Suisse");
        assert_eq!(clean_title("   "), "");
    }
}
