use crate::completion::{Completer, CompletionError, Reply};
use crate::conversation::store::{ConversationStore, StoreError};
use crate::conversation::{Conversation, Message, Role};
use log::info;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("a reply is still pending")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
    #[error("no pending request for conversation {0}")]
    UnexpectedReply(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoActive,
    Idle,
    AwaitingReply,
}

/// History snapshot handed to a background completion task.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

/// Controller for the active conversation. At most one request is in flight.
pub struct Session {
    store: ConversationStore,
    system_prompt: String,
    active: Option<Conversation>,
    awaiting_reply: bool,
}

impl Session {
    pub fn new(store: ConversationStore, system_prompt: impl Into<String>) -> Self {
        Self {
            store,
            system_prompt: system_prompt.into(),
            active: None,
            awaiting_reply: false,
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.active, self.awaiting_reply) {
            (None, _) => SessionState::NoActive,
            (Some(_), false) => SessionState::Idle,
            (Some(_), true) => SessionState::AwaitingReply,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.awaiting_reply
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn list_conversations(&self) -> Vec<String> {
        self.store.list_conversations()
    }

    fn ensure_not_busy(&self) -> Result<(), SessionError> {
        if self.awaiting_reply {
            Err(SessionError::Busy)
        } else {
            Ok(())
        }
    }

    /// Starts a fresh conversation seeded with the system prompt and writes it
    /// out right away so it shows up in the listing.
    pub fn start_new(&mut self) -> Result<&Conversation, SessionError> {
        self.ensure_not_busy()?;
        let conversation = Conversation::seeded(&self.system_prompt);
        self.store.save(&conversation.id, &conversation.messages)?;
        info!("started conversation {}", conversation.id);
        Ok(self.active.insert(conversation))
    }

    pub fn select(&mut self, id: &str) -> Result<&Conversation, SessionError> {
        self.ensure_not_busy()?;
        let mut messages = self.store.load(id);
        if messages.first().map(|message| message.role) != Some(Role::System) {
            messages.insert(0, Message::system(self.system_prompt.as_str()));
        }
        Ok(self.active.insert(Conversation {
            id: id.to_string(),
            messages,
        }))
    }

    pub fn begin_send(&mut self, text: &str) -> Result<PendingRequest, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.ensure_not_busy()?;
        let conversation = self
            .active
            .as_mut()
            .ok_or(SessionError::NoActiveConversation)?;

        conversation.messages.push(Message::user(text));
        self.awaiting_reply = true;
        Ok(PendingRequest {
            conversation_id: conversation.id.clone(),
            messages: conversation.messages.clone(),
        })
    }

    /// Applies the outcome of the pending request: appends exactly one
    /// assistant entry, returns to idle and persists.
    pub fn complete_send(
        &mut self,
        conversation_id: &str,
        outcome: Result<String, CompletionError>,
    ) -> Result<Reply, SessionError> {
        let conversation = match self.active.as_mut() {
            Some(conversation) if self.awaiting_reply && conversation.id == conversation_id => {
                conversation
            }
            _ => return Err(SessionError::UnexpectedReply(conversation_id.to_string())),
        };

        let reply = Reply::from(outcome);
        conversation.messages.push(match &reply {
            Reply::Assistant(text) => Message::assistant(text.as_str()),
            Reply::Failed(text) => Message::failure(text.as_str()),
        });
        self.awaiting_reply = false;

        self.store.save(&conversation.id, &conversation.messages)?;
        Ok(reply)
    }

    /// Runs one full exchange on the calling task.
    pub async fn send<C>(&mut self, text: &str, completer: &C) -> Result<Reply, SessionError>
    where
        C: Completer + ?Sized,
    {
        let request = self.begin_send(text)?;
        let outcome = completer.complete(&request.messages).await;
        self.complete_send(&request.conversation_id, outcome)
    }
}
