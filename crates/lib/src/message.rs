//! Inbound messages: what an adapter hands to the robot for dispatch.
//!
//! A message is shared as `Arc<Message>` between receive middleware, listener
//! middleware and listener callbacks for the whole receive cycle. Its `done`
//! flag is the only mutable state and may be set by any stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A chat user as known to the adapter and the brain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Adapter-specific fields (e.g. email, display color).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl User {
    /// New user whose name defaults to the id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            room: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}

/// Payload of a message. `CatchAll` owns a handle to the message nobody handled.
#[derive(Debug)]
pub enum MessageKind {
    Text { text: String },
    Enter,
    Leave,
    Topic { text: String },
    CatchAll { inner: Arc<Message> },
}

#[derive(Debug)]
pub struct Message {
    pub id: Option<String>,
    pub user: User,
    pub room: Option<String>,
    pub kind: MessageKind,
    done: AtomicBool,
}

impl Message {
    fn with_kind(user: User, kind: MessageKind, id: Option<String>) -> Self {
        Self {
            id,
            room: user.room.clone(),
            user,
            kind,
            done: AtomicBool::new(false),
        }
    }

    pub fn text(user: User, text: impl Into<String>, id: Option<String>) -> Self {
        Self::with_kind(user, MessageKind::Text { text: text.into() }, id)
    }

    pub fn enter(user: User) -> Self {
        Self::with_kind(user, MessageKind::Enter, None)
    }

    pub fn leave(user: User) -> Self {
        Self::with_kind(user, MessageKind::Leave, None)
    }

    pub fn topic(user: User, text: impl Into<String>) -> Self {
        Self::with_kind(user, MessageKind::Topic { text: text.into() }, None)
    }

    /// Wrap a message that no listener executed for. User, room and id are copied from it.
    pub fn catch_all(original: Arc<Message>) -> Self {
        Self {
            id: original.id.clone(),
            user: original.user.clone(),
            room: original.room.clone(),
            kind: MessageKind::CatchAll { inner: original },
            done: AtomicBool::new(false),
        }
    }

    /// Stop any further listener attempts for this message.
    pub fn finish(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Text payload for text and topic messages.
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text } | MessageKind::Topic { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, MessageKind::Text { .. })
    }

    pub fn is_enter(&self) -> bool {
        matches!(self.kind, MessageKind::Enter)
    }

    pub fn is_leave(&self) -> bool {
        matches!(self.kind, MessageKind::Leave)
    }

    pub fn is_topic(&self) -> bool {
        matches!(self.kind, MessageKind::Topic { .. })
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self.kind, MessageKind::CatchAll { .. })
    }

    /// The wrapped message of a catch-all.
    pub fn original(&self) -> Option<&Arc<Message>> {
        match &self.kind {
            MessageKind::CatchAll { inner } => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MessageKind::Text { text } | MessageKind::Topic { text } => f.write_str(text),
            MessageKind::CatchAll { inner } => inner.fmt(f),
            MessageKind::Enter | MessageKind::Leave => Ok(()),
        }
    }
}

/// Addressing for outbound text: where to send and who it concerns.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub room: Option<String>,
    pub user: Option<User>,
    pub message: Option<Arc<Message>>,
}

impl Envelope {
    pub fn for_message(message: &Arc<Message>) -> Self {
        Self {
            room: message.room.clone(),
            user: Some(message.user.clone()),
            message: Some(Arc::clone(message)),
        }
    }

    pub fn for_room(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_name_defaults_to_id() {
        let u = User::new("42");
        assert_eq!(u.name, "42");
        assert_eq!(User::new("42").with_name("ada").name, "ada");
    }

    #[test]
    fn message_room_comes_from_user() {
        let msg = Message::text(User::new("1").with_room("general"), "hi", None);
        assert_eq!(msg.room.as_deref(), Some("general"));
        assert_eq!(msg.text_content(), Some("hi"));
    }

    #[test]
    fn catch_all_wraps_original() {
        let original = Arc::new(Message::text(User::new("1").with_room("r"), "hello", Some("m1".into())));
        let wrapped = Message::catch_all(Arc::clone(&original));
        assert!(wrapped.is_catch_all());
        assert!(!wrapped.is_text());
        assert_eq!(wrapped.user.id, "1");
        assert_eq!(wrapped.room.as_deref(), Some("r"));
        assert!(Arc::ptr_eq(wrapped.original().unwrap(), &original));
        assert_eq!(wrapped.to_string(), "hello");
    }

    #[test]
    fn finish_sets_done() {
        let msg = Message::enter(User::new("1"));
        assert!(!msg.is_done());
        msg.finish();
        assert!(msg.is_done());
    }

    #[test]
    fn user_extra_fields_flatten() {
        let json = r#"{"id":"7","name":"bob","email":"bob@example.com"}"#;
        let u: User = serde_json::from_str(json).unwrap();
        assert_eq!(u.room, None);
        assert_eq!(u.extra.get("email").and_then(|v| v.as_str()), Some("bob@example.com"));
    }
}
