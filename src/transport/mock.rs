//! Scripted command channel for unit tests.
//!
//! Records every issued command together with the notification names that
//! were registered at that moment, answers from a responder closure and
//! lets tests inject URC lines into registered handlers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::protocol::{Captures, Command, Pattern};

use super::channel::{CommandChannel, NotificationHandler};

// ============================================================================
// Types
// ============================================================================

/// Scripted reply to one command.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// `OK`.
    Ok,
    /// Raw response text matched against the command's expectation.
    Text(String),
    /// Error final result.
    Error(String),
    /// No response in time.
    Timeout,
}

/// Responder closure type.
type Responder = Box<dyn FnMut(&str) -> Reply + Send>;

/// One recorded command.
#[derive(Debug, Clone)]
pub(crate) struct Issued {
    pub line: String,
    pub payload: Option<Vec<u8>>,
    /// Registered notification names (sorted) when the command was issued.
    pub registered: Vec<String>,
}

// ============================================================================
// ScriptedChannel
// ============================================================================

/// In-memory [`CommandChannel`].
pub(crate) struct ScriptedChannel {
    issued: Mutex<Vec<Issued>>,
    responder: Mutex<Responder>,
    notifications: Mutex<FxHashMap<String, (Pattern, NotificationHandler)>>,
}

impl ScriptedChannel {
    /// Creates a channel that answers `OK` to everything.
    pub fn new() -> Arc<Self> {
        Self::with_responder(|_| Reply::Ok)
    }

    /// Creates a channel answering through `responder`.
    pub fn with_responder(responder: impl FnMut(&str) -> Reply + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            issued: Mutex::new(Vec::new()),
            responder: Mutex::new(Box::new(responder)),
            notifications: Mutex::new(FxHashMap::default()),
        })
    }

    /// Replaces the responder.
    pub fn set_responder(&self, responder: impl FnMut(&str) -> Reply + Send + 'static) {
        *self.responder.lock() = Box::new(responder);
    }

    /// Returns all recorded commands.
    pub fn issued(&self) -> Vec<Issued> {
        self.issued.lock().clone()
    }

    /// Returns recorded command lines.
    pub fn lines(&self) -> Vec<String> {
        self.issued.lock().iter().map(|i| i.line.clone()).collect()
    }

    /// Forgets recorded commands.
    pub fn clear(&self) {
        self.issued.lock().clear();
    }

    /// Returns registered notification names, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.notifications.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatches `line` to the matching handler.
    ///
    /// Returns `false` if no registration matches.
    pub fn inject(&self, line: &str) -> bool {
        let matched = {
            let notifications = self.notifications.lock();
            notifications.values().find_map(|(pattern, handler)| {
                pattern
                    .match_prefix(line.as_bytes())
                    .map(|(_, caps)| (caps, Arc::clone(handler)))
            })
        };

        match matched {
            Some((caps, handler)) => {
                handler(&caps);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn issue(&self, command: Command) -> Result<Captures> {
        let registered = self.registered();
        self.issued.lock().push(Issued {
            line: command.line().to_string(),
            payload: command.payload().map(<[u8]>::to_vec),
            registered,
        });

        let reply = {
            let mut responder = self.responder.lock();
            (&mut **responder)(command.line())
        };

        let text = match reply {
            Reply::Ok => "OK\r\n".to_string(),
            Reply::Text(text) => text,
            Reply::Error(message) => return Err(Error::channel(command.line(), message)),
            Reply::Timeout => return Err(Error::command_timeout(command.line(), 0)),
        };

        command
            .expect()
            .match_prefix(text.as_bytes())
            .map(|(_, caps)| caps)
            .ok_or_else(|| {
                Error::protocol(format!(
                    "scripted reply {text:?} does not complete `{}`",
                    command.line()
                ))
            })
    }

    fn register_notification(&self, name: &str, pattern: Pattern, handler: NotificationHandler) {
        self.notifications
            .lock()
            .insert(name.to_string(), (pattern, handler));
    }

    fn deregister_notification(&self, name: &str) -> bool {
        self.notifications.lock().remove(name).is_some()
    }
}
