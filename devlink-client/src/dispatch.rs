//! Routing of inbound messages to handlers by command code.

use devlink_protocol::{CommandCode, Message};
use std::collections::HashMap;

/// Callback invoked with each message of one command code.
pub type Handler = Box<dyn FnMut(Message) + Send>;

/// Fixed table of handlers keyed by exact command code.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<CommandCode, Handler>,
    unknown: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for `command`.
    pub fn on<F>(mut self, command: CommandCode, handler: F) -> Self
    where
        F: FnMut(Message) + Send + 'static,
    {
        self.register(command, handler);
        self
    }

    pub fn register<F>(&mut self, command: CommandCode, handler: F)
    where
        F: FnMut(Message) + Send + 'static,
    {
        self.handlers.insert(command, Box::new(handler));
    }

    pub fn handles(&self, command: CommandCode) -> bool {
        self.handlers.contains_key(&command)
    }

    /// Routes `msg` to its handler. Returns false if no handler matched.
    pub fn dispatch(&mut self, msg: Message) -> bool {
        match self.handlers.get_mut(&msg.command) {
            Some(handler) => {
                handler(msg);
                true
            }
            None => {
                self.unknown += 1;
                tracing::warn!(id = msg.id, command = %msg.command, "no handler for message, dropping");
                false
            }
        }
    }

    /// Messages dropped for lack of a handler.
    pub fn unknown_count(&self) -> u64 {
        self.unknown
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<_> = self.handlers.keys().copied().collect();
        commands.sort();
        f.debug_struct("Dispatcher")
            .field("commands", &commands)
            .field("unknown", &self.unknown)
            .finish()
    }
}
