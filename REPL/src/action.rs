use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crossterm::event::KeyEvent;
use tracing::warn;

use crate::backend::Backend;
use crate::editor::InputBuffer;
use crate::error::ActionError;
use crate::images::ImageBuffer;
use crate::keys::KeyChord;
use crate::output::Emit;
use crate::registry::ActionRegistry;

pub type HandlerFn = dyn Fn(&mut ActionContext<'_>) -> anyhow::Result<()>;

/// What runs when an action fires.
#[derive(Clone)]
pub enum ActionHandler {
    /// Invoked synchronously by the registry
    Call(Rc<HandlerFn>),
    /// Resolved by the session loop (exit/quit); never invoked by dispatch
    MainLoop,
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionHandler::Call(_) => write!(f, "Call(..)"),
            ActionHandler::MainLoop => write!(f, "MainLoop"),
        }
    }
}

/// How an action was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Command,
    Shortcut,
    Programmatic,
}

/// Descriptor of one bindable operation.
#[derive(Debug)]
pub struct Action {
    pub name: String,
    pub description: String,
    pub category: String,
    /// Unset until `handler` or `main_loop` is called; `register` rejects unset
    pub handler: Option<ActionHandler>,
    pub command: Option<String>,
    pub command_usage: Option<String>,
    pub keys: Vec<KeyChord>,
    pub keys_description: Option<String>,
    pub requires_backend: bool,
    enabled: Cell<bool>,
    hidden: Cell<bool>,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            handler: None,
            command: None,
            command_usage: None,
            keys: Vec::new(),
            keys_description: None,
            requires_backend: false,
            enabled: Cell::new(true),
            hidden: Cell::new(false),
        }
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>) -> anyhow::Result<()> + 'static,
    {
        self.handler = Some(ActionHandler::Call(Rc::new(handler)));
        self
    }

    /// Mark the action as resolved by the session loop instead of a handler.
    pub fn main_loop(mut self) -> Self {
        self.handler = Some(ActionHandler::MainLoop);
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.command_usage = Some(usage.into());
        self
    }

    pub fn key(mut self, chord: &str) -> Self {
        self.keys.push(KeyChord::new(chord));
        self
    }

    pub fn keys_description(mut self, description: impl Into<String>) -> Self {
        self.keys_description = Some(description.into());
        self
    }

    pub fn requires_backend(mut self, requires: bool) -> Self {
        self.requires_backend = requires;
        self
    }

    pub fn enabled(self, enabled: bool) -> Self {
        self.enabled.set(enabled);
        self
    }

    pub fn hidden(self, hidden: bool) -> Self {
        self.hidden.set(hidden);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.get()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub(crate) fn set_hidden(&self, hidden: bool) {
        self.hidden.set(hidden);
    }

    pub fn has_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn has_shortcut(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn is_main_loop_action(&self) -> bool {
        matches!(self.handler, Some(ActionHandler::MainLoop))
    }

    /// Shape checks that do not depend on other registered actions.
    pub(crate) fn validate(&self, prefix: char) -> Result<(), ActionError> {
        if self.name.trim().is_empty() {
            return Err(ActionError::invalid(&self.name, "name cannot be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(ActionError::invalid(&self.name, "description cannot be empty"));
        }
        if self.category.trim().is_empty() {
            return Err(ActionError::invalid(&self.name, "category cannot be empty"));
        }
        if self.command.is_none() && self.keys.is_empty() {
            return Err(ActionError::invalid(
                &self.name,
                "action must have either a command or a key binding",
            ));
        }
        if let Some(command) = &self.command {
            if !command.starts_with(prefix) || command.len() == prefix.len_utf8() {
                return Err(ActionError::invalid(
                    &self.name,
                    format!("command '{}' must start with '{}'", command, prefix),
                ));
            }
            if command.chars().any(char::is_whitespace) {
                return Err(ActionError::invalid(
                    &self.name,
                    format!("command '{}' cannot contain whitespace", command),
                ));
            }
            if self.command_usage.is_none() {
                warn!(action = %self.name, "action has a command but no usage description");
            }
        }
        if self.handler.is_none() {
            return Err(ActionError::invalid(
                &self.name,
                "action must have a handler or be handled by the main loop",
            ));
        }
        if !self.keys.is_empty() && self.keys_description.is_none() {
            warn!(action = %self.name, "action has keys but no keys description");
        }
        Ok(())
    }

    pub fn keys_display(&self) -> String {
        self.keys
            .iter()
            .map(KeyChord::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Per-invocation bundle handed to a handler. Built right before dispatch
/// and dropped when the handler returns.
pub struct ActionContext<'a> {
    pub registry: &'a ActionRegistry,
    pub trigger: TriggerSource,
    pub args: Vec<String>,
    pub user_input: Option<String>,
    /// Raw key event; only present for shortcut triggers
    pub event: Option<KeyEvent>,
    /// Editable input buffer; only present for shortcut triggers
    pub buffer: Option<&'a mut dyn InputBuffer>,
    pub images: Option<&'a mut ImageBuffer>,
    backend: Option<Rc<dyn Backend>>,
    emitter: &'a dyn Emit,
}

impl<'a> ActionContext<'a> {
    pub fn new(registry: &'a ActionRegistry, trigger: TriggerSource, emitter: &'a dyn Emit) -> Self {
        Self {
            registry,
            trigger,
            args: Vec::new(),
            user_input: None,
            event: None,
            buffer: None,
            images: None,
            backend: None,
            emitter,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    pub fn with_backend(mut self, backend: Rc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_images(mut self, images: &'a mut ImageBuffer) -> Self {
        self.images = Some(images);
        self
    }

    /// Attach the UI handles. Only meaningful for shortcut triggers.
    pub fn with_ui(mut self, buffer: &'a mut dyn InputBuffer, event: Option<KeyEvent>) -> Self {
        self.buffer = Some(buffer);
        self.event = event;
        self
    }

    /// The context's own backend, falling back to the registry binding.
    pub fn backend(&self) -> Option<Rc<dyn Backend>> {
        self.backend
            .clone()
            .or_else(|| self.registry.backend())
    }

    pub fn emit(&self, text: &str) {
        self.emitter.emit(text);
    }

    pub fn emitter(&self) -> &dyn Emit {
        self.emitter
    }
}
