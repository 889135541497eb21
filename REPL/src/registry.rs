//! Action registry: registration, lookup, dispatch and the built-in actions.
//!
//! Every action is stored once by name; commands and key chords are
//! secondary indexes into the name table. Registration validates all three
//! tables before touching any of them, so a rejected action leaves the
//! registry exactly as it was.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crossterm::event::KeyEvent;
use tracing::{debug, error, trace};
use unicode_width::UnicodeWidthStr;

use crate::action::{Action, ActionContext, ActionHandler, TriggerSource};
use crate::backend::{Backend, BackendBinding, BackendHandle};
use crate::command::CommandParser;
use crate::editor::InputBuffer;
use crate::error::{panic_message, ActionError, ConflictField};
use crate::images::ImageBuffer;
use crate::keys::KeyChord;
use crate::output::Emit;

const COMMAND_COLUMN: usize = 20;
const KEYS_COLUMN: usize = 15;
const RULE_WIDTH: usize = 50;

/// Result of a command or shortcut dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The action ran, or was a deliberate no-op (disabled, main-loop)
    Handled,
    /// Nothing is bound to the command or chord
    Unknown,
    /// The action failed; the error was reported to the user
    Failed,
}

pub struct ActionRegistry {
    prefix: char,
    actions: HashMap<String, Action>,
    command_map: HashMap<String, String>,
    key_map: HashMap<KeyChord, String>,
    backend: BackendBinding,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::with_prefix('/')
    }

    pub fn with_prefix(prefix: char) -> Self {
        let mut registry = Self {
            prefix,
            actions: HashMap::new(),
            command_map: HashMap::new(),
            key_map: HashMap::new(),
            backend: BackendBinding::Unbound,
        };
        registry.register_builtin_actions();
        registry
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    fn command_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn register_builtin_actions(&mut self) {
        let builtins = vec![
            Action::new(
                "help",
                "Show help information for all actions or a specific one",
                "General",
            )
            .handler(|ctx| {
                let text = ctx.registry.help_text(ctx.args.first().map(String::as_str));
                ctx.emit(&text);
                Ok(())
            })
            .command(self.command_name("help"))
            .usage(format!(
                "{}help [action|command] - Show help for all actions or a specific one",
                self.prefix
            ))
            .key("f1")
            .keys_description("Show help"),
            Action::new("list-shortcuts", "List all available keyboard shortcuts", "General")
                .handler(|ctx| {
                    let text = ctx.registry.shortcuts_text();
                    ctx.emit(&text);
                    Ok(())
                })
                .command(self.command_name("shortcuts"))
                .usage(format!("{}shortcuts - List all keyboard shortcuts", self.prefix)),
            Action::new("exit", "Exit the REPL application", "Control")
                .main_loop()
                .command(self.command_name("exit"))
                .usage(format!("{}exit - Exit the application", self.prefix)),
            Action::new("quit", "Quit the REPL application", "Control")
                .main_loop()
                .command(self.command_name("quit"))
                .usage(format!("{}quit - Quit the application", self.prefix)),
        ];

        for action in builtins {
            if let Err(e) = self.register(action) {
                error!(error = %e, "failed to register built-in action");
            }
        }
    }

    /// Add an action. Fails without modifying any table if the action is
    /// malformed or its name, command or any key chord is already taken.
    pub fn register(&mut self, action: Action) -> Result<(), ActionError> {
        action.validate(self.prefix)?;

        if self.actions.contains_key(&action.name) {
            return Err(ActionError::RegistrationConflict {
                field: ConflictField::Name,
                value: action.name.clone(),
                existing: action.name.clone(),
            });
        }

        if let Some(command) = &action.command {
            if let Some(existing) = self.command_map.get(command) {
                return Err(ActionError::RegistrationConflict {
                    field: ConflictField::Command,
                    value: command.clone(),
                    existing: existing.clone(),
                });
            }
        }

        for (i, chord) in action.keys.iter().enumerate() {
            let existing = self
                .key_map
                .get(chord)
                .cloned()
                .or_else(|| action.keys[..i].contains(chord).then(|| action.name.clone()));
            if let Some(existing) = existing {
                return Err(ActionError::RegistrationConflict {
                    field: ConflictField::Keys,
                    value: chord.to_string(),
                    existing,
                });
            }
        }

        if let Some(command) = &action.command {
            self.command_map.insert(command.clone(), action.name.clone());
        }
        for chord in &action.keys {
            self.key_map.insert(chord.clone(), action.name.clone());
        }
        debug!(
            action = %action.name,
            command = ?action.command,
            keys = %action.keys_display(),
            "registered action"
        );
        self.actions.insert(action.name.clone(), action);
        Ok(())
    }

    /// Bind the backend actions and the session use. Replaces any previous
    /// binding.
    pub fn bind_backend(&mut self, backend: Rc<dyn Backend>) -> BackendHandle {
        debug!("backend bound");
        self.backend = BackendBinding::Bound(Rc::clone(&backend));
        BackendHandle::new(backend)
    }

    pub fn unbind_backend(&mut self) {
        self.backend = BackendBinding::Unbound;
    }

    pub fn backend(&self) -> Option<Rc<dyn Backend>> {
        self.backend.get()
    }

    pub fn get_action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn get_action_by_command(&self, command: &str) -> Option<&Action> {
        self.command_map
            .get(command)
            .and_then(|name| self.actions.get(name))
    }

    pub fn get_action_by_keys(&self, chord: &KeyChord) -> Option<&Action> {
        self.key_map
            .get(chord)
            .and_then(|name| self.actions.get(name))
    }

    pub fn validate_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn list_actions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_commands(&self) -> Vec<String> {
        let mut commands: Vec<_> = self.command_map.keys().cloned().collect();
        commands.sort();
        commands
    }

    pub fn list_shortcuts(&self) -> Vec<KeyChord> {
        let mut chords: Vec<_> = self.key_map.keys().cloned().collect();
        chords.sort();
        chords
    }

    /// Returns false if no such action exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        self.actions
            .get(name)
            .map(|action| action.set_enabled(enabled))
            .is_some()
    }

    pub fn set_hidden(&self, name: &str, hidden: bool) -> bool {
        self.actions
            .get(name)
            .map(|action| action.set_hidden(hidden))
            .is_some()
    }

    /// Visible actions grouped by category, both sorted.
    pub fn actions_by_category(&self) -> BTreeMap<&str, Vec<&Action>> {
        let mut categories: BTreeMap<&str, Vec<&Action>> = BTreeMap::new();
        for action in self.actions.values().filter(|a| !a.is_hidden()) {
            categories
                .entry(action.category.as_str())
                .or_default()
                .push(action);
        }
        for actions in categories.values_mut() {
            actions.sort_by(|a, b| a.name.cmp(&b.name));
        }
        categories
    }

    /// Run an action by name. Disabled and main-loop actions are no-ops.
    /// Handler errors and panics come back as [`ActionError::Execution`].
    pub fn execute(&self, name: &str, mut ctx: ActionContext<'_>) -> Result<(), ActionError> {
        let action = self
            .get_action(name)
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))?;

        if !action.is_enabled() {
            debug!(action = name, "action is disabled");
            return Ok(());
        }

        let handler = match &action.handler {
            Some(ActionHandler::MainLoop) => {
                debug!(action = name, "action handled by main loop");
                return Ok(());
            }
            Some(ActionHandler::Call(handler)) => Rc::clone(handler),
            None => return Err(ActionError::invalid(name, "action has no handler")),
        };

        if action.requires_backend && ctx.backend().is_none() {
            return Err(ActionError::BackendUnbound {
                action: name.to_string(),
            });
        }

        debug!(action = name, trigger = ?ctx.trigger, "executing action");
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut ctx)));
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                error!(action = name, error = %source, "action failed");
                Err(ActionError::Execution {
                    action: name.to_string(),
                    source,
                })
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(action = name, panic = %message, "action panicked");
                Err(ActionError::Execution {
                    action: name.to_string(),
                    source: anyhow::anyhow!("handler panicked: {}", message),
                })
            }
        }
    }

    /// Dispatch a typed command line. Unknown commands produce one message.
    pub fn dispatch_command(
        &self,
        raw: &str,
        emitter: &dyn Emit,
        images: Option<&mut ImageBuffer>,
    ) -> Dispatch {
        debug!(command = raw, "handling command");
        let Some(line) = CommandParser::parse(raw, self.prefix) else {
            return Dispatch::Handled;
        };

        let Some(action) = self.get_action_by_command(&line.command) else {
            emitter.emit(&format!(
                "Unknown command: {}. Use {}help to see available commands.",
                line.command, self.prefix
            ));
            return Dispatch::Unknown;
        };

        let mut ctx = ActionContext::new(self, TriggerSource::Command, emitter)
            .with_args(line.args)
            .with_user_input(raw);
        if let Some(images) = images {
            ctx = ctx.with_images(images);
        }

        self.report(self.execute(&action.name, ctx), emitter)
    }

    /// Dispatch a key chord. Unbound chords are silently ignored.
    pub fn dispatch_shortcut(
        &self,
        chord: &KeyChord,
        event: Option<KeyEvent>,
        buffer: &mut dyn InputBuffer,
        emitter: &dyn Emit,
        images: Option<&mut ImageBuffer>,
    ) -> Dispatch {
        let Some(action) = self.get_action_by_keys(chord) else {
            trace!(chord = %chord, "no action bound to chord");
            return Dispatch::Unknown;
        };
        debug!(chord = %chord, action = %action.name, "handling shortcut");

        let mut ctx =
            ActionContext::new(self, TriggerSource::Shortcut, emitter).with_ui(buffer, event);
        if let Some(images) = images {
            ctx = ctx.with_images(images);
        }

        self.report(self.execute(&action.name, ctx), emitter)
    }

    fn report(&self, result: Result<(), ActionError>, emitter: &dyn Emit) -> Dispatch {
        match result {
            Ok(()) => Dispatch::Handled,
            Err(e) => {
                emitter.emit(&format!("Error: {}", e));
                Dispatch::Failed
            }
        }
    }

    /// General help, or detail for one action name or command.
    pub fn help_text(&self, target: Option<&str>) -> String {
        let Some(target) = target else {
            return self.general_help();
        };

        let action = self.get_action(target).or_else(|| {
            let command = if target.starts_with(self.prefix) {
                target.to_string()
            } else {
                self.command_name(target)
            };
            self.get_action_by_command(&command)
        });

        match action {
            Some(action) => action_help(action),
            None => format!("No help available for: {}", target),
        }
    }

    fn general_help(&self) -> String {
        let mut out = String::from("\nAvailable Actions:\n");
        out.push_str(&"=".repeat(RULE_WIDTH));
        out.push('\n');

        for (category, actions) in self.actions_by_category() {
            out.push_str(&format!("\n{}:\n", category));
            for action in actions {
                let command = action.command.as_deref().unwrap_or("");
                out.push_str("  ");
                out.push_str(&pad(command, COMMAND_COLUMN));
                out.push_str(&pad(&action.keys_display(), KEYS_COLUMN));
                out.push_str(&action.description);
                out.push('\n');
            }
        }

        out.push_str(&format!(
            "\nUse '{p}help <command>' for detailed information about a specific action.\n\
             Use '{p}shortcuts' to see only keyboard shortcuts.\n",
            p = self.prefix
        ));
        out
    }

    /// Every visible action that has at least one key chord.
    pub fn shortcuts_text(&self) -> String {
        let mut out = String::from("\nKeyboard Shortcuts:\n");
        out.push_str(&"=".repeat(RULE_WIDTH));
        out.push('\n');

        for (category, actions) in self.actions_by_category() {
            let with_keys: Vec<_> = actions.into_iter().filter(|a| a.has_shortcut()).collect();
            if with_keys.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{}:\n", category));
            for action in with_keys {
                let description = action
                    .keys_description
                    .as_deref()
                    .unwrap_or(&action.description);
                out.push_str("  ");
                out.push_str(&pad(&action.keys_display(), KEYS_COLUMN));
                out.push(' ');
                out.push_str(description);
                out.push('\n');
            }
        }
        out
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn action_help(action: &Action) -> String {
    let mut out = format!("\n{}\nCategory: {}\n", action.description, action.category);
    if let Some(command) = &action.command {
        let usage = action.command_usage.as_deref().unwrap_or(command);
        out.push_str(&format!("Command: {}\n", usage));
    }
    if action.has_shortcut() {
        let description = action
            .keys_description
            .as_deref()
            .map(|d| format!(" - {}", d))
            .unwrap_or_default();
        out.push_str(&format!("Shortcut: {}{}\n", action.keys_display(), description));
    }
    if !action.is_enabled() {
        out.push_str("Status: Disabled\n");
    }
    out
}

/// Left-align `text` in a column of `width` display cells.
fn pad(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    if used >= width {
        format!("{} ", text)
    } else {
        format!("{}{}", text, " ".repeat(width - used))
    }
}
