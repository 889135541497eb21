//! Interactive session loop and the per-turn cancellation coordinator.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tokio::task::{self, JoinError, JoinHandle, LocalSet};
use tracing::{debug, error, info, trace, warn};

use crate::backend::Backend;
use crate::cancel::{trigger_channel, CancelSlot, CancelTrigger, TriggerInbox};
use crate::clipboard::paste_action;
use crate::command::CommandParser;
use crate::config::ReplConfig;
use crate::editor::{EditorEvent, LineEditor};
use crate::error::panic_message;
use crate::images::ImageBuffer;
use crate::keys::KeyChord;
use crate::output::Emit;
use crate::registry::ActionRegistry;
use crate::state::{SessionState, SessionStats, TurnOutcome};

type BackendTask = JoinHandle<anyhow::Result<bool>>;

/// Interactive REPL session. Owns the registry, the line editor and the
/// attachment buffer; turns run strictly one after another.
pub struct AsyncRepl {
    registry: ActionRegistry,
    config: ReplConfig,
    cancel_chords: Vec<KeyChord>,
    editor: Box<dyn LineEditor>,
    emitter: Box<dyn Emit>,
    images: ImageBuffer,
    trigger: CancelTrigger,
    inbox: TriggerInbox,
    state: SessionState,
    stats: SessionStats,
}

impl AsyncRepl {
    pub fn new(
        mut registry: ActionRegistry,
        editor: Box<dyn LineEditor>,
        emitter: Box<dyn Emit>,
    ) -> Self {
        if let Err(e) = registry.register(paste_action(registry.prefix())) {
            debug!(error = %e, "paste action not registered");
        }
        let (trigger, inbox) = trigger_channel();
        let config = ReplConfig::default();

        Self {
            cancel_chords: chords(&config),
            registry,
            config,
            editor,
            emitter,
            images: ImageBuffer::new(),
            trigger,
            inbox,
            state: SessionState::default(),
            stats: SessionStats::default(),
        }
    }

    pub fn with_config(mut self, config: ReplConfig) -> Self {
        if config.command_prefix != self.registry.prefix() {
            warn!(
                configured = %config.command_prefix,
                registry = %self.registry.prefix(),
                "command prefix differs from the registry's; using the registry's"
            );
        }
        self.cancel_chords = chords(&config);
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &ReplConfig {
        &self.config
    }

    pub fn images(&self) -> &ImageBuffer {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageBuffer {
        &mut self.images
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Trigger that cancels the current turn from any thread. Requests
    /// posted between turns are discarded.
    pub fn cancel_trigger(&self) -> CancelTrigger {
        self.trigger.clone()
    }

    /// Bind `backend` and run until an exit command or end of input.
    pub async fn run(&mut self, backend: Rc<dyn Backend>, initial: Option<&str>) -> io::Result<()> {
        self.registry.bind_backend(backend);
        LocalSet::new().run_until(self.session_loop(initial)).await
    }

    async fn session_loop(&mut self, initial: Option<&str>) -> io::Result<()> {
        info!("session started");
        if let Some(text) = initial.filter(|t| !t.trim().is_empty()) {
            self.process_turn(text).await;
        }

        let mut running = true;
        while running {
            self.state = SessionState::WaitingForInput;
            match self.editor.read_event(&self.config.prompt).await? {
                EditorEvent::Submitted(text) => running = self.handle_line(&text).await,
                EditorEvent::Chord(chord, event) => {
                    self.registry.dispatch_shortcut(
                        &chord,
                        event,
                        self.editor.buffer(),
                        self.emitter.as_ref(),
                        Some(&mut self.images),
                    );
                }
                EditorEvent::Eof => running = false,
            }
        }

        self.state = SessionState::Terminated;
        info!(turns = self.stats.turns, "session ended");
        Ok(())
    }

    /// Route one submitted line. Returns `false` when the session should end.
    async fn handle_line(&mut self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return true;
        }
        if self.config.is_exit_command(trimmed) {
            debug!(command = trimmed, "exit requested");
            return false;
        }
        if trimmed.starts_with(self.registry.prefix()) {
            if self.is_main_loop_command(trimmed) {
                debug!(command = trimmed, "exit requested");
                return false;
            }
            self.state = SessionState::DispatchingCommand;
            self.registry
                .dispatch_command(trimmed, self.emitter.as_ref(), Some(&mut self.images));
            return true;
        }

        self.process_turn(text).await;
        true
    }

    /// True when the command resolves to an enabled action the loop handles
    /// itself (exit, quit).
    fn is_main_loop_command(&self, line: &str) -> bool {
        CommandParser::parse(line, self.registry.prefix())
            .and_then(|parsed| self.registry.get_action_by_command(&parsed.command))
            .is_some_and(|action| action.is_main_loop_action() && action.is_enabled())
    }

    /// Run one content turn: the backend races the cancel listener. Must be
    /// called inside a [`LocalSet`].
    pub async fn process_turn(&mut self, text: &str) -> TurnOutcome {
        self.state = SessionState::ProcessingContent;
        self.emitter.emit_status(&self.config.processing_message);

        let stale = self.inbox.drain();
        if stale > 0 {
            debug!(stale, "discarded cancel requests posted between turns");
        }

        let outcome = match self.registry.backend() {
            Some(backend) => self.race(backend, text).await,
            None => {
                error!("content turn without a bound backend");
                self.emitter.emit("Error processing input: no backend bound");
                TurnOutcome::Faulted("no backend bound".to_string())
            }
        };

        self.inbox.drain();
        self.images.clear();
        self.editor.reset();
        self.stats.record(&outcome);
        info!(outcome = ?outcome, "turn finished");
        outcome
    }

    async fn race(&mut self, backend: Rc<dyn Backend>, text: &str) -> TurnOutcome {
        let slot = CancelSlot::new();
        let input = text.to_string();
        let images = self.images.snapshot();
        let worker = Rc::clone(&backend);
        let mut task: BackendTask =
            task::spawn_local(async move { worker.handle_input(&input, &images).await });

        let mut listening = true;
        loop {
            // Branch order decides ties: a pending cancel beats a finished backend.
            tokio::select! {
                biased;

                _ = slot.resolved() => {
                    return self.finish_cancelled(&backend, &mut task).await;
                }
                Some(()) = self.inbox.recv() => {
                    debug!("cancel trigger received");
                    slot.resolve();
                }
                chord = self.editor.next_chord(), if listening => match chord {
                    Ok(Some(chord)) if self.cancel_chords.contains(&chord) => {
                        debug!(chord = %chord, "cancel chord pressed");
                        slot.resolve();
                    }
                    Ok(Some(chord)) => trace!(chord = %chord, "ignoring chord while processing"),
                    Ok(None) => listening = false,
                    Err(e) => {
                        warn!(error = %e, "cancel listener stopped");
                        listening = false;
                    }
                },
                joined = &mut task => {
                    return self.finish_completed(joined);
                }
            }
        }
    }

    async fn finish_cancelled(&self, backend: &Rc<dyn Backend>, task: &mut BackendTask) -> TurnOutcome {
        self.emitter.emit(&self.config.cancelled_message);

        if let Some(cancellable) = backend.as_cancellable() {
            let reason = self.config.cancel_reason.as_str();
            match panic::catch_unwind(AssertUnwindSafe(|| cancellable.cancel(Some(reason)))) {
                Ok(Ok(())) => debug!("backend cancel hook invoked"),
                Ok(Err(e)) => warn!(error = %e, "backend cancel hook failed"),
                Err(payload) => warn!(panic = %panic_message(payload.as_ref()), "backend cancel hook panicked"),
            }
        }

        task.abort();
        match task.await {
            Err(e) if e.is_cancelled() => debug!("backend task cancelled"),
            Err(e) => warn!(error = %e, "backend task failed while cancelling"),
            Ok(result) => debug!(finished = ?result.as_ref().ok(), "backend finished before the abort landed"),
        }
        TurnOutcome::Cancelled
    }

    fn finish_completed(&self, joined: Result<anyhow::Result<bool>, JoinError>) -> TurnOutcome {
        match joined {
            Ok(Ok(true)) => TurnOutcome::Completed,
            Ok(Ok(false)) => {
                self.emitter.emit(&self.config.failed_message);
                TurnOutcome::Failed
            }
            Ok(Err(e)) => {
                error!(error = %e, "backend error");
                self.emitter.emit(&format!("Error processing input: {}", e));
                TurnOutcome::Faulted(e.to_string())
            }
            Err(e) if e.is_cancelled() => {
                debug!("backend task cancelled outside the coordinator");
                TurnOutcome::Cancelled
            }
            Err(e) => {
                let message = match e.try_into_panic() {
                    Ok(payload) => panic_message(payload.as_ref()),
                    Err(e) => e.to_string(),
                };
                error!(panic = %message, "backend panicked");
                self.emitter.emit(&format!("Error processing input: {}", message));
                TurnOutcome::Faulted(message)
            }
        }
    }
}

fn chords(config: &ReplConfig) -> Vec<KeyChord> {
    config.cancel_chords.iter().map(|c| KeyChord::new(c)).collect()
}
