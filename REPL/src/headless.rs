//! Line-oriented, non-interactive session for piped input.

use std::io;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures_util::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::ReplConfig;
use crate::error::panic_message;
use crate::images::ImageBuffer;
use crate::output::Emit;
use crate::registry::ActionRegistry;

/// Summary of a headless run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessReport {
    /// Buffers actually handed to the backend (empty sends are skipped)
    pub send_count: usize,
    /// False if any send was reported failed or raised an error
    pub success: bool,
}

/// Reads lines, accumulating content until the send sentinel (or end of
/// input) hands the buffer to the backend. Command lines go through the
/// registry.
pub struct HeadlessRepl {
    registry: ActionRegistry,
    config: ReplConfig,
    emitter: Box<dyn Emit>,
    buffer: String,
    images: ImageBuffer,
    send_count: usize,
    success: bool,
}

impl HeadlessRepl {
    pub fn new(registry: ActionRegistry, emitter: Box<dyn Emit>) -> Self {
        Self {
            registry,
            config: ReplConfig::default(),
            emitter,
            buffer: String::new(),
            images: ImageBuffer::new(),
            send_count: 0,
            success: true,
        }
    }

    pub fn with_config(mut self, config: ReplConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    pub fn images_mut(&mut self) -> &mut ImageBuffer {
        &mut self.images
    }

    pub async fn run_stdin(
        &mut self,
        backend: Rc<dyn Backend>,
        initial: Option<&str>,
    ) -> io::Result<HeadlessReport> {
        self.run(backend, initial, BufReader::new(tokio::io::stdin())).await
    }

    pub async fn run<R>(
        &mut self,
        backend: Rc<dyn Backend>,
        initial: Option<&str>,
        reader: R,
    ) -> io::Result<HeadlessReport>
    where
        R: AsyncBufRead + Unpin,
    {
        self.registry.bind_backend(Rc::clone(&backend));

        if let Some(message) = initial.filter(|m| !m.trim().is_empty()) {
            info!("processing initial message");
            if !self.deliver(&backend, message).await {
                warn!("initial message processing failed");
                self.success = false;
            }
            self.images.clear();
        }

        let mut lines = reader.lines();
        let mut line_num = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_num += 1;
            let line = line.trim_end_matches('\r');

            if line == self.config.send_sentinel {
                self.send(&backend, &format!("line {}", line_num)).await;
            } else if line.starts_with(self.registry.prefix()) {
                self.registry
                    .dispatch_command(line, self.emitter.as_ref(), Some(&mut self.images));
            } else {
                self.add_to_buffer(line);
            }
        }

        if self.buffer.trim().is_empty() {
            debug!("end of input with empty buffer");
        } else {
            info!("end of input with pending content, sending");
            self.send(&backend, "EOF").await;
        }

        Ok(HeadlessReport {
            send_count: self.send_count,
            success: self.success,
        })
    }

    fn add_to_buffer(&mut self, line: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        debug!(len = self.buffer.len(), "added line to buffer");
    }

    async fn send(&mut self, backend: &Rc<dyn Backend>, at: &str) {
        let content = self.buffer.trim().to_string();
        if content.is_empty() {
            debug!(at, "empty buffer, skipping send");
            return;
        }

        self.send_count += 1;
        info!(send = self.send_count, at, chars = content.len(), "sending buffer");
        if self.deliver(backend, &content).await {
            info!(send = self.send_count, "send completed");
        } else {
            self.success = false;
        }
        self.buffer.clear();
        self.images.clear();
    }

    /// Hand `content` to the backend. Errors and panics count as failure.
    async fn deliver(&self, backend: &Rc<dyn Backend>, content: &str) -> bool {
        let images = self.images.snapshot();
        let result = AssertUnwindSafe(backend.handle_input(content, &images))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                warn!(send = self.send_count, "backend reported failure");
                false
            }
            Ok(Err(e)) => {
                error!(send = self.send_count, error = %e, "backend error");
                self.emitter.emit(&format!("Error processing input: {}", e));
                false
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(send = self.send_count, panic = %message, "backend panicked");
                self.emitter.emit(&format!("Error processing input: {}", message));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::images::Images;
    use crate::output::BufferedEmitter;
    use async_trait::async_trait;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        inputs: RefCell<Vec<String>>,
        image_counts: RefCell<Vec<usize>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait(?Send)]
    impl Backend for Recorder {
        async fn handle_input(&self, input: &str, images: &Images) -> anyhow::Result<bool> {
            self.inputs.borrow_mut().push(input.to_string());
            self.image_counts.borrow_mut().push(images.len());
            match self.fail_on {
                Some(bad) if input.contains(bad) => Err(anyhow::anyhow!("cannot handle {}", bad)),
                _ => Ok(!input.contains("reject")),
            }
        }
    }

    fn headless() -> (HeadlessRepl, Rc<BufferedEmitter>) {
        let out = Rc::new(BufferedEmitter::new());
        (
            HeadlessRepl::new(ActionRegistry::new(), Box::new(Rc::clone(&out))),
            out,
        )
    }

    #[tokio::test]
    async fn test_send_cycles_and_eof_flush() {
        let (mut repl, _out) = headless();
        let backend = Rc::new(Recorder::default());
        let input = "line one\nline two\n/send\n/send\nthird\r\n";

        let report = repl.run(backend.clone(), None, input.as_bytes()).await.unwrap();

        assert_eq!(report, HeadlessReport { send_count: 2, success: true });
        assert_eq!(*backend.inputs.borrow(), vec!["line one\nline two", "third"]);
    }

    #[tokio::test]
    async fn test_sentinel_without_command_prefix() {
        let out = Rc::new(BufferedEmitter::new());
        let config = ReplConfig {
            send_sentinel: "{{send}}".to_string(),
            ..ReplConfig::default()
        };
        let mut repl =
            HeadlessRepl::new(ActionRegistry::new(), Box::new(Rc::clone(&out))).with_config(config);
        let backend = Rc::new(Recorder::default());

        let report = repl
            .run(backend.clone(), None, "one\n{{send}}\ntwo\n  {{send}}\n".as_bytes())
            .await
            .unwrap();

        assert_eq!(report, HeadlessReport { send_count: 2, success: true });
        assert_eq!(*backend.inputs.borrow(), vec!["one", "two\n  {{send}}"]);
    }

    #[tokio::test]
    async fn test_initial_message_and_commands() {
        let (mut repl, out) = headless();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorded = Rc::clone(&seen);
        repl.registry_mut()
            .register(
                Action::new("note", "Note", "Test")
                    .handler(move |ctx| {
                        recorded.borrow_mut().push(ctx.args.join(" "));
                        ctx.emit("noted");
                        Ok(())
                    })
                    .command("/note"),
            )
            .unwrap();
        let backend = Rc::new(Recorder::default());

        let report = repl
            .run(backend.clone(), Some("hello"), "/note a b\n/bogus\n".as_bytes())
            .await
            .unwrap();

        assert_eq!(report, HeadlessReport { send_count: 0, success: true });
        assert_eq!(*backend.inputs.borrow(), vec!["hello"]);
        assert_eq!(*seen.borrow(), vec!["a b"]);
        assert_eq!(out.lines()[0], "noted");
        assert!(out.lines()[1].starts_with("Unknown command: /bogus"));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_run() {
        let (mut repl, out) = headless();
        let backend = Rc::new(Recorder {
            fail_on: Some("boom"),
            ..Recorder::default()
        });
        let input = "reject me\n/send\nboom\n/send\nfine\n/send\n";

        let report = repl.run(backend.clone(), None, input.as_bytes()).await.unwrap();

        assert_eq!(report, HeadlessReport { send_count: 3, success: false });
        assert_eq!(backend.inputs.borrow().len(), 3);
        assert_eq!(out.lines(), vec!["Error processing input: cannot handle boom"]);
    }

    #[tokio::test]
    async fn test_empty_sends_are_skipped() {
        let (mut repl, _out) = headless();
        let backend = Rc::new(Recorder::default());

        let report = repl.run(backend.clone(), None, "/send\n   \n/send\n".as_bytes()).await.unwrap();

        assert_eq!(report, HeadlessReport { send_count: 0, success: true });
        assert!(backend.inputs.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_images_cleared_after_send() {
        let (mut repl, _out) = headless();
        repl.images_mut().add_typed(vec![1, 2, 3], "image/png");
        let backend = Rc::new(Recorder::default());

        repl.run(backend.clone(), None, "see {{image:img_001}}\n/send\nagain\n".as_bytes())
            .await
            .unwrap();

        assert_eq!(*backend.image_counts.borrow(), vec![1, 0]);
    }
}
