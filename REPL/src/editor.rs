//! Line editing surface.
//!
//! The session only talks to [`LineEditor`]; [`TerminalEditor`] is the
//! crossterm implementation used by the demo binary.

use std::io::{self, Write};

use async_trait::async_trait;
use crossterm::{
    cursor::{MoveToColumn, MoveUp},
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    queue,
    style::Print,
    terminal::{self, Clear, ClearType},
};
use futures_util::StreamExt;
use tracing::trace;
use unicode_width::UnicodeWidthStr;

use crate::keys::KeyChord;

/// Editable text exposed to shortcut handlers.
pub trait InputBuffer {
    fn text(&self) -> &str;

    /// Cursor position as a byte offset into `text()`.
    fn cursor(&self) -> usize;

    /// Insert at the cursor and move the cursor past the inserted text.
    fn insert_text(&mut self, text: &str);

    fn set_text(&mut self, text: &str);

    fn clear(&mut self);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
    cursor: usize,
}

impl TextBuffer {
    /// Buffer holding `text` with the cursor at the end.
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            cursor: text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Delete the character before the cursor.
    pub fn backspace(&mut self) {
        if let Some(c) = self.text[..self.cursor].chars().next_back() {
            self.cursor -= c.len_utf8();
            self.text.remove(self.cursor);
        }
    }

    /// Take the contents, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }
}

impl InputBuffer for TextBuffer {
    fn text(&self) -> &str {
        &self.text
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn insert_text(&mut self, text: &str) {
        self.text.insert_str(self.cursor, text);
        self.cursor += text.len();
    }

    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
        self.cursor = self.text.len();
    }

    fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }
}

/// What a prompt read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// The user submitted the buffer
    Submitted(String),
    /// A key chord to dispatch as a shortcut; the buffer stays as is
    Chord(KeyChord, Option<KeyEvent>),
    /// Input is closed
    Eof,
}

#[async_trait(?Send)]
pub trait LineEditor {
    /// Show `prompt` and edit until the user submits, presses a chord, or
    /// closes input.
    async fn read_event(&mut self, prompt: &str) -> io::Result<EditorEvent>;

    /// Next key chord pressed while a turn is processing. `Ok(None)` when the
    /// input stream has ended. Must be cancel-safe: dropping the future
    /// loses no state.
    async fn next_chord(&mut self) -> io::Result<Option<KeyChord>>;

    fn buffer(&mut self) -> &mut dyn InputBuffer;

    /// Drop rendering state so the next prompt is drawn from scratch.
    fn reset(&mut self);
}

/// Raw-mode line editor over crossterm's event stream. Enter inserts a
/// newline, Alt+Enter submits.
pub struct TerminalEditor {
    /// Opened on first read; constructing the stream needs a terminal
    events: Option<EventStream>,
    buffer: TextBuffer,
    /// Text typed while a turn was processing, restored on `reset`
    typeahead: String,
    /// Rows between the prompt's first row and the cursor row
    rendered_rows: u16,
}

impl TerminalEditor {
    pub fn new() -> Self {
        Self {
            events: None,
            buffer: TextBuffer::default(),
            typeahead: String::new(),
            rendered_rows: 0,
        }
    }

    fn events(&mut self) -> &mut EventStream {
        self.events.get_or_insert_with(EventStream::new)
    }

    fn redraw(&mut self, prompt: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        if self.rendered_rows > 0 {
            queue!(stdout, MoveUp(self.rendered_rows))?;
        }
        let shown = format!("{}{}", prompt, self.buffer.text());
        queue!(
            stdout,
            MoveToColumn(0),
            Clear(ClearType::FromCursorDown),
            Print(shown.replace('\n', "\r\n"))
        )?;
        stdout.flush()?;

        let columns = terminal::size().map(|(w, _)| w).unwrap_or(80);
        self.rendered_rows = rows_for(&shown, columns).saturating_sub(1);
        Ok(())
    }

    /// Move below the rendered input so following output starts clean.
    fn finish_line(&mut self) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        queue!(stdout, Print("\r\n"))?;
        stdout.flush()?;
        self.rendered_rows = 0;
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<EditorEvent> {
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Enter if alt => Some(EditorEvent::Submitted(self.buffer.take())),
            KeyCode::Enter => {
                self.buffer.insert_text("\n");
                None
            }
            KeyCode::Char('d') if ctrl && self.buffer.is_empty() => Some(EditorEvent::Eof),
            KeyCode::Char('c') if ctrl => Some(EditorEvent::Eof),
            KeyCode::Backspace => {
                self.buffer.backspace();
                None
            }
            KeyCode::Char(c) if !ctrl && !alt => {
                let mut s = [0u8; 4];
                self.buffer.insert_text(c.encode_utf8(&mut s));
                None
            }
            _ => KeyChord::from_key_event(&key).map(|chord| EditorEvent::Chord(chord, Some(key))),
        }
    }

    /// Key pressed while a turn is processing. Text keys go to the
    /// typeahead; anything that maps to a chord is returned.
    fn queue_key(&mut self, key: KeyEvent) -> Option<KeyChord> {
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char(c) if !ctrl && !alt => {
                self.typeahead.push(c);
                None
            }
            KeyCode::Enter if !alt => {
                self.typeahead.push('\n');
                None
            }
            KeyCode::Backspace => {
                self.typeahead.pop();
                None
            }
            _ => KeyChord::from_key_event(&key),
        }
    }
}

impl Default for TerminalEditor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl LineEditor for TerminalEditor {
    async fn read_event(&mut self, prompt: &str) -> io::Result<EditorEvent> {
        self.redraw(prompt)?;
        while let Some(event) = self.events().next().await {
            match event? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if let Some(result) = self.handle_key(key) {
                        trace!(event = ?result, "editor event");
                        self.finish_line()?;
                        return Ok(result);
                    }
                    self.redraw(prompt)?;
                }
                Event::Paste(text) => {
                    self.buffer.insert_text(&text.replace('\r', ""));
                    self.redraw(prompt)?;
                }
                Event::Resize(..) => self.redraw(prompt)?,
                _ => {}
            }
        }
        Ok(EditorEvent::Eof)
    }

    async fn next_chord(&mut self) -> io::Result<Option<KeyChord>> {
        while let Some(event) = self.events().next().await {
            match event? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if let Some(chord) = self.queue_key(key) {
                        return Ok(Some(chord));
                    }
                }
                Event::Paste(text) => self.typeahead.push_str(&text.replace('\r', "")),
                _ => {}
            }
        }
        Ok(None)
    }

    fn buffer(&mut self) -> &mut dyn InputBuffer {
        &mut self.buffer
    }

    fn reset(&mut self) {
        self.buffer.clear();
        let typeahead = std::mem::take(&mut self.typeahead);
        self.buffer.insert_text(&typeahead);
        self.rendered_rows = 0;
    }
}

/// Terminal rows needed to show `text` at the given width.
fn rows_for(text: &str, columns: u16) -> u16 {
    let columns = usize::from(columns.max(1));
    let rows: usize = text
        .split('\n')
        .map(|line| UnicodeWidthStr::width(line).div_ceil(columns).max(1))
        .sum();
    u16::try_from(rows).unwrap_or(u16::MAX)
}
