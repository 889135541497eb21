//! Key chord identifiers.
//!
//! Chords are plain strings in the prompt-style notation the registry binds
//! against: `f1`, `c-x` (Ctrl+X), `escape x` (Alt+X), `escape`, `tab`.

use std::fmt;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyChord(String);

impl KeyChord {
    /// Normalize a chord string. `ctrl-x`/`Ctrl+X` become `c-x`,
    /// `alt-x`/`Alt+X` become `escape x`, everything is lower-cased.
    pub fn new(chord: &str) -> Self {
        let lower = chord.trim().to_lowercase();
        let normalized = if let Some(rest) = strip_any(&lower, &["ctrl-", "ctrl+", "control-"]) {
            format!("c-{}", rest)
        } else if let Some(rest) = strip_any(&lower, &["alt-", "alt+", "meta-"]) {
            format!("escape {}", rest)
        } else {
            lower.split_whitespace().collect::<Vec<_>>().join(" ")
        };
        KeyChord(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert a terminal key event into a chord. Plain characters, Enter,
    /// Backspace and arrows belong to the line editor and yield `None`.
    pub fn from_key_event(event: &KeyEvent) -> Option<Self> {
        let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
        let alt = event.modifiers.contains(KeyModifiers::ALT);

        let chord = match event.code {
            KeyCode::F(n) => format!("f{}", n),
            KeyCode::Char(c) if ctrl => format!("c-{}", c.to_ascii_lowercase()),
            KeyCode::Char(c) if alt => format!("escape {}", c.to_ascii_lowercase()),
            KeyCode::Enter if alt => "escape enter".to_string(),
            KeyCode::Esc => "escape".to_string(),
            KeyCode::Tab => "tab".to_string(),
            KeyCode::BackTab => "s-tab".to_string(),
            _ => return None,
        };
        Some(KeyChord(chord))
    }
}

fn strip_any<'a>(value: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|p| value.strip_prefix(p))
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyChord {
    fn from(value: &str) -> Self {
        KeyChord::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(KeyChord::new("F1").as_str(), "f1");
        assert_eq!(KeyChord::new("ctrl-s").as_str(), "c-s");
        assert_eq!(KeyChord::new("Ctrl+S").as_str(), "c-s");
        assert_eq!(KeyChord::new("alt-c").as_str(), "escape c");
        assert_eq!(KeyChord::new("escape   c").as_str(), "escape c");
    }

    #[test]
    fn test_from_key_event() {
        let alt_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::ALT);
        assert_eq!(KeyChord::from_key_event(&alt_c), Some(KeyChord::new("escape c")));

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyChord::from_key_event(&ctrl_c), Some(KeyChord::new("c-c")));

        let f6 = KeyEvent::new(KeyCode::F(6), KeyModifiers::NONE);
        assert_eq!(KeyChord::from_key_event(&f6), Some(KeyChord::new("f6")));

        let alt_enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::ALT);
        assert_eq!(
            KeyChord::from_key_event(&alt_enter),
            Some(KeyChord::new("escape enter"))
        );
    }

    #[test]
    fn test_editing_keys_are_not_chords() {
        let plain = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyChord::from_key_event(&plain), None);

        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(KeyChord::from_key_event(&enter), None);
    }
}
