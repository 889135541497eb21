pub mod action;
pub mod backend;
pub mod cancel;
pub mod clipboard;
pub mod command;
pub mod config;
pub mod editor;
pub mod error;
pub mod headless;
pub mod images;
pub mod keys;
pub mod output;
pub mod registry;
pub mod repl;
pub mod state;

pub use action::{Action, ActionContext, ActionHandler, TriggerSource};
pub use backend::{Backend, BackendHandle, Cancellable};
pub use cancel::CancelTrigger;
pub use config::ReplConfig;
pub use editor::{EditorEvent, InputBuffer, LineEditor, TerminalEditor, TextBuffer};
pub use error::{ActionError, ConfigError, ConflictField, ImageError};
pub use headless::{HeadlessRepl, HeadlessReport};
pub use images::{ImageBuffer, ImageData, Images};
pub use keys::KeyChord;
pub use output::{BufferedEmitter, Emit, PlainEmitter, StyledEmitter};
pub use registry::{ActionRegistry, Dispatch};
pub use repl::AsyncRepl;
pub use state::{SessionState, SessionStats, TurnOutcome};
