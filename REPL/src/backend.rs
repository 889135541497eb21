// Backend contract: the content handler every session routes free-form input to.

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;

use crate::images::Images;

/// Minimum capability a backend must provide.
///
/// `handle_input` returns `Ok(true)` on success and `Ok(false)` when the
/// backend already reported its own failure. `Err` is a fault the session
/// logs and reports. Backends run on a single-threaded scheduler, so the
/// returned future does not need to be `Send`.
#[async_trait(?Send)]
pub trait Backend {
    async fn handle_input(&self, input: &str, images: &Images) -> anyhow::Result<bool>;

    /// Optional cancel capability, queried once per cancelled turn.
    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        None
    }
}

/// Extended capability for backends that can abort their own work.
pub trait Cancellable {
    /// Signal cancellation. Must return immediately; the in-flight
    /// `handle_input` observes it at its next checkpoint.
    fn cancel(&self, reason: Option<&str>) -> anyhow::Result<()>;
}

/// Backend binding held by the registry: either unbound or bound to a
/// concrete backend.
#[derive(Clone, Default)]
pub enum BackendBinding {
    #[default]
    Unbound,
    Bound(Rc<dyn Backend>),
}

impl BackendBinding {
    pub fn get(&self) -> Option<Rc<dyn Backend>> {
        match self {
            BackendBinding::Unbound => None,
            BackendBinding::Bound(backend) => Some(Rc::clone(backend)),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, BackendBinding::Bound(_))
    }
}

impl fmt::Debug for BackendBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendBinding::Unbound => write!(f, "Unbound"),
            BackendBinding::Bound(_) => write!(f, "Bound(..)"),
        }
    }
}

/// Typed handle returned by [`crate::registry::ActionRegistry::bind_backend`].
#[derive(Clone)]
pub struct BackendHandle(Rc<dyn Backend>);

impl BackendHandle {
    pub(crate) fn new(backend: Rc<dyn Backend>) -> Self {
        Self(backend)
    }

    pub fn backend(&self) -> Rc<dyn Backend> {
        Rc::clone(&self.0)
    }

    pub fn supports_cancel(&self) -> bool {
        self.0.as_cancellable().is_some()
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("supports_cancel", &self.supports_cancel())
            .finish()
    }
}
