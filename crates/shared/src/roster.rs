use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Ordered list of models to try, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoster {
    models: Vec<String>,
}

impl ModelRoster {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.models.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Process-wide pointer into a [`ModelRoster`].
///
/// Cloning shares the same counter. The index only ever grows: once a model
/// ran out of quota it is skipped for the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct RosterCursor {
    index: Arc<AtomicUsize>,
}

impl RosterCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Move past `observed`, the index the caller was using when it hit a
    /// quota error. If another worker already moved on, the cursor is left
    /// alone. Returns the index to use next.
    pub fn advance_from(&self, observed: usize) -> usize {
        match self
            .index
            .compare_exchange(observed, observed + 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => observed + 1,
            Err(actual) => actual,
        }
    }

    pub fn is_exhausted(&self, roster: &ModelRoster) -> bool {
        self.current() >= roster.len()
    }
}
