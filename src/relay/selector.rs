use std::sync::{Arc, PoisonError, RwLock};

/// The currently selected currency code.
///
/// The selector loop is the only writer; clones handed to the status API only
/// read. Values are swapped whole under the lock, so readers never observe a
/// partial update.
#[derive(Debug, Clone)]
pub struct Selector {
    current: Arc<RwLock<String>>,
}

impl Selector {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial.into())),
        }
    }

    pub fn current(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Returns the previous code
    pub(crate) fn select(&self, code: &str) -> String {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, code.to_string())
    }
}
