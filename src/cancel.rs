use std::{fmt, sync::Arc};

use crate::error::{Error, Result};

/// Cooperative cancellation probe.
///
/// Long-running operations poll it between protocol exchanges and abort with
/// [`Error::Cancelled`] once it reports `true`.
#[derive(Clone, Default)]
pub struct CancelChecker(Option<Arc<dyn Fn() -> bool + Send + Sync>>);

impl CancelChecker {
    /// A checker that never cancels
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self(Some(Arc::new(f)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().map_or(false, |f| f())
    }

    /// Returns [`Error::Cancelled`] if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancelChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelChecker")
            .field(&self.0.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test_cancel {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn test_cancel_checker() {
        assert!(CancelChecker::none().check().is_ok());

        let flag = Arc::new(AtomicBool::new(false));
        let checker = {
            let flag = flag.clone();
            CancelChecker::new(move || flag.load(Ordering::Relaxed))
        };
        assert!(!checker.is_cancelled());

        flag.store(true, Ordering::Relaxed);
        assert!(matches!(checker.check(), Err(Error::Cancelled)));
    }
}
