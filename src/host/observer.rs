use parking_lot::Mutex;
use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::utils;

/// Callback fired when an observed directory changes
pub type ChangeHandler = Box<dyn Fn() + Send + Sync>;

struct Observer {
    id: u64,
    path: String,
    handler: Arc<dyn Fn() + Send + Sync>,
}

#[derive(Default)]
struct Observers {
    last_id: u64,
    list: Vec<Observer>,
}

/// Per-host registry of directory change subscriptions.
///
/// Handlers are invoked on whichever task detected the change, after the
/// registry lock has been released.
#[derive(Default)]
pub struct DirectoryObservers {
    inner: Mutex<Observers>,
}

impl DirectoryObservers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn observe(self: &Arc<Self>, path: &str, handler: ChangeHandler) -> ObservationTicket {
        let mut inner = self.inner.lock();
        inner.last_id += 1;
        let id = inner.last_id;
        inner.list.push(Observer {
            id,
            path: utils::with_trailing_slash(path),
            handler: Arc::from(handler),
        });

        trace!("observing {path} with ticket #{id}");

        ObservationTicket {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Fires every handler registered for `path`
    pub fn notify(&self, path: &str) {
        let path = utils::with_trailing_slash(path);
        let handlers = self
            .inner
            .lock()
            .list
            .iter()
            .filter(|o| o.path == path)
            .map(|o| o.handler.clone())
            .collect::<Vec<_>>();

        for handler in handlers {
            handler();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stop_observing(&self, id: u64) {
        self.inner.lock().list.retain(|o| o.id != id);
    }
}

/// Subscription handle. Dropping it stops the observation.
pub struct ObservationTicket {
    id: u64,
    registry: Weak<DirectoryObservers>,
}

impl ObservationTicket {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for ObservationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationTicket")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for ObservationTicket {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.stop_observing(self.id);
        }
    }
}
