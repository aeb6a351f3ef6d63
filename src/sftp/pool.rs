use parking_lot::Mutex;
use std::{collections::VecDeque, fmt, ops::Deref, sync::Arc};

use super::{
    transport::{SshConnector, SshSession},
    SftpConfig,
};
use crate::error::Result;

/// Idle authenticated sessions of one server.
///
/// A session is owned by exactly one borrower at a time. Sessions that fail
/// their liveness check are never handed out and never taken back.
pub struct ConnectionPool {
    config: SftpConfig,
    connector: Arc<dyn SshConnector>,
    idle: Mutex<VecDeque<Box<dyn SshSession>>>,
}

impl ConnectionPool {
    pub fn new(config: SftpConfig, connector: Arc<dyn SshConnector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            idle: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &SftpConfig {
        &self.config
    }

    fn take_idle(&self) -> Option<Box<dyn SshSession>> {
        let mut dead = Vec::new();
        let found = {
            let mut idle = self.idle.lock();
            loop {
                match idle.pop_front() {
                    Some(session) if session.is_alive() => break Some(session),
                    Some(session) => dead.push(session),
                    None => break None,
                }
            }
        };

        if !dead.is_empty() {
            warn!(
                "discarding {} dead connection(s) to {}",
                dead.len(),
                self.config.server_url
            );
        }
        found
    }

    /// Borrows a live session, establishing a new one when none is idle.
    /// The session returns to the pool once the guard is dropped.
    pub async fn get_connection(self: &Arc<Self>) -> Result<PooledConnection> {
        let session = match self.take_idle() {
            Some(session) => {
                trace!("reusing connection to {}", self.config.server_url);
                session
            }
            None => {
                debug!("spawning connection to {}", self.config.verbose_junction());
                self.connector.connect(&self.config).await?
            }
        };

        Ok(PooledConnection {
            pool: self.clone(),
            session: Some(session),
        })
    }

    pub fn return_connection(&self, session: Box<dyn SshSession>) {
        if !session.is_alive() {
            debug!("dropping dead connection to {}", self.config.server_url);
            return;
        }
        self.idle.lock().push_back(session);
    }

    /// Number of sessions waiting to be borrowed
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("server", &self.config.server_url)
            .field("idle", &self.idle_count())
            .finish()
    }
}

/// A session borrowed from a [`ConnectionPool`]
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    session: Option<Box<dyn SshSession>>,
}

impl Deref for PooledConnection {
    type Target = dyn SshSession;

    fn deref(&self) -> &Self::Target {
        match &self.session {
            Some(session) => session.as_ref(),
            None => unreachable!("session is only taken in drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.return_connection(session);
        }
    }
}
