//! The registry of tracked modems and the idle/denied timer projection.

use std::{collections::HashMap, sync::Arc};

use tokio::{task::AbortHandle, time::Instant};
use tracing::info;
use zbus::zvariant::OwnedObjectPath;

use crate::{
    proxies::RegistrationState,
    recovery::{ModemOps, Recovery},
};

/// One tracked modem. Created when ModemManager reports a 3GPP-capable modem,
/// destroyed when the modem or the service goes away.
pub struct ModemEntry {
    pub path: OwnedObjectPath,
    /// Handle for issuing control operations against the modem.
    pub ops: Arc<dyn ModemOps>,
    /// When the modem entered the idle/denied registration state. `None`
    /// while the modem is registered (or registering).
    pub idle_since: Option<Instant>,
    /// The active kick, if any.
    pub recovery: Option<Recovery>,
    /// Task forwarding the modem's registration-state changes into the event
    /// loop.
    pub watch_task: Option<AbortHandle>,
}

impl ModemEntry {
    #[must_use]
    pub fn new(path: OwnedObjectPath, ops: Arc<dyn ModemOps>) -> Self {
        Self {
            path,
            ops,
            idle_since: None,
            recovery: None,
            watch_task: None,
        }
    }

    /// Projects a registration-state notification onto the idle/denied timer.
    ///
    /// Entering idle/denied stamps the timer once; any other state clears it
    /// unconditionally.
    pub fn note_registration(&mut self, state: RegistrationState) {
        info!(path = %self.path, %state, "registration state changed");
        if state.is_idle_or_denied() {
            if self.idle_since.is_none() {
                self.idle_since = Some(Instant::now());
                info!(path = %self.path, "saving idle/denied timestamp");
            }
        } else {
            if self.idle_since.is_some() {
                info!(path = %self.path, "registered; clearing idle/denied timestamp");
            }
            self.idle_since = None;
        }
    }

    /// Cancels everything outstanding for this modem: the registration watch
    /// and any active kick with its in-flight call or timer.
    pub fn teardown(&mut self) {
        if let Some(recovery) = self.recovery.take() {
            recovery.cancel();
        }
        if let Some(watch) = self.watch_task.take() {
            watch.abort();
        }
    }
}

impl Drop for ModemEntry {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Default)]
pub struct Registry {
    modems: HashMap<OwnedObjectPath, ModemEntry>,
}

impl Registry {
    /// Inserts a modem, tearing down any entry previously stored under the
    /// same path.
    pub fn insert(&mut self, entry: ModemEntry) {
        self.modems.insert(entry.path.clone(), entry);
    }

    pub fn remove(&mut self, path: &OwnedObjectPath) -> bool {
        self.modems.remove(path).is_some()
    }

    /// Drops every entry, cancelling all outstanding work. Used when the
    /// service leaves the bus and on shutdown.
    pub fn clear(&mut self) {
        info!("clearing modems");
        self.modems.clear();
    }

    #[must_use]
    pub fn get(&self, path: &OwnedObjectPath) -> Option<&ModemEntry> {
        self.modems.get(path)
    }

    pub fn get_mut(&mut self, path: &OwnedObjectPath) -> Option<&mut ModemEntry> {
        self.modems.get_mut(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OwnedObjectPath, &ModemEntry)> {
        self.modems.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modems.is_empty()
    }
}
