//! The event loop that owns all modem state, and the bus wiring that feeds it.
//!
//! Everything that mutates the [`Registry`] happens on one task, which
//! consumes [`Event`]s from an unbounded channel. Producers are the
//! name-owner watcher, the object-manager signal forwarders, the sweep
//! ticker, and the per-kick operation/timer tasks. Because completions can
//! arrive after the modem they belong to was removed or its kick was
//! replaced, every handler re-validates the modem still exists and that the
//! event's token is still current before touching state.

use std::{sync::Arc, time::Duration};

use futures::StreamExt as _;
use tokio::{sync::mpsc, task::AbortHandle, time::Instant};
use tracing::{debug, error, info, warn};
use zbus::{
    fdo::{DBusProxy, ObjectManagerProxy},
    names::BusName,
    zvariant::OwnedObjectPath,
    Connection,
};

use crate::{
    consts::{
        MM_BUS_NAME, MM_OBJECT_MANAGER_PATH, MODEM_3GPP_INTERFACE, MODEM_INTERFACE,
    },
    proxies::{Modem3gppProxy, ModemProxy, RegistrationState},
    recovery::{Next, Phase, Recovery},
    registry::{ModemEntry, Registry},
    sweep::{self, Verdict},
};

#[derive(Debug)]
pub enum Event {
    /// ModemManager appeared on the bus (or was already there at startup).
    ServiceUp,
    /// ModemManager left the bus.
    ServiceDown,
    ModemAdded {
        path: OwnedObjectPath,
        interfaces: Vec<String>,
    },
    ModemRemoved {
        path: OwnedObjectPath,
    },
    RegistrationChanged {
        path: OwnedObjectPath,
        state: RegistrationState,
    },
    SweepTick,
    /// The inter-step delay for a kick elapsed.
    StepDue {
        path: OwnedObjectPath,
        token: u64,
    },
    /// An in-flight control operation completed. Failure details were already
    /// logged by the task that ran the operation.
    OpDone {
        path: OwnedObjectPath,
        token: u64,
        ok: bool,
    },
}

pub struct Engine {
    registry: Registry,
    conn: Option<Connection>,
    tx: mpsc::UnboundedSender<Event>,
    kick_threshold: Duration,
    step_delay: Duration,
    next_token: u64,
    /// Forwarders of the object-manager add/remove signals. Rebuilt whenever
    /// the service reappears.
    bus_tasks: Vec<AbortHandle>,
}

impl Engine {
    #[must_use]
    pub fn new(
        conn: Option<Connection>,
        tx: mpsc::UnboundedSender<Event>,
        kick_threshold: Duration,
        step_delay: Duration,
    ) -> Self {
        Self {
            registry: Registry::default(),
            conn,
            tx,
            kick_threshold,
            step_delay,
            next_token: 0,
            bus_tasks: Vec::new(),
        }
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::ServiceUp => self.handle_service_up().await,
            Event::ServiceDown => self.handle_service_down(),
            Event::ModemAdded { path, interfaces } => {
                self.handle_modem_added(path, &interfaces).await;
            }
            Event::ModemRemoved { path } => self.handle_modem_removed(&path),
            Event::RegistrationChanged { path, state } => {
                self.handle_registration_changed(&path, state);
            }
            Event::SweepTick => self.handle_sweep(),
            Event::StepDue { path, token } => self.handle_step_due(&path, token),
            Event::OpDone { path, token, ok } => self.handle_op_done(&path, token, ok),
        }
    }

    /// Cancels all outstanding work. Called on shutdown.
    pub fn shutdown(&mut self) {
        for task in self.bus_tasks.drain(..) {
            task.abort();
        }
        self.registry.clear();
    }

    fn fresh_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    async fn handle_service_up(&mut self) {
        info!("ModemManager is running");
        let Some(conn) = self.conn.clone() else {
            return;
        };
        // The object-manager subscription is rebuilt from scratch every time
        // the service reappears: signal streams set up while ModemManager
        // was off the bus do not reliably deliver later add/remove events.
        for task in self.bus_tasks.drain(..) {
            task.abort();
        }
        let enumerate = async {
            let object_manager = ObjectManagerProxy::builder(&conn)
                .destination(MM_BUS_NAME)?
                .path(MM_OBJECT_MANAGER_PATH)?
                .build()
                .await?;
            let added = object_manager.receive_interfaces_added().await?;
            let removed = object_manager.receive_interfaces_removed().await?;
            self.bus_tasks.push(spawn_added_forwarder(added, self.tx.clone()));
            self.bus_tasks
                .push(spawn_removed_forwarder(removed, self.tx.clone()));
            object_manager
                .get_managed_objects()
                .await
                .map_err(zbus::Error::from)
        };
        let managed = match enumerate.await {
            Ok(managed) => managed,
            Err(err) => {
                error!(%err, "failed to enumerate modems");
                return;
            }
        };
        for (path, interfaces) in managed {
            let interfaces: Vec<String> =
                interfaces.keys().map(ToString::to_string).collect();
            self.handle_modem_added(path, &interfaces).await;
        }
    }

    fn handle_service_down(&mut self) {
        info!("ModemManager no longer running");
        self.registry.clear();
    }

    async fn handle_modem_added(&mut self, path: OwnedObjectPath, interfaces: &[String]) {
        if !interfaces.iter().any(|i| i == MODEM_INTERFACE) {
            warn!(%path, "modem has no modem interface");
            return;
        }
        if !interfaces.iter().any(|i| i == MODEM_3GPP_INTERFACE) {
            info!(%path, "ignoring non-3GPP modem");
            return;
        }
        let Some(conn) = self.conn.clone() else {
            return;
        };
        let build = async {
            let modem = ModemProxy::builder(&conn).path(path.clone())?.build().await?;
            let modem_3gpp = Modem3gppProxy::builder(&conn)
                .path(path.clone())?
                .build()
                .await?;
            Ok::<_, zbus::Error>((modem, modem_3gpp))
        };
        let (modem, modem_3gpp) = match build.await {
            Ok(proxies) => proxies,
            Err(err) => {
                warn!(%path, %err, "failed to create modem proxies");
                return;
            }
        };
        match modem.primary_port().await {
            Ok(port) if !port.is_empty() => {}
            Ok(_) | Err(_) => {
                warn!(%path, "modem has no primary port");
                return;
            }
        }
        let initial_state = match modem_3gpp.registration_state().await {
            Ok(raw) => RegistrationState::from(raw),
            Err(err) => {
                warn!(%path, %err, "failed to read registration state; assuming unknown");
                RegistrationState::Unknown
            }
        };

        info!(%path, "modem added");
        let mut entry = ModemEntry::new(path.clone(), Arc::new(modem));
        entry.note_registration(initial_state);
        entry.watch_task = Some(spawn_registration_watch(
            path,
            modem_3gpp,
            self.tx.clone(),
        ));
        // Replaces (and tears down) any stale entry under the same path.
        self.registry.insert(entry);
    }

    fn handle_modem_removed(&mut self, path: &OwnedObjectPath) {
        if self.registry.remove(path) {
            info!(%path, "modem removed");
        }
    }

    fn handle_registration_changed(
        &mut self,
        path: &OwnedObjectPath,
        state: RegistrationState,
    ) {
        if let Some(entry) = self.registry.get_mut(path) {
            entry.note_registration(state);
        } else {
            debug!(%path, %state, "registration change for untracked modem");
        }
    }

    fn handle_sweep(&mut self) {
        let now = Instant::now();
        let mut due = Vec::new();
        for (path, entry) in self.registry.iter() {
            match sweep::evaluate(entry.idle_since, now, self.kick_threshold) {
                Verdict::NotIdle => {}
                Verdict::Wait(remaining) => {
                    info!(
                        %path,
                        wait_secs = remaining.as_secs(),
                        "not kicking yet",
                    );
                }
                Verdict::Kick(stuck_for) => {
                    info!(
                        %path,
                        stuck_secs = stuck_for.as_secs(),
                        "idle/denied too long; kicking",
                    );
                    due.push(path.clone());
                }
            }
        }
        for path in due {
            self.start_recovery(&path);
        }
    }

    /// Begins a fresh kick at the disable phase, cancelling any kick already
    /// in progress for the modem, and runs the first step immediately.
    fn start_recovery(&mut self, path: &OwnedObjectPath) {
        let token = self.fresh_token();
        let Some(entry) = self.registry.get_mut(path) else {
            return;
        };
        if let Some(old) = entry.recovery.take() {
            debug!(%path, "cancelling active kick before starting a new one");
            old.cancel();
        }
        entry.recovery = Some(Recovery::new(token));
        self.run_step(path);
    }

    /// Executes the current phase of the modem's kick: issues the phase's
    /// control operation as a spawned task, or tears the kick down if the
    /// sequence has finished.
    fn run_step(&mut self, path: &OwnedObjectPath) {
        let Some(entry) = self.registry.get_mut(path) else {
            return;
        };
        let Some(recovery) = entry.recovery.as_mut() else {
            return;
        };
        let phase = recovery.phase;
        if phase == Phase::Finish {
            info!(%path, "modem kicked");
            entry.recovery = None;
            return;
        }
        assert!(
            recovery.pending.is_none(),
            "operation already in flight for {path}"
        );
        info!(%path, ?phase, tries = recovery.tries, "running kick step");
        let ops = Arc::clone(&entry.ops);
        let token = recovery.token;
        let tx = self.tx.clone();
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            let result = match phase {
                Phase::Disable => ops.disable().await,
                Phase::LowPower => ops.set_low_power().await,
                Phase::Enable => ops.enable().await,
                Phase::Finish => unreachable!("finish issues no operation"),
            };
            let ok = match result {
                Ok(()) => true,
                Err(err) => {
                    warn!(path = %task_path, ?phase, %err, "kick operation failed");
                    false
                }
            };
            let _ = tx.send(Event::OpDone {
                path: task_path,
                token,
                ok,
            });
        });
        recovery.pending = Some(handle.abort_handle());
    }

    /// Schedules the next `StepDue` for the modem after the inter-step delay.
    fn schedule_step(&mut self, path: &OwnedObjectPath) {
        let token = self.fresh_token();
        let delay = self.step_delay;
        let Some(entry) = self.registry.get_mut(path) else {
            return;
        };
        let Some(recovery) = entry.recovery.as_mut() else {
            return;
        };
        assert!(
            recovery.pending.is_none(),
            "step already scheduled for {path}"
        );
        recovery.token = token;
        let tx = self.tx.clone();
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::StepDue {
                path: task_path,
                token,
            });
        });
        recovery.pending = Some(handle.abort_handle());
    }

    fn handle_step_due(&mut self, path: &OwnedObjectPath, token: u64) {
        let Some(entry) = self.registry.get_mut(path) else {
            debug!(%path, "step timer fired for removed modem");
            return;
        };
        let Some(recovery) = entry.recovery.as_mut() else {
            debug!(%path, "step timer fired with no active kick");
            return;
        };
        if recovery.token != token {
            debug!(%path, "dropping stale step timer");
            return;
        }
        recovery.pending = None;
        self.run_step(path);
    }

    fn handle_op_done(&mut self, path: &OwnedObjectPath, token: u64, ok: bool) {
        let next = {
            let Some(entry) = self.registry.get_mut(path) else {
                debug!(%path, "operation completed for removed modem");
                return;
            };
            let Some(recovery) = entry.recovery.as_mut() else {
                debug!(%path, "operation completed with no active kick");
                return;
            };
            if recovery.token != token {
                debug!(%path, "dropping stale operation completion");
                return;
            }
            recovery.pending = None;
            recovery.absorb_result(ok)
        };
        match next {
            Next::Schedule => self.schedule_step(path),
            Next::Abort => {
                warn!(%path, "too many retries; failing operation");
                self.run_step(path);
            }
        }
    }
}

/// Tracks whether ModemManager owns its well-known name, feeding
/// [`Event::ServiceUp`]/[`Event::ServiceDown`] into the loop. Runs until the
/// bus connection or the event loop goes away.
pub async fn watch_name_owner(
    conn: Connection,
    tx: mpsc::UnboundedSender<Event>,
) -> zbus::Result<()> {
    let dbus = DBusProxy::new(&conn).await?;
    let mut owner_changes = dbus.receive_name_owner_changed().await?;
    let name = BusName::try_from(MM_BUS_NAME).expect("well-known name must be valid");

    if dbus.name_has_owner(name.clone()).await? {
        let _ = tx.send(Event::ServiceUp);
    } else {
        info!("ModemManager is not running");
    }

    while let Some(change) = owner_changes.next().await {
        let args = change.args()?;
        if *args.name() != name {
            continue;
        }
        let event = if args.new_owner().is_some() {
            Event::ServiceUp
        } else {
            Event::ServiceDown
        };
        if tx.send(event).is_err() {
            break;
        }
    }
    Ok(())
}

fn spawn_added_forwarder(
    mut added: impl futures::Stream<Item = zbus::fdo::InterfacesAdded>
        + Unpin
        + Send
        + 'static,
    tx: mpsc::UnboundedSender<Event>,
) -> AbortHandle {
    tokio::spawn(async move {
        while let Some(signal) = added.next().await {
            let Ok(args) = signal.args() else {
                continue;
            };
            let interfaces: Vec<String> = args
                .interfaces_and_properties()
                .keys()
                .map(ToString::to_string)
                .collect();
            let event = Event::ModemAdded {
                path: args.object_path().to_owned().into(),
                interfaces,
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    })
    .abort_handle()
}

fn spawn_removed_forwarder(
    mut removed: impl futures::Stream<Item = zbus::fdo::InterfacesRemoved>
        + Unpin
        + Send
        + 'static,
    tx: mpsc::UnboundedSender<Event>,
) -> AbortHandle {
    tokio::spawn(async move {
        while let Some(signal) = removed.next().await {
            let Ok(args) = signal.args() else {
                continue;
            };
            // Losing the Modem interface means the device is gone; removals
            // of other interfaces leave the modem tracked.
            if !args.interfaces().iter().any(|i| *i == MODEM_INTERFACE) {
                continue;
            }
            let event = Event::ModemRemoved {
                path: args.object_path().to_owned().into(),
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    })
    .abort_handle()
}

/// Forwards a modem's registration-state property changes into the event
/// loop. The first item of a property stream is the current value, which
/// keeps a modem that is already idle/denied at discovery timed from the
/// start.
fn spawn_registration_watch(
    path: OwnedObjectPath,
    modem_3gpp: Modem3gppProxy<'static>,
    tx: mpsc::UnboundedSender<Event>,
) -> AbortHandle {
    tokio::spawn(async move {
        let mut changes = modem_3gpp.receive_registration_state_changed().await;
        while let Some(change) = changes.next().await {
            match change.get().await {
                Ok(raw) => {
                    let event = Event::RegistrationChanged {
                        path: path.clone(),
                        state: RegistrationState::from(raw),
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%path, %err, "failed to read changed registration state");
                }
            }
        }
    })
    .abort_handle()
}
