//! Building the bus connection and running the daemon.

use std::time::Duration;

use tokio::{
    signal::unix::{self, SignalKind},
    sync::mpsc,
};
use tracing::{debug, error, info, warn};
use zbus::{connection, Connection};

use crate::{
    consts::{KICK_THRESHOLD, STEP_DELAY, SWEEP_PERIOD},
    supervisor::{self, Engine},
    sweep,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid system D-Bus address")]
    SystemDbusAddress(#[source] zbus::Error),
    #[error("failed to establish connection to system dbus")]
    EstablishSystemConnection(#[source] zbus::Error),
    #[error("failed to install signal handler")]
    SignalHandler(#[source] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Explicit system bus address; `None` uses the default system bus.
    /// Integration tests point this at a private bus.
    pub system_dbus_path: Option<String>,
    pub kick_threshold: Duration,
    pub sweep_period: Duration,
    pub step_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_dbus_path: None,
            kick_threshold: KICK_THRESHOLD,
            sweep_period: SWEEP_PERIOD,
            step_delay: STEP_DELAY,
        }
    }
}

pub struct Application {
    pub connection: Connection,
    pub settings: Settings,
}

impl Application {
    /// Connects to the system D-Bus instance.
    ///
    /// This is the only failure that terminates the daemon; everything past
    /// it (ModemManager absent, modems misbehaving) is ridden out.
    pub async fn build(settings: Settings) -> Result<Application, Error> {
        let builder = if let Some(path) = settings.system_dbus_path.as_deref() {
            connection::Builder::address(path).map_err(Error::SystemDbusAddress)?
        } else {
            connection::Builder::system().map_err(Error::SystemDbusAddress)?
        };
        let connection = builder
            .build()
            .await
            .map_err(Error::EstablishSystemConnection)?;

        debug!(
            unique_bus_name = ?connection.unique_name(),
            "system dbus assigned unique bus name",
        );

        Ok(Self {
            connection,
            settings,
        })
    }

    /// Runs the event loop until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<(), Error> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = Engine::new(
            Some(self.connection.clone()),
            tx.clone(),
            self.settings.kick_threshold,
            self.settings.step_delay,
        );

        let owner_watch = tokio::spawn({
            let connection = self.connection.clone();
            let tx = tx.clone();
            async move {
                if let Err(err) = supervisor::watch_name_owner(connection, tx).await {
                    error!(%err, "name owner watch failed");
                }
            }
        });
        let sweeper = tokio::spawn(sweep::tick_loop(self.settings.sweep_period, tx));

        let mut sigterm =
            unix::signal(SignalKind::terminate()).map_err(Error::SignalHandler)?;
        let mut sigint =
            unix::signal(SignalKind::interrupt()).map_err(Error::SignalHandler)?;

        info!("watching D-Bus for ModemManager");
        loop {
            tokio::select! {
                Some(event) = rx.recv() => engine.handle_event(event).await,
                _ = sigterm.recv() => {
                    warn!("received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    warn!("received SIGINT");
                    break;
                }
            }
        }

        info!("shutting down");
        owner_watch.abort();
        sweeper.abort();
        engine.shutdown();
        Ok(())
    }
}
