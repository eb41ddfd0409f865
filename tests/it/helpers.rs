use std::io;

use dbus_launch::{BusType, Daemon};
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use zbus::{connection, fdo::ObjectManager, interface};

pub const MODEM_PATH: &str = "/org/freedesktop/ModemManager1/Modem/8";

/// `MMModem3gppRegistrationState` values used by the tests.
pub const REGISTRATION_HOME: u32 = 1;
pub const REGISTRATION_DENIED: u32 = 3;

static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    }
});

/// Launches a private system bus. Returns `None` when no `dbus-daemon`
/// binary is available on the host.
pub async fn launch_system_dbus() -> Option<Daemon> {
    Lazy::force(&TRACING);
    tokio::task::spawn_blocking(|| {
        dbus_launch::Launcher::daemon()
            .bus_type(BusType::System)
            .launch()
            .map_err(|err: io::Error| {
                eprintln!("failed to launch dbus-daemon: {err}");
                err
            })
            .ok()
    })
    .await
    .expect("dbus launcher thread must not panic")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Disable,
    SetPower(u32),
    Enable,
}

struct FakeModem {
    calls: mpsc::UnboundedSender<Call>,
}

#[interface(name = "org.freedesktop.ModemManager1.Modem")]
impl FakeModem {
    async fn enable(&self, enable: bool) {
        let call = if enable { Call::Enable } else { Call::Disable };
        let _ = self.calls.send(call);
    }

    async fn set_power_state(&self, state: u32) {
        let _ = self.calls.send(Call::SetPower(state));
    }

    #[zbus(property)]
    fn primary_port(&self) -> String {
        "ttyUSB2".to_owned()
    }
}

struct FakeModem3gpp {
    registration_state: u32,
}

#[interface(name = "org.freedesktop.ModemManager1.Modem.Modem3gpp")]
impl FakeModem3gpp {
    #[zbus(property)]
    fn registration_state(&self) -> u32 {
        self.registration_state
    }
}

/// Claims the ModemManager well-known name on the given bus and serves one
/// fake modem, recording the control calls it receives.
pub async fn serve_modem_manager(
    address: &str,
    calls: mpsc::UnboundedSender<Call>,
    registration_state: u32,
) -> zbus::Result<zbus::Connection> {
    connection::Builder::address(address)?
        .name("org.freedesktop.ModemManager1")?
        .serve_at("/org/freedesktop/ModemManager1", ObjectManager)?
        .serve_at(MODEM_PATH, FakeModem { calls })?
        .serve_at(MODEM_PATH, FakeModem3gpp { registration_state })?
        .build()
        .await
}

pub async fn next_call(rx: &mut mpsc::UnboundedReceiver<Call>) -> Option<Call> {
    tokio::time::timeout(std::time::Duration::from_secs(30), rx.recv())
        .await
        .ok()
        .flatten()
}
