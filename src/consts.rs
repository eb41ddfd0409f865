use std::time::Duration;

pub const MM_BUS_NAME: &str = "org.freedesktop.ModemManager1";
pub const MM_OBJECT_MANAGER_PATH: &str = "/org/freedesktop/ModemManager1";
pub const MODEM_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem";
pub const MODEM_3GPP_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem.Modem3gpp";

/// How long a modem may sit in the idle/denied registration state before it
/// gets power-cycled.
#[cfg(not(debug_assertions))]
pub const KICK_THRESHOLD: Duration = Duration::from_secs(605);
#[cfg(debug_assertions)]
pub const KICK_THRESHOLD: Duration = Duration::from_secs(60);

/// Period of the sweep over all tracked modems. Kept well below
/// [`KICK_THRESHOLD`] so a stuck modem overshoots it by at most one period.
#[cfg(not(debug_assertions))]
pub const SWEEP_PERIOD: Duration = Duration::from_secs(300);
#[cfg(debug_assertions)]
pub const SWEEP_PERIOD: Duration = Duration::from_secs(15);

/// Delay between phases of the power-cycle sequence, and before a retry of a
/// failed phase.
pub const STEP_DELAY: Duration = Duration::from_secs(10);

/// Retries allowed per phase before the whole kick is abandoned.
pub const MAX_TRIES: u32 = 3;
