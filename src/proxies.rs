//! D-Bus proxies for the `org.freedesktop.ModemManager1` service.
//!
//! Only the slice of the ModemManager API this daemon needs is declared here:
//! the power-cycle controls of the `Modem` interface and the 3GPP
//! registration state. Device enumeration and add/remove events go through
//! the standard object manager ([`zbus::fdo::ObjectManagerProxy`]) instead.

use std::fmt;

use zbus::proxy;

/// `MMModemPowerState`, as far as we use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PowerState {
    Off = 1,
    Low = 2,
    On = 3,
}

#[proxy(
    interface = "org.freedesktop.ModemManager1.Modem",
    default_service = "org.freedesktop.ModemManager1"
)]
pub trait Modem {
    /// `Enable(false)` disables the modem; there is no separate method.
    fn enable(&self, enable: bool) -> zbus::Result<()>;

    fn set_power_state(&self, state: u32) -> zbus::Result<()>;

    #[zbus(property)]
    fn primary_port(&self) -> zbus::Result<String>;
}

#[proxy(
    interface = "org.freedesktop.ModemManager1.Modem.Modem3gpp",
    default_service = "org.freedesktop.ModemManager1"
)]
pub trait Modem3gpp {
    #[zbus(property)]
    fn registration_state(&self) -> zbus::Result<u32>;
}

/// `MMModem3gppRegistrationState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
    HomeSmsOnly,
    RoamingSmsOnly,
    EmergencyOnly,
    HomeCsfbNotPreferred,
    RoamingCsfbNotPreferred,
    AttachedRplmn,
}

impl From<u32> for RegistrationState {
    fn from(raw: u32) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            6 => Self::HomeSmsOnly,
            7 => Self::RoamingSmsOnly,
            8 => Self::EmergencyOnly,
            9 => Self::HomeCsfbNotPreferred,
            10 => Self::RoamingCsfbNotPreferred,
            11 => Self::AttachedRplmn,
            _ => Self::Unknown,
        }
    }
}

impl RegistrationState {
    /// The two states in which a modem is not making progress towards
    /// registration and may need a power-cycle to recover.
    #[must_use]
    pub fn is_idle_or_denied(self) -> bool {
        matches!(self, Self::Idle | Self::Denied)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Home => "home",
            Self::Searching => "searching",
            Self::Denied => "denied",
            Self::Unknown => "unknown",
            Self::Roaming => "roaming",
            Self::HomeSmsOnly => "home-sms-only",
            Self::RoamingSmsOnly => "roaming-sms-only",
            Self::EmergencyOnly => "emergency-only",
            Self::HomeCsfbNotPreferred => "home-csfb-not-preferred",
            Self::RoamingCsfbNotPreferred => "roaming-csfb-not-preferred",
            Self::AttachedRplmn => "attached-rplmn",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
