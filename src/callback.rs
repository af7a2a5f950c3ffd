//! The upward user-callback event taxonomy.

use crate::profile::Bssid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PsMode {
    Ieee,
    DeepSleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureReason {
    NetworkNotFound,
    BgscanNetworkNotFound,
    AuthFailed,
    AddressFailed,
    /// The scan command itself failed (not a completed scan with no match).
    ScanFailed,
}

/// Every outcome the control task can publish to the registered callback.
/// This is the only channel terminal connection outcomes, DHCP outcomes, PS
/// crossings and µAP transitions travel on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UserEvent {
    Success,
    AuthSuccess,
    ConnectFailed(FailureReason),
    NetworkNotFound,
    BgscanNetworkNotFound,
    NetworkAuthFailed,
    AddressSuccess,
    AddressFailed,
    LinkLost,
    ChanSwitch { new_channel: u8 },
    UserDisconnect,
    Initialized,
    InitializationFailed,
    PsEnter(PsMode),
    PsExit(PsMode),
    UapSuccess,
    UapClientAssoc { mac: Bssid },
    UapClientConn { mac: Bssid },
    UapClientDissoc { mac: Bssid },
    UapStartFailed,
    UapStopFailed,
    UapStopped,
    RssiLow,
}
