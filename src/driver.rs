//! The downward contract to the attached radio firmware.
//!
//! The control task only ever talks to the SDIO/firmware link through this
//! trait. Everything above it — profiles, scan coordination, the STA/µAP
//! state machines — is driver-agnostic; a test build supplies a mock
//! implementation instead of real firmware commands.

use crate::error::Error;
use crate::hostsleep::{HostSleepAction, SleepInterface};
use crate::powersave::{DeepSleepPsMode, IeeePsMode};
use crate::profile::{BssType, Bssid, Profile, Ssid};
use crate::roam::BtmStatus;
use crate::scan::ScanCommand;

/// Parameters the control task hands the driver to join a specific entry:
/// resolved security material plus the winning scan entry's BSSID/channel,
/// so the firmware doesn't have to re-run its own match.
#[derive(Debug, Clone)]
pub struct AssocRequest<'a> {
    pub profile: &'a Profile,
    pub bssid: Bssid,
    pub channel: u8,
}

/// µAP start parameters.
#[derive(Debug, Clone)]
pub struct UapStartRequest<'a> {
    pub profile: &'a Profile,
    pub channel: u8,
}

/// The firmware/driver contract. All operations are fallible and
/// non-blocking from the control task's perspective: a driver that needs to
/// wait for firmware replies does so inside these futures, and reports
/// terminal async outcomes (join succeeded, deauth received, scan done) back
/// out through [`crate::control::Event`] rather than a return value of
/// `start_scan`/`associate` themselves.
pub trait Driver {
    /// Begins a scan. Results arrive later via
    /// [`crate::control::Event::ScanComplete`].
    async fn start_scan(&mut self, cmd: &ScanCommand) -> Result<(), Error>;

    /// Cancels an in-flight scan, if any. Idempotent.
    async fn cancel_scan(&mut self);

    /// Begins association/4-way-handshake with a specific BSSID.
    async fn associate(&mut self, req: AssocRequest<'_>) -> Result<(), Error>;

    /// Tears down the current STA association.
    async fn disassociate(&mut self) -> Result<(), Error>;

    /// Starts a µAP on the given profile/channel.
    async fn start_uap(&mut self, req: UapStartRequest<'_>) -> Result<(), Error>;

    /// Stops the running µAP.
    async fn stop_uap(&mut self) -> Result<(), Error>;

    /// Requests IEEE power-save mode change.
    async fn set_ieee_ps(&mut self, mode: IeeePsMode) -> Result<(), Error>;

    /// Requests deep-sleep power-save mode change.
    async fn set_deep_sleep_ps(&mut self, mode: DeepSleepPsMode) -> Result<(), Error>;

    /// Arms the firmware's host-sleep wake conditions on the resolved
    /// interface, carrying that interface's current IPv4 address.
    async fn send_host_sleep_cfg(
        &mut self,
        iface: SleepInterface,
        ipv4: Option<core::net::Ipv4Addr>,
        action: HostSleepAction,
        wake_conditions: u32,
    ) -> Result<(), Error>;

    /// Sends the sleep-confirm handshake on the given interface, acking the
    /// firmware's sleep offer. Issued right after `send_host_sleep_cfg`
    /// when entering `PreSleep` with no in-flight transfer.
    async fn send_sleep_confirm(&mut self, iface: SleepInterface) -> Result<(), Error>;

    /// Requests an 802.11k neighbor report for the current BSS.
    async fn request_neighbor_report(&mut self) -> Result<(), Error>;

    /// Sends an 802.11v BTM response frame (accept toward `bssid`, or reject
    /// with no suitable candidates). Only called for a roam triggered by a
    /// BTM query; an 11k-triggered roam never calls this.
    async fn send_btm_response(&mut self, bssid: Option<Bssid>, status: BtmStatus) -> Result<(), Error>;

    /// Requests 802.11r fast-transition roam to a neighbor BSSID.
    #[cfg(feature = "roaming-11r")]
    async fn ft_roam(&mut self, bssid: Bssid, channel: u8) -> Result<(), Error>;

    /// Arms the firmware-side RSSI-low trigger.
    async fn set_rssi_low_threshold(&mut self, threshold: i8) -> Result<(), Error>;

    /// Programs the background-scan SSID/RSSI config driving a soft roam.
    async fn config_bgscan_and_rssi(&mut self, ssid: &Ssid) -> Result<(), Error>;

    /// Installs the wake-on-X packet filter set.
    async fn set_packet_filters(&mut self, wake_conditions: u32) -> Result<(), Error>;

    /// Fetches the STA interface MAC, cached by `init`.
    async fn get_device_mac(&mut self) -> Result<Bssid, Error>;

    /// Fetches the µAP interface MAC, cached by `init`.
    async fn get_device_uap_mac(&mut self) -> Result<Bssid, Error>;

    /// Fetches the firmware version string, cached by `init`.
    async fn get_fw_version_ext(&mut self) -> Result<heapless::String<48>, Error>;
}

/// Helper a driver uses to build a directed hidden-SSID follow-up scan
/// command from channels collected during the broadcast pass.
pub fn hidden_followup(bss_type: BssType, ssid: Ssid, channels: &[u8]) -> ScanCommand {
    let mut chans = heapless::Vec::new();
    for &c in channels {
        let _ = chans.push(c);
    }
    ScanCommand::directed(bss_type, ssid, chans)
}
