//! The public API surface: a thin, non-blocking handle over the event bus
//! plus synchronous reads of the single-writer snapshot fields, mirroring
//! the split between a driver's resources, its control handle, and its
//! background runner.
//!
//! `WlanResources` owns everything the control task and the handle share by
//! reference (`EventBus`, `ScanLock`, `SharedStore`, `SharedScanResults`,
//! `WlanState`); [`new`] carves a [`Handle`] and a [`ControlTask`] out of it,
//! both borrowing `'a` from the same `WlanResources`.

use embassy_sync::channel::Channel;

use crate::callback::UserEvent;
use crate::control::{ControlTask, Event, EventBus};
use crate::driver::Driver;
use crate::error::Error;
use crate::hostsleep::WakeConditions;
use crate::profile::{Bssid, Profile};
use crate::scan::{ScanEntry, ScanLock, SharedScanResults};
use crate::sta::StaState;
use crate::state::{Ipv4Address, WlanState};
use crate::store::SharedStore;
use crate::uap::UapState;

/// Bundles the pieces a [`Handle`] and a [`ControlTask`] must share by `&'a`
/// reference. Declare one of these `static` (or in an embassy `StaticCell`)
/// and pass it to [`new`].
pub struct WlanResources {
    bus: EventBus,
    scan_lock: ScanLock,
    store: SharedStore,
    scan_results: SharedScanResults,
    state: WlanState,
}

impl WlanResources {
    /// Not `const`: `NetworkStore::new` fills its slots through a loop, so
    /// this is built at runtime (e.g. behind a `StaticCell`) rather than as
    /// a `static`.
    pub fn new() -> Self {
        Self {
            bus: Channel::new(),
            scan_lock: ScanLock::new(),
            store: SharedStore::new(),
            scan_results: SharedScanResults::new(),
            state: WlanState::new(),
        }
    }
}

impl Default for WlanResources {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a [`WlanResources`] into a [`Handle`] (clonable by sharing `'a`
/// references; safe to hand to as many API callers as needed) and the
/// [`ControlTask`] that must be driven by exactly one spawned task's `run`
/// loop — a second concurrent run is ruled out structurally, since there's
/// only one `ControlTask` to spawn.
pub fn new<'a, D: Driver, F: FnMut(UserEvent)>(
    resources: &'a WlanResources,
    driver: D,
    on_event: F,
) -> (Handle<'a>, ControlTask<'a, D, F>) {
    let control = ControlTask::new(
        driver,
        &resources.store,
        &resources.scan_lock,
        &resources.scan_results,
        &resources.state,
        on_event,
    );
    let handle = Handle {
        bus: &resources.bus,
        scan_lock: &resources.scan_lock,
        store: &resources.store,
        scan_results: &resources.scan_results,
        state: &resources.state,
    };
    (handle, control)
}

/// The user-facing API. Every mutating method is a non-blocking enqueue onto
/// the event bus — `Error::Nomem` means the queue is momentarily full, not
/// that the operation is invalid. Reads go straight to the shared store /
/// scan-result buffer / state snapshot without touching the bus.
#[derive(Clone, Copy)]
pub struct Handle<'a> {
    bus: &'a EventBus,
    scan_lock: &'a ScanLock,
    store: &'a SharedStore,
    scan_results: &'a SharedScanResults,
    state: &'a WlanState,
}

impl<'a> Handle<'a> {
    fn send(&self, event: Event) -> Result<(), Error> {
        self.bus.try_send(event).map_err(|_| Error::Nomem)
    }

    // --- Network Store ---

    pub fn add_network(&self, profile: Profile) -> Result<usize, Error> {
        self.store.add(profile)
    }

    pub fn remove_network(&self, name: &str) -> Result<(), Error> {
        self.store.remove(name, |idx| self.state.is_busy(idx))
    }

    pub fn get_network_by_name(&self, name: &str) -> Option<(usize, Profile)> {
        self.store.get_by_name(name)
    }

    pub fn get_network_by_index(&self, idx: usize) -> Option<Profile> {
        self.store.get_by_index(idx)
    }

    pub fn get_network_count(&self) -> usize {
        self.store.count()
    }

    // --- STA control ---

    /// Takes the scan lock synchronously before enqueueing a connect. A
    /// caller that can't get the lock immediately gets `Error::State` rather
    /// than blocking, keeping this method non-async.
    pub fn connect(&self, idx: usize) -> Result<(), Error> {
        if !self.scan_lock.try_acquire() {
            return Err(Error::State);
        }
        self.scan_lock.release();
        self.send(Event::UserConnect { idx })
    }

    pub fn connect_by_name(&self, name: &str) -> Result<(), Error> {
        let (idx, _) = self.store.get_by_name(name).ok_or(Error::Param)?;
        self.connect(idx)
    }

    pub fn reassociate(&self) -> Result<(), Error> {
        if !self.scan_lock.try_acquire() {
            return Err(Error::State);
        }
        self.scan_lock.release();
        self.send(Event::UserReassociate)
    }

    pub fn disconnect(&self) -> Result<(), Error> {
        self.send(Event::UserDisconnect)
    }

    // --- µAP control ---

    pub fn start_network(&self, idx: usize) -> Result<(), Error> {
        self.send(Event::UserStartUap { idx })
    }

    pub fn start_network_by_name(&self, name: &str) -> Result<(), Error> {
        let (idx, _) = self.store.get_by_name(name).ok_or(Error::Param)?;
        self.start_network(idx)
    }

    pub fn stop_network(&self) -> Result<(), Error> {
        self.send(Event::UserStopUap)
    }

    // --- Scanning ---

    pub fn scan(&self) -> Result<(), Error> {
        self.send(Event::UserScan)
    }

    /// Reading results is most meaningful right after the scan callback
    /// fires; see [`crate::scan::SharedScanResults`] for how stale reads are
    /// handled.
    pub fn get_scan_result(&self, index: usize) -> Option<ScanEntry> {
        self.scan_results.get(index)
    }

    pub fn scan_result_count(&self) -> usize {
        self.scan_results.len()
    }

    // --- Snapshot reads ---

    pub fn get_connection_state(&self) -> StaState {
        self.state.connection_state()
    }

    pub fn get_uap_connection_state(&self) -> UapState {
        self.state.uap_connection_state()
    }

    pub fn get_address(&self) -> Option<Ipv4Address> {
        self.state.address()
    }

    pub fn get_uap_address(&self) -> Option<Ipv4Address> {
        self.state.uap_address()
    }

    pub fn get_current_network(&self) -> Option<usize> {
        self.state.current_network()
    }

    pub fn get_current_uap_network(&self) -> Option<usize> {
        self.state.current_uap_network()
    }

    pub fn get_current_channel(&self) -> u8 {
        self.state.current_channel()
    }

    pub fn get_current_bssid(&self) -> Bssid {
        self.state.current_bssid()
    }

    pub fn get_current_signal_strength(&self) -> i8 {
        self.state.current_signal_strength()
    }

    pub fn get_ps_mode(&self) -> (bool, bool) {
        self.state.ps_mode()
    }

    pub fn get_device_mac(&self) -> Bssid {
        self.state.mac()
    }

    pub fn get_device_uap_mac(&self) -> Bssid {
        self.state.uap_mac()
    }

    pub fn get_fw_version_ext(&self) -> heapless::String<48> {
        self.state.fw_version()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    // --- Power-save ---

    pub fn ieeeps_on(&self, wake_conditions: WakeConditions) -> Result<(), Error> {
        self.send(Event::UserIeeePsOn { wake_conditions })
    }

    pub fn ieeeps_off(&self) -> Result<(), Error> {
        self.send(Event::UserIeeePsOff)
    }

    pub fn deepsleepps_on(&self) -> Result<(), Error> {
        self.send(Event::UserDeepSleepPsOn)
    }

    pub fn deepsleepps_off(&self) -> Result<(), Error> {
        self.send(Event::UserDeepSleepPsOff)
    }

    // --- Host sleep ---

    pub fn send_host_sleep(&self, conditions: WakeConditions) -> Result<(), Error> {
        self.send(Event::UserSendHostSleep { conditions })
    }

    pub fn cancel_host_sleep(&self) -> Result<(), Error> {
        self.send(Event::UserCancelHostSleep)
    }

    /// `manual` mirrors the source's `config_host_sleep(mef, conditions,
    /// manual)` third argument; this crate doesn't distinguish MEF-filter
    /// programming from plain wake-condition programming (both land on
    /// `set_packet_filters`), so `manual` only selects cancel-vs-configure.
    pub fn config_host_sleep(&self, conditions: WakeConditions, manual: bool) -> Result<(), Error> {
        if manual && conditions.is_cancel() {
            self.cancel_host_sleep()
        } else {
            self.send_host_sleep(conditions)
        }
    }

    // --- Reassoc / roaming control ---

    pub fn set_reassoc_control(&self, enabled: bool) -> Result<(), Error> {
        self.send(Event::UserSetReassocControl(enabled))
    }

    pub fn set_rssi_low_threshold(&self, threshold: i8) -> Result<(), Error> {
        self.send(Event::UserSetRssiLowThreshold(threshold))
    }

    pub fn set_roaming(&self, enabled: bool, rssi_threshold: i8) -> Result<(), Error> {
        self.send(Event::UserSetRoaming { enabled, rssi_threshold })
    }

    pub fn request_neighbor_report(&self) -> Result<(), Error> {
        self.send(Event::UserRequestNeighborReport)
    }

    #[cfg_attr(not(feature = "roaming-11r"), allow(unused_variables))]
    pub fn ft_roam(&self, bssid: Bssid, channel: u8) -> Result<(), Error> {
        #[cfg(feature = "roaming-11r")]
        {
            self.send(Event::UserFtRoam { bssid, channel })
        }
        #[cfg(not(feature = "roaming-11r"))]
        {
            Err(Error::NotSupported)
        }
    }

    // --- Lifecycle ---

    pub fn stop(&self) -> Result<(), Error> {
        self.send(Event::UserStop)
    }
}
