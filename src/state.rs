//! Shared connection snapshot: the single-writer fields a
//! [`crate::handle::Handle`] can read synchronously, without routing
//! through the event bus — connection state, addresses, channel/BSSID/RSSI,
//! PS mode, cached MAC/firmware version.
//!
//! One `Mutex<RefCell<Shared>>` reachable from both sides by `&'a`
//! reference, written only by the control task, read by the handle.

use core::cell::RefCell;
use core::net::Ipv4Addr;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::profile::Bssid;
use crate::sta::StaState;
use crate::uap::UapState;

/// Resolved IPv4 addressing, published once a STA or µAP interface has an
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ipv4Address {
    pub address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
}

impl Default for Ipv4Address {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            dns1: None,
            dns2: None,
        }
    }
}

struct Shared {
    sta_state: StaState,
    uap_state: UapState,
    current_network_idx: Option<usize>,
    current_uap_network_idx: Option<usize>,
    sta_address: Option<Ipv4Address>,
    uap_address: Option<Ipv4Address>,
    channel: u8,
    bssid: Bssid,
    signal_strength: i8,
    ieee_ps_active: bool,
    deep_sleep_ps_active: bool,
    mac: Bssid,
    uap_mac: Bssid,
    fw_version: heapless::String<48>,
    initialized: bool,
}

impl Shared {
    const fn new() -> Self {
        Self {
            sta_state: StaState::Initializing,
            uap_state: UapState::Initializing,
            current_network_idx: None,
            current_uap_network_idx: None,
            sta_address: None,
            uap_address: None,
            channel: 0,
            bssid: [0; 6],
            signal_strength: 0,
            ieee_ps_active: false,
            deep_sleep_ps_active: false,
            mac: [0; 6],
            uap_mac: [0; 6],
            fw_version: heapless::String::new(),
            initialized: false,
        }
    }
}

/// Storage for the shared snapshot; lives as long as the
/// [`crate::handle::WlanResources`] it's embedded in.
pub struct WlanState {
    shared: Mutex<NoopRawMutex, RefCell<Shared>>,
}

impl WlanState {
    pub fn new() -> Self {
        Self { shared: Mutex::new(RefCell::new(Shared::new())) }
    }
}

impl Default for WlanState {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-task-side and handle-side both hold `&'a WlanState`; writes are
/// only ever issued from the control task, reads from either side.
impl WlanState {
    pub(crate) fn set_init_done(&self, mac: Bssid, uap_mac: Bssid, fw_version: heapless::String<48>) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.mac = mac;
            s.uap_mac = uap_mac;
            s.fw_version = fw_version;
            s.initialized = true;
        })
    }

    pub(crate) fn set_sta_state(&self, state: StaState, idx: Option<usize>) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.sta_state = state;
            s.current_network_idx = idx;
            if !matches!(state, StaState::Connected) {
                s.sta_address = None;
            }
        })
    }

    pub(crate) fn set_uap_state(&self, state: UapState, idx: Option<usize>) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.uap_state = state;
            s.current_uap_network_idx = idx;
            if matches!(state, UapState::Initializing) {
                s.uap_address = None;
            }
        })
    }

    pub(crate) fn set_sta_address(&self, addr: Option<Ipv4Address>) {
        self.shared.lock(|s| s.borrow_mut().sta_address = addr)
    }

    pub(crate) fn set_uap_address(&self, addr: Option<Ipv4Address>) {
        self.shared.lock(|s| s.borrow_mut().uap_address = addr)
    }

    pub(crate) fn set_radio(&self, channel: u8, bssid: Bssid, signal_strength: i8) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.channel = channel;
            s.bssid = bssid;
            s.signal_strength = signal_strength;
        })
    }

    pub(crate) fn set_ps_active(&self, ieee: Option<bool>, deep_sleep: Option<bool>) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            if let Some(v) = ieee {
                s.ieee_ps_active = v;
            }
            if let Some(v) = deep_sleep {
                s.deep_sleep_ps_active = v;
            }
        })
    }

    pub fn connection_state(&self) -> StaState {
        self.shared.lock(|s| s.borrow().sta_state)
    }

    pub fn uap_connection_state(&self) -> UapState {
        self.shared.lock(|s| s.borrow().uap_state)
    }

    pub fn current_network(&self) -> Option<usize> {
        self.shared.lock(|s| s.borrow().current_network_idx)
    }

    pub fn current_uap_network(&self) -> Option<usize> {
        self.shared.lock(|s| s.borrow().current_uap_network_idx)
    }

    pub fn address(&self) -> Option<Ipv4Address> {
        self.shared.lock(|s| s.borrow().sta_address)
    }

    pub fn uap_address(&self) -> Option<Ipv4Address> {
        self.shared.lock(|s| s.borrow().uap_address)
    }

    pub fn current_channel(&self) -> u8 {
        self.shared.lock(|s| s.borrow().channel)
    }

    pub fn current_bssid(&self) -> Bssid {
        self.shared.lock(|s| s.borrow().bssid)
    }

    pub fn current_signal_strength(&self) -> i8 {
        self.shared.lock(|s| s.borrow().signal_strength)
    }

    pub fn ps_mode(&self) -> (bool, bool) {
        self.shared.lock(|s| {
            let s = s.borrow();
            (s.ieee_ps_active, s.deep_sleep_ps_active)
        })
    }

    pub fn mac(&self) -> Bssid {
        self.shared.lock(|s| s.borrow().mac)
    }

    pub fn uap_mac(&self) -> Bssid {
        self.shared.lock(|s| s.borrow().uap_mac)
    }

    pub fn fw_version(&self) -> heapless::String<48> {
        self.shared.lock(|s| s.borrow().fw_version.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock(|s| s.borrow().initialized)
    }

    /// Is `idx`'s interface busy enough that `NetworkStore::remove` must
    /// refuse.
    pub(crate) fn is_busy(&self, idx: usize) -> bool {
        self.shared.lock(|s| {
            let s = s.borrow();
            if s.current_network_idx == Some(idx) && !matches!(s.sta_state, StaState::Idle | StaState::Initializing) {
                return true;
            }
            if s.current_uap_network_idx == Some(idx) && !matches!(s.uap_state, UapState::Initializing) {
                return true;
            }
            false
        })
    }
}
