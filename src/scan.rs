//! Scan Coordinator: owns the single scan slot and collates
//! driver-reported results.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use heapless::Vec;

use crate::profile::{BssType, Bssid, Ssid};

/// Matches the legacy scan table size the firmware command set exposes.
pub const MAX_SCAN_RESULTS: usize = 32;
pub const MAX_SCAN_CHANNELS: usize = 14;
/// Inter-channel gap used while the STA is already passing traffic, to bound
/// on-channel dwell during a connected-state background scan.
pub const BUSY_CHANNEL_GAP_MS: u16 = 30;

/// Bits advertised by a scan entry's security/capability fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityBits(pub u16);

impl SecurityBits {
    pub const WEP: u16 = 1 << 0;
    pub const WPA: u16 = 1 << 1;
    pub const WPA2: u16 = 1 << 2;
    pub const WPA2_SHA256: u16 = 1 << 3;
    pub const SAE: u16 = 1 << 4;
    pub const OWE: u16 = 1 << 5;
    pub const TKIP_ONLY: u16 = 1 << 6;

    pub const fn contains(&self, bit: u16) -> bool {
        self.0 & bit != 0
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanEntry {
    pub ssid: Ssid,
    pub bssid: Bssid,
    pub channel: u8,
    pub rssi: i8,
    pub security: SecurityBits,
    pub ht_capable: bool,
    pub beacon_period_ms: u16,
    pub dtim_period: u8,
    pub ft_mobility_domain: Option<u16>,
    pub neighbor_report_supported: bool,
    pub btm_supported: bool,
    /// The paired SSID from an OWE transition-mode element, if advertised.
    pub owe_transition_ssid: Option<Ssid>,
}

impl ScanEntry {
    pub fn is_hidden(&self) -> bool {
        self.ssid.is_empty()
    }
}

/// Parameters behind every scan entry point: connect-scan, user-scan, hidden
/// follow-up, pscan-for-DTIM, roaming scan.
#[derive(Debug, Clone)]
pub struct ScanCommand {
    pub bss_type: BssType,
    pub target_bssid: Option<Bssid>,
    pub ssids: Vec<Ssid, 2>,
    pub channels: Vec<u8, MAX_SCAN_CHANNELS>,
    pub probe_count: u8,
    pub chan_gap_ms: u16,
    pub active: bool,
}

impl ScanCommand {
    pub fn broadcast(bss_type: BssType) -> Self {
        Self {
            bss_type,
            target_bssid: None,
            ssids: Vec::new(),
            channels: Vec::new(),
            probe_count: 2,
            chan_gap_ms: 0,
            active: true,
        }
    }

    pub fn directed(bss_type: BssType, ssid: Ssid, channels: Vec<u8, MAX_SCAN_CHANNELS>) -> Self {
        let mut ssids = Vec::new();
        let _ = ssids.push(ssid);
        Self {
            bss_type,
            target_bssid: None,
            ssids,
            channels,
            probe_count: 2,
            chan_gap_ms: 0,
            active: true,
        }
    }
}

struct ScanLockInner {
    held: bool,
    waker: WakerRegistration,
}

/// Binary mutex serializing all scan issuance. Acquired by
/// whichever task issues the scan (a user API call, or the control task
/// itself); released exactly once by the control task on scan-result,
/// scan-failure, or connect-fail.
pub struct ScanLock {
    inner: Mutex<NoopRawMutex, RefCell<ScanLockInner>>,
}

impl ScanLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ScanLockInner {
                held: false,
                waker: WakerRegistration::new(),
            })),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.inner.lock(|s| {
            let mut s = s.borrow_mut();
            if s.held {
                false
            } else {
                s.held = true;
                true
            }
        })
    }

    pub async fn acquire(&self) {
        poll_fn(|cx| self.poll_acquire(cx)).await
    }

    fn poll_acquire(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.lock(|s| {
            let mut s = s.borrow_mut();
            if s.held {
                s.waker.register(cx.waker());
                Poll::Pending
            } else {
                s.held = true;
                Poll::Ready(())
            }
        })
    }

    /// Releases the lock. Idempotent: releasing an already-free lock is a no-op,
    /// matching the "released exactly once" rule without requiring every caller
    /// to track whether it raced another release.
    pub fn release(&self) {
        self.inner.lock(|s| {
            let mut s = s.borrow_mut();
            s.held = false;
            s.waker.wake();
        })
    }

    pub fn is_held(&self) -> bool {
        self.inner.lock(|s| s.borrow().held)
    }
}

impl Default for ScanLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer of the most recent scan's results, exposed through `(index) -> ScanEntry`
/// the way the driver's scan table is indexed.
#[derive(Default)]
pub struct ScanResults {
    entries: Vec<ScanEntry, MAX_SCAN_RESULTS>,
}

impl ScanResults {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn replace(&mut self, entries: Vec<ScanEntry, MAX_SCAN_RESULTS>) {
        self.entries = entries;
    }

    pub fn get(&self, index: usize) -> Option<&ScanEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read view of the most recent scan shared with a [`crate::handle::Handle`]
/// (`get_scan_result`/`scan_result_count`). The "only meaningful right after
/// the scan callback fires" rule doesn't map cleanly onto an async callback
/// invoked from inside the control task's own stack frame; this crate
/// instead publishes the latest completed scan here and leaves ordering
/// ("call it right after a scan-complete callback, before issuing another
/// scan") to the caller. See `DESIGN.md`.
pub struct SharedScanResults {
    inner: Mutex<NoopRawMutex, RefCell<ScanResults>>,
}

impl SharedScanResults {
    pub fn new() -> Self {
        Self { inner: Mutex::new(RefCell::new(ScanResults::new())) }
    }

    pub(crate) fn replace(&self, entries: Vec<ScanEntry, MAX_SCAN_RESULTS>) {
        self.inner.lock(|s| s.borrow_mut().replace(entries))
    }

    pub fn get(&self, index: usize) -> Option<ScanEntry> {
        self.inner.lock(|s| s.borrow().get(index).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|s| s.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedScanResults {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_serializes_acquisition() {
        let lock = ScanLock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(lock.try_acquire());
    }

    #[test]
    fn release_is_idempotent() {
        let lock = ScanLock::new();
        lock.release();
        lock.release();
        assert!(lock.try_acquire());
    }
}
