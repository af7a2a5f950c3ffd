//! Roaming / background-scan / 11k / 11v / 11r transition logic.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::profile::Bssid;
use crate::scan::MAX_SCAN_CHANNELS;

/// Up to 3 background-scan passes before giving up (`BG_SCAN_LIMIT`).
pub const BG_SCAN_LIMIT: u8 = 3;
/// Neighbor-report and BTM queries time out after 60 s.
pub const TRANSITION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RoamAction {
    /// Configure a background scan around the current SSID.
    StartBackgroundScan,
    /// Issue an 802.11k neighbor request.
    RequestNeighborReport,
    /// Issue an 802.11v BTM query.
    RequestBtmQuery,
    /// Neither soft-roaming, 11k, nor 11v is available; just rearm the
    /// RSSI-low threshold and wait for the next trigger.
    RearmThreshold,
    /// Background-scan passes exhausted with no candidate found.
    BgscanNetworkNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    RssiLow,
}

/// Capabilities of the AP we are currently associated to, as cached on the
/// profile's discovered attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApCapabilities {
    pub neighbor_report_supported: bool,
    pub btm_supported: bool,
    pub ft_mobility_domain: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoamPhase {
    Idle,
    BackgroundScan { passes: u8 },
    NeighborReport { deadline_ms: u64 },
    Btm { deadline_ms: u64 },
}

/// Drives the priority chain of soft-roam bg-scan, else 11k, else
/// 11v, else just rearm the threshold.
pub struct RoamCoordinator {
    soft_roaming_enabled: bool,
    phase: RoamPhase,
}

impl RoamCoordinator {
    pub const fn new() -> Self {
        Self {
            soft_roaming_enabled: false,
            phase: RoamPhase::Idle,
        }
    }

    pub fn set_soft_roaming(&mut self, enabled: bool) {
        self.soft_roaming_enabled = enabled;
    }

    pub fn is_roam_in_progress(&self) -> bool {
        !matches!(self.phase, RoamPhase::Idle)
    }

    /// Decides what to do on an `RSSI_LOW` trigger.
    pub fn on_trigger(&mut self, _source: TriggerSource, ap: ApCapabilities, now: Instant) -> RoamAction {
        if self.is_roam_in_progress() {
            // A roam attempt is already underway; swallow the retrigger.
            return RoamAction::RearmThreshold;
        }

        if self.soft_roaming_enabled {
            self.phase = RoamPhase::BackgroundScan { passes: 1 };
            return RoamAction::StartBackgroundScan;
        }

        if ap.neighbor_report_supported {
            self.phase = RoamPhase::NeighborReport {
                deadline_ms: (now + TRANSITION_TIMEOUT).as_millis(),
            };
            return RoamAction::RequestNeighborReport;
        }

        if ap.btm_supported {
            self.phase = RoamPhase::Btm {
                deadline_ms: (now + TRANSITION_TIMEOUT).as_millis(),
            };
            return RoamAction::RequestBtmQuery;
        }

        RoamAction::RearmThreshold
    }

    /// Called when a background scan completes with no usable candidate.
    /// Retries up to `BG_SCAN_LIMIT` passes before giving up.
    pub fn on_background_scan_empty(&mut self) -> RoamAction {
        match self.phase {
            RoamPhase::BackgroundScan { passes } if passes < BG_SCAN_LIMIT => {
                self.phase = RoamPhase::BackgroundScan { passes: passes + 1 };
                RoamAction::StartBackgroundScan
            }
            RoamPhase::BackgroundScan { .. } => {
                self.phase = RoamPhase::Idle;
                RoamAction::BgscanNetworkNotFound
            }
            _ => {
                self.phase = RoamPhase::Idle;
                RoamAction::BgscanNetworkNotFound
            }
        }
    }

    pub fn on_background_scan_candidate_found(&mut self) {
        self.phase = RoamPhase::Idle;
    }

    pub fn abandon(&mut self) {
        self.phase = RoamPhase::Idle;
    }

    pub fn timed_out(&self, now: Instant) -> bool {
        match self.phase {
            RoamPhase::NeighborReport { deadline_ms } | RoamPhase::Btm { deadline_ms } => {
                now.as_millis() >= deadline_ms
            }
            _ => false,
        }
    }

    fn invoked_via_11v(&self) -> bool {
        matches!(self.phase, RoamPhase::Btm { .. })
    }
}

impl Default for RoamCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborCandidate {
    pub bssid: Bssid,
    pub channel: u8,
}

/// Whether a BTM response is owed as part of resolving a directed
/// neighbor-list scan, and what it should say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtmStatus {
    Accept,
    RejectNoSuitableCandidates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborListOutcome {
    /// Reassociate to `best`, the entry the post-report directed scan
    /// matched; send a BTM-accept response first if an 11v query triggered
    /// this roam.
    Roam { best: NeighborCandidate, btm: Option<BtmStatus> },
    /// `best` turned out to be the currently-connected BSSID: nothing to
    /// roam to. Send a BTM-reject if an 11v query triggered this roam.
    Stay { btm: Option<BtmStatus> },
}

impl RoamCoordinator {
    /// Resolves the directed neighbor-list scan's winning entry (`best`,
    /// `None` if nothing on the reported channels matched) against the
    /// currently-connected BSSID, attaching the BTM response this roam's
    /// trigger (11k vs 11v) owes, if any.
    pub fn resolve_neighbor_report(
        &self,
        best: Option<NeighborCandidate>,
        current_bssid: Bssid,
    ) -> Option<NeighborListOutcome> {
        let best = best?;
        let btm = self.invoked_via_11v().then_some(if best.bssid == current_bssid {
            BtmStatus::RejectNoSuitableCandidates
        } else {
            BtmStatus::Accept
        });
        if best.bssid == current_bssid {
            return Some(NeighborListOutcome::Stay { btm });
        }
        Some(NeighborListOutcome::Roam { best, btm })
    }
}

/// Sorts raw neighbor-report channels ascending for the directed scan build
/// step.
pub fn sorted_unique_channels(channels: &[u8]) -> Vec<u8, MAX_SCAN_CHANNELS> {
    let mut out: Vec<u8, MAX_SCAN_CHANNELS> = Vec::new();
    for &c in channels {
        if !out.contains(&c) {
            let _ = out.push(c);
        }
    }
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_roaming_takes_priority_over_11k_and_11v() {
        let mut rc = RoamCoordinator::new();
        rc.set_soft_roaming(true);
        let ap = ApCapabilities {
            neighbor_report_supported: true,
            btm_supported: true,
            ft_mobility_domain: None,
        };
        assert_eq!(
            rc.on_trigger(TriggerSource::RssiLow, ap, Instant::from_millis(0)),
            RoamAction::StartBackgroundScan
        );
    }

    #[test]
    fn falls_back_to_11k_then_11v_then_rearm() {
        let mut rc = RoamCoordinator::new();
        let ap_11k = ApCapabilities {
            neighbor_report_supported: true,
            btm_supported: false,
            ft_mobility_domain: None,
        };
        assert_eq!(
            rc.on_trigger(TriggerSource::RssiLow, ap_11k, Instant::from_millis(0)),
            RoamAction::RequestNeighborReport
        );

        let mut rc2 = RoamCoordinator::new();
        let ap_11v = ApCapabilities {
            neighbor_report_supported: false,
            btm_supported: true,
            ft_mobility_domain: None,
        };
        assert_eq!(
            rc2.on_trigger(TriggerSource::RssiLow, ap_11v, Instant::from_millis(0)),
            RoamAction::RequestBtmQuery
        );

        let mut rc3 = RoamCoordinator::new();
        assert_eq!(
            rc3.on_trigger(TriggerSource::RssiLow, ApCapabilities::default(), Instant::from_millis(0)),
            RoamAction::RearmThreshold
        );
    }

    #[test]
    fn background_scan_gives_up_after_bg_scan_limit() {
        let mut rc = RoamCoordinator::new();
        rc.set_soft_roaming(true);
        rc.on_trigger(TriggerSource::RssiLow, ApCapabilities::default(), Instant::from_millis(0));
        assert_eq!(rc.on_background_scan_empty(), RoamAction::StartBackgroundScan);
        assert_eq!(rc.on_background_scan_empty(), RoamAction::StartBackgroundScan);
        assert_eq!(rc.on_background_scan_empty(), RoamAction::BgscanNetworkNotFound);
        assert!(!rc.is_roam_in_progress());
    }

    #[test]
    fn neighbor_report_rejects_when_best_is_current_bssid() {
        let mut rc = RoamCoordinator::new();
        let ap = ApCapabilities { neighbor_report_supported: false, btm_supported: true, ft_mobility_domain: None };
        rc.on_trigger(TriggerSource::RssiLow, ap, Instant::from_millis(0));
        let current = [1; 6];
        let best = NeighborCandidate { bssid: current, channel: 6 };
        assert_eq!(
            rc.resolve_neighbor_report(Some(best), current),
            Some(NeighborListOutcome::Stay { btm: Some(BtmStatus::RejectNoSuitableCandidates) })
        );
    }

    #[test]
    fn neighbor_report_roams_without_btm_when_invoked_via_11k() {
        let mut rc = RoamCoordinator::new();
        let ap = ApCapabilities {
            neighbor_report_supported: true,
            btm_supported: false,
            ft_mobility_domain: Some(0x1234),
        };
        rc.on_trigger(TriggerSource::RssiLow, ap, Instant::from_millis(0));
        let candidate = NeighborCandidate { bssid: [2; 6], channel: 6 };
        assert_eq!(
            rc.resolve_neighbor_report(Some(candidate), [1; 6]),
            Some(NeighborListOutcome::Roam { best: candidate, btm: None })
        );
    }

    #[test]
    fn neighbor_report_sends_btm_accept_when_invoked_via_11v() {
        let mut rc = RoamCoordinator::new();
        let ap = ApCapabilities { neighbor_report_supported: false, btm_supported: true, ft_mobility_domain: None };
        rc.on_trigger(TriggerSource::RssiLow, ap, Instant::from_millis(0));
        let candidate = NeighborCandidate { bssid: [2; 6], channel: 6 };
        assert_eq!(
            rc.resolve_neighbor_report(Some(candidate), [1; 6]),
            Some(NeighborListOutcome::Roam { best: candidate, btm: Some(BtmStatus::Accept) })
        );
    }

    #[test]
    fn neighbor_report_with_no_match_is_none() {
        let rc = RoamCoordinator::new();
        assert_eq!(rc.resolve_neighbor_report(None, [1; 6]), None);
    }

    #[test]
    fn channel_sort_dedups_and_orders() {
        let sorted = sorted_unique_channels(&[11, 1, 6, 1, 11]);
        assert_eq!(sorted.as_slice(), &[1, 6, 11]);
    }
}
