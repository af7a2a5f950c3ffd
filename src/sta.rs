//! STA State Machine: scan -> associate -> authenticate ->
//! address acquisition -> connected.

use embassy_time::{Duration, Instant};

use crate::callback::{FailureReason, UserEvent};
use crate::profile::{Bssid, IpConfig};

/// Connect-scan budget per attempt before surfacing `NetworkNotFound`.
pub const WLAN_RESCAN_LIMIT: u8 = 5;
/// Bounded auto-reconnect attempts once the rescan budget is exhausted.
pub const WLAN_RECONNECT_LIMIT: u8 = 5;
/// Assoc-pause window after a MIC-failure deauth.
pub const ASSOC_PAUSE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StaState {
    Initializing,
    Idle,
    Scanning,
    ScanningUser,
    Associating,
    Associated,
    RequestingAddress,
    ObtainingAddress,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocFailReason {
    Generic,
    Mic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanSwitchKind {
    /// Not ECSA-aware: treated like a link loss.
    Abrupt,
    /// ECSA-aware, carries the new channel.
    Announced { new_channel: u8 },
}

/// Input events the control task feeds to the STA machine.
pub enum StaEvent {
    UserConnect { idx: usize },
    UserScan,
    AssociationOk { bssid: Bssid, same_ess_ft: bool },
    AssociationFail,
    AuthenticationOk,
    AuthenticationFail { reason: AssocFailReason },
    NetAddrConfig { ip: IpConfig },
    DhcpConfigOk { addr: core::net::Ipv4Addr },
    DhcpConfigFail,
    LinkLoss,
    ChanSwitch(ChanSwitchKind),
    LeaseRenewFail { ipv6_up: bool },
    UserDisconnect,
    /// Fired by the control task's assoc-pause timer on expiry.
    AssocPauseExpired,
    /// The scan command itself failed (driver/firmware rejected it), as
    /// opposed to a completed scan that simply found no match. Terminal for
    /// the in-flight attempt regardless of remaining rescan budget.
    ScanCommandFailed,
}

/// What the control task must do in response to a transition, beyond the
/// bare state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaAction {
    None,
    TakeScanLockAndScan,
    TakeScanLockAndUserScan,
    StartAssociation,
    DoHiddenScan,
    Rescan,
    Deauth,
    /// Abort an in-flight scan (driver `cancel_scan`) and release the scan
    /// lock, per a disconnect arriving mid-scan.
    CancelScan,
    ConfigureAddress,
    StartDhcp,
    StopDhcpTimerConfigureDns,
    /// MIC failure: tear down the association (like `Deauth`) and additionally
    /// arm the 60s assoc-pause timer before returning to `Idle`.
    DeauthAndArmAssocPause,
    ReplayPendingConnect { idx: usize },
}

pub struct Transition {
    pub to: StaState,
    pub action: StaAction,
    pub user_event: Option<UserEvent>,
}

impl Transition {
    const fn idle(action: StaAction, user_event: Option<UserEvent>) -> Self {
        Self { to: StaState::Idle, action, user_event }
    }
}

pub struct StaStateMachine {
    state: StaState,
    current_network_idx: Option<usize>,
    rescan_count: u8,
    reconnect_count: u8,
    reassoc_control: bool,
    /// Latched while the 60s assoc-pause timer is armed; replayed on expiry.
    pending_connect: Option<usize>,
    assoc_pause_until: Option<Instant>,
    /// Set when a new `UserConnect` arrives while already ≥Associating: we
    /// deauth first, then proceed once the deauth completes.
    connect_after_deauth: Option<usize>,
    /// Index to retry once `reconnect_count` bookkeeping (see
    /// `maybe_reconnect_internal`) decides a reconnect is still within
    /// `WLAN_RECONNECT_LIMIT`. Consumed by `take_pending_reconnect`.
    reconnect_idx: Option<usize>,
    /// Set by the winning `AssociationOk` of the in-flight attempt; consumed
    /// by `on_authenticated` to decide whether to skip address acquisition
    /// entirely (an FT roam within the same ESS keeps the existing IP).
    same_ess_ft: bool,
}

impl StaStateMachine {
    pub const fn new() -> Self {
        Self {
            state: StaState::Initializing,
            current_network_idx: None,
            rescan_count: 0,
            reconnect_count: 0,
            reassoc_control: true,
            pending_connect: None,
            assoc_pause_until: None,
            connect_after_deauth: None,
            reconnect_idx: None,
            same_ess_ft: false,
        }
    }

    /// Returns and clears an auto-reconnect the last failure armed, if any.
    /// The control task should call this right after handling a
    /// `NetworkNotFound`/`LinkLost`/auth-failure transition and, if it gets
    /// `Some`, enqueue a fresh `UserConnect` for that index.
    pub fn take_pending_reconnect(&mut self) -> Option<usize> {
        self.reconnect_idx.take()
    }

    /// Returns and clears a connect that was deferred behind a deauth of the
    /// previous in-flight attempt.
    /// The control task calls this once the driver acknowledges the deauth.
    pub fn take_connect_after_deauth(&mut self) -> Option<usize> {
        self.connect_after_deauth.take()
    }

    pub fn state(&self) -> StaState {
        self.state
    }

    pub fn current_network_idx(&self) -> Option<usize> {
        self.current_network_idx
    }

    pub fn set_reassoc_control(&mut self, enabled: bool) {
        self.reassoc_control = enabled;
    }

    pub fn mark_ready(&mut self) {
        self.state = StaState::Idle;
    }

    pub fn is_assoc_paused(&self, now: Instant) -> bool {
        self.assoc_pause_until.map(|until| now < until).unwrap_or(false)
    }

    pub fn handle(&mut self, event: StaEvent, now: Instant) -> Transition {
        let transition = self.handle_inner(event, now);
        self.state = transition.to;
        transition
    }

    fn handle_inner(&mut self, event: StaEvent, now: Instant) -> Transition {
        use StaState::*;

        // A connect request arriving while a connection attempt is already
        // in flight deauths first, then replays once torn down.
        if let StaEvent::UserConnect { idx } = event {
            if matches!(self.state, Associating | Associated | RequestingAddress | ObtainingAddress | Connected) {
                self.connect_after_deauth = Some(idx);
                return Transition { to: self.state, action: StaAction::Deauth, user_event: None };
            }
        }

        match (self.state, event) {
            (Idle, StaEvent::UserConnect { idx }) => {
                if self.is_assoc_paused(now) {
                    self.pending_connect = Some(idx);
                    return Transition { to: Idle, action: StaAction::None, user_event: None };
                }
                self.current_network_idx = Some(idx);
                self.rescan_count = 0;
                Transition { to: Scanning, action: StaAction::TakeScanLockAndScan, user_event: None }
            }

            (Idle, StaEvent::UserScan) => {
                Transition { to: ScanningUser, action: StaAction::TakeScanLockAndUserScan, user_event: None }
            }

            (Associating, StaEvent::AssociationOk { same_ess_ft, .. }) => {
                self.same_ess_ft = same_ess_ft;
                Transition { to: Associated, action: StaAction::None, user_event: None }
            }
            (Associating, StaEvent::AssociationFail) => {
                if self.rescan_count < WLAN_RESCAN_LIMIT {
                    self.rescan_count += 1;
                    Transition { to: Scanning, action: StaAction::Rescan, user_event: None }
                } else {
                    self.fail_network_not_found()
                }
            }

            (Associated, StaEvent::AuthenticationOk) => self.on_authenticated(),
            (Associated, StaEvent::AuthenticationFail { reason: AssocFailReason::Mic }) => {
                self.assoc_pause_until = Some(now + ASSOC_PAUSE);
                Transition {
                    to: Idle,
                    action: StaAction::DeauthAndArmAssocPause,
                    user_event: Some(UserEvent::NetworkAuthFailed),
                }
            }
            (Associated, StaEvent::AuthenticationFail { reason: AssocFailReason::Generic }) => {
                let ev = self.maybe_reconnect();
                Transition { to: Idle, action: StaAction::Deauth, user_event: Some(ev) }
            }

            (RequestingAddress, StaEvent::NetAddrConfig { ip: IpConfig::Static { .. } }) => {
                Transition {
                    to: Connected,
                    action: StaAction::StopDhcpTimerConfigureDns,
                    user_event: Some(UserEvent::Success),
                }
            }
            (RequestingAddress, StaEvent::NetAddrConfig { .. }) => {
                Transition { to: ObtainingAddress, action: StaAction::StartDhcp, user_event: None }
            }

            (ObtainingAddress, StaEvent::DhcpConfigOk { .. }) => {
                Transition {
                    to: Connected,
                    action: StaAction::StopDhcpTimerConfigureDns,
                    user_event: Some(UserEvent::Success),
                }
            }
            (ObtainingAddress, StaEvent::DhcpConfigFail) => self.fail(FailureReason::AddressFailed),

            (Connected, StaEvent::LinkLoss) => {
                let ev = self.maybe_reconnect_or(UserEvent::LinkLost);
                Transition { to: Idle, action: StaAction::Deauth, user_event: Some(ev) }
            }
            (Connected, StaEvent::ChanSwitch(ChanSwitchKind::Abrupt)) => {
                let ev = self.maybe_reconnect_or(UserEvent::ChanSwitch { new_channel: 0 });
                Transition { to: Idle, action: StaAction::Deauth, user_event: Some(ev) }
            }
            (Connected, StaEvent::ChanSwitch(ChanSwitchKind::Announced { new_channel })) => {
                Transition {
                    to: Connected,
                    action: StaAction::None,
                    user_event: Some(UserEvent::ChanSwitch { new_channel }),
                }
            }
            (Connected, StaEvent::LeaseRenewFail { ipv6_up: false }) => {
                let ev = self.maybe_reconnect_or(UserEvent::LinkLost);
                Transition { to: Idle, action: StaAction::Deauth, user_event: Some(ev) }
            }
            (Connected, StaEvent::LeaseRenewFail { ipv6_up: true }) => {
                // IPv4 failure is non-fatal while IPv6 already carries the link.
                Transition { to: Connected, action: StaAction::None, user_event: None }
            }

            (s, StaEvent::UserDisconnect) if matches!(s, Associating | Associated | RequestingAddress | ObtainingAddress | Connected) => {
                self.current_network_idx = None;
                Transition {
                    to: Idle,
                    action: StaAction::Deauth,
                    user_event: Some(UserEvent::UserDisconnect),
                }
            }
            // A disconnect arriving mid-scan aborts it rather than deauthing
            // (there's no association yet to tear down).
            (s, StaEvent::UserDisconnect) if matches!(s, Scanning | ScanningUser) => {
                self.current_network_idx = None;
                Transition {
                    to: Idle,
                    action: StaAction::CancelScan,
                    user_event: Some(UserEvent::UserDisconnect),
                }
            }

            (s, StaEvent::ScanCommandFailed) if matches!(s, Scanning | ScanningUser) => {
                self.fail_scan_command()
            }

            (Idle, StaEvent::AssocPauseExpired) => {
                self.assoc_pause_until = None;
                match self.pending_connect.take() {
                    Some(idx) => Transition {
                        to: Idle,
                        action: StaAction::ReplayPendingConnect { idx },
                        user_event: None,
                    },
                    None => Transition { to: Idle, action: StaAction::None, user_event: None },
                }
            }

            (s, _) => Transition { to: s, action: StaAction::None, user_event: None },
        }
    }

    /// Advances scanning once the control task has run [`crate::select`]
    /// over the latest results (or the scan command itself failed, in which
    /// case both `matched` and `hidden_channels_present` are left at their
    /// empty defaults).
    pub fn on_scan_outcome(
        &mut self,
        matched: Option<Bssid>,
        hidden_channels_present: bool,
        now: Instant,
    ) -> Transition {
        let transition = self.on_scan_outcome_inner(matched, hidden_channels_present, now);
        self.state = transition.to;
        transition
    }

    fn on_scan_outcome_inner(
        &mut self,
        matched: Option<Bssid>,
        hidden_channels_present: bool,
        now: Instant,
    ) -> Transition {
        let _ = now;
        if matched.is_some() {
            return Transition {
                to: StaState::Associating,
                action: StaAction::StartAssociation,
                user_event: None,
            };
        }

        if hidden_channels_present {
            return Transition {
                to: StaState::Scanning,
                action: StaAction::DoHiddenScan,
                user_event: None,
            };
        }

        if self.rescan_count < WLAN_RESCAN_LIMIT {
            self.rescan_count += 1;
            return Transition {
                to: StaState::Scanning,
                action: StaAction::TakeScanLockAndScan,
                user_event: None,
            };
        }

        self.fail_network_not_found()
    }

    fn on_authenticated(&mut self) -> Transition {
        if core::mem::take(&mut self.same_ess_ft) {
            // Same-ESS FT roam: the existing IP is still valid, so skip
            // address acquisition entirely and publish success directly.
            return Transition { to: StaState::Connected, action: StaAction::None, user_event: Some(UserEvent::Success) };
        }
        Transition {
            to: StaState::RequestingAddress,
            action: StaAction::ConfigureAddress,
            user_event: Some(UserEvent::AuthSuccess),
        }
    }

    fn fail_network_not_found(&mut self) -> Transition {
        let ev = self.maybe_reconnect_or(UserEvent::NetworkNotFound);
        self.current_network_idx = None;
        Transition::idle(StaAction::None, Some(ev))
    }

    /// Scan command failure is terminal for the in-flight attempt regardless
    /// of remaining rescan budget: release the lock (already done by the
    /// caller), surface `ConnectFailed`, return to `Idle`. Unlike a completed
    /// scan with no match, this never retries.
    fn fail_scan_command(&mut self) -> Transition {
        self.current_network_idx = None;
        Transition::idle(StaAction::None, Some(UserEvent::ConnectFailed(FailureReason::ScanFailed)))
    }

    fn fail(&mut self, reason: FailureReason) -> Transition {
        let ev = match reason {
            FailureReason::AddressFailed => UserEvent::AddressFailed,
            FailureReason::NetworkNotFound => UserEvent::NetworkNotFound,
            FailureReason::BgscanNetworkNotFound => UserEvent::BgscanNetworkNotFound,
            FailureReason::AuthFailed => UserEvent::NetworkAuthFailed,
        };
        self.current_network_idx = None;
        Transition::idle(StaAction::Deauth, Some(ev))
    }

    /// Bounds auto-reconnect by `WLAN_RECONNECT_LIMIT`; returns the
    /// caller-supplied terminal event either way (the reconnect, if any, is
    /// a side effect surfaced through `StaAction::EnqueueReconnect`, not a
    /// replacement for the terminal callback).
    fn maybe_reconnect_or(&mut self, terminal: UserEvent) -> UserEvent {
        self.maybe_reconnect_internal();
        terminal
    }

    fn maybe_reconnect(&mut self) -> UserEvent {
        self.maybe_reconnect_internal();
        UserEvent::NetworkAuthFailed
    }

    fn maybe_reconnect_internal(&mut self) {
        if self.reassoc_control && self.reconnect_count < WLAN_RECONNECT_LIMIT {
            self.reconnect_count += 1;
            self.reconnect_idx = self.current_network_idx;
        }
    }
}

impl Default for StaStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
