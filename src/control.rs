//! Event Bus and control task: the single state mutator for
//! the STA, µAP and power-save sub-machines. Grounded on the same
//! `select(rx, urc)` cooperative-loop idiom the firmware link's background
//! runner uses, generalized from a fixed AT-command URC set to the driver
//! trait in [`crate::driver`].

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration, Instant};
use heapless::Vec;

use crate::callback::UserEvent;
use crate::driver::{AssocRequest, Driver, UapStartRequest};
use crate::hostsleep::{HostSleepAction, HostSleepCoordinator, WakeConditions};
use crate::powersave::{DeepSleepPsMode, IeeePsMode, PsAction, PsEvent, PsStateMachine};
use crate::profile::{Bssid, IpConfig, Profile};
use crate::roam::{self, ApCapabilities, NeighborCandidate, RoamAction, RoamCoordinator, TriggerSource};
use crate::scan::{ScanCommand, ScanEntry, ScanLock, SharedScanResults, MAX_SCAN_CHANNELS, MAX_SCAN_RESULTS};
use crate::select as match_select;
use crate::sta::{AssocFailReason, ChanSwitchKind, StaAction, StaEvent, StaState, StaStateMachine};
use crate::state::{Ipv4Address, WlanState};
use crate::store::SharedStore;
use crate::uap::{StartDecision, UapAction, UapEvent, UapStateMachine};

/// Event-bus capacity.
pub const EVENT_QUEUE_CAPACITY: usize = 20;
/// Timeout used to retry a latched sleep-confirm.
const SLEEP_CONFIRM_RETRY: Duration = Duration::from_millis(10);
/// Poll interval while a neighbor-report/BTM transition is pending, to check
/// it against `RoamCoordinator`'s 60s deadline.
const ROAM_TRANSITION_POLL: Duration = Duration::from_secs(1);
/// Fixed channel list a µAP falls back to when doing ACS; the regulatory
/// channel set itself lives with the driver.
const ACS_CHANNELS: [u8; 3] = [1, 6, 11];

/// Messages merged onto the single event bus: user API calls, driver/
/// firmware events, IP-stack events, and internally-synthesized timer ticks.
pub enum Event {
    UserConnect { idx: usize },
    UserReassociate,
    UserDisconnect,
    UserScan,
    UserStartUap { idx: usize },
    UserStopUap,
    UserStop,
    UserIeeePsOn { wake_conditions: WakeConditions },
    UserIeeePsOff,
    UserDeepSleepPsOn,
    UserDeepSleepPsOff,
    UserSendHostSleep { conditions: WakeConditions },
    UserCancelHostSleep,
    UserSetReassocControl(bool),
    UserSetRoaming { enabled: bool, rssi_threshold: i8 },
    UserSetRssiLowThreshold(i8),
    UserRequestNeighborReport,
    #[cfg_attr(not(feature = "roaming-11r"), allow(dead_code))]
    UserFtRoam { bssid: Bssid, channel: u8 },

    ScanComplete { results: Vec<ScanEntry, MAX_SCAN_RESULTS> },
    ScanFailed,
    AssociationResult { ok: bool, bssid: Bssid, same_ess_ft: bool },
    AuthenticationResult { ok: bool, mic_failure: bool },
    NetAddrConfigured,
    DhcpResult { ok: bool, config: Option<Ipv4Address> },
    LinkLoss,
    ChanSwitchAnnounce(ChanSwitchKind),
    RssiLow,
    NeighborReport { candidates: Vec<NeighborCandidate, MAX_SCAN_CHANNELS> },

    UapConfigAck,
    UapStarted,
    UapAddressConfigured { config: Ipv4Address },
    UapClientAssoc { mac: Bssid },
    UapClientConn { mac: Bssid },
    UapClientDisassoc { mac: Bssid },
    UapStartFailed,
    UapStopFailed,

    PsDriverEvent(PsEvent),
    InFlightTransferReport { in_flight: bool },
    /// Synthesized by the control task's conditional dequeue while a
    /// neighbor-report/BTM transition is pending, to check it against its
    /// 60s deadline.
    RoamTransitionCheck,
}

/// Bounded, single-consumer event bus. Any number of producer
/// tasks may hold a reference and send; only the control task receives.
pub type EventBus = Channel<NoopRawMutex, Event, EVENT_QUEUE_CAPACITY>;

/// Everything the control task owns exclusively. Shared with the outside
/// world only via the event bus, the scan lock, the network store, the
/// shared scan-result view, and the published connection snapshot.
pub struct ControlTask<'a, D: Driver, F: FnMut(UserEvent)> {
    driver: D,
    store: &'a SharedStore,
    scan_lock: &'a ScanLock,
    scan_results: &'a SharedScanResults,
    state: &'a WlanState,
    sta: StaStateMachine,
    uap: UapStateMachine,
    uap_idx: Option<usize>,
    ieee_ps: PsStateMachine,
    deep_sleep_ps: PsStateMachine,
    host_sleep: HostSleepCoordinator,
    roam: RoamCoordinator,
    /// Set while a scan was issued by the roaming background-scan path
    /// rather than the STA connect pipeline, so `on_scan_complete` knows
    /// which outcome handler to run.
    roam_scan_in_flight: bool,
    /// Channels that carried a hidden-SSID entry in the last scan, latched
    /// by `on_scan_complete` for `StaAction::DoHiddenScan` to probe.
    hidden_channels: Vec<u8, MAX_SCAN_CHANNELS>,
    /// Set while a scan was issued by the 11k/11v directed neighbor-list scan
    /// rather than the connect pipeline or the background-scan path, so
    /// `on_scan_complete` knows which outcome handler to run.
    neighbor_scan_in_flight: bool,
    /// Last RSSI-low threshold armed, re-sent when a neighbor-report/BTM
    /// transition attempt times out or finds nothing and the trigger just
    /// rearms instead of roaming.
    rssi_low_threshold: Option<i8>,
    on_event: F,
    regulatory_allows: fn(u8) -> bool,
}

/// Looks up the profile behind the STA machine's current attempt, cloning it
/// out from behind the shared store's mutex so callers can still hold
/// `&mut self` across an `.await` afterwards.
fn sta_profile(store: &SharedStore, sta: &StaStateMachine) -> Option<(usize, Profile)> {
    let idx = sta.current_network_idx()?;
    store.get_by_index(idx).map(|p| (idx, p))
}

impl<'a, D: Driver, F: FnMut(UserEvent)> ControlTask<'a, D, F> {
    pub fn new(
        driver: D,
        store: &'a SharedStore,
        scan_lock: &'a ScanLock,
        scan_results: &'a SharedScanResults,
        state: &'a WlanState,
        on_event: F,
    ) -> Self {
        Self {
            driver,
            store,
            scan_lock,
            scan_results,
            state,
            sta: StaStateMachine::new(),
            uap: UapStateMachine::new(),
            uap_idx: None,
            ieee_ps: PsStateMachine::new(crate::callback::PsMode::Ieee),
            deep_sleep_ps: PsStateMachine::new(crate::callback::PsMode::DeepSleep),
            host_sleep: HostSleepCoordinator::new(),
            roam: RoamCoordinator::new(),
            roam_scan_in_flight: false,
            hidden_channels: Vec::new(),
            neighbor_scan_in_flight: false,
            rssi_low_threshold: None,
            on_event,
            regulatory_allows: |_| true,
        }
    }

    /// Exposes the underlying driver, chiefly so a test harness can inspect
    /// a mock driver's recorded calls after driving a scenario.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn emit(&mut self, event: Option<UserEvent>) {
        if let Some(ev) = event {
            (self.on_event)(ev);
        }
    }

    fn publish_sta(&mut self) {
        self.state.set_sta_state(self.sta.state(), self.sta.current_network_idx());
    }

    fn publish_uap(&mut self) {
        self.state.set_uap_state(self.uap.state(), self.uap_idx);
    }

    fn publish_ps(&mut self) {
        self.state.set_ps_active(Some(self.ieee_ps.is_active()), Some(self.deep_sleep_ps.is_active()));
    }

    /// Fetches the cached MAC addresses and firmware version.
    /// Firmware image loading itself is the SDIO/driver layer's concern
    /// so this only performs the post-load query.
    pub async fn init(&mut self) -> Result<(), crate::error::Error> {
        let mac = self.driver.get_device_mac().await?;
        let uap_mac = self.driver.get_device_uap_mac().await?;
        let fw_version = self.driver.get_fw_version_ext().await?;
        self.state.set_init_done(mac, uap_mac, fw_version);
        self.sta.mark_ready();
        self.publish_sta();
        Ok(())
    }

    /// Runs forever. The only suspension point is the event-bus recv, with
    /// an infinite timeout unless a sleep-confirm retry is pending, in
    /// which case a short timeout synthesizes an IEEE-PS `Sleep` retry
    /// event.
    pub async fn run(&mut self, bus: &EventBus) -> ! {
        match self.init().await {
            Ok(()) => self.emit(Some(UserEvent::Initialized)),
            Err(_) => self.emit(Some(UserEvent::InitializationFailed)),
        }
        loop {
            let sleep_retry_pending =
                self.ieee_ps.has_pending_sleep_confirm() || self.deep_sleep_ps.has_pending_sleep_confirm();

            let event = if sleep_retry_pending {
                match with_timeout(SLEEP_CONFIRM_RETRY, bus.receive()).await {
                    Ok(ev) => ev,
                    Err(_) => Event::PsDriverEvent(PsEvent::Sleep),
                }
            } else if self.roam.is_roam_in_progress() {
                match with_timeout(ROAM_TRANSITION_POLL, bus.receive()).await {
                    Ok(ev) => ev,
                    Err(_) => Event::RoamTransitionCheck,
                }
            } else {
                bus.receive().await
            };

            self.dispatch(event).await;
        }
    }

    pub async fn dispatch(&mut self, event: Event) {
        let now = Instant::now();
        match event {
            Event::UserConnect { idx } => {
                let t = self.sta.handle(StaEvent::UserConnect { idx }, now);
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::UserReassociate => {
                if let Some(idx) = self.sta.current_network_idx() {
                    self.connect(idx).await;
                }
            }
            Event::UserDisconnect => {
                let t = self.sta.handle(StaEvent::UserDisconnect, now);
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::UserScan => {
                let t = self.sta.handle(StaEvent::UserScan, now);
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::UserStop => self.stop().await,
            Event::ScanComplete { results } => {
                if self.neighbor_scan_in_flight {
                    self.on_neighbor_scan_complete(results).await;
                } else if self.roam_scan_in_flight {
                    self.on_roam_scan_complete(results, now).await;
                } else {
                    self.on_scan_complete(results).await;
                }
            }
            Event::ScanFailed => {
                self.scan_lock.release();
                if self.neighbor_scan_in_flight {
                    self.neighbor_scan_in_flight = false;
                    self.roam.abandon();
                    return;
                }
                if self.roam_scan_in_flight {
                    self.roam_scan_in_flight = false;
                    self.emit(Some(UserEvent::BgscanNetworkNotFound));
                    return;
                }
                // The scan command itself failed: terminal for this attempt,
                // unlike a completed scan that simply found no match (see
                // `on_scan_outcome`, reached via `ScanComplete`).
                let t = self.sta.handle(StaEvent::ScanCommandFailed, now);
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::AssociationResult { ok, bssid, same_ess_ft } => {
                let t = if ok {
                    self.sta.handle(StaEvent::AssociationOk { bssid, same_ess_ft }, now)
                } else {
                    self.sta.handle(StaEvent::AssociationFail, now)
                };
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::AuthenticationResult { ok, mic_failure } => {
                let t = if ok {
                    self.sta.handle(StaEvent::AuthenticationOk, now)
                } else {
                    let reason = if mic_failure { AssocFailReason::Mic } else { AssocFailReason::Generic };
                    self.sta.handle(StaEvent::AuthenticationFail { reason }, now)
                };
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::NetAddrConfigured => {
                let ip = sta_profile(self.store, &self.sta).map(|(_, p)| p.ip);
                if let Some(ip) = ip {
                    let t = self.sta.handle(StaEvent::NetAddrConfig { ip }, now);
                    if matches!(t.to, StaState::Connected) {
                        if let IpConfig::Static { addr, gateway, mask, dns1, dns2 } = ip {
                            self.state.set_sta_address(Some(Ipv4Address { address: addr, gateway, mask, dns1, dns2 }));
                        }
                    }
                    self.run_sta_action(t.action).await;
                    self.publish_sta();
                    self.emit(t.user_event);
                }
            }
            Event::DhcpResult { ok, config } => {
                let t = if ok {
                    let addr = config.map(|c| c.address).unwrap_or(core::net::Ipv4Addr::UNSPECIFIED);
                    if let Some(cfg) = config {
                        self.state.set_sta_address(Some(cfg));
                    }
                    self.sta.handle(StaEvent::DhcpConfigOk { addr }, now)
                } else {
                    self.sta.handle(StaEvent::DhcpConfigFail, now)
                };
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::LinkLoss => {
                let t = self.sta.handle(StaEvent::LinkLoss, now);
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::ChanSwitchAnnounce(kind) => {
                let t = self.sta.handle(StaEvent::ChanSwitch(kind), now);
                if let ChanSwitchKind::Announced { new_channel } = kind {
                    self.state.set_radio(new_channel, self.state.current_bssid(), self.state.current_signal_strength());
                }
                self.run_sta_action(t.action).await;
                self.publish_sta();
                self.emit(t.user_event);
            }
            Event::RssiLow => self.on_rssi_low(now).await,
            Event::NeighborReport { candidates } => self.on_neighbor_report(&candidates).await,

            Event::UserStartUap { idx } => self.start_uap(idx).await,
            Event::UserStopUap => {
                let t = self.uap.handle(UapEvent::UserStop);
                if matches!(t.action, UapAction::StopUap) {
                    let _ = self.driver.stop_uap().await;
                }
                self.uap_idx = None;
                self.state.set_uap_address(None);
                self.publish_uap();
                self.emit(t.user_event);
            }
            Event::UapConfigAck => {
                self.emit(self.uap.handle(UapEvent::ConfigAck).user_event);
                self.publish_uap();
            }
            Event::UapStarted => {
                self.emit(self.uap.handle(UapEvent::UapStarted).user_event);
                self.publish_uap();
            }
            Event::UapAddressConfigured { config } => {
                self.emit(self.uap.handle(UapEvent::AddressConfigured).user_event);
                self.state.set_uap_address(Some(config));
                self.publish_uap();
            }
            Event::UapClientAssoc { mac } => self.emit(self.uap.handle(UapEvent::ClientAssoc { mac }).user_event),
            Event::UapClientConn { mac } => self.emit(self.uap.handle(UapEvent::ClientConn { mac }).user_event),
            Event::UapClientDisassoc { mac } => {
                self.emit(self.uap.handle(UapEvent::ClientDisassoc { mac }).user_event)
            }
            Event::UapStartFailed => {
                self.uap_idx = None;
                self.emit(self.uap.handle(UapEvent::StartFailed).user_event);
                self.publish_uap();
            }
            Event::UapStopFailed => self.emit(self.uap.handle(UapEvent::StopFailed).user_event),

            Event::UserIeeePsOn { wake_conditions } => self.ieee_ps_on(wake_conditions).await,
            Event::UserIeeePsOff => self.ps_off(false).await,
            Event::UserDeepSleepPsOn => self.deep_sleep_ps_on().await,
            Event::UserDeepSleepPsOff => self.ps_off(true).await,
            Event::UserSendHostSleep { conditions } => self.send_host_sleep(conditions).await,
            Event::UserCancelHostSleep => self.send_host_sleep(WakeConditions(WakeConditions::CANCEL)).await,

            Event::UserSetReassocControl(enabled) => self.sta.set_reassoc_control(enabled),
            Event::UserSetRoaming { enabled, rssi_threshold } => {
                self.roam.set_soft_roaming(enabled);
                self.rssi_low_threshold = Some(rssi_threshold);
                let _ = self.driver.set_rssi_low_threshold(rssi_threshold).await;
            }
            Event::UserSetRssiLowThreshold(threshold) => {
                self.rssi_low_threshold = Some(threshold);
                let _ = self.driver.set_rssi_low_threshold(threshold).await;
            }
            Event::UserRequestNeighborReport => {
                let _ = self.driver.request_neighbor_report().await;
            }
            Event::UserFtRoam { bssid, channel } => self.ft_roam(bssid, channel).await,

            Event::PsDriverEvent(ps_event) => self.on_ps_driver_event(ps_event).await,
            Event::InFlightTransferReport { in_flight } => {
                self.ieee_ps.set_in_flight(in_flight);
                self.deep_sleep_ps.set_in_flight(in_flight);
            }
            Event::RoamTransitionCheck => self.on_roam_transition_check(now).await,
        }
    }

    /// Tears down both interfaces. The actual task join/watchdog belongs to
    /// whatever executor spawned `run` — this crate's control task runs
    /// forever and never returns on its own.
    async fn stop(&mut self) {
        if !matches!(self.sta.state(), StaState::Idle | StaState::Initializing) {
            let t = self.sta.handle(StaEvent::UserDisconnect, Instant::now());
            self.run_sta_action(t.action).await;
            self.publish_sta();
        }
        if self.uap.is_running() {
            let _ = self.driver.stop_uap().await;
            self.uap.handle(UapEvent::UserStop);
            self.uap_idx = None;
            self.state.set_uap_address(None);
            self.publish_uap();
        }
    }

    /// Runs the side effect a STA transition asked for. `Deauth` and
    /// `ReplayPendingConnect` can themselves produce a follow-on scan; since
    /// this is `no_std` without an allocator there's no `Box::pin` to recurse
    /// through, so the one level of chaining they need is unrolled via
    /// [`Self::connect`] rather than a general recursive dispatch.
    async fn run_sta_action(&mut self, action: StaAction) {
        match action {
            StaAction::None => {}
            StaAction::TakeScanLockAndScan => self.begin_connect_scan().await,
            StaAction::TakeScanLockAndUserScan => {
                self.scan_lock.acquire().await;
                let cmd = ScanCommand::broadcast(crate::profile::BssType::Infrastructure);
                if self.driver.start_scan(&cmd).await.is_err() {
                    self.scan_lock.release();
                }
            }
            StaAction::StartAssociation | StaAction::Rescan => {
                if let Some((_, profile)) = sta_profile(self.store, &self.sta) {
                    let cmd = ScanCommand::broadcast(profile.bss_type);
                    let _ = self.driver.start_scan(&cmd).await;
                }
            }
            StaAction::DoHiddenScan => {
                if let Some((_, profile)) = sta_profile(self.store, &self.sta) {
                    if let Some(ssid) = profile.ssid {
                        let cmd = crate::driver::hidden_followup(profile.bss_type, ssid, &self.hidden_channels);
                        let _ = self.driver.start_scan(&cmd).await;
                    }
                }
            }
            StaAction::Deauth => {
                let _ = self.driver.disassociate().await;
                if let Some(idx) = self.sta.take_connect_after_deauth() {
                    self.connect(idx).await;
                }
            }
            StaAction::CancelScan => {
                self.driver.cancel_scan().await;
                self.scan_lock.release();
            }
            StaAction::ConfigureAddress | StaAction::StartDhcp | StaAction::StopDhcpTimerConfigureDns => {
                // Address/DHCP wiring is driven by the IP stack feeding
                // `Event::NetAddrConfigured`/`Event::DhcpResult` back in; the
                // STA machine only needs to know the outcome, not how it's
                // produced.
            }
            StaAction::DeauthAndArmAssocPause => {
                let _ = self.driver.disassociate().await;
            }
            StaAction::ReplayPendingConnect { idx } => self.connect(idx).await,
        }
    }

    /// Feeds a fresh `UserConnect` through the STA machine and runs whatever
    /// action it produces (always `TakeScanLockAndScan` or `None`, since it's
    /// only ever called from `Idle`).
    async fn connect(&mut self, idx: usize) {
        let t = self.sta.handle(StaEvent::UserConnect { idx }, Instant::now());
        if let StaAction::TakeScanLockAndScan = t.action {
            self.begin_connect_scan().await;
        }
        self.publish_sta();
        self.emit(t.user_event);
    }

    async fn begin_connect_scan(&mut self) {
        self.scan_lock.acquire().await;
        if let Some((_, profile)) = sta_profile(self.store, &self.sta) {
            let cmd = ScanCommand::broadcast(profile.bss_type);
            if self.driver.start_scan(&cmd).await.is_err() {
                self.scan_lock.release();
            }
        } else {
            self.scan_lock.release();
        }
    }

    async fn on_scan_complete(&mut self, results: Vec<ScanEntry, MAX_SCAN_RESULTS>) {
        debug!("scan complete, {} entries", results.len());
        self.scan_results.replace(results);
        self.scan_lock.release();

        let Some((idx, profile)) = sta_profile(self.store, &self.sta) else {
            return;
        };
        let outcome = match_select::select_best(&profile, self.scan_results_snapshot().iter(), self.regulatory_allows);
        let matched = outcome.best.map(|e| e.bssid);
        let hidden = !outcome.hidden_channels.is_empty();
        self.hidden_channels = outcome.hidden_channels.clone();

        if let Some(entry) = outcome.best {
            let (channel, beacon_period_ms, dtim_period, ht_capable, rssi, bssid) =
                (entry.channel, entry.beacon_period_ms, entry.dtim_period, entry.ht_capable, entry.rssi, entry.bssid);
            self.store.update(idx, |slot| {
                slot.discovered.channel = channel;
                slot.discovered.beacon_period_ms = beacon_period_ms;
                slot.discovered.dtim_period = dtim_period;
                slot.discovered.ht_capable = ht_capable;
            });
            self.state.set_radio(channel, bssid, rssi);
        }

        let now = Instant::now();
        let t = self.sta.on_scan_outcome(matched, hidden, now);
        match (t.action, matched) {
            (StaAction::StartAssociation, Some(bssid)) => {
                if let Some((_, profile)) = sta_profile(self.store, &self.sta) {
                    let channel = profile.discovered.channel;
                    let req = AssocRequest { profile: &profile, bssid, channel };
                    let _ = self.driver.associate(req).await;
                }
            }
            (action, _) => self.run_sta_action(action).await,
        }
        self.publish_sta();
        self.emit(t.user_event);
    }

    /// Snapshot of the just-replaced scan-result buffer for local iteration;
    /// avoids holding the shared lock across the whole match/select pass.
    fn scan_results_snapshot(&self) -> Vec<ScanEntry, MAX_SCAN_RESULTS> {
        let mut out = Vec::new();
        let mut i = 0;
        while let Some(entry) = self.scan_results.get(i) {
            if out.push(entry).is_err() {
                break;
            }
            i += 1;
        }
        out
    }

    async fn start_uap(&mut self, idx: usize) {
        let Some(profile) = self.store.get_by_index(idx) else {
            warn!("start_uap: no profile at index {}", idx);
            self.emit(Some(UserEvent::UapStartFailed));
            return;
        };
        let sta_channel =
            matches!(self.sta.state(), StaState::Associated | StaState::Connected).then_some(profile.discovered.channel);

        let decision = crate::uap::decide_start_channel(profile.channel, sta_channel, &ACS_CHANNELS);
        let channel = match decision {
            StartDecision::Rejected => {
                self.emit(Some(UserEvent::UapStartFailed));
                return;
            }
            StartDecision::InheritFromSta { channel } | StartDecision::UseConstrained { channel } => channel,
            StartDecision::Acs { candidates_start } => ACS_CHANNELS[candidates_start],
        };

        self.uap_idx = Some(idx);
        let req = UapStartRequest { profile: &profile, channel };
        if self.driver.start_uap(req).await.is_err() {
            self.uap_idx = None;
            self.emit(Some(UserEvent::UapStartFailed));
        }
        self.publish_uap();
    }

    async fn ieee_ps_on(&mut self, wake_conditions: WakeConditions) {
        if !matches!(self.sta.state(), StaState::Connected) {
            return;
        }
        let _ = self.driver.set_ieee_ps(IeeePsMode::On).await;
        let _ = self.host_sleep.configure(wake_conditions);
        let action = self.ieee_ps.handle(PsEvent::Enable).unwrap_or(PsAction::None);
        let event = self.ieee_ps.to_user_event(action);
        self.publish_ps();
        self.emit(event);
    }

    async fn deep_sleep_ps_on(&mut self) {
        if matches!(self.sta.state(), StaState::Connected) {
            return;
        }
        let _ = self.driver.set_deep_sleep_ps(DeepSleepPsMode::On).await;
        let action = self.deep_sleep_ps.handle(PsEvent::Enable).unwrap_or(PsAction::None);
        let event = self.deep_sleep_ps.to_user_event(action);
        self.publish_ps();
        self.emit(event);
    }

    async fn ps_off(&mut self, deep_sleep: bool) {
        let sm = if deep_sleep { &mut self.deep_sleep_ps } else { &mut self.ieee_ps };
        let mut action = sm.handle(PsEvent::Disable).unwrap_or(PsAction::None);
        // `Sleep --Disable--> PreDisable` is an intermediate stop (the
        // firmware "disable" command is still in flight); drive the
        // synthetic `PreDisable --Enter--> Disabling` step immediately since
        // there's no separate driver reply to wait for here.
        if sm.state() == crate::powersave::PsState::PreDisable {
            action = sm.handle(PsEvent::Enable).unwrap_or(PsAction::None);
        }
        let event = sm.to_user_event(action);
        if deep_sleep {
            let _ = self.driver.set_deep_sleep_ps(DeepSleepPsMode::Off).await;
        } else {
            let _ = self.driver.set_ieee_ps(IeeePsMode::Off).await;
        }
        self.publish_ps();
        self.emit(event);
    }

    async fn on_ps_driver_event(&mut self, event: PsEvent) {
        // `is_running` (not `is_active`) so a reply arriving while winding
        // down through `Disabling` still reaches the machine — otherwise
        // `DisableDone` never arrives and it never returns to `Init`.
        if self.ieee_ps.is_running() {
            let action = self.ieee_ps.handle(event).unwrap_or(PsAction::None);
            self.run_ps_side_effect(action).await;
            let user_event = self.ieee_ps.to_user_event(action);
            self.publish_ps();
            self.emit(user_event);
        }
        if self.deep_sleep_ps.is_running() {
            let action = self.deep_sleep_ps.handle(event).unwrap_or(PsAction::None);
            self.run_ps_side_effect(action).await;
            let user_event = self.deep_sleep_ps.to_user_event(action);
            self.publish_ps();
            self.emit(user_event);
        }
    }

    async fn run_ps_side_effect(&mut self, action: PsAction) {
        if let PsAction::SendHostSleepAndConfirm = action {
            let sta_ipv4_up = matches!(self.sta.state(), StaState::Connected);
            let Ok(iface) = self.host_sleep.select_interface(sta_ipv4_up, self.uap.is_running()) else {
                return;
            };
            let ipv4 = self.ipv4_for(iface);
            let conditions = self.host_sleep.armed_conditions().unwrap_or(0);
            let _ = self
                .driver
                .send_host_sleep_cfg(iface, ipv4, HostSleepAction::Configure, conditions)
                .await;
            let _ = self.driver.send_sleep_confirm(iface).await;
        }
    }

    /// Resolves `§4.8`'s "gates on having an IPv4 address" for a direct
    /// `send_host_sleep` API call: STA IPv4 connected wins, else µAP if
    /// started, else a hard failure (no interface to attach wake filters to).
    async fn send_host_sleep(&mut self, conditions: WakeConditions) {
        let sta_ipv4_up = matches!(self.sta.state(), StaState::Connected);
        let Ok(iface) = self.host_sleep.select_interface(sta_ipv4_up, self.uap.is_running()) else {
            return;
        };
        if self.host_sleep.configure(conditions).is_ok() {
            let ipv4 = self.ipv4_for(iface);
            let _ = self.driver.set_packet_filters(conditions.0).await;
            let _ = self
                .driver
                .send_host_sleep_cfg(iface, ipv4, HostSleepAction::Configure, conditions.0)
                .await;
        }
    }

    fn ipv4_for(&self, iface: crate::hostsleep::SleepInterface) -> Option<core::net::Ipv4Addr> {
        match iface {
            crate::hostsleep::SleepInterface::Sta => self.state.address().map(|a| a.address),
            crate::hostsleep::SleepInterface::Uap => self.state.uap_address().map(|a| a.address),
        }
    }

    async fn on_rssi_low(&mut self, now: Instant) {
        let Some((_, profile)) = sta_profile(self.store, &self.sta) else {
            return;
        };
        let ap = ApCapabilities {
            neighbor_report_supported: profile.discovered.neighbor_report_supported,
            btm_supported: profile.discovered.btm_supported,
            ft_mobility_domain: profile.discovered.ft_mobility_domain,
        };
        match self.roam.on_trigger(TriggerSource::RssiLow, ap, now) {
            RoamAction::StartBackgroundScan => self.begin_background_scan(&profile).await,
            RoamAction::RequestNeighborReport | RoamAction::RequestBtmQuery => {
                let _ = self.driver.request_neighbor_report().await;
            }
            RoamAction::RearmThreshold => self.rearm_rssi_threshold().await,
            RoamAction::BgscanNetworkNotFound => {}
        }
    }

    async fn rearm_rssi_threshold(&mut self) {
        if let Some(threshold) = self.rssi_low_threshold {
            let _ = self.driver.set_rssi_low_threshold(threshold).await;
        }
    }

    /// Checked on every conditional-dequeue tick while a neighbor-report/BTM
    /// transition is pending (§4.9/§5: "arm a 60s timeout"). A tick before
    /// the deadline is a no-op; past it, the attempt is abandoned and the
    /// RSSI-low threshold is rearmed for the next trigger.
    async fn on_roam_transition_check(&mut self, now: Instant) {
        if self.roam.timed_out(now) {
            self.roam.abandon();
            self.rearm_rssi_threshold().await;
        }
    }

    async fn begin_background_scan(&mut self, profile: &Profile) {
        let empty = heapless::Vec::new();
        let ssid = profile.ssid.as_ref().unwrap_or(&empty);
        let _ = self.driver.config_bgscan_and_rssi(ssid).await;

        self.scan_lock.acquire().await;
        let cmd = ScanCommand::broadcast(profile.bss_type);
        if self.driver.start_scan(&cmd).await.is_err() {
            self.scan_lock.release();
            self.emit(Some(UserEvent::BgscanNetworkNotFound));
            return;
        }
        self.roam_scan_in_flight = true;
    }

    /// Candidate query and reassociation attempt after a background-scan
    /// completion. Up to `BG_SCAN_LIMIT` passes before
    /// giving up with `BgscanNetworkNotFound`.
    async fn on_roam_scan_complete(&mut self, results: Vec<ScanEntry, MAX_SCAN_RESULTS>, now: Instant) {
        self.roam_scan_in_flight = false;
        self.scan_results.replace(results);
        self.scan_lock.release();

        let Some((_, profile)) = sta_profile(self.store, &self.sta) else {
            self.roam.abandon();
            return;
        };
        let outcome =
            match_select::select_best(&profile, self.scan_results_snapshot().iter(), self.regulatory_allows);

        match outcome.best {
            Some(entry) if entry.bssid != self.state.current_bssid() => {
                self.roam.on_background_scan_candidate_found();
                let bssid = entry.bssid;
                let channel = entry.channel;
                let req = AssocRequest { profile: &profile, bssid, channel };
                let t = self.sta.handle(StaEvent::UserConnect { idx: self.sta.current_network_idx().unwrap_or(0) }, now);
                self.run_sta_action(t.action).await;
                let _ = self.driver.associate(req).await;
            }
            _ => match self.roam.on_background_scan_empty() {
                RoamAction::StartBackgroundScan => self.begin_background_scan(&profile).await,
                RoamAction::BgscanNetworkNotFound => self.emit(Some(UserEvent::BgscanNetworkNotFound)),
                _ => {}
            },
        }
    }

    /// §4.9: "sort candidate channels ascending, construct a directed scan"
    /// — the report itself only tells us which channels to look at; the
    /// actual winning BSSID comes from scanning those channels fresh (see
    /// `on_neighbor_scan_complete`).
    async fn on_neighbor_report(&mut self, candidates: &[NeighborCandidate]) {
        let Some((_, profile)) = sta_profile(self.store, &self.sta) else {
            self.roam.abandon();
            return;
        };
        let Some(ssid) = profile.ssid else {
            self.roam.abandon();
            return;
        };
        let raw_channels: Vec<u8, MAX_SCAN_CHANNELS> = candidates.iter().map(|c| c.channel).collect();
        let channels = roam::sorted_unique_channels(&raw_channels);

        self.scan_lock.acquire().await;
        let cmd = ScanCommand::directed(profile.bss_type, ssid, channels);
        if self.driver.start_scan(&cmd).await.is_err() {
            self.scan_lock.release();
            self.roam.abandon();
            return;
        }
        self.neighbor_scan_in_flight = true;
    }

    async fn on_neighbor_scan_complete(&mut self, results: Vec<ScanEntry, MAX_SCAN_RESULTS>) {
        self.neighbor_scan_in_flight = false;
        self.scan_results.replace(results);
        self.scan_lock.release();

        let Some((_, profile)) = sta_profile(self.store, &self.sta) else {
            self.roam.abandon();
            return;
        };
        let current_bssid = self.state.current_bssid();
        let outcome =
            match_select::select_best(&profile, self.scan_results_snapshot().iter(), self.regulatory_allows);
        let best = outcome.best.map(|e| NeighborCandidate { bssid: e.bssid, channel: e.channel });

        let resolution = self.roam.resolve_neighbor_report(best, current_bssid);
        self.roam.abandon();

        match resolution {
            Some(crate::roam::NeighborListOutcome::Stay { btm }) => {
                if let Some(status) = btm {
                    let _ = self.driver.send_btm_response(None, status).await;
                }
            }
            Some(crate::roam::NeighborListOutcome::Roam { best, btm }) => {
                if let Some(status) = btm {
                    let _ = self.driver.send_btm_response(Some(best.bssid), status).await;
                }
                self.ft_roam(best.bssid, best.channel).await;
            }
            None => {}
        }
    }

    #[cfg(feature = "roaming-11r")]
    async fn ft_roam(&mut self, bssid: Bssid, channel: u8) {
        let _ = self.driver.ft_roam(bssid, channel).await;
    }

    #[cfg(not(feature = "roaming-11r"))]
    async fn ft_roam(&mut self, _bssid: Bssid, _channel: u8) {}
}
