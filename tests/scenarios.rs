//! End-to-end scenarios driving `ControlTask::dispatch` against a mock
//! `Driver`, the same role a blocking test executor plays for an embedded
//! crate with no socket I/O of its own to drive.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use wlan_cm::callback::UserEvent;
use wlan_cm::control::Event;
use wlan_cm::driver::{AssocRequest, Driver, UapStartRequest};
use wlan_cm::error::Error;
use wlan_cm::hostsleep::{HostSleepAction, SleepInterface, WakeConditions};
use wlan_cm::powersave::{DeepSleepPsMode, IeeePsMode};
use wlan_cm::profile::{BssType, Bssid, IpConfig, Profile, Role, SecurityConfig, Ssid};
use wlan_cm::roam::BtmStatus;
use wlan_cm::scan::{ScanEntry, SecurityBits, MAX_SCAN_RESULTS};
use wlan_cm::sta::StaState;
use wlan_cm::state::Ipv4Address;

/// Records every driver call it's given instead of talking to real firmware.
#[derive(Default)]
struct MockDriver {
    scans_started: u32,
    scans_cancelled: u32,
    associate_calls: Vec<(Bssid, u8)>,
    disassociate_calls: u32,
    uap_start_channel: Option<u8>,
    ieee_ps_calls: Vec<IeeePsMode>,
    host_sleep_configs: Vec<(SleepInterface, Option<Ipv4Addr>, HostSleepAction, u32)>,
    sleep_confirms: Vec<SleepInterface>,
    btm_responses: Vec<(Option<Bssid>, BtmStatus)>,
}

impl Driver for MockDriver {
    async fn start_scan(&mut self, _cmd: &wlan_cm::scan::ScanCommand) -> Result<(), Error> {
        self.scans_started += 1;
        Ok(())
    }

    async fn cancel_scan(&mut self) {
        self.scans_cancelled += 1;
    }

    async fn associate(&mut self, req: AssocRequest<'_>) -> Result<(), Error> {
        self.associate_calls.push((req.bssid, req.channel));
        Ok(())
    }

    async fn disassociate(&mut self) -> Result<(), Error> {
        self.disassociate_calls += 1;
        Ok(())
    }

    async fn start_uap(&mut self, req: UapStartRequest<'_>) -> Result<(), Error> {
        self.uap_start_channel = Some(req.channel);
        Ok(())
    }

    async fn stop_uap(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn set_ieee_ps(&mut self, mode: IeeePsMode) -> Result<(), Error> {
        self.ieee_ps_calls.push(mode);
        Ok(())
    }

    async fn set_deep_sleep_ps(&mut self, _mode: DeepSleepPsMode) -> Result<(), Error> {
        Ok(())
    }

    async fn send_host_sleep_cfg(
        &mut self,
        iface: SleepInterface,
        ipv4: Option<Ipv4Addr>,
        action: HostSleepAction,
        wake_conditions: u32,
    ) -> Result<(), Error> {
        self.host_sleep_configs.push((iface, ipv4, action, wake_conditions));
        Ok(())
    }

    async fn send_sleep_confirm(&mut self, iface: SleepInterface) -> Result<(), Error> {
        self.sleep_confirms.push(iface);
        Ok(())
    }

    async fn request_neighbor_report(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn send_btm_response(&mut self, bssid: Option<Bssid>, status: BtmStatus) -> Result<(), Error> {
        self.btm_responses.push((bssid, status));
        Ok(())
    }

    #[cfg(feature = "roaming-11r")]
    async fn ft_roam(&mut self, _bssid: Bssid, _channel: u8) -> Result<(), Error> {
        Ok(())
    }

    async fn set_rssi_low_threshold(&mut self, _threshold: i8) -> Result<(), Error> {
        Ok(())
    }

    async fn config_bgscan_and_rssi(&mut self, _ssid: &Ssid) -> Result<(), Error> {
        Ok(())
    }

    async fn set_packet_filters(&mut self, _wake_conditions: u32) -> Result<(), Error> {
        Ok(())
    }

    async fn get_device_mac(&mut self) -> Result<Bssid, Error> {
        Ok([0xaa; 6])
    }

    async fn get_device_uap_mac(&mut self) -> Result<Bssid, Error> {
        Ok([0xbb; 6])
    }

    async fn get_fw_version_ext(&mut self) -> Result<heapless::String<48>, Error> {
        Ok(heapless::String::try_from("mock-fw-1.0").unwrap())
    }
}

fn open_entry(bssid: Bssid, channel: u8, rssi: i8) -> ScanEntry {
    ScanEntry {
        ssid: Ssid::from_slice(b"open_ap").unwrap(),
        bssid,
        channel,
        rssi,
        security: SecurityBits::default(),
        ht_capable: false,
        beacon_period_ms: 100,
        dtim_period: 1,
        ft_mobility_domain: None,
        neighbor_report_supported: false,
        btm_supported: false,
        owe_transition_ssid: None,
    }
}

fn scan_results(entries: &[ScanEntry]) -> heapless::Vec<ScanEntry, MAX_SCAN_RESULTS> {
    heapless::Vec::from_slice(entries).unwrap()
}

#[test]
fn happy_path_open_network() {
    let resources = wlan_cm::WlanResources::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    let events_for_cb = events.clone();
    let (handle, mut control) = wlan_cm::new(&resources, MockDriver::default(), move |ev| {
        events_for_cb.borrow_mut().push(ev)
    });

    let profile = Profile::new(
        "n1",
        Some(b"open_ap"),
        None,
        None,
        Role::Sta,
        BssType::Infrastructure,
        SecurityConfig::open(),
        IpConfig::Dhcp,
    )
    .unwrap();
    let idx = handle.add_network(profile).unwrap();

    let bssid: Bssid = [0x02, 0, 0, 0, 0, 0x01];

    pollster::block_on(async {
        control.init().await.unwrap();
        control.dispatch(Event::UserConnect { idx }).await;
        assert_eq!(handle.get_connection_state(), StaState::Scanning);

        control.dispatch(Event::ScanComplete { results: scan_results(&[open_entry(bssid, 6, -40)]) }).await;
        assert_eq!(handle.get_connection_state(), StaState::Associating);

        control.dispatch(Event::AssociationResult { ok: true, bssid, same_ess_ft: false }).await;
        assert_eq!(handle.get_connection_state(), StaState::Associated);

        control.dispatch(Event::AuthenticationResult { ok: true, mic_failure: false }).await;
        assert_eq!(handle.get_connection_state(), StaState::RequestingAddress);

        control.dispatch(Event::NetAddrConfigured).await;
        assert_eq!(handle.get_connection_state(), StaState::ObtainingAddress);

        control
            .dispatch(Event::DhcpResult {
                ok: true,
                config: Some(Ipv4Address {
                    address: Ipv4Addr::new(10, 0, 0, 5),
                    gateway: Ipv4Addr::new(10, 0, 0, 1),
                    mask: Ipv4Addr::new(255, 255, 255, 0),
                    dns1: None,
                    dns2: None,
                }),
            })
            .await;
    });

    assert_eq!(handle.get_connection_state(), StaState::Connected);
    assert_eq!(handle.get_address().unwrap().address, Ipv4Addr::new(10, 0, 0, 5));

    let seen = events.borrow();
    assert!(seen.contains(&UserEvent::AuthSuccess));
    assert!(seen.contains(&UserEvent::Success));
    let auth_pos = seen.iter().position(|e| *e == UserEvent::AuthSuccess).unwrap();
    let success_pos = seen.iter().position(|e| *e == UserEvent::Success).unwrap();
    assert!(auth_pos < success_pos, "AUTH_SUCCESS must precede SUCCESS");
}

#[test]
fn wpa2_best_rssi_selection() {
    let resources = wlan_cm::WlanResources::new();
    let (handle, mut control) = wlan_cm::new(&resources, MockDriver::default(), |_ev| {});

    let profile = Profile::new(
        "n1",
        Some(b"open_ap"),
        None,
        None,
        Role::Sta,
        BssType::Infrastructure,
        SecurityConfig::open(),
        IpConfig::Dhcp,
    )
    .unwrap();
    let idx = handle.add_network(profile).unwrap();

    let weak = open_entry([1; 6], 1, -70);
    let strongest_rssi = open_entry([2; 6], 6, -55);
    let mid = open_entry([3; 6], 11, -60);

    pollster::block_on(async {
        control.init().await.unwrap();
        control.dispatch(Event::UserConnect { idx }).await;
        control.dispatch(Event::ScanComplete { results: scan_results(&[weak, strongest_rssi, mid]) }).await;
    });

    assert_eq!(control.driver().associate_calls, vec![([2; 6], 6)]);
}

#[test]
fn rescan_exhaustion_surfaces_network_not_found_and_enqueues_reconnect() {
    let resources = wlan_cm::WlanResources::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    let events_for_cb = events.clone();
    let (handle, mut control) = wlan_cm::new(&resources, MockDriver::default(), move |ev| {
        events_for_cb.borrow_mut().push(ev)
    });

    let profile = Profile::new(
        "ghost",
        Some(b"ghost"),
        None,
        None,
        Role::Sta,
        BssType::Infrastructure,
        SecurityConfig::open(),
        IpConfig::Dhcp,
    )
    .unwrap();
    let idx = handle.add_network(profile).unwrap();

    pollster::block_on(async {
        control.init().await.unwrap();
        control.dispatch(Event::UserConnect { idx }).await;
        for _ in 0..=wlan_cm::sta::WLAN_RESCAN_LIMIT {
            control.dispatch(Event::ScanComplete { results: scan_results(&[]) }).await;
        }
    });

    assert!(events.borrow().contains(&UserEvent::NetworkNotFound));
    assert_eq!(handle.get_connection_state(), StaState::Idle);
}

#[test]
fn user_disconnect_mid_scan_cancels_scan_and_releases_lock() {
    let resources = wlan_cm::WlanResources::new();
    let (handle, mut control) = wlan_cm::new(&resources, MockDriver::default(), |_ev| {});

    let profile = Profile::new(
        "n1",
        Some(b"open_ap"),
        None,
        None,
        Role::Sta,
        BssType::Infrastructure,
        SecurityConfig::open(),
        IpConfig::Dhcp,
    )
    .unwrap();
    let idx = handle.add_network(profile).unwrap();

    pollster::block_on(async {
        control.init().await.unwrap();
        control.dispatch(Event::UserConnect { idx }).await;
        assert_eq!(handle.get_connection_state(), StaState::Scanning);

        control.dispatch(Event::UserDisconnect).await;
    });

    assert_eq!(handle.get_connection_state(), StaState::Idle);
    assert_eq!(control.driver().scans_cancelled, 1);
    // A fresh connect can scan again immediately: the lock was released.
    pollster::block_on(async {
        control.dispatch(Event::UserConnect { idx }).await;
    });
    assert_eq!(handle.get_connection_state(), StaState::Scanning);
}

#[test]
fn ps_enter_exit_ieee() {
    let resources = wlan_cm::WlanResources::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    let events_for_cb = events.clone();
    let (handle, mut control) = wlan_cm::new(&resources, MockDriver::default(), move |ev| {
        events_for_cb.borrow_mut().push(ev)
    });

    let profile = Profile::new(
        "n1",
        Some(b"open_ap"),
        None,
        None,
        Role::Sta,
        BssType::Infrastructure,
        SecurityConfig::open(),
        IpConfig::Static {
            addr: Ipv4Addr::new(192, 168, 1, 2),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            dns1: None,
            dns2: None,
        },
    )
    .unwrap();
    let idx = handle.add_network(profile).unwrap();
    let bssid: Bssid = [0x02, 0, 0, 0, 0, 0x01];

    pollster::block_on(async {
        control.init().await.unwrap();
        control.dispatch(Event::UserConnect { idx }).await;
        control.dispatch(Event::ScanComplete { results: scan_results(&[open_entry(bssid, 6, -40)]) }).await;
        control.dispatch(Event::AssociationResult { ok: true, bssid, same_ess_ft: false }).await;
        control.dispatch(Event::AuthenticationResult { ok: true, mic_failure: false }).await;
        control
            .dispatch(Event::NetAddrConfigured)
            .await;
        assert_eq!(handle.get_connection_state(), StaState::Connected);

        control
            .dispatch(Event::UserIeeePsOn {
                wake_conditions: WakeConditions(WakeConditions::UNICAST | WakeConditions::MGMT_FRAME),
            })
            .await;
        control.dispatch(Event::PsDriverEvent(wlan_cm::powersave::PsEvent::Sleep)).await;
        control.dispatch(Event::PsDriverEvent(wlan_cm::powersave::PsEvent::SlpCfm)).await;
    });

    assert!(events.borrow().contains(&UserEvent::PsEnter(wlan_cm::callback::PsMode::Ieee)));
    assert_eq!(handle.get_ps_mode(), (true, false));
    assert_eq!(control.driver().sleep_confirms, vec![SleepInterface::Sta]);

    pollster::block_on(async {
        control.dispatch(Event::UserIeeePsOff).await;
    });

    assert!(events.borrow().contains(&UserEvent::PsExit(wlan_cm::callback::PsMode::Ieee)));
    assert_eq!(handle.get_ps_mode(), (false, false));
}
