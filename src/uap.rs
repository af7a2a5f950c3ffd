//! micro-AP State Machine: configure -> start -> address-up ->
//! stopped, plus ACS/channel-inherit logic.

use crate::callback::UserEvent;
use crate::profile::Bssid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UapState {
    Initializing,
    Configured,
    Started,
    IpUp,
}

pub enum UapEvent {
    ConfigAck,
    UapStarted,
    AddressConfigured,
    UserStop,
    StartFailed,
    StopFailed,
    ClientAssoc { mac: Bssid },
    ClientConn { mac: Bssid },
    ClientDisassoc { mac: Bssid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UapAction {
    None,
    StopUap,
}

pub struct UapTransition {
    pub to: UapState,
    pub action: UapAction,
    pub user_event: Option<UserEvent>,
}

#[derive(Default)]
pub struct UapStateMachine {
    state: Option<UapState>,
    /// Enabled on the first client association, working around a firmware
    /// TIM-bit quirk; stays set for the life of the µAP run.
    sticky_tim: bool,
}

impl UapStateMachine {
    pub const fn new() -> Self {
        Self { state: None, sticky_tim: false }
    }

    pub fn state(&self) -> UapState {
        self.state.unwrap_or(UapState::Initializing)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, Some(UapState::Started) | Some(UapState::IpUp))
    }

    pub fn sticky_tim_enabled(&self) -> bool {
        self.sticky_tim
    }

    pub fn handle(&mut self, event: UapEvent) -> UapTransition {
        use UapState::*;
        let current = self.state();

        let transition = match (current, event) {
            (Initializing, UapEvent::ConfigAck) => {
                UapTransition { to: Configured, action: UapAction::None, user_event: None }
            }
            (Configured, UapEvent::UapStarted) => UapTransition {
                to: Started,
                action: UapAction::None,
                user_event: Some(UserEvent::UapSuccess),
            },
            (Started, UapEvent::AddressConfigured) => {
                UapTransition { to: IpUp, action: UapAction::None, user_event: None }
            }
            (s, UapEvent::ClientAssoc { mac }) => {
                self.sticky_tim = true;
                UapTransition { to: s, action: UapAction::None, user_event: Some(UserEvent::UapClientAssoc { mac }) }
            }
            (s, UapEvent::ClientConn { mac }) => {
                UapTransition { to: s, action: UapAction::None, user_event: Some(UserEvent::UapClientConn { mac }) }
            }
            (s, UapEvent::ClientDisassoc { mac }) => {
                UapTransition { to: s, action: UapAction::None, user_event: Some(UserEvent::UapClientDissoc { mac }) }
            }
            (_, UapEvent::UserStop) => {
                self.sticky_tim = false;
                UapTransition {
                    to: Initializing,
                    action: UapAction::StopUap,
                    user_event: Some(UserEvent::UapStopped),
                }
            }
            (_, UapEvent::StartFailed) => UapTransition {
                to: Initializing,
                action: UapAction::None,
                user_event: Some(UserEvent::UapStartFailed),
            },
            (_, UapEvent::StopFailed) => UapTransition {
                to: Initializing,
                action: UapAction::None,
                user_event: Some(UserEvent::UapStopFailed),
            },
            (s, _) => UapTransition { to: s, action: UapAction::None, user_event: None },
        };

        self.state = Some(transition.to);
        transition
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// Inherit the STA's current channel (STA is Associated/Connected).
    InheritFromSta { channel: u8 },
    /// Run ACS over the allowed channel set.
    Acs { candidates_start: usize },
    /// The profile constrains a channel that isn't in the allowed set.
    Rejected,
    /// The profile's constrained channel is valid; use it directly.
    UseConstrained { channel: u8 },
}

/// Decides how `do_start` should pick a channel.
pub fn decide_start_channel(
    profile_channel: Option<u8>,
    sta_channel_if_connected: Option<u8>,
    allowed: &[u8],
) -> StartDecision {
    match profile_channel {
        Some(ch) => {
            if allowed.contains(&ch) {
                StartDecision::UseConstrained { channel: ch }
            } else {
                StartDecision::Rejected
            }
        }
        None => match sta_channel_if_connected {
            Some(ch) => StartDecision::InheritFromSta { channel: ch },
            None => StartDecision::Acs { candidates_start: 0 },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_to_ip_up() {
        let mut sm = UapStateMachine::new();
        assert_eq!(sm.handle(UapEvent::ConfigAck).to, UapState::Configured);
        let t = sm.handle(UapEvent::UapStarted);
        assert_eq!(t.to, UapState::Started);
        assert_eq!(t.user_event, Some(UserEvent::UapSuccess));
        assert_eq!(sm.handle(UapEvent::AddressConfigured).to, UapState::IpUp);
        assert!(sm.is_running());
    }

    #[test]
    fn user_stop_from_any_state_returns_to_initializing() {
        let mut sm = UapStateMachine::new();
        sm.handle(UapEvent::ConfigAck);
        sm.handle(UapEvent::UapStarted);
        let t = sm.handle(UapEvent::UserStop);
        assert_eq!(t.to, UapState::Initializing);
        assert_eq!(t.action, UapAction::StopUap);
        assert!(!sm.is_running());
    }

    #[test]
    fn client_assoc_enables_sticky_tim_and_forwards_mac() {
        let mut sm = UapStateMachine::new();
        sm.handle(UapEvent::ConfigAck);
        sm.handle(UapEvent::UapStarted);
        let t = sm.handle(UapEvent::ClientAssoc { mac: [9; 6] });
        assert_eq!(t.user_event, Some(UserEvent::UapClientAssoc { mac: [9; 6] }));
        assert!(sm.sticky_tim_enabled());
        assert_eq!(sm.state(), UapState::Started);
    }

    #[test]
    fn channel_inherit_from_connected_sta() {
        let decision = decide_start_channel(None, Some(11), &[1, 6, 11]);
        assert_eq!(decision, StartDecision::InheritFromSta { channel: 11 });
    }

    #[test]
    fn constrained_channel_outside_allowed_set_is_rejected() {
        let decision = decide_start_channel(Some(14), None, &[1, 6, 11]);
        assert_eq!(decision, StartDecision::Rejected);
    }

    #[test]
    fn unconstrained_with_no_sta_link_runs_acs() {
        let decision = decide_start_channel(None, None, &[1, 6, 11]);
        assert_eq!(decision, StartDecision::Acs { candidates_start: 0 });
    }
}
