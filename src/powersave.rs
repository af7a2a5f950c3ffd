//! IEEE-PS and deep-sleep-PS sub-state machines.
//!
//! Both sequencers share one shape (`Init -> Configuring -> Awake/PreSleep ->
//! Sleep -> PreDisable -> Disabling -> Init`); they differ only in which
//! connection state makes them legal to enter (IEEE-PS: STA `Connected`;
//! deep-sleep: STA disconnected) and which driver calls and user-event
//! variant they use, so a single generic state machine backs both.

use crate::callback::{PsMode, UserEvent};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PsState {
    Init,
    Configuring,
    Awake,
    PreSleep,
    Sleep,
    PreDisable,
    Disabling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PsEvent {
    Enable,
    EnableDone,
    Awake,
    Sleep,
    SlpCfm,
    Disable,
    DisableDone,
}

/// What the sub-machine wants the control task to do as a result of an
/// event, beyond the bare state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsAction {
    None,
    /// Entering `PreSleep` with no in-flight transfer: send host-sleep config
    /// then a sleep-confirm.
    SendHostSleepAndConfirm,
    /// Entering `PreSleep` while a transfer is in-flight: latch
    /// `req_sl_confirm` and let the control task's timed re-dequeue retry.
    DeferSlpCfm,
    EmitEnter,
    EmitExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IeeePsMode {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepSleepPsMode {
    On,
    Off,
}

/// One power-save sequencer. `kind` picks which [`crate::callback::PsMode`]
/// it reports under.
pub struct PsStateMachine {
    state: PsState,
    kind: PsMode,
    in_flight_transfer: bool,
    req_sl_confirm: bool,
    /// The very first `PS_EXIT` after platform wake is suppressed.
    skip_ds_exit_cb: bool,
}

impl PsStateMachine {
    pub const fn new(kind: PsMode) -> Self {
        Self {
            state: PsState::Init,
            kind,
            in_flight_transfer: false,
            req_sl_confirm: false,
            skip_ds_exit_cb: matches!(kind, PsMode::DeepSleep),
        }
    }

    pub fn state(&self) -> PsState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, PsState::Init | PsState::Disabling)
    }

    /// True once `Enable` has moved this machine out of `Init`, including
    /// while it's winding down through `Disabling` on the way back. Driver
    /// events must keep being routed here through that teardown, or the
    /// closing `DisableDone` never arrives and the machine never returns to
    /// `Init`.
    pub fn is_running(&self) -> bool {
        !matches!(self.state, PsState::Init)
    }

    /// Call when the driver reports whether a transfer is currently in flight;
    /// gates the sleep-confirm handshake on re-entry to `PreSleep`.
    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight_transfer = in_flight;
    }

    pub fn handle(&mut self, event: PsEvent) -> Result<PsAction, Error> {
        use PsEvent::*;
        use PsState::*;

        let (next, action) = match (self.state, event) {
            (Init, Enable) | (Init, EnableDone) => (Configuring, PsAction::None),
            (Configuring, Sleep) => (PreSleep, self.enter_presleep()),
            (Configuring, Awake) => (Awake, PsAction::None),
            (Configuring, Disable) => (Disabling, PsAction::None),
            (Awake, Sleep) => (PreSleep, self.enter_presleep()),
            (Awake, Disable) => (Disabling, PsAction::None),
            (PreSleep, SlpCfm) => {
                self.req_sl_confirm = false;
                (Sleep, PsAction::EmitEnter)
            }
            (PreSleep, Disable) => {
                self.req_sl_confirm = false;
                (Disabling, PsAction::None)
            }
            (PreSleep, Sleep) => (PreSleep, self.enter_presleep()),
            (Sleep, Awake) => (Awake, self.exit_action()),
            (Sleep, Sleep) => (PreSleep, self.enter_presleep()),
            (Sleep, Disable) => (PreDisable, PsAction::None),
            (PreDisable, Enable) => (Disabling, PsAction::EmitExit),
            (Disabling, DisableDone) => (Init, PsAction::None),
            // Everything else is idempotent / ignored in the current state.
            (s, _) => (s, PsAction::None),
        };

        self.state = next;
        Ok(action)
    }

    fn enter_presleep(&mut self) -> PsAction {
        if self.in_flight_transfer {
            self.req_sl_confirm = true;
            PsAction::DeferSlpCfm
        } else {
            PsAction::SendHostSleepAndConfirm
        }
    }

    fn exit_action(&mut self) -> PsAction {
        if self.skip_ds_exit_cb {
            self.skip_ds_exit_cb = false;
            PsAction::None
        } else {
            PsAction::EmitExit
        }
    }

    pub fn has_pending_sleep_confirm(&self) -> bool {
        self.req_sl_confirm
    }

    pub fn to_user_event(&self, action: PsAction) -> Option<UserEvent> {
        match action {
            PsAction::EmitEnter => Some(UserEvent::PsEnter(self.kind)),
            PsAction::EmitExit => Some(UserEvent::PsExit(self.kind)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ieee_ps_enter_exit_sequence() {
        let mut sm = PsStateMachine::new(PsMode::Ieee);
        assert_eq!(sm.handle(PsEvent::Enable).unwrap(), PsAction::None);
        assert_eq!(sm.state(), PsState::Configuring);

        assert_eq!(
            sm.handle(PsEvent::Sleep).unwrap(),
            PsAction::SendHostSleepAndConfirm
        );
        assert_eq!(sm.state(), PsState::PreSleep);

        assert_eq!(sm.handle(PsEvent::SlpCfm).unwrap(), PsAction::EmitEnter);
        assert_eq!(sm.state(), PsState::Sleep);

        assert_eq!(sm.handle(PsEvent::Disable).unwrap(), PsAction::None);
        assert_eq!(sm.state(), PsState::PreDisable);

        assert_eq!(sm.handle(PsEvent::Enable).unwrap(), PsAction::EmitExit);
        assert_eq!(sm.state(), PsState::Disabling);

        assert_eq!(sm.handle(PsEvent::DisableDone).unwrap(), PsAction::None);
        assert_eq!(sm.state(), PsState::Init);
    }

    #[test]
    fn presleep_defers_confirm_while_transfer_in_flight() {
        let mut sm = PsStateMachine::new(PsMode::Ieee);
        sm.handle(PsEvent::Enable).unwrap();
        sm.set_in_flight(true);
        assert_eq!(sm.handle(PsEvent::Sleep).unwrap(), PsAction::DeferSlpCfm);
        assert!(sm.has_pending_sleep_confirm());
    }

    #[test]
    fn deep_sleep_first_exit_is_suppressed() {
        let mut sm = PsStateMachine::new(PsMode::DeepSleep);
        sm.handle(PsEvent::Enable).unwrap();
        sm.handle(PsEvent::Sleep).unwrap();
        sm.handle(PsEvent::SlpCfm).unwrap();
        assert_eq!(sm.state(), PsState::Sleep);

        // First exit after wake: suppressed.
        assert_eq!(sm.handle(PsEvent::Awake).unwrap(), PsAction::None);

        // Subsequent cycles emit normally.
        sm.handle(PsEvent::Sleep).unwrap();
        sm.handle(PsEvent::SlpCfm).unwrap();
        assert_eq!(sm.handle(PsEvent::Awake).unwrap(), PsAction::EmitExit);
    }
}
