//! Host-Sleep Coordinator: programs wake-on-X filters and gates
//! sleep-confirm on in-flight transfers via the PS sub-machines.

use crate::error::Error;

/// Wake conditions are a bitmap; `CANCEL` is the sentinel that clears
/// configuration rather than setting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeConditions(pub u32);

impl WakeConditions {
    pub const BROADCAST: u32 = 1 << 0;
    pub const UNICAST: u32 = 1 << 1;
    pub const MAC_EVENT: u32 = 1 << 2;
    pub const MULTICAST: u32 = 1 << 3;
    pub const ARP_BROADCAST: u32 = 1 << 4;
    pub const MGMT_FRAME: u32 = 1 << 5;
    pub const CANCEL: u32 = u32::MAX;

    pub const fn is_cancel(&self) -> bool {
        self.0 == Self::CANCEL
    }
}

/// Which interface currently owns the IPv4 address used in the host-sleep
/// config frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepInterface {
    Sta,
    Uap,
}

/// `wlan_send_host_sleep_cfg`'s action byte: the first call programs the
/// conditions, the PS sub-machine's own sleep-confirm path activates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostSleepAction {
    Configure,
    Activate,
}

#[derive(Default)]
pub struct HostSleepCoordinator {
    configured: Option<WakeConditions>,
}

impl HostSleepCoordinator {
    pub const fn new() -> Self {
        Self { configured: None }
    }

    /// `sta_ipv4_up`/`uap_started` pick which interface to address the
    /// command to; neither being true is a hard failure (no address to
    /// attach wake filters to).
    pub fn select_interface(
        &self,
        sta_ipv4_up: bool,
        uap_started: bool,
    ) -> Result<SleepInterface, Error> {
        if sta_ipv4_up {
            Ok(SleepInterface::Sta)
        } else if uap_started {
            Ok(SleepInterface::Uap)
        } else {
            Err(Error::State)
        }
    }

    /// Applies `conditions`. Cancel always succeeds and clears configuration.
    /// Reconfiguring with the same bitmap is idempotent; reconfiguring with a
    /// different bitmap while already configured is refused.
    pub fn configure(&mut self, conditions: WakeConditions) -> Result<(), Error> {
        if conditions.is_cancel() {
            self.configured = None;
            return Ok(());
        }

        match self.configured {
            None => {
                self.configured = Some(conditions);
                Ok(())
            }
            Some(existing) if existing == conditions => Ok(()),
            Some(_) => Err(Error::State),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    /// The currently-armed wake-on-X bitmap, if any, for the PS sub-machine's
    /// sleep-confirm path to carry into its own `send_host_sleep_cfg` call.
    pub fn armed_conditions(&self) -> Option<u32> {
        self.configured.map(|c| c.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconfigure_with_same_conditions_is_idempotent() {
        let mut c = HostSleepCoordinator::new();
        let w = WakeConditions(WakeConditions::UNICAST | WakeConditions::MGMT_FRAME);
        c.configure(w).unwrap();
        c.configure(w).unwrap();
        assert!(c.is_configured());
    }

    #[test]
    fn reconfigure_with_different_conditions_is_refused() {
        let mut c = HostSleepCoordinator::new();
        c.configure(WakeConditions(WakeConditions::UNICAST)).unwrap();
        assert_eq!(
            c.configure(WakeConditions(WakeConditions::BROADCAST)),
            Err(Error::State)
        );
    }

    #[test]
    fn cancel_clears_configuration_and_allows_new_reconfig() {
        let mut c = HostSleepCoordinator::new();
        c.configure(WakeConditions(WakeConditions::UNICAST)).unwrap();
        c.configure(WakeConditions(WakeConditions::CANCEL)).unwrap();
        assert!(!c.is_configured());
        c.configure(WakeConditions(WakeConditions::BROADCAST)).unwrap();
    }

    #[test]
    fn interface_selection_prefers_sta() {
        let c = HostSleepCoordinator::new();
        assert_eq!(c.select_interface(true, true), Ok(SleepInterface::Sta));
        assert_eq!(c.select_interface(false, true), Ok(SleepInterface::Uap));
        assert_eq!(c.select_interface(false, false), Err(Error::State));
    }
}
