//! Match/Select: does a scan entry satisfy a profile, and which
//! match wins when several do.

use heapless::Vec;

use crate::profile::{Profile, SecurityType};
use crate::scan::{ScanEntry, SecurityBits, MAX_SCAN_CHANNELS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MatchFailure {
    ChannelMismatch,
    BssidMismatch,
    SsidMismatch,
    /// WEP profile matched an HT-capable entry; rejected per certification rule.
    WepRejectsHtCapable,
    /// WPA profile matched a TKIP-only entry.
    WpaRejectsTkipOnly,
    SecurityMismatch,
    RegulatoryDisallowed,
}

/// Does `entry` satisfy `profile`? All constrained fields must agree, and the
/// security profile must be compatible.
pub fn matches(
    profile: &Profile,
    entry: &ScanEntry,
    regulatory_allows: impl Fn(u8) -> bool,
) -> Result<(), MatchFailure> {
    if profile.flags.channel_specific {
        if Some(entry.channel) != profile.channel {
            return Err(MatchFailure::ChannelMismatch);
        }
    }

    if profile.flags.bssid_specific {
        if Some(entry.bssid) != profile.bssid {
            return Err(MatchFailure::BssidMismatch);
        }
    }

    if profile.flags.ssid_specific {
        let Some(ref wanted) = profile.ssid else {
            return Err(MatchFailure::SsidMismatch);
        };
        let direct = wanted.as_slice() == entry.ssid.as_slice();
        let via_owe = entry
            .owe_transition_ssid
            .as_ref()
            .map(|s| s.as_slice() == wanted.as_slice())
            .unwrap_or(false);
        if !direct && !via_owe {
            return Err(MatchFailure::SsidMismatch);
        }
    }

    if !regulatory_allows(entry.channel) {
        return Err(MatchFailure::RegulatoryDisallowed);
    }

    security_matches(profile, entry)
}

fn security_matches(profile: &Profile, entry: &ScanEntry) -> Result<(), MatchFailure> {
    let sec = entry.security;
    match profile.security.security_type {
        SecurityType::None => {
            if sec.0 == 0 {
                Ok(())
            } else {
                Err(MatchFailure::SecurityMismatch)
            }
        }
        SecurityType::WepOpen | SecurityType::WepShared => {
            if !sec.contains(SecurityBits::WEP) {
                return Err(MatchFailure::SecurityMismatch);
            }
            if entry.ht_capable {
                return Err(MatchFailure::WepRejectsHtCapable);
            }
            Ok(())
        }
        SecurityType::Wpa => {
            if !sec.contains(SecurityBits::WPA) {
                return Err(MatchFailure::SecurityMismatch);
            }
            if sec.contains(SecurityBits::TKIP_ONLY) {
                return Err(MatchFailure::WpaRejectsTkipOnly);
            }
            Ok(())
        }
        SecurityType::Wpa2 | SecurityType::Wpa2Ft => {
            if sec.contains(SecurityBits::WPA2) || sec.contains(SecurityBits::WPA2_SHA256) {
                Ok(())
            } else {
                Err(MatchFailure::SecurityMismatch)
            }
        }
        SecurityType::Wpa2Sha256 => {
            if sec.contains(SecurityBits::WPA2_SHA256) && profile.security.mfp_capable {
                Ok(())
            } else {
                Err(MatchFailure::SecurityMismatch)
            }
        }
        SecurityType::WpaWpa2Mixed => {
            if sec.contains(SecurityBits::WPA) || sec.contains(SecurityBits::WPA2) {
                Ok(())
            } else {
                Err(MatchFailure::SecurityMismatch)
            }
        }
        SecurityType::Wpa3Sae | SecurityType::Wpa3SaeFt => {
            if !sec.contains(SecurityBits::SAE) {
                return Err(MatchFailure::SecurityMismatch);
            }
            if !profile.security.mfp_capable {
                return Err(MatchFailure::SecurityMismatch);
            }
            Ok(())
        }
        SecurityType::Wpa2Wpa3Mixed => {
            if !(sec.contains(SecurityBits::SAE) || sec.contains(SecurityBits::WPA2)) {
                return Err(MatchFailure::SecurityMismatch);
            }
            if !profile.security.mfp_capable {
                return Err(MatchFailure::SecurityMismatch);
            }
            Ok(())
        }
        SecurityType::OweOnly => {
            if sec.contains(SecurityBits::OWE) {
                Ok(())
            } else {
                Err(MatchFailure::SecurityMismatch)
            }
        }
        SecurityType::Eap(_) => {
            if sec.contains(SecurityBits::WPA) || sec.contains(SecurityBits::WPA2) {
                Ok(())
            } else {
                Err(MatchFailure::SecurityMismatch)
            }
        }
        // A wildcard profile accepts whatever the entry offers; the concrete
        // type is decided by `resolve_wildcard` once a winner is picked.
        SecurityType::Wildcard => Ok(()),
    }
}

/// Resolves `SecurityType::Wildcard` to the strongest security the entry
/// offers, checked strongest-first: WPA2/WPA3-SAE mixed, SAE, WPA2, WPA,
/// WEP, OWE, then open.
pub fn resolve_wildcard(entry: &ScanEntry) -> SecurityType {
    let sec = entry.security;
    if sec.contains(SecurityBits::SAE) && sec.contains(SecurityBits::WPA2) {
        SecurityType::Wpa2Wpa3Mixed
    } else if sec.contains(SecurityBits::SAE) {
        SecurityType::Wpa3Sae
    } else if sec.contains(SecurityBits::WPA2) {
        SecurityType::Wpa2
    } else if sec.contains(SecurityBits::WPA) {
        SecurityType::WpaWpa2Mixed
    } else if sec.contains(SecurityBits::WEP) {
        SecurityType::WepOpen
    } else if sec.contains(SecurityBits::OWE) {
        SecurityType::OweOnly
    } else {
        SecurityType::None
    }
}

pub struct SelectionOutcome<'a> {
    pub best: Option<&'a ScanEntry>,
    /// Channels on which a zero-length-SSID ("hidden") entry was seen, useful
    /// for a directed follow-up scan when no visible match won.
    pub hidden_channels: Vec<u8, MAX_SCAN_CHANNELS>,
}

/// Iterates all scan results, keeping the single best match by highest RSSI.
/// Ties resolve to the first-seen entry (we only replace on strictly greater
/// RSSI). Also records channels that carried a hidden-SSID entry, so the
/// caller can trigger a directed follow-up scan.
pub fn select_best<'a>(
    profile: &Profile,
    entries: impl Iterator<Item = &'a ScanEntry>,
    regulatory_allows: impl Fn(u8) -> bool,
) -> SelectionOutcome<'a> {
    let mut best: Option<&ScanEntry> = None;
    let mut hidden_channels: Vec<u8, MAX_SCAN_CHANNELS> = Vec::new();

    for entry in entries {
        if entry.is_hidden() && !hidden_channels.contains(&entry.channel) {
            let _ = hidden_channels.push(entry.channel);
        }

        if matches(profile, entry, &regulatory_allows).is_ok() {
            let better = match best {
                None => true,
                Some(cur) => entry.rssi > cur.rssi,
            };
            if better {
                best = Some(entry);
            }
        }
    }

    SelectionOutcome { best, hidden_channels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BssType, IpConfig, Role, SecurityConfig};
    use heapless::Vec as HVec;

    fn profile_for(ssid: &[u8], security: SecurityConfig) -> Profile {
        Profile::new(
            "p",
            Some(ssid),
            None,
            None,
            Role::Sta,
            BssType::Infrastructure,
            security,
            IpConfig::Dhcp,
        )
        .unwrap()
    }

    fn entry(ssid: &[u8], bssid: [u8; 6], channel: u8, rssi: i8, security: u16) -> ScanEntry {
        ScanEntry {
            ssid: HVec::from_slice(ssid).unwrap(),
            bssid,
            channel,
            rssi,
            security: SecurityBits(security),
            ht_capable: false,
            beacon_period_ms: 100,
            dtim_period: 1,
            ft_mobility_domain: None,
            neighbor_report_supported: false,
            btm_supported: false,
            owe_transition_ssid: None,
        }
    }

    #[test]
    fn best_rssi_wins_among_matches() {
        let profile = profile_for(b"open_ap", SecurityConfig::open());
        let entries = [
            entry(b"open_ap", [1; 6], 6, -70, 0),
            entry(b"open_ap", [2; 6], 6, -55, 0),
            entry(b"open_ap", [3; 6], 6, -60, 0),
        ];
        let outcome = select_best(&profile, entries.iter(), |_| true);
        assert_eq!(outcome.best.unwrap().bssid, [2; 6]);
    }

    #[test]
    fn wep_profile_rejects_ht_capable_entry() {
        let profile = profile_for(b"wep_ap", SecurityConfig {
            security_type: SecurityType::WepOpen,
            ..SecurityConfig::open()
        });
        let mut e = entry(b"wep_ap", [1; 6], 6, -40, SecurityBits::WEP);
        e.ht_capable = true;
        assert_eq!(
            matches(&profile, &e, |_| true),
            Err(MatchFailure::WepRejectsHtCapable)
        );
    }

    #[test]
    fn hidden_ssid_channels_are_recorded_when_no_visible_match() {
        let profile = profile_for(b"ghost", SecurityConfig::open());
        let entries = [entry(b"", [1; 6], 11, -50, 0)];
        let outcome = select_best(&profile, entries.iter(), |_| true);
        assert!(outcome.best.is_none());
        assert_eq!(outcome.hidden_channels.as_slice(), &[11]);
    }

    #[test]
    fn wildcard_resolves_to_strongest_offered() {
        let e = entry(b"x", [1; 6], 1, -40, SecurityBits::SAE | SecurityBits::WPA2);
        assert_eq!(resolve_wildcard(&e), SecurityType::Wpa2Wpa3Mixed);
    }

    #[test]
    fn regulatory_disallowed_channel_is_rejected() {
        let profile = profile_for(b"open_ap", SecurityConfig::open());
        let e = entry(b"open_ap", [1; 6], 14, -40, 0);
        assert_eq!(
            matches(&profile, &e, |ch| ch != 14),
            Err(MatchFailure::RegulatoryDisallowed)
        );
    }
}
