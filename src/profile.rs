//! The stored network profile and its validation rules.

use heapless::{String, Vec};

use crate::error::Error;

/// Maximum number of stored profiles.
pub const MAX_PROFILES: usize = 5;
/// Maximum SSID length in bytes.
pub const MAX_SSID_LEN: usize = 32;
/// Maximum stored profile name length.
pub const MAX_NAME_LEN: usize = 32;

pub type Ssid = Vec<u8, MAX_SSID_LEN>;
pub type Bssid = [u8; 6];

/// Zero BSSID means "match any"
pub const BSSID_ANY: Bssid = [0; 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Sta,
    Uap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BssType {
    Infrastructure,
    IndependentBss,
}

/// Security type tag. `Wildcard` is resolved to a concrete type
/// at match time by [`crate::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityType {
    None,
    WepOpen,
    WepShared,
    Wpa,
    Wpa2,
    Wpa2Sha256,
    WpaWpa2Mixed,
    Wpa2Ft,
    Wpa3Sae,
    Wpa3SaeFt,
    Wpa2Wpa3Mixed,
    OweOnly,
    Eap(EapVariant),
    Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EapVariant {
    Tls,
    Ttls,
    Peap,
    Leap,
}

/// Bitmap of cipher suites offered/required. One bit per cipher; stored as `u8`
/// the way the firmware's scan-entry cipher fields arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CipherSuites(pub u8);

impl CipherSuites {
    pub const WEP40: u8 = 1 << 0;
    pub const WEP104: u8 = 1 << 1;
    pub const TKIP: u8 = 1 << 2;
    pub const CCMP: u8 = 1 << 3;
    pub const GCMP: u8 = 1 << 4;
    pub const GCMP_256: u8 = 1 << 5;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub const fn with(mut self, bit: u8) -> Self {
        self.0 |= bit;
        self
    }
}

/// Security configuration of a stored profile. Invariants are checked in
/// [`SecurityConfig::validate`] and enforced by `NetworkStore::add`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityConfig {
    pub security_type: SecurityType,
    pub passphrase: Option<String<64>>,
    /// Raw 32-byte PSK, pre-derived from the passphrase (64 hex chars).
    pub psk: Option<[u8; 32]>,
    pub sae_password: Option<String<255>>,
    pub pmk: Option<[u8; 32]>,
    pub mfp_capable: bool,
    pub mfp_required: bool,
    pub pairwise_ciphers: CipherSuites,
    pub group_ciphers: CipherSuites,
}

impl SecurityConfig {
    pub fn open() -> Self {
        Self {
            security_type: SecurityType::None,
            passphrase: None,
            psk: None,
            sae_password: None,
            pmk: None,
            mfp_capable: false,
            mfp_required: false,
            pairwise_ciphers: CipherSuites::empty(),
            group_ciphers: CipherSuites::empty(),
        }
    }

    pub fn wpa2_psk(passphrase: &str) -> Result<Self, Error> {
        let mut s = Self::open();
        s.security_type = SecurityType::Wpa2;
        s.passphrase = Some(String::try_from(passphrase).map_err(|_| Error::Param)?);
        s.validate()?;
        Ok(s)
    }

    pub fn wpa3_sae(password: &str) -> Result<Self, Error> {
        let mut s = Self::open();
        s.security_type = SecurityType::Wpa3Sae;
        s.sae_password = Some(String::try_from(password).map_err(|_| Error::Param)?);
        s.mfp_capable = true;
        s.mfp_required = true;
        s.validate()?;
        Ok(s)
    }

    /// Checks the internal-consistency invariants of a security config.
    pub fn validate(&self) -> Result<(), Error> {
        match self.security_type {
            SecurityType::Wpa3Sae | SecurityType::Wpa3SaeFt => {
                if !self.mfp_required {
                    return Err(Error::Param);
                }
                if !self.mfp_capable {
                    return Err(Error::Param);
                }
            }
            SecurityType::Wpa2Sha256 => {
                if !self.mfp_capable {
                    return Err(Error::Param);
                }
            }
            _ => {}
        }

        if let Some(ref pass) = self.passphrase {
            validate_psk_ascii_or_hex(pass)?;
        }

        if let Some(ref sae) = self.sae_password {
            if sae.len() < 8 || sae.len() > 255 {
                return Err(Error::Param);
            }
        }

        Ok(())
    }
}

/// PSK/passphrase: 8..63 printable ASCII, or exactly 64 hex digits.
pub fn validate_psk_ascii_or_hex(pass: &str) -> Result<(), Error> {
    let len = pass.len();
    if len == 64 {
        if pass.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(());
        }
        return Err(Error::Param);
    }
    if (8..=63).contains(&len) && pass.bytes().all(|b| b.is_ascii()) {
        return Ok(());
    }
    Err(Error::Param)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpConfig {
    Static {
        addr: core::net::Ipv4Addr,
        gateway: core::net::Ipv4Addr,
        mask: core::net::Ipv4Addr,
        dns1: Option<core::net::Ipv4Addr>,
        dns2: Option<core::net::Ipv4Addr>,
    },
    Dhcp,
    LinkLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ipv6Config {
    pub enabled: bool,
}

/// Attributes discovered from a winning scan entry and cached back onto the profile.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredAttributes {
    pub channel: u8,
    pub beacon_period_ms: u16,
    pub dtim_period: u8,
    pub ht_capable: bool,
    pub vht_capable: bool,
    pub ft_mobility_domain: Option<u16>,
    pub neighbor_report_supported: bool,
    pub btm_supported: bool,
    pub owe_transition_ssid: Option<[u8; MAX_SSID_LEN]>,
    pub owe_transition_ssid_len: u8,
}

/// Flags derived at add-time recording which fields the user actually
/// constrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProfileFlags {
    pub ssid_specific: bool,
    pub bssid_specific: bool,
    pub channel_specific: bool,
    pub security_specific: bool,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Profile {
    pub name: String<MAX_NAME_LEN>,
    pub ssid: Option<Ssid>,
    pub bssid: Option<Bssid>,
    /// `None` means "any channel".
    pub channel: Option<u8>,
    pub role: Role,
    pub bss_type: BssType,
    pub security: SecurityConfig,
    pub ip: IpConfig,
    pub ipv6: Option<Ipv6Config>,
    pub discovered: DiscoveredAttributes,
    pub flags: ProfileFlags,
}

impl Profile {
    pub fn new(
        name: &str,
        ssid: Option<&[u8]>,
        bssid: Option<Bssid>,
        channel: Option<u8>,
        role: Role,
        bss_type: BssType,
        security: SecurityConfig,
        ip: IpConfig,
    ) -> Result<Self, Error> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::Param);
        }
        if ssid.is_none() && bssid.is_none() {
            // at least one of SSID/BSSID must be constrained
            return Err(Error::Param);
        }
        if let Some(ssid) = ssid {
            if ssid.len() > MAX_SSID_LEN {
                return Err(Error::Param);
            }
        }
        if role == Role::Uap {
            if let IpConfig::Static { addr, gateway, .. } = ip {
                if addr != gateway {
                    return Err(Error::Param);
                }
            }
        }
        security.validate()?;

        let ssid_vec = match ssid {
            Some(s) => Some(Vec::from_slice(s).map_err(|_| Error::Param)?),
            None => None,
        };

        let flags = ProfileFlags {
            ssid_specific: ssid_vec.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
            bssid_specific: bssid.map(|b| b != BSSID_ANY).unwrap_or(false),
            channel_specific: channel.map(|c| c != 0).unwrap_or(false),
            security_specific: !matches!(security.security_type, SecurityType::Wildcard),
        };

        let mut discovered = DiscoveredAttributes::default();
        if role == Role::Uap {
            // Default 802.11n/ac capability when the profile doesn't constrain it.
            discovered.ht_capable = true;
            discovered.vht_capable = true;
        }

        Ok(Self {
            name: String::try_from(name).map_err(|_| Error::Param)?,
            ssid: ssid_vec,
            bssid,
            channel: channel.filter(|c| *c != 0),
            role,
            bss_type,
            security,
            ip,
            ipv6: None,
            discovered,
            flags,
        })
    }
}
