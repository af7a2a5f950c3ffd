//! Network Store: a fixed-size array of profile slots.
//!
//! Reads (`get_by_name`, `get_by_index`, `count`) are pure and allowed in
//! any state. `add`/`remove` take a `busy` predicate supplied by the
//! control task so the store itself stays free of knowledge about the STA
//! or µAP state machines; the control task is what actually knows whether
//! a given index is connected/associating/started.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::error::Error;
use crate::profile::{Profile, MAX_PROFILES};

#[derive(Default)]
pub struct NetworkStore {
    slots: Vec<Option<Profile>, MAX_PROFILES>,
}

impl NetworkStore {
    pub fn new() -> Self {
        let mut slots = Vec::new();
        for _ in 0..MAX_PROFILES {
            let _ = slots.push(None);
        }
        Self { slots }
    }

    /// Adds a profile. Fails with `DuplicateName`-equivalent (`Error::Param`) if
    /// the name is already taken, `Error::Nomem` if the store is full.
    pub fn add(&mut self, profile: Profile) -> Result<usize, Error> {
        if self.get_by_name(&profile.name).is_some() {
            return Err(Error::Param);
        }
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(profile);
                return Ok(idx);
            }
        }
        Err(Error::Nomem)
    }

    /// Removes a profile by name. `busy(idx)` must return true if that slot's
    /// interface is actively connected/associating/started; removal is then
    /// refused with `Error::State`.
    pub fn remove(&mut self, name: &str, busy: impl Fn(usize) -> bool) -> Result<(), Error> {
        let idx = self
            .slots
            .iter()
            .position(|s| s.as_ref().map(|p| p.name.as_str()) == Some(name))
            .ok_or(Error::Param)?;

        if busy(idx) {
            return Err(Error::State);
        }

        self.slots[idx] = None;
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<(usize, &Profile)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.as_ref().filter(|p| p.name == name).map(|p| (i, p)))
    }

    pub fn get_by_index(&self, idx: usize) -> Option<&Profile> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    pub fn get_by_index_mut(&mut self, idx: usize) -> Option<&mut Profile> {
        self.slots.get_mut(idx).and_then(|s| s.as_mut())
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Profile)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i, p)))
    }
}

/// The store guarded behind a mutex so both the control task and a
/// [`crate::handle::Handle`] on another task can add/remove/read profiles
/// synchronously.
pub struct SharedStore {
    inner: Mutex<NoopRawMutex, RefCell<NetworkStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(RefCell::new(NetworkStore::new())) }
    }

    pub fn add(&self, profile: Profile) -> Result<usize, Error> {
        self.inner.lock(|s| s.borrow_mut().add(profile))
    }

    pub fn remove(&self, name: &str, busy: impl Fn(usize) -> bool) -> Result<(), Error> {
        self.inner.lock(|s| s.borrow_mut().remove(name, busy))
    }

    pub fn get_by_name(&self, name: &str) -> Option<(usize, Profile)> {
        self.inner.lock(|s| s.borrow().get_by_name(name).map(|(i, p)| (i, p.clone())))
    }

    pub fn get_by_index(&self, idx: usize) -> Option<Profile> {
        self.inner.lock(|s| s.borrow().get_by_index(idx).cloned())
    }

    /// Applies `f` to the stored profile at `idx`, used by the control task
    /// to fill in discovered attributes once a scan entry wins.
    pub(crate) fn update(&self, idx: usize, f: impl FnOnce(&mut Profile)) {
        self.inner.lock(|s| {
            if let Some(p) = s.borrow_mut().get_by_index_mut(idx) {
                f(p);
            }
        })
    }

    pub fn count(&self) -> usize {
        self.inner.lock(|s| s.borrow().count())
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BssType, IpConfig, Role, SecurityConfig};

    fn simple_profile(name: &str) -> Profile {
        Profile::new(
            name,
            Some(b"my_ssid"),
            None,
            None,
            Role::Sta,
            BssType::Infrastructure,
            SecurityConfig::open(),
            IpConfig::Dhcp,
        )
        .unwrap()
    }

    #[test]
    fn add_and_remove_is_a_no_op_on_the_rest_of_the_store() {
        let mut store = NetworkStore::new();
        let a = store.add(simple_profile("a")).unwrap();
        let _b = store.add(simple_profile("b")).unwrap();
        assert_eq!(store.count(), 2);

        store.remove("a", |_| false).unwrap();
        assert_eq!(store.count(), 1);
        assert!(store.get_by_index(a).is_none());
        assert!(store.get_by_name("b").is_some());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut store = NetworkStore::new();
        store.add(simple_profile("dup")).unwrap();
        assert_eq!(store.add(simple_profile("dup")), Err(Error::Param));
    }

    #[test]
    fn store_rejects_beyond_capacity() {
        let mut store = NetworkStore::new();
        for i in 0..MAX_PROFILES {
            let name: heapless::String<8> = {
                let mut s = heapless::String::new();
                core::fmt::write(&mut s, format_args!("n{i}")).unwrap();
                s
            };
            store.add(simple_profile(&name)).unwrap();
        }
        assert_eq!(store.add(simple_profile("overflow")), Err(Error::Nomem));
    }

    #[test]
    fn remove_refused_while_busy() {
        let mut store = NetworkStore::new();
        let idx = store.add(simple_profile("a")).unwrap();
        assert_eq!(store.remove("a", |i| i == idx), Err(Error::State));
        assert!(store.get_by_index(idx).is_some());
    }

    #[test]
    fn shared_store_add_and_remove_is_a_no_op_on_the_rest_of_the_store() {
        let shared = SharedStore::new();
        let a = shared.add(simple_profile("a")).unwrap();
        shared.add(simple_profile("b")).unwrap();
        assert_eq!(shared.count(), 2);

        shared.remove("a", |_| false).unwrap();
        assert_eq!(shared.count(), 1);
        assert!(shared.get_by_index(a).is_none());
        assert!(shared.get_by_name("b").is_some());
    }
}
