#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![allow(async_fn_in_trait)]

#[macro_use]
mod fmt;

pub mod callback;
pub mod control;
pub mod driver;
pub mod error;
pub mod handle;
pub mod hostsleep;
pub mod powersave;
pub mod profile;
pub mod roam;
pub mod scan;
pub mod select;
pub mod sta;
pub mod state;
pub mod store;
pub mod uap;

pub use callback::UserEvent;
pub use control::{ControlTask, Event, EventBus};
pub use driver::Driver;
pub use error::Error;
pub use handle::{new, Handle, WlanResources};
pub use profile::Profile;
pub use state::{Ipv4Address, WlanState};
