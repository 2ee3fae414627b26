//! Admission state store and account store, in-memory implementations.

mod accounts;
mod cache;
mod clock;
mod state;

pub use accounts::InMemoryAccountStore;
pub use cache::{CachedPolicy, ConfigCache, ConfigCacheError};
#[cfg(any(test, feature = "test-util"))]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use janus_types::{AccountStore, QuotaKind, QuotaRequest, StateStore, StoreError};
pub use state::InMemoryStateStore;
