//! Installable entries: the application + device + account bindings that are
//! kept signed, and the storage they live in.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteEntryStore;
pub use store::{EntryFilter, EntryStore, NewEntry, StoreError};
pub use types::{
    mask_account, DeviceClass, EntryId, InstallableEntry, RefreshErrorClass, RefreshRecord,
    Secret, DEFAULT_PROFILE_LIFETIME_DAYS,
};
