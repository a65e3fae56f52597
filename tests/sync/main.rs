//! Integration tests for `SyncCoordinator` against the in-process remote store.


mod capacity;
mod cross_tab;
mod load;
mod mutations;
mod session;
