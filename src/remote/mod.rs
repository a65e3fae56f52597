pub mod memory;
pub mod types;

pub use memory::{MemoryRemoteStore, RemoteOp};
pub use types::{
    AuthEvent, Credentials, Identity, RemoteError, RemoteErrorKind, RemoteStore, Session,
};
