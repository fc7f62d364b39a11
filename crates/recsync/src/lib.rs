pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod lock;
pub mod logging;
pub mod mail;
pub mod money;
pub mod preview;
pub mod sanitize;
pub mod secrets;
pub mod store;
pub mod sync;

pub use config::{load_settings, Environment, SyncSettings};
pub use db::Database;
pub use error::{
    ConfigError, ExtractError, LockError, PreviewError, RecsyncError, Result, StoreError,
    SyncError,
};
pub use lock::{LocalLock, RunLock};
pub use mail::{MailProvider, RestMailboxClient};
pub use preview::{PreviewPipeline, SnapshotRenderer};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, TokenVault};
pub use store::{FileStore, FilesystemStore, MemoryStore};
pub use sync::{
    RunStatus, SaveConnectionRequest, StartSync, StartSyncRequest, SyncEngine, SyncPhase,
    SyncProgressBroadcaster, SyncProgressEvent,
};
