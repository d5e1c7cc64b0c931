pub mod backend;
pub mod gcs;
pub mod local;
pub mod remote;
pub mod s3;
pub mod types;

pub use backend::{BackendType, RemoteStorage, S3Provider, TransferProgress, TransferUpdate};
pub use local::LocalScanner;
pub use remote::{ObjectStoreRemote, TransferOptions};
pub use types::*;
