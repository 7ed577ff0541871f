mod error;
mod hash;
mod key;
mod staged;
mod traits;
mod verify;

pub mod filesystem;

pub use error::StorageError;
pub use hash::ContentHash;
pub use key::BlobKey;
pub use staged::StagedBlob;
pub use traits::{BlobStore, BoxReader};
pub use verify::{Verified, copy_verified};
