//! Archive upload — tag construction, wallet signing, gateway client, and
//! the two bounded-concurrency pipelines.

mod arweave;
mod pipeline;
mod tags;
mod uploaders;
mod wallet;

pub use arweave::{ArchiveClient, ArchiveError, TagFilter};
pub use pipeline::{SlotProgress, SlotStatus, UploadError, UploadPipeline};
pub use tags::{
    clear_batch_tags, encrypted_batch_tags, sanitize_tag_value, validate_tags, Tag, TagError,
    APP_NAME,
};
pub use uploaders::{BatchUploader, ClearUploader, EncryptedUploader, PreparedUpload};
pub use wallet::{Wallet, WalletError};
