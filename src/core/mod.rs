mod errors;
mod hashing;
mod manager;
mod manager_worker;
mod registry;
mod task;
mod traits;
mod types;
mod validation;
mod worker;

pub use errors::{Result, UploadError, ValidationError};
pub use hashing::{hash_bytes, hash_file};
pub use manager::{FilteredEventReceiver, UploadManager, UploadManagerHandle};
pub use registry::TaskRegistry;
pub use task::{CancellationHandle, FileRef, FileSource, TaskError, TaskErrorKind, UploadTask};
pub use traits::{ProgressReporter, TransferFailure, TransferReceipt, TransferRequest, Transport};
pub(crate) use traits::TransferReport;
pub use types::{FileUploadProgress, UploadConfig, UploadEvent, UploadId, UploadStatus};
pub use validation::{guess_mime_type, validate_file};
