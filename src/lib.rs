#![deny(
    absolute_paths_not_starting_with_crate,
    anonymous_parameters,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    non_ascii_idents,
    trivial_numeric_casts,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

//! # qiniu-multipart-transfer
//!
//! ## 七牛可恢复分片传输引擎
//!
//! 将本地大文件切分为多个分片，通过远端服务的分片上传协议并发上传：
//! 创建远端分片上传，为每个分片生成临时文件并签发上传 URL，以有限的并发数上传分片，
//! 全部分片完成后按分片号顺序完成远端分片上传；任何失败或取消都会取消远端分片上传，
//! 不会在远端遗留未完成的分片上传。
//!
//! 远端服务的 HTTP 协议由调用方通过 [`RemoteServiceProxy`] 和 [`PartUrlSigner`] 接入。
//!
//! ```ignore
//! use qiniu_multipart_transfer::{ObjectParams, TransferManager};
//!
//! let manager = TransferManager::new(proxy, signer);
//! let outcome = manager.upload_path("/path/to/file", ObjectParams::builder("bucket", "key").build())?;
//! let parts = outcome.into_result()?;
//! ```

mod concurrency_provider;
mod data_partition_provider;
mod error;
mod object_params;
mod part_planner;
mod partial_file;
mod progress;
mod remote;
mod reserved_headers;
mod resumable_recorder;
mod retrier;
mod scheduler;
mod session;
mod source_key;
mod transfer_manager;

pub use concurrency_provider::{
    Concurrency, ConcurrencyProvider, ConcurrencyProviderFeedback, FixedConcurrencyProvider,
};
pub use data_partition_provider::{
    DataPartitionProvider, DataPartitionProviderFeedback, FixedDataPartitionProvider,
    LimitedDataPartitionProvider, PartSize,
};
pub use error::{Error as TransferError, ErrorKind as TransferErrorKind, Result as TransferResult};
pub use object_params::{ObjectParams, ObjectParamsBuilder};
pub use part_planner::{Part, PartLimits, PartPlan, PartPlanner};
pub use partial_file::{PartialFile, PartialFileCarver, TempFileCarver};
pub use remote::{
    AbortUploadRequest, CompleteUploadRequest, CompletedPart, CreateUploadRequest, CreatedUpload,
    PartUrlSigner, RemoteServiceProxy, UploadId, UploadPartRequest, UploadedPartResponse,
};
pub use reserved_headers::{filter_reserved_headers, is_reserved_header};
pub use resumable_recorder::{
    AppendOnlyResumableRecorderMedium, DummyResumableRecorder, FileSystemResumableRecorder,
    ReadOnlyResumableRecorderMedium, ResumableRecorder,
};
pub use retrier::{ExponentialBackoff, LimitedRetrier};
pub use scheduler::{CancellationFlag, SessionKey, TaskHandle, TaskRegistry, TransferExecutor};
pub use session::{
    PartState, RemoteUploadState, SessionCanceller, SessionOutcome, SessionState, TransferEvent,
    UploadSession,
};
pub use source_key::SourceKey;
pub use transfer_manager::{TransferManager, TransferManagerBuilder};

/// 将所有 Trait 全部重新导出，方便统一导入
pub mod prelude {
    pub use super::{
        ConcurrencyProvider, DataPartitionProvider, PartUrlSigner, PartialFileCarver, RemoteServiceProxy,
        ResumableRecorder,
    };
}
