pub mod config;
pub mod error;
pub mod queue;
pub mod transport;
pub mod utils;

// 重新导出核心类型
pub use config::{ConfigError, QueueConfig, ResumeMode, TransportConfig, UplinkConfig};
pub use error::{Result, UploadError};
pub use queue::{
    FileSource,
    QueueSnapshot,
    QueueStats,
    TaskId,
    TaskStatus,
    UploadOptions,
    UploadQueue,
    UploadQueueHandle,
    UploadTask,
};
pub use transport::{
    CatalogSink,
    HttpCatalog,
    HttpStorageClient,
    ProgressFn,
    StorageTransport,
    TransferMode,
};
