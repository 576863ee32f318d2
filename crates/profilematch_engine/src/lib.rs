//! ProfileMatch engine: transports, progress channel driver, response cache and
//! backend API client.
mod api;
mod cache;
mod channel;
mod clock;
mod file_storage;
mod storage;
mod transport;
mod types;

pub use api::{AnalysisApi, ApiError, InterviewKit, InterviewQuestion, UploadResponse};
pub use cache::{CacheSettings, ExpiringCache, DEFAULT_NAMESPACE, DEFAULT_TTL};
pub use channel::{ChannelListener, ProgressChannel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use file_storage::FileStorage;
pub use storage::{MemoryStorage, Storage, StorageError};
pub use transport::{ws_endpoint, Connector, Transport, WsConnector};
pub use types::{ApiSettings, ChannelSettings, TransportError, DEFAULT_SERVER_URL};

pub use profilematch_core::{
    ChannelState, ConnectionState, JobId, Notice, ReconnectPolicy, Stage,
};
