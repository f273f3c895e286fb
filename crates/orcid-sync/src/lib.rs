pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod profiles;
pub mod records;
pub mod resolver;
pub mod ror;
pub mod runs;
pub mod scheduler;
pub mod secrets;
pub mod store;

pub use api::{ApiClient, ApiError, ErrorKind, HttpTransport, ReqwestTransport, TokenManager};
pub use clock::{Clock, SystemClock};
pub use config::{load_config, load_or_default, ConfigError, SyncConfig};
pub use db::{Database, DatabaseError};
pub use error::{Result, SyncError};
pub use logging::init_logging;
pub use model::{
    CacheEntry, CacheRun, Institution, RecordKind, ResearcherProfile, ResearcherStatus, RunCounts,
    RunStatus,
};
pub use profiles::{ProfileReport, ProfileSyncOptions};
pub use records::RecordBuilder;
pub use resolver::InstitutionResolver;
pub use ror::RorClient;
pub use runs::RunTracker;
pub use scheduler::{CancelToken, Outcome, PairReport, RebuildOptions, Report, Scheduler};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use store::CacheStore;
