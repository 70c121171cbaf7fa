//! Application startup utilities module.

mod logging;
mod storage;

pub use logging::{AUDIT_LOG_FILE, LoggingConfig, LoggingGuard, ROOT_LOG_FILE, init_logging};
pub use storage::{Services, open_persistence};
