pub mod config;
pub mod dake;
pub mod engine;
pub mod error;
pub mod memory;
pub mod restrictor;
pub mod session;
pub mod storage;
pub mod transport;

pub use config::ServerConfig;
pub use engine::{Engine, EngineOptions, SecureRng};
pub use error::ServerError;
pub use memory::MemoryStorage;
pub use restrictor::{AcceptAll, DenyList, Restrictor};
pub use session::SessionManager;
pub use storage::Storage;
