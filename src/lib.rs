// Базовые модули
pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;

// Граница с SQL-движком (src/engine/{mod,sqlite}.rs)
pub mod engine;
// Реестр версий и снапшоты (src/snapshots/{mod,registry,manager}.rs)
pub mod snapshots;
// Сессии и контроллер (src/session/{mod,controller}.rs)
pub mod session;

// Утилиты (now_nanos, file_checksum, quote_literal)
pub mod util;

// CLI (используется бинарником kingdom)
pub mod cli;

// Удобные реэкспорты
pub use config::{ControllerBuilder, KingdomConfig};
pub use engine::{Access, Engine, EngineConn, EngineError, Row, SqliteConn, SqliteEngine, Value};
pub use error::{KingdomError, Result};
pub use session::{connect, LockMode, Session, SessionController};
pub use snapshots::{SnapshotManager, VerifyReport, VersionRecord, VersionRegistry};
