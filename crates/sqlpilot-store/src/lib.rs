pub mod artifacts;
pub mod database;
pub mod error;
pub mod target;
pub mod turn_logs;

pub use artifacts::{ArtifactPair, ArtifactWriter};
pub use database::Database;
pub use error::StoreError;
pub use target::{QueryRows, SqlDatabase, SqliteDatabase};
pub use turn_logs::{TurnLogRepo, TurnLogRow};
