pub mod password_hash;
pub mod token;

pub use password_hash::{HashParams, PasswordHashPool, PoolStatus, PooledWorker, WorkerState};
