mod worker;

pub use worker::{SyncWorker, SyncWorkerStats};
