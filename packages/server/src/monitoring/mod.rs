mod load;

pub use load::{LoadMetrics, LoadMonitor, availability_score};
