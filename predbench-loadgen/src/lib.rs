pub mod call;
pub mod dispatch;
pub mod metrics;
pub mod report;
pub mod server;
pub mod workload;
