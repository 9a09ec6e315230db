pub mod types;

pub use types::CronError;
