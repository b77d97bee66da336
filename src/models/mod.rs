pub mod account;
pub mod job;
pub mod sync;
pub mod task;
