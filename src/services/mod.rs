pub mod accounts;
pub mod queue;
pub mod registration;
pub mod store;
pub mod worker;
