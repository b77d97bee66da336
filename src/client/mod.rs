//! Box-side sync client: background scheduling, the local projection and the
//! dashboard state derived from it.

pub mod api;
pub mod dashboard;
pub mod observer;
pub mod repository;
pub mod scheduler;
pub mod sync;
