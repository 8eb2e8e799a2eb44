pub mod buffer;
pub mod cache;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod scheduler;
pub mod schema;
pub mod session;
pub mod store;
pub mod sync;
