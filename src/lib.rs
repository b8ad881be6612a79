pub mod calendar;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod limits;
pub mod messaging;
pub mod model;
pub mod notify;
pub mod observability;
pub mod retry;
pub mod settings;
pub mod sql;
pub mod tenant;
pub mod wal;
pub mod wire;
