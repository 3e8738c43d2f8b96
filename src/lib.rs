pub mod batch;
pub mod config;
pub mod error;
pub mod gate;
pub mod isg;
pub mod model;
pub mod reconcile;
pub mod sanitize;
pub mod store;
