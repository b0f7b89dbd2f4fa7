pub mod change;
pub mod config;
pub mod domain;
pub mod ena;
pub mod entity;
pub mod error;
pub mod graph;
pub mod output;
pub mod source;
pub mod store;
pub mod sync;
