//! tablesync - Library
//! Table synchronization between relational databases

pub mod config;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod sync;
