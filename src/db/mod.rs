//! Database module: adapter abstraction plus MySQL and PostgreSQL backends

mod driver;
mod query;
mod schema;
pub mod mysql;
pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

pub use driver::*;
pub use query::*;
pub use schema::*;
