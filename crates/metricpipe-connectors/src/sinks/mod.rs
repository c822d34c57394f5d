//! Where the collector writes rows to.

pub mod postgres;

pub use postgres::PostgresRowStore;
