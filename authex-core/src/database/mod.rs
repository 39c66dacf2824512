//! Durable store implementations.

mod postgres;

pub use postgres::PostgresGateway;
