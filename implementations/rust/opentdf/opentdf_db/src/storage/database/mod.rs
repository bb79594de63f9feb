mod circuit_breaker;
mod database_configuration;
mod database_connection;
mod migrations;
mod sqlx_database;
mod sqlx_from_row_types;

pub use circuit_breaker::*;
pub use database_configuration::*;
pub use database_connection::*;
pub use migrations::*;
pub use sqlx_database::*;
pub use sqlx_from_row_types::*;
