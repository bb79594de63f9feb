/// Database access: configuration, routing and migrations
pub mod database;
