pub mod config;
pub mod database;
pub mod property_repository;
pub mod proxy_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use property_repository::PropertyRepository;
pub use proxy_repository::ProxyRepository;
