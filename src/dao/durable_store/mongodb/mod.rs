mod config;
mod connection;
mod error;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoDurableStore;
