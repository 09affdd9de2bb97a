pub mod cache;
pub mod config;
pub mod decrypt;
pub mod error;
pub mod extractors;
pub mod flaresolverr;
pub mod proxy;
pub mod recording;
pub mod remux;
pub mod server;
pub mod service;
pub mod stream;
pub mod transcode;
pub mod types;
pub mod urlutil;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
