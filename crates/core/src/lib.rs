pub mod config;
pub mod entity;
pub mod error;
pub mod reply;
pub mod request;

pub use config::Config;
pub use entity::*;
pub use error::*;
pub use reply::*;
pub use request::*;
