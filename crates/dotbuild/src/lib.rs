pub mod acquire;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod init;
pub mod mozconfig;
pub mod project;
pub mod template;
pub mod workspace;

pub use error::{Error, Result};
