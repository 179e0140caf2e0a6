mod clientconfig;
mod command;
mod config;
mod entities;
mod events;
mod response;
mod services;

pub use clientconfig::*;
pub(crate) use command::*;
pub use config::*;
pub use entities::*;
pub use events::*;
pub use response::*;
pub use services::*;
