pub mod api;
pub mod classroom;
pub mod collaborators;
pub mod config;
pub mod error;

pub use classroom::ClassroomServer;
pub use config::Config;
pub use error::{Result, SignalingError};
