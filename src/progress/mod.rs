//! Live project-progress updates, shared by every view watching a project.

pub mod manager;
pub mod status;

pub use manager::{
    ErrorCallback, PROJECT_MESSAGE_EVENT, PROJECT_UPDATE_EVENT, ProgressStreamManager,
    StatusCallback, UpdateCallback,
};
pub use status::ConnectionStatus;
