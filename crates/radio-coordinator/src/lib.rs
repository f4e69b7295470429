pub mod controller;
pub mod coordinator;
pub mod engine;
pub mod handle;
pub mod network;
pub mod notify;
pub mod probe;
pub mod supervisor;

pub use coordinator::{
    Command, CoordinatorCore, CoordinatorEvent, NotificationAction, StatusSnapshot,
};
pub use handle::CoordinatorHandle;
