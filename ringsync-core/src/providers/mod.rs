pub mod files;
pub mod habitat;
pub mod memory;
pub mod parameters;
pub mod retry;
pub mod types;

pub use types::{
    KeyValueRegistry, ObjectStore, RingClient, RingTarget, SecretProvider, StackOutput,
    StackProvider,
};
