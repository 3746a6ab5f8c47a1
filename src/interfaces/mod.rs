//! Narrow collaborator contracts the core depends on but does not implement.
//!
//! Each trait here is the seam between this crate and infrastructure that
//! genuinely lives elsewhere in a full deployment: a database-backed store, a
//! process manager that actually runs agents, a gossip/blockchain transport,
//! a peer directory, and an optional work-task service. Every trait ships an
//! in-memory reference implementation so the rest of the crate is testable
//! without any of that infrastructure.

mod bus;
mod directory;
mod process_manager;
mod store;
mod work_task;

pub use bus::{Bus, BusError, InMemoryBus};
pub use directory::{AgentInfo, Directory, InMemoryDirectory, NetworkHealth};
pub use process_manager::{
    InMemoryProcessManager, ProcessEvent, ProcessManager, ProcessManagerError, ProcessSubscription,
};
pub use store::{
    Delivery, DeliveryStatus, InMemoryStore, Registration, RegistrationStatus, Session, Store,
    StoreError,
};
pub use work_task::{InMemoryWorkTaskService, WorkTask, WorkTaskRequest, WorkTaskService};
