use crate::server::{
    claim::arbiter::ClaimArbiter,
    dispatch::{supervisor::DispatchSupervisor, worker::DispatchContext},
    store::memory::{MemoryDirectory, MemoryStore},
};

/// Donation store backing the running server.
pub type Store = MemoryStore;

/// Organization directory backing the running server.
pub type Directory = MemoryDirectory;

pub type Context = DispatchContext<Store, Directory>;
pub type Supervisor = DispatchSupervisor<Store, Directory>;
pub type Arbiter = ClaimArbiter<Store>;
