//! # keel-node-agent
//!
//! The per-node agent: registers the node with the control plane,
//! heartbeats its status, and runs the workloads the scheduler binds
//! here. All coordination flows through the object API; the agent
//! never talks to other agents.

pub mod client;
pub mod config;
pub mod heartbeat;
pub mod runtime;
pub mod sync;
