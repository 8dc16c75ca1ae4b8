//! HWC Core
//!
//! Core library for driving HuaweiCloud's asynchronous operations to completion: the
//! resource model, the Provider trait, per-operation timeouts, and the polling engine.

pub mod provider;
pub mod resource;
pub mod timeouts;
pub mod waiter;
