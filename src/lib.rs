#[path = "core/codec.rs"]
pub mod codec;

#[path = "core/learner.rs"]
pub mod learner;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/policy.rs"]
pub mod policy;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/reward.rs"]
pub mod reward;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/storage.rs"]
pub mod storage;

pub mod config;
pub mod error;
pub mod observer;

pub use error::{Error, Result};
