// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! labtrans-actor: the actor runtime (mailboxes, `tell`/`ask`, the
//! drain-then-tick loop) and the event bus, per spec §4.1-4.2.

pub mod actor;
pub mod bus;
pub mod error;
pub mod mailbox;

pub use actor::{spawn_actor, spawn_actor_with_capacity, Actor};
pub use async_trait::async_trait;
pub use bus::{EventBus, Matcher, Subscription};
pub use error::ActorError;
pub use mailbox::{ActorRef, DEFAULT_MAILBOX_CAPACITY};
