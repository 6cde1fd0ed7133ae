// SPDX-License-Identifier: MIT

//! Errors from the actor runtime's send/ask primitives.

use labtrans_core::ErrorClass;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActorError {
    /// An `ask` deadline elapsed before a reply arrived. The callee is not
    /// cancelled; it simply discovers the reply channel gone and discards
    /// its result (spec §5 "Cancellation and timeout").
    #[error("ask timed out waiting for a reply")]
    Timeout,

    /// The target actor's mailbox has been dropped (actor stopped or
    /// never started).
    #[error("actor mailbox is closed")]
    MailboxClosed,
}

impl ActorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ActorError::Timeout => ErrorClass::Transient,
            ActorError::MailboxClosed => ErrorClass::Fatal,
        }
    }
}
