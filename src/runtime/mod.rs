// src/runtime/mod.rs

//! Dispatch primitives: hold counting, mailboxes, commands, the worker pool and monitor events.

pub mod command;
pub mod holds;
pub mod mailbox;
pub mod monitor;
pub mod worker;

pub use command::{command_queue, Command, CommandReceiver, CommandSender};
pub use holds::{HoldCount, HoldError};
pub use mailbox::{Mailbox, DEFAULT_MAILBOX_WARN_DEPTH};
pub use monitor::{BusEvent, MonitorReceiver, MonitorSender, DEFAULT_MONITOR_CAPACITY};
pub use worker::{TaskId, WorkInput, WorkOutcome, WorkResult};
