//! # minipod-api
//!
//! Types shared between the minipod apiserver, node agent and CLI.
//!
//! ## Contents
//!
//! - Pod model (`Pod`, `PodSpec`, `Container`, `Port`, `PodState`)
//! - Watch events (`WatchEvent`, `EventKind`) and the subscription key that
//!   routes them (`SubscriptionKey`)
//! - The server-sent event framing used on the watch stream (`frame`)
//!
//! Events travel over the wire as JSON inside `data:` frames:
//!
//! ```text
//! data: {"type":"add","resource":"pod","node":"node-1","pod":{...}}
//!
//! :keepalive
//!
//! ```

mod error;
mod event;
pub mod frame;
mod types;

pub use error::FrameError;
pub use event::*;
pub use types::*;
