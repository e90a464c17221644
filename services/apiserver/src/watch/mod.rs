//! Watch event distribution.
//!
//! Mutations publish `WatchEvent`s on the `EventBus`; the `/v1/watch`
//! endpoint turns one subscription into a server-sent event stream.

mod bus;

pub use bus::{BusError, EventBus, Subscription};
