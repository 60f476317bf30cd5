//! Ticket lifecycle events
//!
//! Every committed transition, every gate failure and every terminal
//! decision is published on the [`EventBus`]. The publishing layer
//! (pull requests, reports) consumes [`DecisionRecord`]s from here.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{DecisionRecord, SelectedFix, TicketEvent};
