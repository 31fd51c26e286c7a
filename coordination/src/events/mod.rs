//! Document change events
//!
//! The document store publishes a [`DocumentEvent`] for every path touched by
//! a committed write. This is the "trigger on write" capability the reactor
//! runtime builds on.
//!
//! ```text
//! ┌──────────────┐  commit  ┌──────────────┐  recv   ┌──────────────┐
//! │ DocumentStore│─────────▶│  Event Bus   │────────▶│   Reactors   │
//! │              │          │  (broadcast) │         │  (handlers)  │
//! └──────────────┘          └──────────────┘         └──────┬───────┘
//!        ▲                                                  │
//!        └──────────────── transactional writes ────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusResult, EventFilter, FilteredReceiver, SharedEventBus,
};
pub use types::{ChangeKind, DocumentEvent};
