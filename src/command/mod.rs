//! # Command interface.
//!
//! Operators (the binary reads stdin) submit raw JSON messages through a
//! [`CommandHandle`]. The scheduler drains the bounded queue once per tick
//! via [`CommandListener::poll`], so commands are applied on the control
//! loop between the self-check sweep and the tick summary.
//!
//! ```text
//!   stdin ─► CommandHandle ─► [bounded queue] ─► CommandListener::poll (tick step)
//!                                                   ├─ add    → Scheduler::mapping_add
//!                                                   ├─ remove → Scheduler::mapping_remove_topic
//!                                                   ├─ list   → Scheduler::mapping_list
//!                                                   └─ exit   → Scheduler::forwarding_exit
//! ```

mod error;
mod listener;
mod message;

pub use error::SubmitError;
pub use listener::{CommandHandle, CommandListener, channel};
pub use message::{Command, Reply};
