//! # Instance registry.
//!
//! Tracks broker-client instances. The scheduler scans it every tick and
//! retires instances that report a fatal error. Retiring never cascades into
//! the mappings carried by the instance: each mapping holds only a weak
//! reference and discovers the loss in its own self-check.
//!
//! ```text
//! InstanceRegistry ──Arc──► Instance ◄──Weak── Mapping
//!       │ retire(id)                              │
//!       └─ drops the Arc ──────► upgrade() fails ─┘ → Failed(InstanceFatal)
//! ```

mod registry;

pub use registry::{Instance, InstanceRegistry};
