//! A generational, tracing garbage collector for managed-runtime heaps:
//! a stop-the-world mark-compact old generation with a two-space copying
//! nursery.
//!
//! The crate is organized in these layers:
//! * [`util`]: addresses, constants, marking bitmaps, the explicit marking
//!   stack, options, logging and tracing.
//! * [`object`]: the tagged-value object model the collector traverses:
//!   class descriptors ("maps"), body shapes and visitor dispatch.
//! * [`heap`]: spaces (nursery semispaces, the paged old spaces, the
//!   large-object space), pages with their in-region bitmaps, free lists,
//!   the store buffer and the root-set providers.
//! * [`collector`]: the cycle itself: marking with overflow recovery,
//!   code flushing, dead map-transition clearing, precise and conservative
//!   sweeping, nursery scavenging with promotion, old-space relocation,
//!   and the incremental-marking handoff.
//!
//! One [`heap::Heap`] value owns everything; independent heaps can coexist
//! in a process, each with its own collector state.

#[macro_use]
extern crate log;

pub mod collector;
pub mod heap;
pub mod object;
pub mod util;

pub use crate::collector::{CollectorState, GcState};
pub use crate::heap::space::{AllocError, SpaceId};
pub use crate::heap::Heap;
pub use crate::object::{HeapObject, InstanceType, Value};
pub use crate::util::options::Options;
