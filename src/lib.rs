//! # Logpipe - Producer-Side Log Transport Core
//!
//! Logpipe is the producer-side transport core of a high-throughput,
//! low-latency in-process logging pipeline: many application threads hand
//! off encoded log records to a single background dispatch thread without
//! taking locks on the hot path.
//!
//! ## Components
//!
//! - **Input buffer**: per-thread circular byte region with frame
//!   allocation, commit, discard and wraparound
//! - **Per-thread manager**: lazy construction and guaranteed teardown of
//!   one instance per thread, safe against destructor reentrancy
//! - **Completion event**: binary wait/signal hand-off with full-fence
//!   semantics, the sole backpressure mechanism
//!
//! ## Data flow
//!
//! ```text
//! producer threads                           dispatch thread
//! ┌──────────────────────────┐              ┌──────────────────────────┐
//! │ PerThread<InputBuffer>   │              │ scans frames from        │
//! │   allocate_input_frame   │──frames────▶ │ input_start, honours     │
//! │   write record, commit   │              │ WRAPAROUND_MARKER,       │
//! │   (blocks when full)     │◀──signal──── │ discard_input_frame      │
//! └──────────────────────────┘              └──────────────────────────┘
//! ```
//!
//! Each buffer is strictly single-producer/single-consumer: the producer is
//! its owning thread, the consumer is the one dispatch thread. The shared
//! start cursor uses relaxed atomics; the completion event's wait/signal
//! pair carries the cross-thread fence. A stalled consumer can block a
//! producer indefinitely - bounded memory is deliberately preferred over
//! unbounded growth, and no timeout exists at this layer.
//!
//! Record encoding, frame routing and the coordinator that owns multiple
//! producers' buffers live outside this crate, behind the [`CommitSink`]
//! seam.

pub mod error;
pub mod event;
pub mod input;
pub mod per_thread;

pub use error::{LogpipeError, Result};
pub use event::{CompletionEvent, EventStats};
pub use input::{CommitSink, InputBuffer, WRAPAROUND_MARKER};
pub use per_thread::PerThread;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Default capacity of a per-thread input buffer (64KB)
    pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

    /// Default frame alignment; a power of two at least as wide as the
    /// wraparound marker
    pub const DEFAULT_FRAME_ALIGNMENT: usize = 64;
}
