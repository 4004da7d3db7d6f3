//! Per-thread circular input buffer for producer-to-dispatch hand-off
//!
//! Each producer thread owns one `InputBuffer`. The producer allocates
//! aligned frames, writes encoded records into them and publishes them with
//! `commit`; the single output-side consumer returns space with
//! `discard_input_frame` and `wraparound`. The only field both sides touch is
//! the shared start cursor, which stays on relaxed atomics because the
//! completion event's wait/signal pair already carries the cross-thread
//! fence.

use std::{
    cell::UnsafeCell,
    ptr::NonNull,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    error::{LogpipeError, Result},
    event::CompletionEvent,
};

/// Sentinel written at a frame boundary to tell the consumer to skip to the
/// physical start of the buffer. The record encoding must never produce this
/// value in a frame's leading bytes.
pub const WRAPAROUND_MARKER: usize = usize::MAX;

/// Seam to the output coordinator that routes committed frames.
///
/// The buffer calls `commit` on two paths: when the producer publishes
/// pending frames (including the final flush during destruction), and from
/// the backpressure loop when the buffer is full but nothing has been
/// published yet, so the consumer would otherwise never observe new work.
pub trait CommitSink: Send + Sync {
    /// Notify the dispatch side that frames up to the current commit
    /// boundary are ready for consumption.
    fn commit(&self);
}

/// Single-producer single-consumer circular byte buffer with frame
/// allocation, commit, discard and wraparound.
///
/// Cursors are byte offsets into the backing region, always aligned to the
/// configured frame alignment. The occupied span runs circularly from
/// `input_start` to `input_end`; cursor equality means the buffer is fully
/// drained, which allocation preserves by never accepting a frame whose
/// rounded size exactly equals the free space of a segment.
#[derive(Debug)]
pub struct InputBuffer<C: CommitSink> {
    /// Output coordinator notified on commit
    sink: Arc<C>,
    /// Backing storage, aligned to the frame alignment
    begin: NonNull<u8>,
    /// Total capacity in bytes, a multiple of the frame alignment
    size: usize,
    /// Mask for rounding sizes up to the frame alignment
    alignment_mask: usize,
    /// First not-yet-consumed byte; written by the consumer, read by the
    /// producer. Relaxed ordering throughout: the completion event supplies
    /// the fence, no double payment for ordering.
    input_start: AtomicUsize,
    /// End of the allocated (possibly uncommitted) region; producer only
    input_end: UnsafeCell<usize>,
    /// Boundary of data already published to the consumer; producer only
    commit_end: UnsafeCell<usize>,
    /// Signalled by the consumer after each discard
    consumed: CompletionEvent,
}

// SAFETY: `input_end` and `commit_end` are only ever accessed from the single
// producer thread that owns this buffer; the consumer side touches only
// `input_start` (atomic) and the completion event. Visibility of frame bytes
// across the two threads is carried by the event's wait/signal fence pair.
unsafe impl<C: CommitSink> Send for InputBuffer<C> {}
unsafe impl<C: CommitSink> Sync for InputBuffer<C> {}

impl<C: CommitSink> InputBuffer<C> {
    /// Create a new input buffer with the given capacity and frame alignment.
    ///
    /// `frame_alignment` must be a power of two at least as wide as the
    /// wraparound marker (caller contract, checked in debug builds); `size`
    /// must be a non-zero multiple of it spanning more than one alignment
    /// unit.
    pub fn new(size: usize, frame_alignment: usize, sink: Arc<C>) -> Result<Self> {
        debug_assert!(frame_alignment.is_power_of_two());
        debug_assert!(frame_alignment >= std::mem::size_of::<usize>());

        if size == 0 || size % frame_alignment != 0 || size <= frame_alignment {
            return Err(LogpipeError::invalid_parameter(
                "size",
                "must be a multiple of frame_alignment spanning at least two frames",
            ));
        }

        let layout = std::alloc::Layout::from_size_align(size, frame_alignment)
            .map_err(|_| LogpipeError::invalid_parameter("frame_alignment", "invalid layout"))?;

        // Create the event before the region so a failure here cannot leak
        // the allocation.
        let consumed = CompletionEvent::new()?;

        let begin = unsafe {
            let ptr = std::alloc::alloc(layout);
            NonNull::new(ptr)
                .ok_or_else(|| LogpipeError::memory("failed to allocate input buffer"))?
        };

        Ok(Self {
            sink,
            begin,
            size,
            alignment_mask: frame_alignment - 1,
            input_start: AtomicUsize::new(0),
            input_end: UnsafeCell::new(0),
            commit_end: UnsafeCell::new(0),
            consumed,
        })
    }

    /// Reserve an aligned frame of at least `requested_size` bytes and
    /// return a pointer to its first byte (producer side).
    ///
    /// The rounded size must be smaller than the buffer capacity (caller
    /// contract). Blocks on the completion event when no segment has room;
    /// this backpressure is the only thing that can delay the hot path.
    pub fn allocate_input_frame(&self, requested_size: usize) -> NonNull<u8> {
        let size = self.round_up(requested_size);
        debug_assert!(size > 0 && size < self.size);

        loop {
            // SAFETY: producer-owned cursor, accessed only from this thread.
            let input_end = unsafe { *self.input_end.get() };
            debug_assert!(input_end < self.size);
            debug_assert_eq!(input_end & self.alignment_mask, 0);

            // A stale value can only understate how much the consumer has
            // freed; a miss falls through to the event wait, whose fence
            // refreshes this load on the retry.
            let input_start = self.input_start.load(Ordering::Relaxed);

            if input_start > input_end {
                // Free space is one contiguous run between the cursors.
                // Equality of rounded size and free space is rejected so the
                // cursors never collide through allocation; a collision
                // could not be told apart from a drained buffer.
                let free = input_start - input_end;
                if size < free {
                    unsafe { *self.input_end.get() = self.advance(input_end, size) };
                    return self.frame_ptr(input_end);
                }
            } else {
                // Free space is split into a tail run up to the physical end
                // and a head run up to input_start.
                let tail_free = self.size - input_end;
                if size < tail_free {
                    unsafe { *self.input_end.get() = self.advance(input_end, size) };
                    return self.frame_ptr(input_end);
                }
                let head_free = input_start;
                if size < head_free {
                    // Not enough room at the end, but the head run fits.
                    // Leave a marker so the consumer skips to the start;
                    // the alignment contract guarantees the marker fits in
                    // the leftover tail run.
                    unsafe {
                        (self.begin.as_ptr().add(input_end) as *mut usize)
                            .write(WRAPAROUND_MARKER);
                        *self.input_end.get() = self.advance(0, size);
                    }
                    return self.frame_ptr(0);
                }
            }

            self.wait_input_consumed();
        }
    }

    /// Publish all allocated frames to the consumer (producer side).
    pub fn commit(&self) {
        // SAFETY: both cursors are producer-owned.
        unsafe { *self.commit_end.get() = *self.input_end.get() };
        self.sink.commit();
    }

    /// Return a consumed frame's space to the producer (consumer side).
    ///
    /// Rounds `size` up to the frame alignment, advances the shared start
    /// cursor past the frame and signals the completion event.
    pub fn discard_input_frame(&self, size: usize) {
        let size = self.round_up(size);
        // Relaxed is enough here: this only discards data, it publishes
        // nothing new. The event signal carries the fence.
        let p = self.input_start.load(Ordering::Relaxed);
        self.input_start.store(self.advance(p, size), Ordering::Relaxed);
        self.consumed.signal();
    }

    /// Skip the consumer's cursor to the physical start of the buffer
    /// (consumer side).
    ///
    /// Must only be called when the bytes at the current start cursor hold
    /// the wraparound marker; debug builds assert this, release builds trust
    /// the caller's protocol adherence.
    pub fn wraparound(&self) {
        #[cfg(debug_assertions)]
        {
            let p = self.input_start.load(Ordering::Relaxed);
            let marker = unsafe { (self.begin.as_ptr().add(p) as *const usize).read() };
            debug_assert_eq!(marker, WRAPAROUND_MARKER);
        }
        self.input_start.store(0, Ordering::Relaxed);
    }

    /// Buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Configured frame alignment in bytes
    pub fn frame_alignment(&self) -> usize {
        self.alignment_mask + 1
    }

    /// Current shared start cursor (first not-yet-consumed byte)
    pub fn input_start(&self) -> usize {
        self.input_start.load(Ordering::Relaxed)
    }

    /// Current end of the allocated region.
    ///
    /// Meaningful only on the producer thread or while both sides are
    /// quiescent; the cursor is not synchronized.
    pub fn input_end(&self) -> usize {
        unsafe { *self.input_end.get() }
    }

    /// Whether every allocated frame has been consumed
    pub fn is_drained(&self) -> bool {
        self.input_start.load(Ordering::Relaxed) == self.input_end()
    }

    /// Pointer to the frame starting at the given offset.
    ///
    /// The offset must be aligned and within bounds; the caller is
    /// responsible for staying inside the frame it owns.
    pub fn frame_ptr(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.size);
        debug_assert_eq!(offset & self.alignment_mask, 0);
        unsafe { NonNull::new_unchecked(self.begin.as_ptr().add(offset)) }
    }

    /// Round a size up to the next multiple of the frame alignment
    fn round_up(&self, size: usize) -> usize {
        (size + self.alignment_mask) & !self.alignment_mask
    }

    /// Advance an aligned cursor by an aligned distance, wrapping to the
    /// start when it lands exactly on the physical end.
    ///
    /// The distance must not move the cursor past the end of the current
    /// segment: frames are never split across the wrap boundary. That is a
    /// caller-maintained invariant, not re-checked here.
    fn advance(&self, offset: usize, distance: usize) -> usize {
        debug_assert_eq!(distance & self.alignment_mask, 0);
        let next = offset + distance;
        debug_assert!(next <= self.size);
        if next == self.size {
            0
        } else {
            next
        }
    }

    /// Block until the consumer has freed some space.
    fn wait_input_consumed(&self) {
        let input_start = self.input_start.load(Ordering::Relaxed);
        // SAFETY: producer-owned cursor.
        if unsafe { *self.commit_end.get() } == input_start {
            // The buffer is full but nothing has been published since the
            // last drain, so the consumer has no work to do and the wait
            // below would never resolve. Publish what we have first.
            self.commit();
        }
        self.consumed.wait();
    }
}

impl<C: CommitSink> Drop for InputBuffer<C> {
    fn drop(&mut self) {
        self.commit();
        // Both commit and the event wait carry full fences, so relaxed
        // loads suffice. The backing memory must not be released while the
        // consumer can still read it, so block until the full drain,
        // including any pending wraparound.
        while !self.is_drained() {
            self.consumed.wait();
        }

        let layout =
            std::alloc::Layout::from_size_align(self.size, self.alignment_mask + 1).unwrap();
        unsafe {
            std::alloc::dealloc(self.begin.as_ptr(), layout);
        }
    }
}
