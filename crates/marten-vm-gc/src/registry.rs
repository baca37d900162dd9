//! Allocation registry and mark/sweep collection.
//!
//! The registry tracks every GC-managed cell individually: header pointer,
//! size, drop function, and an optional trace function. A collection is a
//! full stop-the-world cycle:
//!
//! 1. Reset all marks to white
//! 2. Mark from roots (worklist with a per-cycle trace lookup)
//! 3. Run the finalizer pass for weak bindings whose referent is white
//!    (see [`crate::weak`]) — re-armed referents are resurrected and
//!    re-marked before sweeping
//! 4. Sweep white cells

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::object::{GcHeader, MarkColor};
use crate::weak::{Finalizer, WeakBinding, WeakTable};

/// Drop function for a tracked cell. Receives the cell (header) pointer.
pub type DropFn = unsafe fn(*mut u8);
/// Trace function for a tracked cell. Receives the cell (header) pointer.
pub type TraceFn = unsafe fn(*const u8, &mut dyn FnMut(*const GcHeader));

/// A tracked cell: the header at offset zero, the value after it.
#[repr(C)]
struct GcCell<T> {
    header: GcHeader,
    value: T,
}

/// One tracked allocation.
struct Allocation {
    /// Pointer to the GcHeader at the start of the cell
    header: *mut GcHeader,
    /// Size of the cell in bytes
    size: usize,
    /// Drop function for this cell
    drop_fn: DropFn,
    /// Trace function, `None` for leaf cells
    trace_fn: Option<TraceFn>,
}

/// Central registry tracking all GC-managed allocations on one thread.
pub struct AllocationRegistry {
    /// All tracked cells.
    allocations: RefCell<Vec<Allocation>>,
    /// Weak bindings and their finalizers.
    weak: WeakTable,
    /// Total bytes allocated
    total_bytes: AtomicUsize,
    /// Threshold for triggering GC (default 1MB)
    gc_threshold: AtomicUsize,
    /// Number of collections performed
    collection_count: AtomicUsize,
    /// Bytes reclaimed in last collection
    last_reclaimed: AtomicUsize,
    /// Total pause time in nanoseconds (accumulated across all collections)
    total_pause_nanos: AtomicU64,
    /// Last pause time in nanoseconds
    last_pause_nanos: AtomicU64,
}

impl AllocationRegistry {
    /// Create a new allocation registry
    pub fn new() -> Self {
        Self {
            allocations: RefCell::new(Vec::new()),
            weak: WeakTable::default(),
            total_bytes: AtomicUsize::new(0),
            gc_threshold: AtomicUsize::new(1024 * 1024), // 1MB default
            collection_count: AtomicUsize::new(0),
            last_reclaimed: AtomicUsize::new(0),
            total_pause_nanos: AtomicU64::new(0),
            last_pause_nanos: AtomicU64::new(0),
        }
    }

    /// Create a new registry with a custom GC threshold
    pub fn with_threshold(threshold: usize) -> Self {
        let registry = Self::new();
        registry.gc_threshold.store(threshold, Ordering::Relaxed);
        registry
    }

    fn register(&self, header: *mut GcHeader, size: usize, drop_fn: DropFn, trace_fn: Option<TraceFn>) {
        self.allocations.borrow_mut().push(Allocation {
            header,
            size,
            drop_fn,
            trace_fn,
        });
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Get total allocated bytes
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Get GC threshold
    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold.load(Ordering::Relaxed)
    }

    /// Set GC threshold
    pub fn set_gc_threshold(&self, threshold: usize) {
        self.gc_threshold.store(threshold, Ordering::Relaxed);
    }

    /// Check if GC should be triggered
    pub fn should_gc(&self) -> bool {
        self.total_bytes() >= self.gc_threshold()
    }

    /// Get the number of live allocations
    pub fn allocation_count(&self) -> usize {
        self.allocations.borrow().len()
    }

    /// Get collection statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_bytes: self.total_bytes(),
            allocation_count: self.allocation_count(),
            collection_count: self.collection_count.load(Ordering::Relaxed),
            last_reclaimed: self.last_reclaimed.load(Ordering::Relaxed),
            total_pause_time: Duration::from_nanos(self.total_pause_nanos.load(Ordering::Relaxed)),
            last_pause_time: Duration::from_nanos(self.last_pause_nanos.load(Ordering::Relaxed)),
        }
    }

    // ---------------------------------------------------------------
    // Weak binding API
    // ---------------------------------------------------------------

    /// Register a weak binding over `referent` with a finalizer callback.
    ///
    /// The referent is NOT kept alive by the binding. The finalizer is
    /// invoked at most once per registration, between mark and sweep of the
    /// cycle in which the referent becomes unreachable; the referent's
    /// memory is valid for the duration of that callback only.
    pub fn register_weak(&self, referent: *const GcHeader, finalizer: Finalizer) -> WeakBinding {
        self.weak.register(referent, finalizer)
    }

    /// Resolve a weak binding to its referent's header.
    ///
    /// Returns `None` once the binding has been released or retired.
    pub fn resolve_weak(&self, binding: WeakBinding) -> Option<*const GcHeader> {
        self.weak.resolve(binding)
    }

    /// Release a weak binding. Idempotent; the finalizer will not run.
    pub fn release_weak(&self, binding: WeakBinding) {
        self.weak.release(binding)
    }

    /// Number of currently registered weak bindings.
    pub fn weak_count(&self) -> usize {
        self.weak.len()
    }

    // ---------------------------------------------------------------
    // Collection
    // ---------------------------------------------------------------

    /// Perform a full mark/sweep collection. Returns bytes reclaimed.
    pub fn collect(&self, roots: &[*const GcHeader]) -> usize {
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "marten::gc",
            roots = roots.len(),
            heap_bytes = self.total_bytes(),
            objects = self.allocation_count(),
            "GC cycle starting"
        );

        // Phase 1: Reset all marks to white
        self.reset_marks();

        // Phase 2: Mark from roots
        let trace_lookup = self.build_trace_lookup();
        self.mark(roots, &trace_lookup);

        // Phase 3: Finalizer pass for dead weak referents. Re-armed
        // referents are resurrected for this cycle and must be re-marked
        // (with their reachable subgraph) before sweeping.
        let resurrected = self.weak.run_finalizer_pass();
        if !resurrected.is_empty() {
            #[cfg(feature = "gc_logging")]
            tracing::debug!(
                target: "marten::gc",
                resurrected = resurrected.len(),
                "Re-armed weak referents resurrected"
            );
            self.mark(&resurrected, &trace_lookup);
        }

        // Phase 4: Sweep unmarked cells
        let reclaimed = self.sweep();

        let elapsed = start.elapsed();
        let elapsed_nanos = elapsed.as_nanos() as u64;

        #[cfg(feature = "gc_logging")]
        let collection_num = self.collection_count.fetch_add(1, Ordering::Relaxed) + 1;
        #[cfg(not(feature = "gc_logging"))]
        self.collection_count.fetch_add(1, Ordering::Relaxed);

        self.last_reclaimed.store(reclaimed, Ordering::Relaxed);
        self.total_pause_nanos
            .fetch_add(elapsed_nanos, Ordering::Relaxed);
        self.last_pause_nanos.store(elapsed_nanos, Ordering::Relaxed);

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "marten::gc",
            collection = collection_num,
            reclaimed_bytes = reclaimed,
            pause_us = elapsed.as_micros() as u64,
            live_bytes = self.total_bytes(),
            live_objects = self.allocation_count(),
            "GC cycle complete"
        );

        reclaimed
    }

    /// Reset all marks to white (preparation for marking)
    fn reset_marks(&self) {
        for alloc in self.allocations.borrow().iter() {
            // SAFETY: headers of tracked allocations are valid until swept
            unsafe { (*alloc.header).set_mark(MarkColor::White) };
        }
    }

    /// Build a lookup table mapping header addresses to trace functions,
    /// built once per cycle for O(1) lookup during the mark phase.
    fn build_trace_lookup(&self) -> FxHashMap<usize, Option<TraceFn>> {
        let mut map = FxHashMap::default();
        for alloc in self.allocations.borrow().iter() {
            map.insert(alloc.header as usize, alloc.trace_fn);
        }
        map
    }

    /// Mark phase: trace from roots and mark all reachable cells.
    ///
    /// Already-black roots are skipped, so this can be called again after
    /// the finalizer pass to resurrect re-armed referents.
    fn mark(&self, roots: &[*const GcHeader], trace_lookup: &FxHashMap<usize, Option<TraceFn>>) {
        let mut worklist: VecDeque<*const GcHeader> = VecDeque::new();
        let mut visited: HashSet<usize> = HashSet::new();

        for &root in roots {
            if !root.is_null() && visited.insert(root as usize) {
                // SAFETY: roots point at valid headers
                unsafe { (*root).set_mark(MarkColor::Gray) };
                worklist.push_back(root);
            }
        }

        while let Some(ptr) = worklist.pop_front() {
            // SAFETY: worklist entries are valid headers of tracked cells
            unsafe {
                let header = &*ptr;

                // Skip if already black (fully processed)
                if header.mark() == MarkColor::Black {
                    continue;
                }

                if let Some(Some(trace_fn)) = trace_lookup.get(&(ptr as usize)) {
                    trace_fn(ptr as *const u8, &mut |child_header| {
                        if !child_header.is_null() && visited.insert(child_header as usize) {
                            (*child_header).set_mark(MarkColor::Gray);
                            worklist.push_back(child_header);
                        }
                    });
                }

                header.set_mark(MarkColor::Black);
            }
        }
    }

    /// Sweep phase: free all white (unreachable) cells
    fn sweep(&self) -> usize {
        let mut reclaimed: usize = 0;
        let dead: Vec<Allocation>;

        {
            let mut allocations = self.allocations.borrow_mut();
            let mut live = Vec::with_capacity(allocations.len());
            let mut dropped = Vec::new();

            for entry in allocations.drain(..) {
                // SAFETY: headers of tracked allocations are valid until swept
                unsafe {
                    if (*entry.header).mark() == MarkColor::White {
                        reclaimed += entry.size;
                        dropped.push(entry);
                    } else {
                        live.push(entry);
                    }
                }
            }

            *allocations = live;
            dead = dropped;
        }

        // Call drop functions after releasing the borrow
        for entry in dead {
            // SAFETY: each dead cell is dropped exactly once, by its own drop_fn
            unsafe { (entry.drop_fn)(entry.header as *mut u8) };
        }

        self.total_bytes.fetch_sub(reclaimed, Ordering::Relaxed);
        reclaimed
    }

    /// Deallocate ALL tracked allocations without marking.
    ///
    /// Use this when tearing down a VM thread to reclaim all memory. Weak
    /// bindings are dropped first so no finalizer closure outlives its
    /// referent.
    pub fn dealloc_all(&self) -> usize {
        let total = self.total_bytes.load(Ordering::Relaxed);

        self.weak.clear();

        let entries: Vec<Allocation> = self.allocations.borrow_mut().drain(..).collect();
        for entry in entries {
            // SAFETY: every tracked cell is dropped exactly once
            unsafe { (entry.drop_fn)(entry.header as *mut u8) };
        }

        self.total_bytes.store(0, Ordering::Relaxed);
        total
    }
}

impl Default for AllocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from the allocation registry
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    /// Total bytes currently allocated
    pub total_bytes: usize,
    /// Number of live allocations
    pub allocation_count: usize,
    /// Total number of collections performed
    pub collection_count: usize,
    /// Bytes reclaimed in last collection
    pub last_reclaimed: usize,
    /// Total pause time accumulated across all collections
    pub total_pause_time: Duration,
    /// Pause time of the last collection
    pub last_pause_time: Duration,
}

// Thread-local allocation registry for the GC.
//
// Each thread gets its own registry so that GC collections in one thread
// (with that thread's roots) don't sweep objects belonging to another
// thread. The registry is leaked (Box::leak) to produce a `&'static`
// reference; each thread leaks exactly one registry for the lifetime of
// the process.
thread_local! {
    static THREAD_REGISTRY: &'static AllocationRegistry = Box::leak(Box::new(AllocationRegistry::new()));
}

/// Get the thread-local allocation registry
pub fn global_registry() -> &'static AllocationRegistry {
    THREAD_REGISTRY.with(|r| *r)
}

/// Allocate a GC-managed value in a specific registry.
///
/// Returns a pointer to the value; the cell's header precedes it and can be
/// recovered with [`header_of`].
///
/// # Safety
/// The caller must ensure proper root management for the returned pointer:
/// the cell is swept by the first collection that cannot reach it.
pub unsafe fn gc_alloc_in<T>(registry: &AllocationRegistry, tag: u8, value: T) -> *mut T
where
    T: GcTraceable + 'static,
{
    let layout = std::alloc::Layout::new::<GcCell<T>>();

    let trace_fn: Option<TraceFn> = if T::NEEDS_TRACE {
        Some(trace_cell::<T>)
    } else {
        None
    };

    // SAFETY: the layout is non-zero sized (it contains a GcHeader)
    let cell = unsafe { std::alloc::alloc(layout) as *mut GcCell<T> };
    if cell.is_null() {
        std::alloc::handle_alloc_error(layout);
    }

    // SAFETY: cell is non-null and properly aligned for GcCell<T>
    unsafe {
        std::ptr::write(&raw mut (*cell).header, GcHeader::new(tag));
        std::ptr::write(&raw mut (*cell).value, value);
    }

    // GcCell is repr(C): the header sits at offset zero of the cell.
    registry.register(cell as *mut GcHeader, layout.size(), drop_cell::<T>, trace_fn);

    // SAFETY: cell was just initialized
    unsafe { &raw mut (*cell).value }
}

/// Recover the header pointer for a value allocated with [`gc_alloc_in`].
pub fn header_of<T>(value: *const T) -> *const GcHeader {
    let offset = std::mem::offset_of!(GcCell<T>, value);
    value.cast::<u8>().wrapping_sub(offset).cast::<GcHeader>()
}

/// Recover the value pointer from a cell's header.
///
/// # Safety
/// `header` must point at the header of a live cell allocated with
/// [`gc_alloc_in`] for exactly this `T` (or one whose memory is still valid
/// for the duration of a finalizer callback).
pub unsafe fn value_of<T>(header: *const GcHeader) -> *const T {
    let cell = header as *const GcCell<T>;
    // SAFETY: caller guarantees the cell is valid and holds a T
    unsafe { &raw const (*cell).value }
}

/// Drop function for GC cells.
unsafe fn drop_cell<T>(ptr: *mut u8) {
    let layout = std::alloc::Layout::new::<GcCell<T>>();
    let cell = ptr as *mut GcCell<T>;
    // SAFETY: ptr is valid and points to an initialized GcCell<T>
    unsafe {
        std::ptr::drop_in_place(cell);
        std::alloc::dealloc(ptr, layout);
    }
}

/// Trace function for GC cells.
unsafe fn trace_cell<T: GcTraceable>(ptr: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
    let cell = ptr as *const GcCell<T>;
    // SAFETY: ptr is valid and points to an initialized GcCell<T>
    unsafe { (*cell).value.trace(tracer) };
}

/// Trait for types that can be traced by the GC
pub trait GcTraceable {
    /// Whether this type contains GC references that need tracing
    const NEEDS_TRACE: bool;

    /// Trace all GC references in this value
    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader));
}

// Implement GcTraceable for primitive types
impl GcTraceable for () {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for bool {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for i32 {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for i64 {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for f64 {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for String {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}
