use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

/// A reusable pooled kind. Implementors expose their thread-local pool and
/// know how to release their owned child values when recycled.
pub trait PoolKind: Default + Sized + 'static {
    /// Pool name for misuse diagnostics.
    const KIND: &'static str;

    /// Unref all owned child values and reset to the pristine state.
    fn recycle(&mut self);

    /// Run `f` against this kind's thread-local pool. Pools are per-thread:
    /// machines on different threads never contend, and never share slots.
    fn with_pool<R>(f: impl FnOnce(&Pool<Self>) -> R) -> R;
}

struct PoolSlot<T> {
    refs: Cell<i32>,
    data: RefCell<T>,
}

/// Counted handle to a pooled slot. Cloning the handle does NOT touch the
/// reference count; ownership is tracked manually via `ref_`/`unref`.
pub struct Handle<T: PoolKind>(Rc<PoolSlot<T>>);

impl<T: PoolKind> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        Handle(Rc::clone(&self.0))
    }
}

impl<T: PoolKind> Handle<T> {
    /// Pull a slot from the pool (or allocate one) with reference count 1.
    pub fn acquire() -> Self {
        T::with_pool(|pool| pool.acquire())
    }

    #[inline]
    pub fn refs(&self) -> i32 {
        self.0.refs.get()
    }

    #[inline]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.data.borrow()
    }

    #[inline]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.data.borrow_mut()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Increment the reference count.
    pub fn ref_(&self) {
        let refs = self.0.refs.get();
        if refs <= 0 {
            // A slot with count 0 is on its way back to the pool; taking a
            // new reference to it is a VM defect, not a script error.
            tracing::error!(kind = T::KIND, refs, "ref on a released pool slot");
        }
        self.0.refs.set(refs + 1);
    }

    /// Decrement the reference count. Reaching exactly 0 recycles the slot
    /// (releasing any values it owns) and returns it to the pool. Going
    /// below zero is logged and ignored; pool corruption must not crash
    /// the host.
    pub fn unref(&self) {
        let refs = self.0.refs.get() - 1;
        if refs < 0 {
            tracing::error!(kind = T::KIND, "unref below zero");
            self.0.refs.set(0);
            return;
        }
        self.0.refs.set(refs);
        if refs == 0 {
            self.0.data.borrow_mut().recycle();
            T::with_pool(|pool| pool.release(Rc::clone(&self.0)));
        }
    }
}

impl<T: PoolKind + std::fmt::Debug> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &T::KIND)
            .field("refs", &self.0.refs.get())
            .finish()
    }
}

/// Per-kind free list. One per value kind per thread.
pub struct Pool<T: PoolKind> {
    free: RefCell<Vec<Rc<PoolSlot<T>>>>,
}

impl<T: PoolKind> Pool<T> {
    pub const fn new() -> Self {
        Self {
            free: RefCell::new(Vec::new()),
        }
    }

    fn acquire(&self) -> Handle<T> {
        if let Some(slot) = self.free.borrow_mut().pop() {
            debug_assert_eq!(slot.refs.get(), 0, "pooled slot must rest at count 0");
            slot.refs.set(1);
            Handle(slot)
        } else {
            Handle(Rc::new(PoolSlot {
                refs: Cell::new(1),
                data: RefCell::new(T::default()),
            }))
        }
    }

    fn release(&self, slot: Rc<PoolSlot<T>>) {
        self.free.borrow_mut().push(slot);
    }

    /// Number of slots currently resting in the pool.
    pub fn idle(&self) -> usize {
        self.free.borrow().len()
    }
}

impl<T: PoolKind> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
