use crate::error::{Result, RuntimeError};
use crate::val::pool::{Handle, Pool, PoolKind};
use crate::val::{MAX_LIST_COUNT, Value};

/// Backing storage for a script list. Elements before `start` are dead:
/// pop-from-front advances the cursor instead of shifting memory, so the
/// live range is `items[start..]` and `count == items.len() - start`.
#[derive(Debug, Default)]
pub struct ListStorage {
    items: Vec<Value>,
    start: usize,
}

impl PoolKind for ListStorage {
    const KIND: &'static str = "list";

    fn recycle(&mut self) {
        for item in self.items.drain(self.start..) {
            item.unref();
        }
        self.items.clear();
        self.start = 0;
    }

    fn with_pool<R>(f: impl FnOnce(&Pool<Self>) -> R) -> R {
        thread_local! {
            static POOL: Pool<ListStorage> = Pool::new();
        }
        POOL.with(f)
    }
}

/// Pooled, counted handle to a list. Cloning shares the storage; the
/// reference count moves only through `ref_`/`unref`.
#[derive(Clone, Debug)]
pub struct ValList(Handle<ListStorage>);

impl ValList {
    pub fn new() -> Self {
        ValList(Handle::acquire())
    }

    /// Build from values the caller owns; the list takes over their counts.
    pub fn from_values(values: Vec<Value>) -> Self {
        let list = Self::new();
        list.0.borrow_mut().items = values;
        list
    }

    #[inline]
    pub fn ref_(&self) {
        self.0.ref_();
    }

    #[inline]
    pub fn unref(&self) {
        self.0.unref();
    }

    #[inline]
    pub fn refs(&self) -> i32 {
        self.0.refs()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }

    #[inline]
    pub fn count(&self) -> usize {
        let s = self.0.borrow();
        s.items.len() - s.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Cursor position, exposed for the front-pop invariant checks.
    #[inline]
    pub fn start_index(&self) -> usize {
        self.0.borrow().start
    }

    /// Normalize a possibly negative script index against `count`.
    fn effective_index(&self, index: i64) -> Result<usize> {
        let count = self.count() as i64;
        let idx = if index < 0 { index + count } else { index };
        if idx < 0 || idx >= count {
            return Err(RuntimeError::index_out_of_range(index, count as usize));
        }
        Ok(idx as usize)
    }

    /// Owned (+1) element read; negative indices wrap from the end.
    pub fn get(&self, index: i64) -> Result<Value> {
        let idx = self.effective_index(index)?;
        let s = self.0.borrow();
        let v = s.items[s.start + idx].clone();
        v.ref_();
        Ok(v)
    }

    /// Store an owned value at `index`, releasing the displaced element.
    pub fn set(&self, index: i64, value: Value) -> Result<()> {
        let idx = self.effective_index(index)?;
        let mut s = self.0.borrow_mut();
        let at = s.start + idx;
        let old = std::mem::replace(&mut s.items[at], value);
        old.unref();
        Ok(())
    }

    /// Append an owned value.
    pub fn push(&self, value: Value) -> Result<()> {
        if self.count() >= MAX_LIST_COUNT {
            value.unref();
            return Err(RuntimeError::limit(format!(
                "list too large (max {MAX_LIST_COUNT} items)"
            )));
        }
        self.0.borrow_mut().items.push(value);
        Ok(())
    }

    /// O(1) removal of the first element: the cursor advances, remaining
    /// elements never move. Returns the owned element.
    pub fn pop_front(&self) -> Option<Value> {
        let mut s = self.0.borrow_mut();
        if s.start >= s.items.len() {
            return None;
        }
        let at = s.start;
        let v = std::mem::replace(&mut s.items[at], Value::Null);
        s.start += 1;
        if s.start == s.items.len() {
            s.items.clear();
            s.start = 0;
        }
        Some(v)
    }

    /// Returns the owned last element.
    pub fn pop_back(&self) -> Option<Value> {
        let mut s = self.0.borrow_mut();
        if s.start >= s.items.len() {
            return None;
        }
        let v = s.items.pop();
        if s.start == s.items.len() {
            s.items.clear();
            s.start = 0;
        }
        v
    }

    /// Run `f` over the live element slice.
    pub fn with_slice<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        let s = self.0.borrow();
        f(&s.items[s.start..])
    }

    /// Shallow copy: a fresh list whose elements are ref'd clones.
    pub fn shallow_copy(&self) -> Self {
        let values = self.with_slice(|items| {
            items
                .iter()
                .map(|v| {
                    v.ref_();
                    v.clone()
                })
                .collect()
        });
        Self::from_values(values)
    }

    /// Concatenation into a fresh list; both inputs are left untouched.
    pub fn concat(&self, other: &ValList) -> Result<Self> {
        let total = self.count() + other.count();
        if total > MAX_LIST_COUNT {
            return Err(RuntimeError::limit(format!(
                "list too large (max {MAX_LIST_COUNT} items)"
            )));
        }
        let mut values = Vec::with_capacity(total);
        for src in [self, other] {
            src.with_slice(|items| {
                for v in items {
                    v.ref_();
                    values.push(v.clone());
                }
            });
        }
        Ok(Self::from_values(values))
    }

    /// Replication by a (possibly fractional) factor: whole copies followed
    /// by a truncated prefix of the fractional remainder.
    pub fn replicate(&self, factor: f64) -> Result<Self> {
        let count = self.count();
        if factor <= 0.0 || count == 0 {
            return Ok(Self::new());
        }
        let total = (count as f64 * factor).floor() as usize;
        if total > MAX_LIST_COUNT {
            return Err(RuntimeError::limit(format!(
                "list too large (max {MAX_LIST_COUNT} items)"
            )));
        }
        let mut values = Vec::with_capacity(total);
        self.with_slice(|items| {
            for i in 0..total {
                let v = &items[i % count];
                v.ref_();
                values.push(v.clone());
            }
        });
        Ok(Self::from_values(values))
    }
}

impl Default for ValList {
    fn default() -> Self {
        Self::new()
    }
}
