use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::{ErrorKind, Result, RuntimeError};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::ident::{BuiltinId, MAP_SLOT_COUNT};
use crate::val::pool::{Handle, Pool, PoolKind};
use crate::val::{MAX_EQUALITY_DEPTH, MAX_ISA_DEPTH, Value};

/// Dictionary key wrapper: hashes and compares by deep value content.
/// Strict three-valued equality: only exactly 1 counts as equal here;
/// the 0.5 "uncertain" result is treated as not-equal.
#[derive(Clone, Debug)]
pub struct MapKey(pub Value);

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash_value(MAX_EQUALITY_DEPTH));
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.equality(&other.0, MAX_EQUALITY_DEPTH) == 1.0
    }
}

impl Eq for MapKey {}

/// Backing storage for a script map.
///
/// The hottest well-known string keys live in a dedicated `fast` array
/// indexed by `BuiltinId::map_slot`; everything else goes through the
/// hashed dictionary. One insertion-ordered key list spans both storage
/// classes, so count and iteration cannot tell them apart. The combined
/// key/value view is rebuilt lazily and dropped on any mutation.
#[derive(Debug, Default)]
pub struct MapStorage {
    fast: [Option<Value>; MAP_SLOT_COUNT],
    dict: FastHashMap<MapKey, Value>,
    order: Vec<Value>,
    view: Option<Rc<Vec<(Value, Value)>>>,
}

impl PoolKind for MapStorage {
    const KIND: &'static str = "map";

    fn recycle(&mut self) {
        for slot in self.fast.iter_mut() {
            if let Some(v) = slot.take() {
                v.unref();
            }
        }
        if !self.dict.is_empty() {
            for (_, v) in std::mem::replace(&mut self.dict, fast_hash_map_new()) {
                v.unref();
            }
        }
        for key in self.order.drain(..) {
            key.unref();
        }
        self.view = None;
    }

    fn with_pool<R>(f: impl FnOnce(&Pool<Self>) -> R) -> R {
        thread_local! {
            static POOL: Pool<MapStorage> = Pool::new();
        }
        POOL.with(f)
    }
}

impl MapStorage {
    fn slot_of(key: &Value) -> Option<usize> {
        match key {
            Value::Str(s) => s.builtin().and_then(BuiltinId::map_slot),
            _ => None,
        }
    }
}

/// Pooled, counted handle to a map.
#[derive(Clone, Debug)]
pub struct ValMap(Handle<MapStorage>);

impl ValMap {
    pub fn new() -> Self {
        ValMap(Handle::acquire())
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
        self.0.borrow().order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// A real null can never sit in a key slot; the marker stands in.
    fn normalize_key(key: Value) -> Value {
        match key {
            Value::Null => Value::KeyNull,
            other => other,
        }
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        let probe = Self::normalize_key(key.clone());
        let s = self.0.borrow();
        if let Some(slot) = MapStorage::slot_of(&probe) {
            return s.fast[slot].is_some();
        }
        s.dict.contains_key(&MapKey(probe))
    }

    /// Owned (+1) read of this map's own entry, no prototype walk.
    pub fn get_local(&self, key: &Value) -> Option<Value> {
        let probe = Self::normalize_key(key.clone());
        let s = self.0.borrow();
        let found = if let Some(slot) = MapStorage::slot_of(&probe) {
            s.fast[slot].as_ref()
        } else {
            s.dict.get(&MapKey(probe))
        };
        found.map(|v| {
            v.ref_();
            v.clone()
        })
    }

    /// Convenience read by identifier name.
    pub fn get_str(&self, name: &str) -> Option<Value> {
        self.get_local(&Value::ident(name))
    }

    /// Store an owned key/value pair, releasing any displaced value.
    /// Keys keep their first-insertion position.
    pub fn set(&self, key: Value, value: Value) {
        let key = Self::normalize_key(key);
        let mut s = self.0.borrow_mut();
        s.view = None;
        if let Some(slot) = MapStorage::slot_of(&key) {
            match s.fast[slot].replace(value) {
                Some(old) => {
                    old.unref();
                    key.unref(); // existing key keeps its order entry
                }
                None => s.order.push(key),
            }
            return;
        }
        match s.dict.insert(MapKey(key.clone()), value) {
            Some(old) => {
                old.unref();
                key.unref();
            }
            None => s.order.push(key),
        }
    }

    /// Store under an identifier name.
    pub fn set_str(&self, name: &str, value: Value) {
        self.set(Value::ident(name), value);
    }

    /// Remove a key; returns whether it was present.
    pub fn remove(&self, key: &Value) -> bool {
        let probe = Self::normalize_key(key.clone());
        let mut s = self.0.borrow_mut();
        let removed = if let Some(slot) = MapStorage::slot_of(&probe) {
            s.fast[slot].take()
        } else {
            s.dict.remove(&MapKey(probe.clone()))
        };
        let Some(old) = removed else {
            return false;
        };
        old.unref();
        s.view = None;
        if let Some(pos) = s
            .order
            .iter()
            .position(|k| k.equality(&probe, MAX_EQUALITY_DEPTH) == 1.0)
        {
            let k = s.order.remove(pos);
            k.unref();
        }
        true
    }

    /// The map this one inherits from, if any (owned read of `__isa`).
    pub fn isa_parent(&self) -> Option<ValMap> {
        let s = self.0.borrow();
        match &s.fast[BuiltinId::Isa as usize] {
            Some(Value::Map(parent)) => {
                parent.ref_();
                Some(parent.clone())
            }
            _ => None,
        }
    }

    /// Key lookup walking the `__isa` prototype chain. Returns the value
    /// and the map it was found in (both owned). Chain depth is capped so
    /// cyclic ancestries fail instead of spinning.
    pub fn lookup_chain(&self, key: &Value) -> Result<Option<(Value, ValMap)>> {
        let mut current = self.clone();
        current.ref_();
        for _ in 0..MAX_ISA_DEPTH {
            if let Some(v) = current.get_local(key) {
                return Ok(Some((v, current)));
            }
            match current.isa_parent() {
                Some(parent) => {
                    current.unref();
                    current = parent;
                }
                None => {
                    current.unref();
                    return Ok(None);
                }
            }
        }
        current.unref();
        Err(RuntimeError::limit(format!(
            "__isa chain too deep (max {MAX_ISA_DEPTH})"
        )))
    }

    /// Whether `ancestor` appears on this map's prototype chain (inclusive).
    pub fn isa(&self, ancestor: &ValMap) -> Result<bool> {
        let mut current = self.clone();
        current.ref_();
        for _ in 0..MAX_ISA_DEPTH {
            if current.ptr_eq(ancestor) {
                current.unref();
                return Ok(true);
            }
            match current.isa_parent() {
                Some(parent) => {
                    current.unref();
                    current = parent;
                }
                None => {
                    current.unref();
                    return Ok(false);
                }
            }
        }
        current.unref();
        Err(RuntimeError::limit(format!(
            "__isa chain too deep (max {MAX_ISA_DEPTH})"
        )))
    }

    /// The lazily rebuilt combined key/value view, in insertion order.
    fn view(&self) -> Rc<Vec<(Value, Value)>> {
        {
            let s = self.0.borrow();
            if let Some(view) = &s.view {
                return Rc::clone(view);
            }
        }
        let mut s = self.0.borrow_mut();
        let mut pairs = Vec::with_capacity(s.order.len());
        for key in &s.order {
            let value = if let Some(slot) = MapStorage::slot_of(key) {
                s.fast[slot].clone()
            } else {
                s.dict.get(&MapKey(key.clone())).cloned()
            };
            if let Some(value) = value {
                pairs.push((key.clone(), value));
            }
        }
        let view = Rc::new(pairs);
        s.view = Some(Rc::clone(&view));
        view
    }

    /// Owned key/value pair at iteration position `index`.
    pub fn entry_at(&self, index: i64) -> Result<(Value, Value)> {
        let view = self.view();
        let count = view.len() as i64;
        let idx = if index < 0 { index + count } else { index };
        if idx < 0 || idx >= count {
            return Err(RuntimeError::index_out_of_range(index, count as usize));
        }
        let (k, v) = &view[idx as usize];
        k.ref_();
        v.ref_();
        Ok((k.clone(), v.clone()))
    }

    /// Run `f` over the combined insertion-ordered view.
    pub fn with_entries<R>(&self, f: impl FnOnce(&[(Value, Value)]) -> R) -> R {
        let view = self.view();
        f(&view)
    }

    /// Shallow copy: fresh map, elements ref'd and shared.
    pub fn shallow_copy(&self) -> Self {
        let copy = Self::new();
        self.with_entries(|entries| {
            for (k, v) in entries {
                k.ref_();
                v.ref_();
                copy.set(k.clone(), v.clone());
            }
        });
        copy
    }

    /// Merge into a fresh map; on key collision `other` wins.
    pub fn merged(&self, other: &ValMap) -> Self {
        let out = self.shallow_copy();
        other.with_entries(|entries| {
            for (k, v) in entries {
                k.ref_();
                v.ref_();
                out.set(k.clone(), v.clone());
            }
        });
        out
    }

    /// Deep three-valued equality with a shared recursion budget.
    pub fn equality(&self, other: &ValMap, depth: usize) -> f64 {
        if self.ptr_eq(other) {
            return 1.0;
        }
        if depth == 0 {
            // Budget exhausted: report "uncertain" instead of recursing
            // forever through cyclic ancestries.
            return 0.5;
        }
        if self.count() != other.count() {
            return 0.0;
        }
        let mut result = 1.0f64;
        let view = self.view();
        for (k, v) in view.iter() {
            match other.get_local(k) {
                Some(theirs) => {
                    let eq = v.equality(&theirs, depth - 1);
                    theirs.unref();
                    if eq == 0.0 {
                        return 0.0;
                    }
                    result = result.min(eq);
                }
                None => return 0.0,
            }
        }
        result
    }

    pub fn hash_value(&self, depth: usize) -> u64 {
        if depth == 0 {
            return 0x9e37_79b9;
        }
        // Order-independent combine so logically equal maps hash alike.
        let mut acc = 0u64;
        self.with_entries(|entries| {
            for (k, v) in entries {
                acc ^= k
                    .hash_value(depth - 1)
                    .wrapping_mul(31)
                    .wrapping_add(v.hash_value(depth - 1));
            }
        });
        acc
    }
}

impl Default for ValMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Missing-key error for name-resolution paths.
pub fn key_not_found(key: &Value) -> RuntimeError {
    RuntimeError::new(ErrorKind::KeyNotFound(key.to_display_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_path_and_dict_keys_behave_identically() {
        let map = ValMap::new();
        for (key, n) in [("x", 1.0), ("name", 2.0), ("foo", 3.0)] {
            map.set_str(key, Value::Number(n));
        }
        assert_eq!(map.count(), 3);
        for (key, n) in [("x", 1.0), ("name", 2.0), ("foo", 3.0)] {
            assert!(map.contains_key(&Value::ident(key)), "{key}");
            let got = map.get_str(key).unwrap();
            assert_eq!(got, Value::Number(n), "{key}");
        }
        // Iteration covers both storage classes in insertion order.
        let keys: Vec<String> = map.with_entries(|entries| {
            entries.iter().map(|(k, _)| k.to_display_string()).collect()
        });
        assert_eq!(keys, ["x", "name", "foo"]);
        // Overwrite and removal behave the same for both classes too.
        map.set_str("x", Value::Number(9.0));
        map.set_str("foo", Value::Number(8.0));
        assert_eq!(map.count(), 3);
        assert!(map.remove(&Value::ident("x")));
        assert!(map.remove(&Value::ident("foo")));
        assert_eq!(map.count(), 1);
        map.unref();
    }

    #[test]
    fn test_isa_chain_lookup() {
        let base = ValMap::new();
        base.set_str("greet", Value::string("hello"));
        let child = ValMap::new();
        base.ref_();
        child.set_str("__isa", Value::Map(base.clone()));

        let (found, owner) = child
            .lookup_chain(&Value::ident("greet"))
            .unwrap()
            .expect("inherited key resolves");
        assert_eq!(found.to_display_string(), "hello");
        assert!(owner.ptr_eq(&base));
        found.unref();
        owner.unref();

        assert!(child.isa(&base).unwrap());
        assert!(!base.isa(&child).unwrap());
        child.unref();
        base.unref();
    }

    #[test]
    fn test_cyclic_isa_chain_is_capped() {
        let a = ValMap::new();
        let b = ValMap::new();
        a.ref_();
        b.ref_();
        a.set_str("__isa", Value::Map(b.clone()));
        b.set_str("__isa", Value::Map(a.clone()));
        let err = a.lookup_chain(&Value::ident("missing")).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::LimitExceeded(_)));
        a.unref();
        b.unref();
    }

    #[test]
    fn test_null_key_placeholder() {
        let map = ValMap::new();
        map.set(Value::Null, Value::Number(1.0));
        assert!(map.contains_key(&Value::Null));
        assert_eq!(map.get_local(&Value::Null).unwrap(), Value::Number(1.0));
        map.unref();
    }

    #[test]
    fn test_mutual_ancestor_equality_is_uncertain() {
        let a = ValMap::new();
        let b = ValMap::new();
        a.ref_();
        b.ref_();
        a.set_str("peer", Value::Map(b.clone()));
        b.set_str("peer", Value::Map(a.clone()));
        assert_eq!(a.equality(&b, MAX_EQUALITY_DEPTH), 0.5);
        a.unref();
        b.unref();
    }
}
