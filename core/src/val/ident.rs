use once_cell::sync::Lazy;

use crate::util::fast_map::{FastHashMap, fast_hash_map_with_capacity};

/// Closed enum of the hot, well-known identifiers. A string tagged with one
/// of these skips hashing entirely on map lookup; the first `MAP_SLOT_COUNT`
/// variants additionally get a dedicated storage slot in every map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BuiltinId {
    // Map fast-path slots. Order is the slot index; do not reorder.
    X,
    Y,
    Z,
    Position,
    Rotation,
    Scale,
    Velocity,
    Name,
    Isa,
    Width,
    Height,
    Color,
    Parent,
    Index,
    Value,
    Key,
    Id,
    Tag,
    // Well-known identifiers with no map slot.
    SelfIdent,
    Super,
    Locals,
    Globals,
    Outer,
}

/// Number of dedicated per-map fast slots.
pub const MAP_SLOT_COUNT: usize = 18;

static NAME_TABLE: &[(&str, BuiltinId)] = &[
    ("x", BuiltinId::X),
    ("y", BuiltinId::Y),
    ("z", BuiltinId::Z),
    ("position", BuiltinId::Position),
    ("rotation", BuiltinId::Rotation),
    ("scale", BuiltinId::Scale),
    ("velocity", BuiltinId::Velocity),
    ("name", BuiltinId::Name),
    ("__isa", BuiltinId::Isa),
    ("width", BuiltinId::Width),
    ("height", BuiltinId::Height),
    ("color", BuiltinId::Color),
    ("parent", BuiltinId::Parent),
    ("index", BuiltinId::Index),
    ("value", BuiltinId::Value),
    ("key", BuiltinId::Key),
    ("id", BuiltinId::Id),
    ("tag", BuiltinId::Tag),
    ("self", BuiltinId::SelfIdent),
    ("super", BuiltinId::Super),
    ("locals", BuiltinId::Locals),
    ("globals", BuiltinId::Globals),
    ("outer", BuiltinId::Outer),
];

static NAME_LOOKUP: Lazy<FastHashMap<&'static str, BuiltinId>> = Lazy::new(|| {
    let mut map = fast_hash_map_with_capacity(NAME_TABLE.len());
    for (name, id) in NAME_TABLE {
        map.insert(*name, *id);
    }
    map
});

impl BuiltinId {
    #[inline]
    pub fn from_name(name: &str) -> Option<BuiltinId> {
        NAME_LOOKUP.get(name).copied()
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        NAME_TABLE[self as usize].0
    }

    /// Stable per-identifier ID.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Dedicated map storage slot, if this identifier has one.
    #[inline]
    pub fn map_slot(self) -> Option<usize> {
        let idx = self as usize;
        (idx < MAP_SLOT_COUNT).then_some(idx)
    }
}
