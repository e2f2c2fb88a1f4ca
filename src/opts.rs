// Option bits shared by the memory and record-storage flavours.
// The low byte is part of the public construction surface, the high
// byte is used internally. Values are persisted in serialized
// headers, do not renumber.

/// Allow same key multiple times, iteration order within an equal
/// range follows insertion order.
pub(crate) const MULTI_KEY: u32 = 0x0000_0002;

/// Allow positional insert/replace while a comparator is configured.
/// Positional mutations are validated against neighbour order.
pub(crate) const ALLOW_INDEX: u32 = 0x0000_0004;

/// Each element is a sequence of sub-elements, requires the size and
/// sub hooks.
pub(crate) const USE_SUBELEMENTS: u32 = 0x0000_0008;

/// With [MULTI_KEY], insert new duplicates at the lower end of the
/// equal range.
pub(crate) const INSERT_LOWER: u32 = 0x0000_0010;

/// No comparator configured, tree is ordered by rank only.
pub(crate) const NOCMP: u32 = 0x0100_0000;

/// Index got finalized, no further mutation.
pub(crate) const FINALIZED: u32 = 0x0400_0000;
