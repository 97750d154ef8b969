//! # Primitives
//!
//! Fixed constants of the annotation graph model.
//!
//! These values are compiled in and shared by every graph. Anything that a
//! deployment may reasonably want to change lives in [`crate::config`].

// =============================================================================
// SCHEMA
// =============================================================================

/// Id of the implicit root layer. The graph itself is the only annotation on it.
pub const ROOT_LAYER_ID: &str = "transcript";

/// Ordinal of the first child in a (parent, layer) group unless a minimum
/// has been set explicitly (fragments do that).
pub const DEFAULT_ORDINAL_MINIMUM: i32 = 1;

/// Ordinal value meaning "not assigned yet, derive from position".
pub const UNASSIGNED_ORDINAL: i32 = 0;

/// Default layer data type.
pub const DEFAULT_LAYER_TYPE: &str = "string";

/// Default unit of anchor offsets.
pub const DEFAULT_OFFSET_UNITS: &str = "s";

// =============================================================================
// CONFIDENCE
// =============================================================================

/// No confidence information at all.
pub const CONFIDENCE_NONE: i32 = 0;

/// Confidence of automatically generated structure.
pub const CONFIDENCE_AUTOMATIC: i32 = 50;

/// Confidence used when nothing better is known.
pub const CONFIDENCE_DEFAULT: i32 = CONFIDENCE_AUTOMATIC;

/// Confidence of annotations made or checked by a person.
pub const CONFIDENCE_MANUAL: i32 = 100;

// =============================================================================
// FRAGMENTS
// =============================================================================

/// Separator between the source graph id and the offset range of a fragment id.
pub const FRAGMENT_SEPARATOR: &str = "__";

/// Number of decimal digits used for offsets inside fragment ids.
pub const FRAGMENT_OFFSET_DECIMALS: usize = 3;

// =============================================================================
// BINARY FORMAT
// =============================================================================

/// Magic bytes for the binary snapshot header.
///
/// - File Header = Magic Bytes ("AGRF") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"AGRF";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

/// Length of the snapshot header in bytes.
pub const HEADER_LEN: usize = 5;

// =============================================================================
// TESTS
// =============================================================================
