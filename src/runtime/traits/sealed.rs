// ABOUTME: Sealed trait pattern for runtime traits.
// ABOUTME: Only runtimes defined in this crate may implement the capability traits.

/// Sealed supertrait for the runtime capability traits.
///
/// The update engine depends on exact runtime semantics (NotFound handling,
/// rename atomicity), so implementations stay inside the crate.
pub trait Sealed {}
