//! The Datum lifecycle: `EMPTY <-> POPULATED <-> AVAILABLE`.
//!
//! A [`Datum`] is a handle to one logical piece of data produced or
//! consumed by a [`Task`](crate::task::Task). Concrete variants
//! ([`MemoryDatum`], [`FileDatum`]) implement [`DatumVariant`]; the
//! generic lifecycle machinery (state transitions, quickhash bookkeeping,
//! `sync`) lives once in [`Datum`] and is shared by every variant, mirroring
//! `abstract/datum.py`'s split between `AbstractDatum` and its concrete
//! subclasses.

use std::{
    any::Any,
    fmt,
    fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use parking_lot::Mutex;
use tracing::{instrument, trace};

use crate::{error::DaggerError, task::TaskId};

/// Type-erased handle to a `Datum<V>` of unknown `V`, so a `Task`'s
/// `inputs`/`outputs` maps can hold a mix of `MemoryDatum`, `FileDatum`,
/// and `DatumList<_>` entries side by side. Every method mirrors one on
/// [`Datum`] directly; see there for behavior.
pub trait DatumHandle: fmt::Debug + Send + 'static {
    /// Current lifecycle state.
    fn state(&self) -> DatumState;
    /// Tasks that produce this datum (owned copy; cheap for the common
    /// single-parent case, and lets `DatumList` return a concatenation).
    fn parents(&self) -> Vec<TaskId>;
    /// Register an additional producing task.
    fn add_parent(&mut self, parent: TaskId);
    /// The stored fingerprint, `None` unless available.
    fn quickhash_value(&self) -> Option<u64>;
    /// See [`Datum::verify_available`].
    fn verify_available(&mut self, update: bool) -> bool;
    /// See [`Datum::clear`].
    fn clear(&mut self);
    /// See [`Datum::sync`].
    fn sync(&mut self);
    /// A short, stable variant name (`"MemoryDatum"`, `"FileDatum"`, ...).
    fn variant_name(&self) -> &'static str;
    /// Ancestor chain for converter-registry lookups, most specific first.
    fn variant_ancestry(&self) -> Vec<&'static str>;
    /// Downcast support for converters that need the concrete `Datum<V>`
    /// (e.g. `downcast_ref::<Datum<MemoryDatum>>()`), not just the payload.
    fn as_any(&self) -> &dyn Any;
    /// Mutable counterpart to [`as_any`](DatumHandle::as_any), used by task
    /// bodies that populate a named output of known concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<V: DatumVariant + 'static> DatumHandle for Datum<V> {
    fn state(&self) -> DatumState {
        Datum::state(self)
    }

    fn parents(&self) -> Vec<TaskId> {
        self.parents.clone()
    }

    fn add_parent(&mut self, parent: TaskId) {
        Datum::add_parent(self, parent)
    }

    fn quickhash_value(&self) -> Option<u64> {
        Datum::quickhash(self)
    }

    fn verify_available(&mut self, update: bool) -> bool {
        Datum::verify_available(self, update)
    }

    fn clear(&mut self) {
        Datum::clear(self)
    }

    fn sync(&mut self) {
        Datum::sync(self)
    }

    fn variant_name(&self) -> &'static str {
        self.variant.variant_name()
    }

    fn variant_ancestry(&self) -> Vec<&'static str> {
        self.variant.variant_ancestry()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A shared, mutable reference to a datum: exactly one owner produces it
/// (as a `Task` output) while zero or more downstream tasks hold the same
/// reference as an input. Mirrors spec §3's "Input Datums are shared
/// references to other Tasks' output Datums" directly, using `Arc<Mutex<_>>`
/// rather than Python-style object aliasing.
pub type DatumRef = Arc<Mutex<Box<dyn DatumHandle>>>;

/// Wrap any concrete datum as a [`DatumRef`] ready to be installed as a
/// task's input or output.
pub fn datum_ref<V: DatumVariant + 'static>(datum: Datum<V>) -> DatumRef {
    Arc::new(Mutex::new(Box::new(datum)))
}

/// The three states a [`Datum`] can occupy.
///
/// Legal transitions are exactly:
/// `EMPTY -> POPULATED`, `POPULATED -> EMPTY`, `POPULATED -> AVAILABLE`,
/// `AVAILABLE -> POPULATED`, `AVAILABLE -> EMPTY`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DatumState {
    /// No pointer, no quickhash. The initial state.
    Empty,
    /// Pointer is set and well-formed, but the underlying data may not exist.
    Populated,
    /// The underlying data is known to exist, and `quickhash` is set.
    Available,
}

impl DatumState {
    /// Is `to` a legal transition target from `self`?
    ///
    /// Self-transitions are always legal (mirrors [`TaskState::can_transition_to`](crate::task::TaskState::can_transition_to)).
    fn can_transition_to(self, to: DatumState) -> bool {
        use DatumState::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Empty, Populated)
                | (Populated, Empty)
                | (Populated, Available)
                | (Available, Populated)
                | (Available, Empty)
        )
    }
}

/// The variant-specific behavior a concrete Datum type must provide.
///
/// This is the Rust analogue of `AbstractDatum`'s abstract methods
/// (`_validate_format_logic`, `_verify_available_logic`, `_clear_logic`,
/// `_quickhash`) from `dagger/abstract/datum.py`.
pub trait DatumVariant: fmt::Debug + Send + Sync {
    /// A short, stable name for this variant, used by the converter
    /// registry and in error messages (e.g. `"MemoryDatum"`).
    fn variant_name(&self) -> &'static str;

    /// Is the current pointer well-formed? Called right after `populate`.
    fn validate_format_logic(&self) -> bool;

    /// Does the pointer currently resolve to data that exists?
    fn verify_available_logic(&self) -> bool;

    /// Delete any persistent backing for this datum (e.g. a file on disk).
    /// Must be idempotent.
    fn clear_logic(&mut self);

    /// Compute a cheap fingerprint of the current pointer's data.
    ///
    /// Must satisfy the quickhash contract from spec §4.1: identification
    /// (distinct data tends to hash distinctly) and modification (the hash
    /// changes whenever the backing data changes).
    fn quickhash(&self) -> u64;

    /// Ancestor chain for converter-registry lookups, most specific first,
    /// always ending in `self.variant_name()`. The stock variants have no
    /// ancestors beyond themselves; a caller-defined variant may override
    /// this to inherit converters registered for a stock variant.
    fn variant_ancestry(&self) -> Vec<&'static str> {
        vec![self.variant_name()]
    }
}

/// A typed handle to one piece of data flowing between tasks.
///
/// Generic over the concrete variant `V`, matching the teacher's pattern of
/// parameterizing shared lifecycle machinery over a concrete payload type
/// (cf. `DatumList<V>` in spec §4.2, which is itself generic this way).
#[derive(Debug)]
pub struct Datum<V: DatumVariant> {
    state: DatumState,
    variant: V,
    /// Tasks that produce this datum. Usually exactly one; Design Notes §9
    /// recommends storing `TaskId`s rather than live task references so a
    /// `Datum` never needs a back-reference into its owning arena.
    parents: Vec<TaskId>,
    quickhash: Option<u64>,
}

impl<V: DatumVariant> Datum<V> {
    /// Construct a new, `EMPTY` datum with the given variant payload and
    /// producing task. The variant payload should itself be "empty"
    /// (no pointer set yet); use [`Datum::populated`] to start pre-populated.
    pub fn new(variant: V, parent: TaskId) -> Self {
        Datum {
            state: DatumState::Empty,
            variant,
            parents: vec![parent],
            quickhash: None,
        }
    }

    /// Construct a datum and immediately populate + verify it, mirroring
    /// `AbstractDatum.__init__`'s `pointer` kwarg handling.
    pub fn populated(
        variant: V,
        parent: TaskId,
    ) -> std::result::Result<Self, DaggerError> {
        let mut datum = Self::new(variant, parent);
        datum.transition(DatumState::Populated)?;
        if !datum.variant.validate_format_logic() {
            datum.transition(DatumState::Empty)?;
            return Err(DaggerError::InvalidFormat {
                detail: format!("{:?} pointer rejected on construction", datum.variant),
            });
        }
        datum.verify_available(true);
        Ok(datum)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DatumState {
        self.state
    }

    /// The tasks that produce this datum.
    pub fn parents(&self) -> &[TaskId] {
        &self.parents
    }

    /// Add an additional producing task (used when a caller wires an
    /// existing output Datum into more than one task's outputs, or for
    /// aggregate variants like `DatumList`).
    pub fn add_parent(&mut self, parent: TaskId) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    /// The stored fingerprint, `None` unless `state == AVAILABLE`.
    pub fn quickhash(&self) -> Option<u64> {
        self.quickhash
    }

    /// Read-only access to the variant payload (e.g. to inspect a pointer).
    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Mutable access to the variant payload. Exposed for converters and
    /// task bodies that need to read or write the pointer directly.
    pub fn variant_mut(&mut self) -> &mut V {
        &mut self.variant
    }

    fn transition(
        &mut self,
        to: DatumState,
    ) -> std::result::Result<(), DaggerError> {
        if !self.state.can_transition_to(to) {
            return Err(DaggerError::invalid_datum_transition(self.state, to));
        }
        self.state = to;
        Ok(())
    }

    /// Populate the datum with a pointer, running format validation.
    ///
    /// `set_pointer` is supplied by the caller because the pointer type is
    /// variant-specific; it must leave `self.variant` in the state that
    /// `validate_format_logic` will check.
    #[instrument(skip_all, level = "trace")]
    pub fn populate(
        &mut self,
        set_pointer: impl FnOnce(&mut V),
    ) -> std::result::Result<(), DaggerError> {
        set_pointer(&mut self.variant);
        self.transition(DatumState::Populated)?;
        if !self.variant.validate_format_logic() {
            self.transition(DatumState::Empty)?;
            return Err(DaggerError::InvalidFormat {
                detail: format!("{:?} pointer rejected by populate", self.variant),
            });
        }
        trace!(variant = self.variant.variant_name(), "datum populated");
        Ok(())
    }

    /// Check whether the datum's pointer resolves to existing data. If it
    /// does and `update` is true, transition to `AVAILABLE` and recompute
    /// the quickhash.
    #[instrument(skip_all, level = "trace")]
    pub fn verify_available(&mut self, update: bool) -> bool {
        if self.state == DatumState::Empty {
            return false;
        }
        if self.variant.verify_available_logic() {
            if update {
                // `can_transition_to` allows Populated->Available and the
                // self-transition Available->Available.
                let _ = self.transition(DatumState::Available);
                self.quickhash = Some(self.variant.quickhash());
            }
            true
        } else {
            false
        }
    }

    /// Clear the datum: delete any persistent backing, drop to `POPULATED`,
    /// and null the quickhash. No-op if already `EMPTY`.
    #[instrument(skip_all, level = "trace")]
    pub fn clear(&mut self) {
        if self.state == DatumState::Empty {
            return;
        }
        self.variant.clear_logic();
        // Populated is always reachable from Available or Populated itself.
        let _ = self.transition(DatumState::Populated);
        self.quickhash = None;
    }

    /// Recompute the quickhash and compare it to the stored one. If they
    /// differ and `update` is true, store the new value. Returns whether
    /// they matched *before* any update.
    #[instrument(skip_all, level = "trace")]
    pub fn verify_quickhash(&mut self, update: bool) -> bool {
        let new_hash = self.variant.quickhash();
        let matched = self.quickhash == Some(new_hash);
        if !matched && update {
            self.quickhash = Some(new_hash);
        }
        matched
    }

    /// Reconcile `state` with the underlying data, per spec §4.1:
    ///
    /// 1. If the pointer fails format validation, drop to `EMPTY`.
    /// 2. Else if the existence check fails, settle at `POPULATED`.
    /// 3. Else if the fingerprint still matches, settle at `AVAILABLE`.
    /// 4. Else (stale), `clear()`.
    #[instrument(skip_all, level = "trace")]
    pub fn sync(&mut self) {
        if self.state == DatumState::Empty {
            return;
        }
        if !self.variant.validate_format_logic() {
            self.variant.clear_logic();
            self.state = DatumState::Empty;
            self.quickhash = None;
            return;
        }
        if self.variant.verify_available_logic() {
            if self.verify_quickhash(true) {
                let _ = self.transition(DatumState::Available);
            } else {
                self.clear();
            }
        } else {
            let _ = self.transition(DatumState::Populated);
        }
    }
}

/// A type-erased value that can still be cloned out of a `Box<dyn AnyClone>`.
///
/// The converter registry's `(MemoryDatum, OBJECT)` built-in (spec §4.3)
/// needs to hand a task body an owned copy of the in-memory pointer without
/// knowing its concrete type. Plain `dyn Any` can't do that — cloning
/// requires the concrete type — so this is the standard erased-clone
/// workaround: every `T: Any + Clone` gets a blanket impl.
pub trait AnyClone: Any + Send + Sync {
    /// Clone the underlying value behind a fresh type-erased box.
    fn clone_box(&self) -> Box<dyn AnyClone>;
    /// Downcast support, forwarding to the concrete value's `Any` impl.
    fn as_any(&self) -> &dyn Any;
    /// Unwrap into a plain `Box<dyn Any + Send>`, for handing to a task
    /// body's [`CollectedInputs`](crate::task::CollectedInputs).
    fn into_any_send(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Clone + Send + Sync> AnyClone for T {
    fn clone_box(&self) -> Box<dyn AnyClone> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_send(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// An in-memory value passed between tasks without touching disk.
///
/// Ground truth: the original `dagger.core.datum.MemoryDatum`, which wraps
/// an arbitrary Python object; `_quickhash` there is `hash(str(value))`.
/// Rust has no universal `str(value)`, so `MemoryDatum` requires its
/// payload to implement `Hash + Clone` and stores a boxed, erased-but-cloneable
/// value (see [`AnyClone`]) alongside a precomputed hash, recomputed each
/// time the value is replaced.
pub struct MemoryDatum {
    pointer: Option<Box<dyn AnyClone>>,
    cached_hash: u64,
}

impl fmt::Debug for MemoryDatum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatum")
            .field("populated", &self.pointer.is_some())
            .field("cached_hash", &self.cached_hash)
            .finish()
    }
}

impl Default for MemoryDatum {
    fn default() -> Self {
        MemoryDatum {
            pointer: None,
            cached_hash: 0,
        }
    }
}

impl MemoryDatum {
    /// An empty `MemoryDatum`, to be populated later via [`Datum::populate`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set the in-memory value and its hash in one step. Intended for use
    /// from inside a [`Datum::populate`] closure:
    ///
    /// ```ignore
    /// datum.populate(|v| v.set(42u64, hash_of(&42u64)))?;
    /// ```
    pub fn set<T: Any + Clone + Send + Sync>(&mut self, value: T, hash: u64) {
        self.pointer = Some(Box::new(value));
        self.cached_hash = hash;
    }

    /// Borrow the current value as `T`, if populated and of that type.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.pointer
            .as_ref()
            .and_then(|v| v.as_any().downcast_ref::<T>())
    }

    /// Clone the current value out as an erased, converter-friendly box.
    /// `None` if not yet populated.
    pub fn clone_pointer(&self) -> Option<Box<dyn AnyClone>> {
        self.pointer.as_ref().map(|v| v.clone_box())
    }
}

/// Convenience: hash any `Hash` value the way `MemoryDatum::set` expects,
/// mirroring the original's `hash(str(value))`.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl DatumVariant for MemoryDatum {
    fn variant_name(&self) -> &'static str {
        "MemoryDatum"
    }

    fn validate_format_logic(&self) -> bool {
        // An in-memory pointer is well-formed as soon as it's set; there's
        // no external format to validate.
        self.pointer.is_some()
    }

    fn verify_available_logic(&self) -> bool {
        // Once populated, an in-process value always "exists".
        self.pointer.is_some()
    }

    fn clear_logic(&mut self) {
        // No persistent backing; nothing to delete. We keep the value
        // itself (matching the original, where `clear()` only resets
        // `quickhash`/`state`, not the in-memory payload) so a caller can
        // inspect stale data if they choose to.
    }

    fn quickhash(&self) -> u64 {
        self.cached_hash
    }
}

/// A handle to data backed by a file on disk.
///
/// Ground truth: `dagger.core.datum.FileDatum`. Existence is `path.exists()`;
/// quickhash folds `(path, mtime)`, matching spec §4.1's "path + mtime is an
/// acceptable choice for files"; cleanup deletes the file.
#[derive(Debug, Default)]
pub struct FileDatum {
    pointer: Option<PathBuf>,
}

impl FileDatum {
    /// An empty `FileDatum`, to be populated via [`Datum::populate`].
    pub fn empty() -> Self {
        FileDatum::default()
    }

    /// The current path, if populated.
    pub fn path(&self) -> Option<&Path> {
        self.pointer.as_deref()
    }

    /// Set the path. Called from inside a [`Datum::populate`] closure.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.pointer = Some(path.into());
    }
}

impl DatumVariant for FileDatum {
    fn variant_name(&self) -> &'static str {
        "FileDatum"
    }

    fn validate_format_logic(&self) -> bool {
        match &self.pointer {
            Some(path) => !path.as_os_str().is_empty(),
            None => false,
        }
    }

    fn verify_available_logic(&self) -> bool {
        match &self.pointer {
            Some(path) => path.try_exists().unwrap_or(false),
            None => false,
        }
    }

    fn clear_logic(&mut self) {
        if let Some(path) = &self.pointer {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    trace!(path = %path.display(), error = %err, "failed to delete file datum backing");
                }
            }
        }
    }

    fn quickhash(&self) -> u64 {
        let Some(path) = &self.pointer else {
            return 0;
        };
        let mtime_nanos = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(|t| {
                t.duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        path.hash(&mut hasher);
        mtime_nanos.hash(&mut hasher);
        hasher.finish()
    }
}

/// An ordered, homogeneous list of `V`-datums, fanned out elementwise.
///
/// Ground truth: `dagger.abstract.list_datum.ListDatum` / spec §4.2. Unlike
/// `MemoryDatum`/`FileDatum`, `DatumList` has no independent top-level
/// state: its state, quickhash, and parents are all derived from its
/// children, so it implements [`DatumHandle`] directly rather than going
/// through the generic [`Datum`] wrapper (there is no standalone "list
/// pointer" to validate).
#[derive(Debug)]
pub struct DatumList<V: DatumVariant> {
    children: Vec<Datum<V>>,
}

impl<V: DatumVariant> DatumList<V> {
    /// Build a list datum from already-constructed children.
    pub fn new(children: Vec<Datum<V>>) -> Self {
        DatumList { children }
    }

    /// The child datums, in order.
    pub fn children(&self) -> &[Datum<V>] {
        &self.children
    }

    /// Mutable access to the child datums, in order.
    pub fn children_mut(&mut self) -> &mut [Datum<V>] {
        &mut self.children
    }
}

impl<V: DatumVariant + 'static> DatumHandle for DatumList<V> {
    fn state(&self) -> DatumState {
        if self.children.is_empty() {
            return DatumState::Empty;
        }
        if self
            .children
            .iter()
            .all(|c| c.state() == DatumState::Available)
        {
            DatumState::Available
        } else if self
            .children
            .iter()
            .any(|c| c.state() == DatumState::Empty)
        {
            DatumState::Empty
        } else {
            DatumState::Populated
        }
    }

    fn parents(&self) -> Vec<TaskId> {
        self.children.iter().flat_map(|c| c.parents().to_vec()).collect()
    }

    fn add_parent(&mut self, parent: TaskId) {
        for child in &mut self.children {
            child.add_parent(parent);
        }
    }

    fn quickhash_value(&self) -> Option<u64> {
        if self.state() != DatumState::Available {
            return None;
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for child in &self.children {
            child.quickhash().hash(&mut hasher);
        }
        Some(hasher.finish())
    }

    fn verify_available(&mut self, update: bool) -> bool {
        // Fan out to every child so each one's own state stays accurate,
        // without short-circuiting on the first failure.
        self.children
            .iter_mut()
            .map(|c| c.verify_available(update))
            .fold(true, |acc, ok| acc && ok)
    }

    fn clear(&mut self) {
        for child in &mut self.children {
            child.clear();
        }
    }

    fn sync(&mut self) {
        for child in &mut self.children {
            child.sync();
        }
    }

    fn variant_name(&self) -> &'static str {
        "DatumList"
    }

    fn variant_ancestry(&self) -> Vec<&'static str> {
        vec!["DatumList"]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;

    fn tid() -> TaskId {
        TaskId::new_for_test(0)
    }

    #[test]
    fn memory_datum_starts_empty() {
        let datum = Datum::new(MemoryDatum::empty(), tid());
        assert_eq!(datum.state(), DatumState::Empty);
        assert_eq!(datum.quickhash(), None);
    }

    #[test]
    fn memory_datum_populate_then_available() {
        let mut datum = Datum::new(MemoryDatum::empty(), tid());
        datum.populate(|v| v.set(7u64, hash_value(&7u64))).unwrap();
        assert_eq!(datum.state(), DatumState::Populated);
        assert!(datum.verify_available(true));
        assert_eq!(datum.state(), DatumState::Available);
        assert!(datum.quickhash().is_some());
    }

    #[test]
    fn clear_round_trips_to_populated() {
        let mut datum = Datum::new(MemoryDatum::empty(), tid());
        datum.populate(|v| v.set(1u64, hash_value(&1u64))).unwrap();
        datum.verify_available(true);
        datum.clear();
        assert_eq!(datum.state(), DatumState::Populated);
        assert_eq!(datum.quickhash(), None);
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut datum = Datum::new(MemoryDatum::empty(), tid());
        // Empty -> Available directly is illegal.
        let err = datum.transition(DatumState::Available).unwrap_err();
        assert!(matches!(err, DaggerError::InvalidTransition { .. }));
    }

    #[test]
    fn file_datum_empty_path_rejected() {
        let mut datum = Datum::new(FileDatum::empty(), tid());
        let result = datum.populate(|v| v.set_path(""));
        assert!(result.is_err());
        assert_eq!(datum.state(), DatumState::Empty);
    }

    #[test]
    fn file_datum_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "dagger_core_test_{}",
            hash_value(&std::time::Instant::now())
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("datum.txt");
        std::fs::write(&path, b"hello").unwrap();

        let mut datum = Datum::new(FileDatum::empty(), tid());
        datum.populate(|v| v.set_path(path.clone())).unwrap();
        assert!(datum.verify_available(true));
        assert_eq!(datum.state(), DatumState::Available);

        datum.clear();
        assert_eq!(datum.state(), DatumState::Populated);
        assert!(!path.exists());

        // Re-populating the same (now-missing) path shouldn't come back
        // available until new data appears.
        assert!(!datum.verify_available(true));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sync_detects_stale_data_and_clears() {
        let dir = std::env::temp_dir().join(format!(
            "dagger_core_test_sync_{}",
            hash_value(&std::time::Instant::now())
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("datum.txt");
        std::fs::write(&path, b"v1").unwrap();

        let mut datum = Datum::new(FileDatum::empty(), tid());
        datum.populate(|v| v.set_path(path.clone())).unwrap();
        datum.verify_available(true);
        assert_eq!(datum.state(), DatumState::Available);
        let first_hash = datum.quickhash();

        // Mutate the file's mtime by rewriting it.
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&path, b"v2-longer-content").unwrap();

        datum.sync();
        // Depending on filesystem mtime resolution the hash may or may not
        // have changed; what matters is sync() never panics and leaves the
        // datum in a valid state consistent with the file's existence.
        assert!(matches!(
            datum.state(),
            DatumState::Available | DatumState::Populated
        ));
        let _ = first_hash;

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn datum_list_state_is_available_only_when_every_child_is() {
        let mut list = DatumList::new(vec![
            Datum::new(MemoryDatum::empty(), tid()),
            Datum::new(MemoryDatum::empty(), tid()),
        ]);
        assert_eq!(list.state(), DatumState::Empty);

        list.children_mut()[0]
            .populate(|v| v.set(1u64, hash_value(&1u64)))
            .unwrap();
        // One child populated, one still empty: neither fully available nor
        // fully empty by the "any empty -> Empty" rule.
        assert_eq!(list.state(), DatumState::Empty);

        list.children_mut()[1]
            .populate(|v| v.set(2u64, hash_value(&2u64)))
            .unwrap();
        assert_eq!(list.state(), DatumState::Populated);

        assert!(DatumHandle::verify_available(&mut list, true));
        assert_eq!(list.state(), DatumState::Available);
        assert!(list.quickhash_value().is_some());
    }

    #[test]
    fn datum_list_quickhash_is_hash_of_child_tuple() {
        let mut a = DatumList::new(vec![
            Datum::new(MemoryDatum::empty(), tid()),
            Datum::new(MemoryDatum::empty(), tid()),
        ]);
        a.children_mut()[0].populate(|v| v.set(1u64, 111)).unwrap();
        a.children_mut()[1].populate(|v| v.set(2u64, 222)).unwrap();
        DatumHandle::verify_available(&mut a, true);

        let mut b = DatumList::new(vec![
            Datum::new(MemoryDatum::empty(), tid()),
            Datum::new(MemoryDatum::empty(), tid()),
        ]);
        b.children_mut()[0].populate(|v| v.set(1u64, 111)).unwrap();
        b.children_mut()[1].populate(|v| v.set(2u64, 222)).unwrap();
        DatumHandle::verify_available(&mut b, true);

        assert_eq!(a.quickhash_value(), b.quickhash_value());

        b.children_mut()[1].clear();
        b.children_mut()[1].populate(|v| v.set(2u64, 999)).unwrap();
        DatumHandle::verify_available(&mut b, true);
        assert_ne!(a.quickhash_value(), b.quickhash_value());
    }

    #[test]
    fn datum_list_clear_fans_out_to_every_child() {
        let mut list = DatumList::new(vec![
            Datum::new(MemoryDatum::empty(), tid()),
            Datum::new(MemoryDatum::empty(), tid()),
        ]);
        for child in list.children_mut() {
            child.populate(|v| v.set(1u64, hash_value(&1u64))).unwrap();
        }
        DatumHandle::verify_available(&mut list, true);
        assert_eq!(list.state(), DatumState::Available);

        list.clear();
        for child in list.children() {
            assert_eq!(child.state(), DatumState::Populated);
            assert_eq!(child.quickhash(), None);
        }
    }

    #[test]
    fn datum_list_parents_concatenate_child_parents() {
        let parent_a = TaskId::new_for_test(1);
        let parent_b = TaskId::new_for_test(2);
        let list = DatumList::new(vec![
            Datum::new(MemoryDatum::empty(), parent_a),
            Datum::new(MemoryDatum::empty(), parent_b),
        ]);
        assert_eq!(list.parents(), vec![parent_a, parent_b]);
    }
}
