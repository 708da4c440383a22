//! The converter registry: `(datum variant, input form) -> runtime value`.
//!
//! Ground truth: spec §4.3 / the original `dagger.core.task.CONVERTERS`
//! lookup table. The Python original walks a class's MRO looking for a
//! registered converter; Design Notes §9 prescribes replacing that with an
//! explicit registry keyed by a sealed discriminator plus an explicit
//! ancestry list, which is what [`DatumHandle::variant_ancestry`] is for.

use std::{
    any::Any,
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use crate::{
    datum::{Datum, DatumRef, FileDatum, MemoryDatum},
    error::DaggerError,
};

/// How a task variant wants its input Datums materialized.
///
/// Ground truth: spec §3's "Converter" definition and §6's
/// `input_form ∈ {OBJECT, FILEPATH, …}`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum InputForm {
    /// Materialize as an in-process value.
    Object,
    /// Materialize as a filesystem path.
    FilePath,
}

impl InputForm {
    fn name(self) -> &'static str {
        match self {
            InputForm::Object => "OBJECT",
            InputForm::FilePath => "FILEPATH",
        }
    }
}

/// A registered conversion function: `Datum -> runtime value`.
pub type ConvertFn =
    Arc<dyn Fn(&DatumRef) -> anyhow::Result<Box<dyn Any + Send>> + Send + Sync>;

/// A pluggable deserializer for `.pkl`-suffixed `FileDatum` pointers,
/// installed via [`ConverterRegistry::register_pkl_codec`]. Ground truth:
/// `dagger/core/input_converters.py`'s `file_to_object`, which calls
/// `pickle.load` directly; Rust has no standard pickle codec, so the core
/// exposes the hook instead of hard-coding a format.
pub type PklCodec = Arc<dyn Fn(&Path) -> anyhow::Result<Box<dyn Any + Send>> + Send + Sync>;

/// A process-wide (or, in this port, coordinator-scoped — see Design Notes
/// §9's "Alternative" and DESIGN.md) lookup table from `(datum variant,
/// input form)` to a converter function.
///
/// Lookup walks the datum's variant ancestry, most specific first, and
/// stops at the first registered entry; a miss is [`DaggerError::NoConverter`].
pub struct ConverterRegistry {
    table: HashMap<(&'static str, InputForm), ConvertFn>,
    /// Shared with the `(FileDatum, OBJECT)` built-in's closure so that
    /// [`register_pkl_codec`](Self::register_pkl_codec) can be called after
    /// [`with_builtins`](Self::with_builtins) and still take effect.
    pkl_codec: Arc<RwLock<Option<PklCodec>>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        ConverterRegistry::new()
    }
}

impl ConverterRegistry {
    /// An empty registry with no converters registered.
    pub fn new() -> Self {
        ConverterRegistry {
            table: HashMap::new(),
            pkl_codec: Arc::new(RwLock::new(None)),
        }
    }

    /// A registry pre-populated with the stock built-ins from spec §4.3:
    /// `(MemoryDatum, OBJECT)`, `(FileDatum, FILEPATH)`, `(FileDatum, OBJECT)`.
    pub fn with_builtins() -> Self {
        let mut registry = ConverterRegistry::new();
        registry.register("MemoryDatum", InputForm::Object, memory_object_converter);
        registry.register("FileDatum", InputForm::FilePath, file_filepath_converter);
        let pkl_codec = Arc::clone(&registry.pkl_codec);
        registry.register("FileDatum", InputForm::Object, move |datum: &DatumRef| {
            file_object_converter(datum, &pkl_codec)
        });
        registry
    }

    /// Install the codec `(FileDatum, OBJECT)` calls on a `.pkl`-suffixed
    /// pointer. Takes `&self`: the codec cell is shared (interior
    /// mutability) with the closure registered by
    /// [`with_builtins`](Self::with_builtins), so this can be called any
    /// time after construction, not only before.
    pub fn register_pkl_codec(
        &self,
        f: impl Fn(&Path) -> anyhow::Result<Box<dyn Any + Send>> + Send + Sync + 'static,
    ) {
        *self.pkl_codec.write().expect("pkl codec lock poisoned") = Some(Arc::new(f));
    }

    /// Register a converter for `(variant, form)`, overwriting any previous
    /// entry for the same key.
    pub fn register(
        &mut self,
        variant: &'static str,
        form: InputForm,
        f: impl Fn(&DatumRef) -> anyhow::Result<Box<dyn Any + Send>> + Send + Sync + 'static,
    ) {
        self.table.insert((variant, form), Arc::new(f));
    }

    /// Look up and invoke the converter for `datum`'s variant (walking its
    /// ancestry, most specific first) under `form`.
    pub fn convert(
        &self,
        datum: &DatumRef,
        form: InputForm,
    ) -> anyhow::Result<Box<dyn Any + Send>> {
        let ancestry = datum.lock().variant_ancestry();
        for variant in &ancestry {
            if let Some(f) = self.table.get(&(*variant, form)) {
                return f(datum);
            }
        }
        let variant = ancestry.first().copied().unwrap_or("unknown");
        Err(DaggerError::NoConverter {
            variant,
            input_form: form.name(),
        }
        .into())
    }
}

fn memory_object_converter(datum: &DatumRef) -> anyhow::Result<Box<dyn Any + Send>> {
    let guard = datum.lock();
    let d = guard
        .as_any()
        .downcast_ref::<Datum<MemoryDatum>>()
        .ok_or_else(|| anyhow::anyhow!("converter expected a MemoryDatum"))?;
    let boxed = d
        .variant()
        .clone_pointer()
        .ok_or_else(|| anyhow::anyhow!("MemoryDatum has no value to convert"))?;
    Ok(boxed.into_any_send())
}

fn file_filepath_converter(datum: &DatumRef) -> anyhow::Result<Box<dyn Any + Send>> {
    let guard = datum.lock();
    let d = guard
        .as_any()
        .downcast_ref::<Datum<FileDatum>>()
        .ok_or_else(|| anyhow::anyhow!("converter expected a FileDatum"))?;
    let path = d
        .variant()
        .path()
        .ok_or_else(|| anyhow::anyhow!("FileDatum has no path to convert"))?;
    Ok(Box::new(path.to_path_buf()) as Box<dyn Any + Send>)
}

fn file_object_converter(
    datum: &DatumRef,
    pkl_codec: &Arc<RwLock<Option<PklCodec>>>,
) -> anyhow::Result<Box<dyn Any + Send>> {
    let path: PathBuf = {
        let guard = datum.lock();
        let d = guard
            .as_any()
            .downcast_ref::<Datum<FileDatum>>()
            .ok_or_else(|| anyhow::anyhow!("converter expected a FileDatum"))?;
        d.variant()
            .path()
            .ok_or_else(|| anyhow::anyhow!("FileDatum has no path to convert"))?
            .to_path_buf()
    };
    let is_pkl = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pkl"))
        .unwrap_or(false);
    if is_pkl {
        let codec = pkl_codec.read().expect("pkl codec lock poisoned");
        return match codec.as_ref() {
            Some(codec) => codec(&path),
            None => Err(DaggerError::NoCodec { path }.into()),
        };
    }
    Ok(Box::new(path) as Box<dyn Any + Send>)
}
