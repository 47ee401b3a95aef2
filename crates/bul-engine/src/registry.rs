//! Processor registry: unit name to entry points

use crate::error::InsertError;
use crate::unit::UnitHandle;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

type EntryFn = dyn Fn(&UnitHandle) -> Result<(), InsertError> + Send + Sync;

/// A named processing routine run against one unit
#[derive(Clone)]
pub struct EntryPoint {
    name: String,
    run: Arc<EntryFn>,
}

impl EntryPoint {
    /// Wrap a closure as an entry point
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&UnitHandle) -> Result<(), InsertError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    /// Entry point name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the entry point against a unit
    pub fn invoke(&self, unit: &UnitHandle) -> Result<(), InsertError> {
        (self.run)(unit)
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint").field("name", &self.name).finish()
    }
}

/// Entry points keyed by unit internal name, in registration order
#[derive(Debug, Clone, Default)]
pub struct ProcessorRegistry {
    entries: FxHashMap<String, Vec<EntryPoint>>,
}

impl ProcessorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point for a unit
    pub fn register(&mut self, unit: impl Into<String>, entry: EntryPoint) -> &mut Self {
        self.entries.entry(unit.into()).or_default().push(entry);
        self
    }

    /// Register a closure as an entry point for a unit
    pub fn register_fn<F>(&mut self, unit: impl Into<String>, name: impl Into<String>, run: F) -> &mut Self
    where
        F: Fn(&UnitHandle) -> Result<(), InsertError> + Send + Sync + 'static,
    {
        self.register(unit, EntryPoint::new(name, run))
    }

    /// Entry points for a unit, empty if none are registered
    pub fn entry_points(&self, unit: &str) -> &[EntryPoint] {
        self.entries.get(unit).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check whether a unit has entry points
    pub fn contains(&self, unit: &str) -> bool {
        !self.entry_points(unit).is_empty()
    }

    /// Registered unit names, sorted
    pub fn units(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        units.sort_unstable();
        units
    }

    /// Number of registered units
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every entry point of `other`
    pub fn merge(&mut self, other: ProcessorRegistry) {
        for (unit, entries) in other.entries {
            self.entries.entry(unit).or_default().extend(entries);
        }
    }
}
