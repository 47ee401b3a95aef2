//! Marker annotation scanning
//!
//! A unit is processed only if its class carries the marker annotation in
//! either annotation table and the registry has entry points for it.

use crate::registry::{EntryPoint, ProcessorRegistry};
use bul_classfile::{ClassFile, ClassFileError};

/// Marker annotation descriptor used when none is configured
pub const DEFAULT_MARKER: &str = "Lru/DmN/bul/BytecodeProcessor;";

/// Why a unit was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The class does not carry the marker annotation
    Unmarked,
    /// The class is marked but nothing is registered for it
    NoEntryPoints,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Unmarked => f.write_str("no marker annotation"),
            SkipReason::NoEntryPoints => f.write_str("no entry points registered"),
        }
    }
}

/// Outcome of scanning one class
#[derive(Debug)]
pub enum Selection<'r> {
    /// Process the class with these entry points
    Selected(&'r [EntryPoint]),
    /// Leave the class alone
    Skipped(SkipReason),
}

/// Selects marked units and looks up their entry points
#[derive(Debug, Clone)]
pub struct UnitScanner {
    marker: String,
}

impl Default for UnitScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl UnitScanner {
    /// Scanner looking for `marker` (a field descriptor such as `Lpkg/Marker;`)
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// The marker descriptor
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Check whether the class carries the marker
    pub fn is_marked(&self, class: &ClassFile) -> Result<bool, ClassFileError> {
        class.has_annotation(&self.marker)
    }

    /// Decide whether and how to process `class`
    pub fn select<'r>(
        &self,
        class: &ClassFile,
        registry: &'r ProcessorRegistry,
    ) -> Result<Selection<'r>, ClassFileError> {
        let name = class.name().unwrap_or("<unnamed>");
        if !self.is_marked(class)? {
            log::trace!("{}: skipped, {}", name, SkipReason::Unmarked);
            return Ok(Selection::Skipped(SkipReason::Unmarked));
        }
        let entries = registry.entry_points(name);
        if entries.is_empty() {
            log::warn!("{}: marked with {} but {}", name, self.marker, SkipReason::NoEntryPoints);
            return Ok(Selection::Skipped(SkipReason::NoEntryPoints));
        }
        Ok(Selection::Selected(entries))
    }
}
