//! Units under patch
//!
//! A [`PatchedUnit`] owns one decoded class plus the bookkeeping the emitter
//! keeps between commits. A [`UnitHandle`] shares it behind a single
//! exclusive lock; every commit holds that lock for its whole
//! intern-to-append cycle.

use crate::builder::InsertionBuilder;
use crate::error::InsertError;
use crate::handle::HandleDescriptor;
use bul_classfile::{BootstrapMethod, ClassFile, ClassFileError, Opcode};
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// The method an insertion is appended to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodTarget {
    /// Method name
    pub name: String,
    /// Method descriptor; `None` takes the first method with the name
    pub descriptor: Option<String>,
}

impl MethodTarget {
    /// Target a method by name and optional descriptor
    pub fn new(name: impl Into<String>, descriptor: Option<&str>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.map(str::to_string),
        }
    }
}

impl fmt::Display for MethodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.descriptor {
            Some(descriptor) => write!(f, "{}{}", self.name, descriptor),
            None => f.write_str(&self.name),
        }
    }
}

/// One appended instruction and its operand stack effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchEntry {
    /// Offset of the instruction in the code array
    pub offset: usize,
    /// The instruction
    pub opcode: Opcode,
    /// Slots popped
    pub pops: u16,
    /// Slots pushed
    pub pushes: u16,
}

/// Stack bookkeeping for the instructions appended to one method
///
/// Depth is measured from the start of the appended region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodPatchLog {
    entries: Vec<PatchEntry>,
    depth: i32,
    peak: u16,
}

impl MethodPatchLog {
    /// Record an appended instruction
    pub fn record(&mut self, entry: PatchEntry) {
        self.depth = self.depth - entry.pops as i32 + entry.pushes as i32;
        if self.depth > self.peak as i32 {
            self.peak = self.depth.min(u16::MAX as i32) as u16;
        }
        self.entries.push(entry);
    }

    /// Appended instructions in order
    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    /// Net stack depth after the last appended instruction
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Highest depth reached inside the appended region
    pub fn peak(&self) -> u16 {
        self.peak
    }
}

/// A class being patched
#[derive(Debug)]
pub struct PatchedUnit {
    pub(crate) class: ClassFile,
    pub(crate) bootstrap: Vec<BootstrapMethod>,
    pub(crate) logs: FxHashMap<usize, MethodPatchLog>,
    pub(crate) insertions: usize,
    name: String,
}

impl PatchedUnit {
    /// Take ownership of a decoded class
    pub fn new(class: ClassFile) -> Result<Self, ClassFileError> {
        let bootstrap = class.bootstrap_methods()?;
        let name = class.name().unwrap_or("<unnamed>").to_string();
        Ok(Self {
            class,
            bootstrap,
            logs: FxHashMap::default(),
            insertions: 0,
            name,
        })
    }

    /// Internal name of the class
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class in its current state
    pub fn class(&self) -> &ClassFile {
        &self.class
    }

    /// Current bootstrap method table
    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap
    }

    /// Stack log for a method, if anything was appended to it
    pub fn patch_log(&self, method: usize) -> Option<&MethodPatchLog> {
        self.logs.get(&method)
    }

    /// Number of committed insertions
    pub fn insertions(&self) -> usize {
        self.insertions
    }

    /// Resolve a method target to its index
    pub fn resolve_method(&self, target: &MethodTarget) -> Result<usize, InsertError> {
        self.class
            .find_method(&target.name, target.descriptor.as_deref())
            .ok_or_else(|| {
                InsertError::UnresolvedTarget(format!("method {} not found in {}", target, self.name))
            })
    }

    /// Encode the patched class
    pub fn encode(&self) -> Vec<u8> {
        self.class.encode()
    }

    /// Give back the patched class
    pub fn into_class(self) -> ClassFile {
        self.class
    }
}

/// Shared, lockable access to a [`PatchedUnit`]
#[derive(Debug, Clone)]
pub struct UnitHandle {
    inner: Arc<Mutex<PatchedUnit>>,
}

impl UnitHandle {
    /// Wrap a unit
    pub fn new(unit: PatchedUnit) -> Self {
        Self {
            inner: Arc::new(Mutex::new(unit)),
        }
    }

    /// Decode and wrap a class
    pub fn from_class(class: ClassFile) -> Result<Self, ClassFileError> {
        Ok(Self::new(PatchedUnit::new(class)?))
    }

    /// Lock the unit for inspection
    pub fn lock(&self) -> MutexGuard<'_, PatchedUnit> {
        self.inner.lock()
    }

    /// Start a builder whose insertions go to `method`
    pub fn insertion(&self, method: &str, descriptor: Option<&str>) -> InsertionBuilder {
        InsertionBuilder::new(self.clone(), MethodTarget::new(method, descriptor))
    }

    /// Start an `invokedynamic` insertion into `method`
    pub fn begin_insertion(
        &self,
        method: &str,
        name: &str,
        descriptor: &str,
        bootstrap: HandleDescriptor,
    ) -> Result<InsertionBuilder, InsertError> {
        let mut builder = self.insertion(method, None);
        builder.begin(name, descriptor, bootstrap)?;
        Ok(builder)
    }

    /// Take the unit back once no other handle exists
    pub fn into_inner(self) -> Result<PatchedUnit, UnitHandle> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| UnitHandle { inner })
    }
}
