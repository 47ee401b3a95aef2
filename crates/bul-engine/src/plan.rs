//! Declarative insertion plans
//!
//! A plan is a TOML file listing units and the insertions to append to
//! them. Every insertion is validated when the plan is compiled, so a
//! broken plan is rejected before any unit is touched.
//!
//! ```toml
//! [[unit]]
//! name = "ru/DmN/bul/Test"
//!
//! [[unit.insertion]]
//! method = "test"
//! kind = "invokedynamic"
//! name = "println"
//! descriptor = "()V"
//! bootstrap = { kind = "static", owner = "ru/DmN/bul/Test", name = "bootstrap", descriptor = "..." }
//! arguments = [{ int = 3 }]
//! ```

use crate::argument::{ConstantValue, InsertionArgument};
use crate::builder::{FieldOp, InsertionBuilder, InsertionKind};
use crate::error::{InsertError, PlanError};
use crate::handle::{DispatchKind, HandleDescriptor};
use crate::registry::ProcessorRegistry;
use crate::unit::MethodTarget;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::path::Path;

/// A parsed plan file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    /// Marker annotation override
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitPlan>,
}

/// Insertions for one unit
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitPlan {
    /// Internal class name
    pub name: String,
    #[serde(default, rename = "insertion")]
    pub insertions: Vec<InsertionPlan>,
}

/// Which instruction an insertion appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Invokedynamic,
    Invoke,
    Field,
    Alloc,
    Init,
}

impl PlanKind {
    fn allowed(self) -> &'static [&'static str] {
        match self {
            PlanKind::Invokedynamic => &["name", "descriptor", "bootstrap", "arguments"],
            PlanKind::Invoke => &["dispatch", "owner", "name", "descriptor", "interface"],
            PlanKind::Field => &["op", "owner", "name", "descriptor"],
            PlanKind::Alloc => &["class"],
            PlanKind::Init => &["class", "descriptor"],
        }
    }
}

/// One insertion entry
///
/// Which of the optional fields are required depends on `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsertionPlan {
    /// Method receiving the instruction
    pub method: String,
    /// Disambiguates overloads
    #[serde(default)]
    pub method_descriptor: Option<String>,
    pub kind: PlanKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub bootstrap: Option<HandlePlan>,
    #[serde(default)]
    pub arguments: Vec<ArgumentPlan>,
    #[serde(default)]
    pub dispatch: Option<DispatchKind>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub interface: bool,
    #[serde(default)]
    pub op: Option<FieldOp>,
    #[serde(default)]
    pub class: Option<String>,
}

/// A method or field handle
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlePlan {
    pub kind: DispatchKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub interface: bool,
}

impl HandlePlan {
    fn to_handle(&self) -> Result<HandleDescriptor, InsertError> {
        HandleDescriptor::new(self.kind, &self.owner, &self.name, &self.descriptor, self.interface)
    }
}

/// A bootstrap argument, written as a one-key table such as `{ int = 3 }`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentPlan {
    Handle(HandlePlan),
    String(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Type(String),
}

impl ArgumentPlan {
    fn to_argument(&self) -> Result<InsertionArgument, InsertError> {
        let argument = match self {
            ArgumentPlan::Handle(handle) => InsertionArgument::Handle(handle.to_handle()?),
            ArgumentPlan::String(value) => ConstantValue::String(value.clone()).into(),
            ArgumentPlan::Int(value) => ConstantValue::Int(*value).into(),
            ArgumentPlan::Long(value) => ConstantValue::Long(*value).into(),
            ArgumentPlan::Float(value) => ConstantValue::Float(*value).into(),
            ArgumentPlan::Double(value) => ConstantValue::Double(*value).into(),
            ArgumentPlan::Type(descriptor) => ConstantValue::Type(descriptor.clone()).into(),
        };
        argument.validate()?;
        Ok(argument)
    }
}

struct Located<'a> {
    unit: &'a str,
    position: usize,
}

impl Located<'_> {
    fn invalid(&self, reason: impl Into<String>) -> PlanError {
        PlanError::Invalid {
            unit: self.unit.to_string(),
            position: self.position,
            reason: reason.into(),
        }
    }

    fn insertion(&self, source: InsertError) -> PlanError {
        PlanError::Insertion {
            unit: self.unit.to_string(),
            position: self.position,
            source,
        }
    }

    fn require<'v, T: ?Sized>(&self, value: Option<&'v T>, field: &str) -> Result<&'v T, PlanError> {
        value.ok_or_else(|| self.invalid(format!("missing field '{}'", field)))
    }
}

impl InsertionPlan {
    fn present(&self) -> Vec<&'static str> {
        let flags = [
            ("name", self.name.is_some()),
            ("descriptor", self.descriptor.is_some()),
            ("bootstrap", self.bootstrap.is_some()),
            ("arguments", !self.arguments.is_empty()),
            ("dispatch", self.dispatch.is_some()),
            ("owner", self.owner.is_some()),
            ("interface", self.interface),
            ("op", self.op.is_some()),
            ("class", self.class.is_some()),
        ];
        flags
            .iter()
            .filter(|(_, set)| *set)
            .map(|(field, _)| *field)
            .collect()
    }

    fn compile(&self, at: &Located<'_>) -> Result<(MethodTarget, InsertionKind), PlanError> {
        let allowed = self.kind.allowed();
        if let Some(field) = self.present().into_iter().find(|f| !allowed.contains(f)) {
            return Err(at.invalid(format!("field '{}' does not apply to {:?} insertions", field, self.kind)));
        }
        let name = || at.require(self.name.as_deref(), "name");
        let descriptor = || at.require(self.descriptor.as_deref(), "descriptor");
        let owner = || at.require(self.owner.as_deref(), "owner");
        let class = || at.require(self.class.as_deref(), "class");

        let kind = match self.kind {
            PlanKind::Invokedynamic => {
                let bootstrap = at.require(self.bootstrap.as_ref(), "bootstrap")?;
                let bootstrap = bootstrap.to_handle().map_err(|e| at.insertion(e))?;
                let mut kind = InsertionKind::invoke_dynamic(name()?, descriptor()?, bootstrap)
                    .map_err(|e| at.insertion(e))?;
                if let InsertionKind::InvokeDynamic { arguments, .. } = &mut kind {
                    for argument in &self.arguments {
                        arguments.push(argument.to_argument().map_err(|e| at.insertion(e))?);
                    }
                }
                kind
            }
            PlanKind::Invoke => {
                let dispatch = *at.require(self.dispatch.as_ref(), "dispatch")?;
                InsertionKind::invoke(dispatch, owner()?, name()?, descriptor()?, self.interface)
                    .map_err(|e| at.insertion(e))?
            }
            PlanKind::Field => {
                let op = *at.require(self.op.as_ref(), "op")?;
                InsertionKind::field(op, owner()?, name()?, descriptor()?).map_err(|e| at.insertion(e))?
            }
            PlanKind::Alloc => InsertionKind::alloc(class()?).map_err(|e| at.insertion(e))?,
            PlanKind::Init => {
                InsertionKind::init(class()?, descriptor()?).map_err(|e| at.insertion(e))?
            }
        };
        let target = MethodTarget::new(self.method.as_str(), self.method_descriptor.as_deref());
        Ok((target, kind))
    }
}

impl Plan {
    /// Read and parse a plan file
    pub fn from_file(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse a plan from TOML text
    pub fn parse(content: &str) -> Result<Self, PlanError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate every insertion and turn each unit into one entry point
    pub fn compile(&self) -> Result<ProcessorRegistry, PlanError> {
        let mut registry = ProcessorRegistry::new();
        let mut seen = FxHashSet::default();
        for unit in &self.units {
            if !seen.insert(unit.name.as_str()) {
                return Err(PlanError::DuplicateUnit(unit.name.clone()));
            }
            let steps = unit
                .insertions
                .iter()
                .enumerate()
                .map(|(i, insertion)| {
                    insertion.compile(&Located {
                        unit: &unit.name,
                        position: i + 1,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            log::debug!("plan: {} with {} insertions", unit.name, steps.len());
            registry.register_fn(unit.name.clone(), format!("plan:{}", unit.name), move |handle| {
                for (target, kind) in &steps {
                    InsertionBuilder::new(handle.clone(), target.clone())
                        .open_validated(kind.clone())?
                        .commit()?;
                }
                Ok(())
            });
        }
        Ok(registry)
    }
}
