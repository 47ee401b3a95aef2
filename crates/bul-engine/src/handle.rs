//! Method handle descriptors
//!
//! A [`HandleDescriptor`] names a field or method together with the way it is
//! linked. It is validated once, at construction, so every later stage can
//! intern it without re-checking.

use crate::error::InsertError;
use bul_classfile::descriptor::{
    is_valid_internal_class_name, is_valid_method_name, is_valid_unqualified_name,
};
use bul_classfile::{
    parse_field_descriptor, parse_method_descriptor, ConstantPool, PoolError, ReferenceKind,
    ReturnType,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a handle's target is linked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    /// Instance field read
    GetField,
    /// Static field read
    GetStatic,
    /// Instance field write
    PutField,
    /// Static field write
    PutStatic,
    /// Virtual method call
    Virtual,
    /// Static method call
    Static,
    /// Non-virtual instance call
    Special,
    /// Object construction through `<init>`
    Constructor,
    /// Interface method call
    Interface,
}

impl DispatchKind {
    /// The JVM reference kind this dispatch kind encodes to
    pub fn reference_kind(self) -> ReferenceKind {
        match self {
            DispatchKind::GetField => ReferenceKind::GetField,
            DispatchKind::GetStatic => ReferenceKind::GetStatic,
            DispatchKind::PutField => ReferenceKind::PutField,
            DispatchKind::PutStatic => ReferenceKind::PutStatic,
            DispatchKind::Virtual => ReferenceKind::InvokeVirtual,
            DispatchKind::Static => ReferenceKind::InvokeStatic,
            DispatchKind::Special => ReferenceKind::InvokeSpecial,
            DispatchKind::Constructor => ReferenceKind::NewInvokeSpecial,
            DispatchKind::Interface => ReferenceKind::InvokeInterface,
        }
    }

    /// Inverse of [`DispatchKind::reference_kind`]
    pub fn from_reference_kind(kind: ReferenceKind) -> Self {
        match kind {
            ReferenceKind::GetField => DispatchKind::GetField,
            ReferenceKind::GetStatic => DispatchKind::GetStatic,
            ReferenceKind::PutField => DispatchKind::PutField,
            ReferenceKind::PutStatic => DispatchKind::PutStatic,
            ReferenceKind::InvokeVirtual => DispatchKind::Virtual,
            ReferenceKind::InvokeStatic => DispatchKind::Static,
            ReferenceKind::InvokeSpecial => DispatchKind::Special,
            ReferenceKind::NewInvokeSpecial => DispatchKind::Constructor,
            ReferenceKind::InvokeInterface => DispatchKind::Interface,
        }
    }

    /// Method kinds whose target takes `this` as its first argument
    pub fn has_receiver(self) -> bool {
        matches!(
            self,
            DispatchKind::Virtual
                | DispatchKind::Special
                | DispatchKind::Constructor
                | DispatchKind::Interface
        )
    }

    /// Field access kinds take a field descriptor
    pub fn is_field(self) -> bool {
        matches!(
            self,
            DispatchKind::GetField
                | DispatchKind::GetStatic
                | DispatchKind::PutField
                | DispatchKind::PutStatic
        )
    }
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchKind::GetField => "GET_FIELD",
            DispatchKind::GetStatic => "GET_STATIC",
            DispatchKind::PutField => "PUT_FIELD",
            DispatchKind::PutStatic => "PUT_STATIC",
            DispatchKind::Virtual => "VIRTUAL",
            DispatchKind::Static => "STATIC",
            DispatchKind::Special => "SPECIAL",
            DispatchKind::Constructor => "CONSTRUCTOR",
            DispatchKind::Interface => "INTERFACE",
        };
        f.write_str(name)
    }
}

/// An immutable, validated reference to a field or method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleDescriptor {
    kind: DispatchKind,
    owner: String,
    name: String,
    descriptor: String,
    owner_is_interface: bool,
}

impl HandleDescriptor {
    /// Create a handle, checking that the descriptor parses and fits `kind`
    ///
    /// Every rejection is reported as [`InsertError::MalformedDescriptor`].
    pub fn new(
        kind: DispatchKind,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        owner_is_interface: bool,
    ) -> Result<Self, InsertError> {
        let handle = Self {
            kind,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            owner_is_interface,
        };
        handle.validate()?;
        Ok(handle)
    }

    fn validate(&self) -> Result<(), InsertError> {
        if !is_valid_internal_class_name(&self.owner) {
            return Err(InsertError::malformed(&self.owner, "not a valid internal class name"));
        }

        let is_initializer = self.name == "<init>" || self.name == "<clinit>";
        if self.kind.is_field() {
            parse_field_descriptor(&self.descriptor)
                .map_err(|e| InsertError::malformed(&self.descriptor, e.to_string()))?;
            if !is_valid_unqualified_name(&self.name) || is_initializer {
                return Err(InsertError::malformed(&self.name, "not a valid field name"));
            }
            if self.owner_is_interface {
                return Err(InsertError::malformed(
                    &self.owner,
                    format!("{} handles cannot target an interface owner", self.kind),
                ));
            }
            return Ok(());
        }

        let method = parse_method_descriptor(&self.descriptor)
            .map_err(|e| InsertError::malformed(&self.descriptor, e.to_string()))?;
        method
            .argument_slots(self.kind.has_receiver())
            .map_err(|e| InsertError::malformed(&self.descriptor, e.to_string()))?;
        if !is_valid_method_name(&self.name) {
            return Err(InsertError::malformed(&self.name, "not a valid method name"));
        }

        match self.kind {
            DispatchKind::Constructor => {
                if self.name != "<init>" {
                    return Err(InsertError::malformed(&self.name, "CONSTRUCTOR requires <init>"));
                }
                if method.ret != ReturnType::Void {
                    return Err(InsertError::malformed(
                        &self.descriptor,
                        "constructors must return V",
                    ));
                }
                if self.owner_is_interface {
                    return Err(InsertError::malformed(&self.owner, "interfaces have no constructors"));
                }
            }
            _ if is_initializer => {
                return Err(InsertError::malformed(
                    &self.name,
                    format!("{} cannot target an initializer", self.kind),
                ));
            }
            DispatchKind::Interface if !self.owner_is_interface => {
                return Err(InsertError::malformed(
                    &self.owner,
                    "INTERFACE requires an interface owner",
                ));
            }
            DispatchKind::Virtual if self.owner_is_interface => {
                return Err(InsertError::malformed(
                    &self.owner,
                    "VIRTUAL cannot target an interface owner",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Dispatch kind
    pub fn kind(&self) -> DispatchKind {
        self.kind
    }

    /// Owner internal name
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Member name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field or method descriptor
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Whether the owner is an interface
    pub fn owner_is_interface(&self) -> bool {
        self.owner_is_interface
    }

    /// Intern the Fieldref / Methodref / InterfaceMethodref for the target
    pub(crate) fn intern_member(&self, pool: &mut ConstantPool) -> Result<u16, PoolError> {
        if self.kind.is_field() {
            pool.field_ref(&self.owner, &self.name, &self.descriptor)
        } else {
            pool.method_ref(&self.owner, &self.name, &self.descriptor, self.owner_is_interface)
        }
    }

    /// Intern the MethodHandle constant and everything it refers to
    pub(crate) fn intern(&self, pool: &mut ConstantPool) -> Result<u16, PoolError> {
        let reference = self.intern_member(pool)?;
        let index = pool.method_handle(self.kind.reference_kind(), reference)?;
        log::trace!("interned handle {} as #{}", self, index);
        Ok(index)
    }
}

impl fmt::Display for HandleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}{}", self.kind, self.owner, self.name, self.descriptor)
    }
}

/// Shorthand for [`HandleDescriptor::new`]
pub fn handle(
    kind: DispatchKind,
    owner: &str,
    name: &str,
    descriptor: &str,
    owner_is_interface: bool,
) -> Result<HandleDescriptor, InsertError> {
    HandleDescriptor::new(kind, owner, name, descriptor, owner_is_interface)
}
