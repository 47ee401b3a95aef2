//! Fluent insertion builder
//!
//! A builder starts idle, becomes open when an insertion kind is chosen
//! (`begin`, `invoke`, `field`, `alloc` or `init`) and is sealed by
//! `commit`. Once sealed every operation fails with
//! [`InsertError::IllegalState`].
//!
//! ```ignore
//! let bootstrap = handle(DispatchKind::Static, "ru/DmN/bul/Test", "bootstrap", BSM, false)?;
//! let position = unit
//!     .insertion("test", Some("()V"))
//!     .begin("println", "()V", bootstrap)?
//!     .argument(ConstantValue::Int(3))?
//!     .commit()?;
//! ```

use crate::argument::InsertionArgument;
use crate::emitter::{self, InstructionPosition};
use crate::error::InsertError;
use crate::handle::{DispatchKind, HandleDescriptor};
use crate::unit::{MethodTarget, UnitHandle};
use bul_classfile::descriptor::{is_valid_internal_class_name, is_valid_unqualified_name};
use bul_classfile::{parse_descriptor, parse_method_descriptor, Descriptor};
use serde::{Deserialize, Serialize};

/// Field access instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOp {
    /// `getstatic`
    GetStatic,
    /// `putstatic`
    PutStatic,
    /// `getfield`
    GetField,
    /// `putfield`
    PutField,
}

impl FieldOp {
    /// The matching handle dispatch kind
    pub fn dispatch_kind(self) -> DispatchKind {
        match self {
            FieldOp::GetStatic => DispatchKind::GetStatic,
            FieldOp::PutStatic => DispatchKind::PutStatic,
            FieldOp::GetField => DispatchKind::GetField,
            FieldOp::PutField => DispatchKind::PutField,
        }
    }
}

/// What a committed request appends
#[derive(Debug, Clone, PartialEq)]
pub enum InsertionKind {
    /// `invokedynamic` linked through a bootstrap method
    InvokeDynamic {
        /// Call site name
        name: String,
        /// Call site method descriptor
        descriptor: String,
        /// Bootstrap method
        bootstrap: HandleDescriptor,
        /// Static bootstrap arguments in order
        arguments: Vec<InsertionArgument>,
    },
    /// `invokestatic`, `invokevirtual`, `invokespecial` or `invokeinterface`
    Invoke(HandleDescriptor),
    /// `getstatic`, `putstatic`, `getfield` or `putfield`
    Field(FieldOp, HandleDescriptor),
    /// `new` followed by `dup`
    Alloc(String),
    /// `invokespecial` of a constructor
    Init(HandleDescriptor),
}

impl InsertionKind {
    /// Validate an `invokedynamic` call site without arguments
    pub fn invoke_dynamic(
        name: &str,
        descriptor: &str,
        bootstrap: HandleDescriptor,
    ) -> Result<Self, InsertError> {
        if !is_valid_unqualified_name(name) {
            return Err(InsertError::invalid(name, "invokedynamic", "not a valid call site name"));
        }
        match parse_descriptor(descriptor) {
            Err(e) => return Err(InsertError::malformed(descriptor, e.to_string())),
            Ok(Descriptor::Field(_)) => {
                return Err(InsertError::invalid(
                    descriptor,
                    "invokedynamic",
                    "expected a method descriptor",
                ))
            }
            Ok(Descriptor::Method(method)) => {
                method
                    .argument_slots(false)
                    .map_err(|e| InsertError::invalid(descriptor, "invokedynamic", e.to_string()))?;
            }
        }
        if bootstrap.kind().is_field() {
            return Err(InsertError::invalid(
                bootstrap.descriptor(),
                "invokedynamic",
                "the bootstrap handle must reference a method",
            ));
        }
        Ok(InsertionKind::InvokeDynamic {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            bootstrap,
            arguments: Vec::new(),
        })
    }

    /// Validate a direct method call
    pub fn invoke(
        kind: DispatchKind,
        owner: &str,
        name: &str,
        descriptor: &str,
        owner_is_interface: bool,
    ) -> Result<Self, InsertError> {
        if !kind.is_field() {
            // also bounds the invokeinterface count byte
            check_argument_slots(descriptor, kind.has_receiver(), "invoke")?;
        }
        let target = HandleDescriptor::new(kind, owner, name, descriptor, owner_is_interface)?;
        if kind.is_field() {
            return Err(InsertError::invalid(descriptor, "invoke", "field handles cannot be invoked"));
        }
        Ok(InsertionKind::Invoke(target))
    }

    /// Validate a field access
    pub fn field(op: FieldOp, owner: &str, name: &str, descriptor: &str) -> Result<Self, InsertError> {
        let target = HandleDescriptor::new(op.dispatch_kind(), owner, name, descriptor, false)?;
        Ok(InsertionKind::Field(op, target))
    }

    /// Validate an allocation
    pub fn alloc(class: &str) -> Result<Self, InsertError> {
        if !is_valid_internal_class_name(class) {
            return Err(InsertError::malformed(class, "not a valid internal class name"));
        }
        Ok(InsertionKind::Alloc(class.to_string()))
    }

    /// Validate a constructor call
    pub fn init(class: &str, descriptor: &str) -> Result<Self, InsertError> {
        check_argument_slots(descriptor, true, "init")?;
        let target = HandleDescriptor::new(DispatchKind::Constructor, class, "<init>", descriptor, false)?;
        Ok(InsertionKind::Init(target))
    }

    /// Short name used in errors and logs
    pub fn instruction(&self) -> &'static str {
        match self {
            InsertionKind::InvokeDynamic { .. } => "invokedynamic",
            InsertionKind::Invoke(_) => "invoke",
            InsertionKind::Field(..) => "field access",
            InsertionKind::Alloc(_) => "alloc",
            InsertionKind::Init(_) => "init",
        }
    }
}

/// Unparseable descriptors are malformed; ones over the slot limit are invalid
fn check_argument_slots(
    descriptor: &str,
    receiver: bool,
    instruction: &'static str,
) -> Result<(), InsertError> {
    parse_method_descriptor(descriptor)
        .map_err(|e| InsertError::malformed(descriptor, e.to_string()))?
        .argument_slots(receiver)
        .map_err(|e| InsertError::invalid(descriptor, instruction, e.to_string()))?;
    Ok(())
}

/// A fully described insertion, ready for the emitter
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionRequest {
    /// Method whose code receives the instruction
    pub target: MethodTarget,
    /// What to append
    pub kind: InsertionKind,
}

#[derive(Debug)]
enum State {
    Idle,
    Open(InsertionKind),
    Sealed,
}

/// Builds and commits one insertion into one unit
#[derive(Debug)]
pub struct InsertionBuilder {
    unit: UnitHandle,
    target: MethodTarget,
    state: State,
}

impl InsertionBuilder {
    /// Create an idle builder for `target`
    pub fn new(unit: UnitHandle, target: MethodTarget) -> Self {
        Self {
            unit,
            target,
            state: State::Idle,
        }
    }

    /// The target method
    pub fn target(&self) -> &MethodTarget {
        &self.target
    }

    /// True between choosing an insertion and committing it
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// True once committed
    pub fn is_sealed(&self) -> bool {
        matches!(self.state, State::Sealed)
    }

    fn ensure_idle(&self) -> Result<(), InsertError> {
        match self.state {
            State::Idle => Ok(()),
            State::Open(_) => Err(InsertError::IllegalState("an insertion is already open")),
            State::Sealed => Err(InsertError::IllegalState("builder is sealed after commit")),
        }
    }

    fn open(&mut self, kind: InsertionKind) -> &mut Self {
        self.state = State::Open(kind);
        self
    }

    /// Open an `invokedynamic` insertion
    pub fn begin(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: HandleDescriptor,
    ) -> Result<&mut Self, InsertError> {
        self.ensure_idle()?;
        let kind = InsertionKind::invoke_dynamic(name, descriptor, bootstrap)?;
        Ok(self.open(kind))
    }

    /// Open a direct method call
    pub fn invoke(
        &mut self,
        kind: DispatchKind,
        owner: &str,
        name: &str,
        descriptor: &str,
        owner_is_interface: bool,
    ) -> Result<&mut Self, InsertError> {
        self.ensure_idle()?;
        let kind = InsertionKind::invoke(kind, owner, name, descriptor, owner_is_interface)?;
        Ok(self.open(kind))
    }

    /// Open a field access
    pub fn field(
        &mut self,
        op: FieldOp,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self, InsertError> {
        self.ensure_idle()?;
        let kind = InsertionKind::field(op, owner, name, descriptor)?;
        Ok(self.open(kind))
    }

    /// Open an allocation of `class` (`new` + `dup`)
    pub fn alloc(&mut self, class: &str) -> Result<&mut Self, InsertError> {
        self.ensure_idle()?;
        let kind = InsertionKind::alloc(class)?;
        Ok(self.open(kind))
    }

    /// Open a constructor call on an allocated, duplicated instance
    pub fn init(&mut self, class: &str, descriptor: &str) -> Result<&mut Self, InsertError> {
        self.ensure_idle()?;
        let kind = InsertionKind::init(class, descriptor)?;
        Ok(self.open(kind))
    }

    /// Open an insertion whose parts were validated when it was built
    pub(crate) fn open_validated(&mut self, kind: InsertionKind) -> Result<&mut Self, InsertError> {
        self.ensure_idle()?;
        Ok(self.open(kind))
    }

    /// Append a static argument to the open `invokedynamic` insertion
    pub fn argument(&mut self, argument: impl Into<InsertionArgument>) -> Result<&mut Self, InsertError> {
        match &mut self.state {
            State::Open(InsertionKind::InvokeDynamic { arguments, .. }) => {
                let argument = argument.into();
                argument.validate()?;
                arguments.push(argument);
                Ok(self)
            }
            State::Open(_) => Err(InsertError::IllegalState(
                "arguments only apply to invokedynamic insertions",
            )),
            State::Idle => Err(InsertError::IllegalState("argument before begin")),
            State::Sealed => Err(InsertError::IllegalState("builder is sealed after commit")),
        }
    }

    /// Seal the builder and apply the insertion to the unit
    ///
    /// The builder is sealed even if the emitter rejects the request.
    pub fn commit(&mut self) -> Result<InstructionPosition, InsertError> {
        let kind = match std::mem::replace(&mut self.state, State::Sealed) {
            State::Open(kind) => kind,
            State::Idle => {
                self.state = State::Idle;
                return Err(InsertError::IllegalState("commit before begin"));
            }
            State::Sealed => return Err(InsertError::IllegalState("builder is sealed after commit")),
        };
        let request = InsertionRequest {
            target: self.target.clone(),
            kind,
        };
        let mut unit = self.unit.lock();
        emitter::emit(&mut unit, &request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::ConstantValue;
    use crate::handle::handle;
    use bul_classfile::{access, ClassFile, CodeAttribute};

    fn unit() -> UnitHandle {
        let mut class = ClassFile::new("a/Test", Some("java/lang/Object")).unwrap();
        class
            .add_method(access::STATIC, "test", "()V", Some(CodeAttribute::new(0, 0, vec![])))
            .unwrap();
        UnitHandle::from_class(class).unwrap()
    }

    fn bootstrap() -> HandleDescriptor {
        handle(
            DispatchKind::Static,
            "a/Test",
            "bootstrap",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
            false,
        )
        .unwrap()
    }

    fn illegal<T>(result: Result<T, InsertError>) -> bool {
        matches!(result, Err(InsertError::IllegalState(_)))
    }

    #[test]
    fn test_states() {
        let unit = unit();
        let mut builder = unit.insertion("test", None);
        assert!(!builder.is_open());
        builder.begin("println", "()V", bootstrap()).unwrap();
        assert!(builder.is_open());
        builder.commit().unwrap();
        assert!(builder.is_sealed());
    }

    #[test]
    fn test_operations_after_commit_are_illegal() {
        let unit = unit();
        let mut builder = unit.insertion("test", None);
        builder.begin("println", "()V", bootstrap()).unwrap().commit().unwrap();
        assert!(illegal(builder.argument(1)));
        assert!(illegal(builder.begin("println", "()V", bootstrap())));
        assert!(illegal(builder.begin("not valid", "(", bootstrap())));
        assert!(illegal(builder.alloc("a/B")));
        assert!(illegal(builder.commit()));
    }

    #[test]
    fn test_commit_before_begin() {
        let unit = unit();
        let mut builder = unit.insertion("test", None);
        assert!(illegal(builder.commit()));
        assert!(illegal(builder.argument(1)));
        // still usable
        builder.alloc("a/B").unwrap();
    }

    #[test]
    fn test_double_begin() {
        let unit = unit();
        let mut builder = unit.insertion("test", None);
        builder.begin("a", "()V", bootstrap()).unwrap();
        assert!(illegal(builder.begin("b", "()V", bootstrap())));
    }

    #[test]
    fn test_begin_descriptor_checks() {
        let unit = unit();
        assert!(matches!(
            unit.insertion("test", None).begin("x", "(I", bootstrap()),
            Err(InsertError::MalformedDescriptor { .. })
        ));
        assert!(matches!(
            unit.insertion("test", None).begin("x", "I", bootstrap()),
            Err(InsertError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            unit.insertion("test", None).begin("a.b", "()V", bootstrap()),
            Err(InsertError::InvalidDescriptor { .. })
        ));
        let getter = handle(DispatchKind::GetStatic, "a/Test", "x", "I", false).unwrap();
        assert!(matches!(
            unit.insertion("test", None).begin("x", "()V", getter),
            Err(InsertError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_arguments_only_for_invokedynamic() {
        let unit = unit();
        let mut builder = unit.insertion("test", None);
        builder.alloc("a/B").unwrap();
        assert!(illegal(builder.argument(ConstantValue::Int(1))));
    }

    #[test]
    fn test_primitive_type_argument_rejected() {
        let unit = unit();
        let mut builder = unit.insertion("test", None);
        builder.begin("x", "()V", bootstrap()).unwrap();
        assert!(matches!(
            builder.argument(ConstantValue::Type("J".into())),
            Err(InsertError::InvalidDescriptor { .. })
        ));
        // the builder stays open
        builder.argument(ConstantValue::Type("Ljava/lang/Object;".into())).unwrap();
        assert!(builder.is_open());
    }

    #[test]
    fn test_invoke_checks() {
        let unit = unit();
        assert!(matches!(
            unit.insertion("test", None)
                .invoke(DispatchKind::GetStatic, "a/B", "x", "I", false),
            Err(InsertError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            unit.insertion("test", None)
                .invoke(DispatchKind::Static, "a/B", "m", "(I", false),
            Err(InsertError::MalformedDescriptor { .. })
        ));
        assert!(unit
            .insertion("test", None)
            .invoke(DispatchKind::Interface, "a/I", "m", "(JJ)V", true)
            .is_ok());
        let wide = format!("({})V", "J".repeat(128));
        assert!(matches!(
            unit.insertion("test", None)
                .invoke(DispatchKind::Interface, "a/I", "m", &wide, true),
            Err(InsertError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_parameter_slot_limit() {
        fn invalid<T>(result: Result<T, InsertError>) -> bool {
            matches!(result, Err(InsertError::InvalidDescriptor { .. }))
        }
        let unit = unit();
        // 254, 255 and 256 parameter slots
        let below = format!("({})V", "J".repeat(127));
        let full = format!("({}I)V", "J".repeat(127));
        let over = format!("({})V", "J".repeat(128));

        assert!(unit.insertion("test", None).begin("x", &full, bootstrap()).is_ok());
        assert!(invalid(unit.insertion("test", None).begin("x", &over, bootstrap())));

        assert!(unit
            .insertion("test", None)
            .invoke(DispatchKind::Static, "a/B", "m", &full, false)
            .is_ok());
        assert!(invalid(
            unit.insertion("test", None)
                .invoke(DispatchKind::Virtual, "a/B", "m", &full, false)
        ));
        assert!(unit
            .insertion("test", None)
            .invoke(DispatchKind::Interface, "a/I", "m", &below, true)
            .is_ok());
        assert!(invalid(
            unit.insertion("test", None)
                .invoke(DispatchKind::Interface, "a/I", "m", &full, true)
        ));

        assert!(unit.insertion("test", None).init("a/B", &below).is_ok());
        assert!(invalid(unit.insertion("test", None).init("a/B", &full)));

        let huge = format!("({})V", "J".repeat(33_000));
        assert!(invalid(unit.insertion("test", None).begin("x", &huge, bootstrap())));
    }

    #[test]
    fn test_init_requires_void() {
        let unit = unit();
        assert!(unit.insertion("test", None).init("a/B", "(I)V").is_ok());
        assert!(matches!(
            unit.insertion("test", None).init("a/B", "()I"),
            Err(InsertError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_alloc_checks_class_name() {
        let unit = unit();
        assert!(matches!(
            unit.insertion("test", None).alloc("a.B"),
            Err(InsertError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_failed_commit_still_seals() {
        let unit = unit();
        let mut builder = unit.insertion("missing", None);
        builder.alloc("a/B").unwrap();
        assert!(matches!(builder.commit(), Err(InsertError::UnresolvedTarget(_))));
        assert!(builder.is_sealed());
    }
}
