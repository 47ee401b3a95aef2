//! Patch emitter
//!
//! Lowers a committed [`InsertionRequest`] into pool entries, an optional
//! bootstrap table entry and instruction bytes appended to the target
//! method's code array. Existing code never moves.
//!
//! Every fallible step runs before anything is published. If one fails the
//! pool is rolled back to its checkpoint and the bootstrap table is
//! truncated, so a rejected request leaves the unit exactly as it was.

use crate::builder::{FieldOp, InsertionKind, InsertionRequest};
use crate::error::InsertError;
use crate::handle::{DispatchKind, HandleDescriptor};
use crate::unit::{PatchEntry, PatchedUnit};
use bul_classfile::class::MAX_CODE_LENGTH;
use bul_classfile::{
    parse_field_descriptor, parse_method_descriptor, BootstrapMethod, Checkpoint, ClassFileError,
    ClassWriter, CodeAttribute, Opcode,
};

/// Where a committed insertion landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionPosition {
    /// Index of the method in the class
    pub method: usize,
    /// Offset of the first appended instruction
    pub offset: usize,
    /// Number of bytes appended
    pub length: usize,
    /// Pool index carried by the first appended instruction
    pub operand: u16,
    /// Bootstrap table index, for `invokedynamic`
    pub bootstrap_index: Option<u16>,
}

/// Instruction bytes and bookkeeping produced before anything is published
struct Lowered {
    bytes: Vec<u8>,
    steps: Vec<PatchEntry>,
    operand: u16,
    bootstrap: Option<BootstrapMethod>,
}

impl Lowered {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            steps: Vec::new(),
            operand: 0,
            bootstrap: None,
        }
    }

    fn step(&mut self, writer: &ClassWriter, opcode: Opcode, pops: u16, pushes: u16) {
        self.steps.push(PatchEntry {
            offset: writer.offset(),
            opcode,
            pops,
            pushes,
        });
    }
}

/// Slots popped and pushed by a call through `descriptor`
fn call_effect(
    descriptor: &str,
    receiver: bool,
    instruction: &'static str,
) -> Result<(u16, u16), InsertError> {
    let method = parse_method_descriptor(descriptor)
        .map_err(|e| InsertError::malformed(descriptor, e.to_string()))?;
    let pops = method
        .argument_slots(receiver)
        .map_err(|e| InsertError::invalid(descriptor, instruction, e.to_string()))?;
    Ok((pops, method.return_slots()))
}

/// Apply one request to the unit, all or nothing
pub(crate) fn emit(
    unit: &mut PatchedUnit,
    request: &InsertionRequest,
) -> Result<InstructionPosition, InsertError> {
    let method = unit.resolve_method(&request.target)?;
    let code = match unit.class.code(method) {
        Ok(code) => code,
        Err(ClassFileError::MissingAttribute { .. }) => {
            return Err(InsertError::UnresolvedTarget(format!(
                "method {} in {} has no code",
                request.target,
                unit.name()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    let checkpoint = unit.class.constant_pool.checkpoint();
    let bootstrap_len = unit.bootstrap.len();
    match apply(unit, method, code, request) {
        Ok(position) => {
            log::debug!(
                "{}: {} into {} at +{} (operand #{}, bootstrap {:?})",
                unit.name(),
                request.kind.instruction(),
                request.target,
                position.offset,
                position.operand,
                position.bootstrap_index
            );
            Ok(position)
        }
        Err(error) => {
            restore(unit, bootstrap_len, checkpoint);
            log::debug!(
                "{}: rolled back {} into {}: {}",
                unit.name(),
                request.kind.instruction(),
                request.target,
                error
            );
            Err(error)
        }
    }
}

fn restore(unit: &mut PatchedUnit, bootstrap_len: usize, checkpoint: Checkpoint) {
    if unit.bootstrap.len() != bootstrap_len {
        unit.bootstrap.truncate(bootstrap_len);
        // The attribute exists (or is removed when empty), so no pool entry is needed
        if let Err(e) = unit.class.set_bootstrap_methods(&unit.bootstrap) {
            log::error!("{}: failed to restore bootstrap table: {}", unit.name(), e);
        }
    }
    unit.class.constant_pool.rollback(checkpoint);
}

fn apply(
    unit: &mut PatchedUnit,
    method: usize,
    mut code: CodeAttribute,
    request: &InsertionRequest,
) -> Result<InstructionPosition, InsertError> {
    let lowered = lower(unit, &request.kind)?;

    let offset = code.code.len();
    if offset + lowered.bytes.len() > MAX_CODE_LENGTH {
        return Err(InsertError::CapacityExceeded(format!(
            "code of {} would grow to {} bytes",
            request.target,
            offset + lowered.bytes.len()
        )));
    }

    let mut log = unit.logs.get(&method).cloned().unwrap_or_default();
    for step in &lowered.steps {
        log.record(PatchEntry {
            offset: offset + step.offset,
            ..*step
        });
    }
    code.code.extend_from_slice(&lowered.bytes);
    code.max_stack = code.max_stack.max(log.peak());

    let bootstrap_index = match lowered.bootstrap {
        Some(entry) => {
            let index = unit.bootstrap.len() as u16;
            unit.bootstrap.push(entry);
            unit.class.set_bootstrap_methods(&unit.bootstrap)?;
            Some(index)
        }
        None => None,
    };
    unit.class.set_code(method, &code)?;

    unit.logs.insert(method, log);
    unit.insertions += 1;
    Ok(InstructionPosition {
        method,
        offset,
        length: lowered.bytes.len(),
        operand: lowered.operand,
        bootstrap_index,
    })
}

/// Intern everything the request needs and produce its bytes
fn lower(unit: &mut PatchedUnit, kind: &InsertionKind) -> Result<Lowered, InsertError> {
    let pool = &mut unit.class.constant_pool;
    let mut writer = ClassWriter::new();
    let mut lowered = Lowered::new();

    match kind {
        InsertionKind::InvokeDynamic {
            name,
            descriptor,
            bootstrap,
            arguments,
        } => {
            let (pops, pushes) = call_effect(descriptor, false, "invokedynamic")?;
            let method_ref = bootstrap.intern(pool)?;
            let arguments = arguments
                .iter()
                .map(|argument| argument.intern(pool))
                .collect::<Result<Vec<u16>, _>>()?;
            if arguments.len() > u16::MAX as usize {
                return Err(InsertError::CapacityExceeded(format!(
                    "{} bootstrap arguments",
                    arguments.len()
                )));
            }
            if unit.bootstrap.len() >= u16::MAX as usize {
                return Err(InsertError::CapacityExceeded(
                    "bootstrap method table is full".to_string(),
                ));
            }
            let bootstrap_index = unit.bootstrap.len() as u16;
            let call_site = pool.invoke_dynamic(bootstrap_index, name, descriptor)?;

            lowered.step(&writer, Opcode::Invokedynamic, pops, pushes);
            writer.emit_invokedynamic(call_site);
            lowered.operand = call_site;
            lowered.bootstrap = Some(BootstrapMethod {
                method_ref,
                arguments,
            });
        }
        InsertionKind::Invoke(target) => {
            let opcode = invoke_opcode(target)?;
            let (pops, pushes) = call_effect(target.descriptor(), target.kind().has_receiver(), "invoke")?;
            let member = target.intern_member(pool)?;
            lowered.step(&writer, opcode, pops, pushes);
            if opcode == Opcode::Invokeinterface {
                // the count byte includes the receiver
                let count = u8::try_from(pops)
                    .map_err(|_| InsertError::invalid(target.descriptor(), "invoke", "too many argument slots"))?;
                writer.emit_invokeinterface(member, count);
            } else {
                writer.emit_indexed(opcode, member);
            }
            lowered.operand = member;
        }
        InsertionKind::Field(op, target) => {
            let slots = parse_field_descriptor(target.descriptor())
                .map_err(|e| InsertError::malformed(target.descriptor(), e.to_string()))?
                .slot_size();
            let member = target.intern_member(pool)?;
            let (opcode, pops, pushes) = match op {
                FieldOp::GetStatic => (Opcode::Getstatic, 0, slots),
                FieldOp::PutStatic => (Opcode::Putstatic, slots, 0),
                FieldOp::GetField => (Opcode::Getfield, 1, slots),
                FieldOp::PutField => (Opcode::Putfield, 1 + slots, 0),
            };
            lowered.step(&writer, opcode, pops, pushes);
            writer.emit_indexed(opcode, member);
            lowered.operand = member;
        }
        InsertionKind::Alloc(class) => {
            let class_index = pool.class(class)?;
            lowered.step(&writer, Opcode::New, 0, 1);
            writer.emit_indexed(Opcode::New, class_index);
            lowered.step(&writer, Opcode::Dup, 1, 2);
            writer.emit_opcode(Opcode::Dup);
            lowered.operand = class_index;
        }
        InsertionKind::Init(target) => {
            let (pops, _) = call_effect(target.descriptor(), true, "init")?;
            let member = target.intern_member(pool)?;
            lowered.step(&writer, Opcode::Invokespecial, pops, 0);
            writer.emit_indexed(Opcode::Invokespecial, member);
            lowered.operand = member;
        }
    }

    lowered.bytes = writer.into_bytes();
    Ok(lowered)
}

fn invoke_opcode(target: &HandleDescriptor) -> Result<Opcode, InsertError> {
    Ok(match target.kind() {
        DispatchKind::Static => Opcode::Invokestatic,
        DispatchKind::Virtual => Opcode::Invokevirtual,
        DispatchKind::Special | DispatchKind::Constructor => Opcode::Invokespecial,
        DispatchKind::Interface => Opcode::Invokeinterface,
        DispatchKind::GetField
        | DispatchKind::GetStatic
        | DispatchKind::PutField
        | DispatchKind::PutStatic => {
            return Err(InsertError::invalid(
                target.descriptor(),
                "invoke",
                "field handles cannot be invoked",
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::ConstantValue;
    use crate::handle::handle;
    use crate::unit::{MethodTarget, UnitHandle};
    use bul_classfile::{access, verify_class, ClassFile, Constant, MAX_POOL_INDEX};

    const BSM: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

    fn unit_with(code: Vec<u8>) -> UnitHandle {
        let mut class = ClassFile::new("a/Test", Some("java/lang/Object")).unwrap();
        class
            .add_method(access::STATIC, "test", "()V", Some(CodeAttribute::new(0, 0, code)))
            .unwrap();
        class.add_method(access::ABSTRACT, "bare", "()V", None).unwrap();
        UnitHandle::from_class(class).unwrap()
    }

    fn bootstrap() -> HandleDescriptor {
        handle(DispatchKind::Static, "a/Owner", "bootstrap", BSM, false).unwrap()
    }

    #[test]
    fn test_invokedynamic_bytes() {
        let unit = unit_with(vec![0xB1]);
        let position = unit
            .insertion("test", None)
            .begin("println", "()V", bootstrap())
            .unwrap()
            .commit()
            .unwrap();
        assert_eq!(position.offset, 1);
        assert_eq!(position.length, 5);
        assert_eq!(position.bootstrap_index, Some(0));

        let unit = unit.lock();
        let code = unit.class().code(0).unwrap();
        let [hi, lo] = position.operand.to_be_bytes();
        assert_eq!(code.code, vec![0xB1, 0xBA, hi, lo, 0, 0]);
        match unit.class().constant_pool.get(position.operand) {
            Some(Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                ..
            }) => assert_eq!(*bootstrap_method_attr_index, 0),
            other => panic!("unexpected operand {:?}", other),
        }
        verify_class(unit.class()).unwrap();
    }

    #[test]
    fn test_stack_effect_raises_max_stack() {
        let unit = unit_with(vec![]);
        unit.insertion("test", None)
            .begin("make", "(JI)Ljava/lang/Object;", bootstrap())
            .unwrap()
            .commit()
            .unwrap();
        let guard = unit.lock();
        let log = guard.patch_log(0).unwrap();
        assert_eq!(log.entries()[0].pops, 3);
        assert_eq!(log.entries()[0].pushes, 1);
        assert_eq!(log.depth(), -2);
        assert_eq!(log.peak(), 0);
        drop(guard);

        unit.insertion("test", None).alloc("a/Thing").unwrap().commit().unwrap();
        let guard = unit.lock();
        assert_eq!(guard.patch_log(0).unwrap().peak(), 0);
        drop(guard);

        let unit = unit_with(vec![]);
        unit.insertion("test", None).alloc("a/Thing").unwrap().commit().unwrap();
        unit.insertion("test", None).init("a/Thing", "(J)V").unwrap().commit().unwrap();
        let guard = unit.lock();
        let log = guard.patch_log(0).unwrap();
        assert_eq!(log.peak(), 2);
        assert_eq!(log.depth(), -1);
        assert_eq!(guard.class().code(0).unwrap().max_stack, 2);
    }

    #[test]
    fn test_invoke_and_field_bytes() {
        let unit = unit_with(vec![]);
        let call = unit
            .insertion("test", None)
            .invoke(DispatchKind::Interface, "a/I", "m", "(JI)V", true)
            .unwrap()
            .commit()
            .unwrap();
        let get = unit
            .insertion("test", None)
            .field(FieldOp::GetStatic, "a/Test", "count", "J")
            .unwrap()
            .commit()
            .unwrap();
        assert_eq!(get.offset, 5);

        let guard = unit.lock();
        let code = guard.class().code(0).unwrap().code;
        let [hi, lo] = call.operand.to_be_bytes();
        assert_eq!(&code[0..5], &[0xB9, hi, lo, 4, 0]);
        assert_eq!(code[5], 0xB2);
        assert_eq!(
            guard.class().constant_pool.member_ref(get.operand),
            Some(("a/Test", "count", "J"))
        );
        let log = guard.patch_log(0).unwrap();
        assert_eq!(log.entries()[0].pops, 4);
        assert_eq!(log.entries()[1].pushes, 2);
    }

    #[test]
    fn test_missing_code_is_unresolved() {
        let unit = unit_with(vec![0xB1]);
        let count = unit.lock().class().constant_pool.count();
        let result = unit
            .insertion("bare", None)
            .begin("x", "()V", bootstrap())
            .unwrap()
            .commit();
        assert!(matches!(result, Err(InsertError::UnresolvedTarget(_))));
        assert_eq!(unit.lock().class().constant_pool.count(), count);
    }

    #[test]
    fn test_full_pool_rolls_back() {
        let unit = unit_with(vec![0xB1]);
        {
            let mut guard = unit.lock();
            let pool = &mut guard.class.constant_pool;
            let mut value = 0;
            while pool.count() < MAX_POOL_INDEX as usize - 2 {
                pool.integer(value).unwrap();
                value += 1;
            }
        }
        let before = unit.lock().class().encode();
        let result = unit
            .insertion("test", None)
            .begin("println", "()V", bootstrap())
            .unwrap()
            .argument(ConstantValue::String("s".into()))
            .unwrap()
            .commit();
        assert!(matches!(result, Err(InsertError::CapacityExceeded(_))));

        let guard = unit.lock();
        assert_eq!(guard.class().encode(), before);
        assert!(guard.bootstrap_methods().is_empty());
        assert_eq!(guard.insertions(), 0);
        assert!(guard.patch_log(0).is_none());
    }

    #[test]
    fn test_oversized_utf8_rolls_back() {
        let unit = unit_with(vec![0xB1]);
        let before = unit.lock().class().encode();

        let result = unit
            .insertion("test", None)
            .begin("println", "()V", bootstrap())
            .unwrap()
            .argument(ConstantValue::String("x".repeat(70_000)))
            .unwrap()
            .commit();
        assert!(matches!(result, Err(InsertError::CapacityExceeded(_))));

        let name = "n".repeat(70_000);
        let result = unit
            .insertion("test", None)
            .begin(&name, "()V", bootstrap())
            .unwrap()
            .commit();
        assert!(matches!(result, Err(InsertError::CapacityExceeded(_))));

        let guard = unit.lock();
        let after = guard.class().encode();
        assert_eq!(after, before);
        ClassFile::decode(&after).unwrap();
        assert!(guard.bootstrap_methods().is_empty());
        assert_eq!(guard.insertions(), 0);
    }

    #[test]
    fn test_full_parameter_slots() {
        let unit = unit_with(vec![]);
        let full = format!("({}I)V", "J".repeat(127));
        let below = format!("({})V", "J".repeat(127));

        let call = unit
            .insertion("test", None)
            .invoke(DispatchKind::Interface, "a/I", "m", &below, true)
            .unwrap()
            .commit()
            .unwrap();
        unit.insertion("test", None)
            .invoke(DispatchKind::Static, "a/B", "m", &full, false)
            .unwrap()
            .commit()
            .unwrap();
        unit.insertion("test", None)
            .begin("x", &full, bootstrap())
            .unwrap()
            .commit()
            .unwrap();

        let guard = unit.lock();
        let code = guard.class().code(0).unwrap().code;
        let [hi, lo] = call.operand.to_be_bytes();
        assert_eq!(&code[0..5], &[0xB9, hi, lo, 255, 0]);
        let pops: Vec<u16> = guard.patch_log(0).unwrap().entries().iter().map(|e| e.pops).collect();
        assert_eq!(pops, vec![255, 255, 255]);
        verify_class(guard.class()).unwrap();
    }

    #[test]
    fn test_unchecked_request_over_slot_limit() {
        // requests built without the builder are still checked before lowering
        let unit = unit_with(vec![0xB1]);
        let before = unit.lock().class().encode();
        let request = InsertionRequest {
            target: MethodTarget::new("test", None),
            kind: InsertionKind::InvokeDynamic {
                name: "x".to_string(),
                descriptor: format!("({})V", "J".repeat(33_000)),
                bootstrap: bootstrap(),
                arguments: Vec::new(),
            },
        };
        let mut guard = unit.lock();
        assert!(matches!(
            emit(&mut guard, &request),
            Err(InsertError::InvalidDescriptor { .. })
        ));
        assert_eq!(guard.class().encode(), before);
    }

    #[test]
    fn test_code_length_limit() {
        let unit = unit_with(vec![0; MAX_CODE_LENGTH - 2]);
        let before = unit.lock().class().encode();
        let result = unit
            .insertion("test", None)
            .begin("x", "()V", bootstrap())
            .unwrap()
            .commit();
        assert!(matches!(result, Err(InsertError::CapacityExceeded(_))));
        assert_eq!(unit.lock().class().encode(), before);

        // a three byte instruction does not fit either
        unit.insertion("test", None)
            .field(FieldOp::GetStatic, "a/Test", "x", "I")
            .unwrap()
            .commit()
            .unwrap_err();
        let unit = unit_with(vec![0; MAX_CODE_LENGTH - 3]);
        unit.insertion("test", None)
            .field(FieldOp::GetStatic, "a/Test", "x", "I")
            .unwrap()
            .commit()
            .unwrap();
    }

    #[test]
    fn test_bootstrap_entries_are_not_shared() {
        let unit = unit_with(vec![]);
        let a = unit
            .insertion("test", None)
            .begin("x", "()V", bootstrap())
            .unwrap()
            .commit()
            .unwrap();
        let b = unit
            .insertion("test", None)
            .begin("x", "()V", bootstrap())
            .unwrap()
            .commit()
            .unwrap();
        assert_ne!(a.operand, b.operand);
        assert_eq!(a.bootstrap_index, Some(0));
        assert_eq!(b.bootstrap_index, Some(1));
        let guard = unit.lock();
        let table = guard.bootstrap_methods();
        assert_eq!(table[0], table[1]);
    }
}
