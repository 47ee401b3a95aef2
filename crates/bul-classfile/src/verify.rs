//! Structural class file verification
//!
//! Checks that every index resolves to the right kind of pool entry, that
//! descriptors parse and that code arrays decode cleanly. This is not the
//! JVM's type-checking verifier: no stack maps, no type inference.

use crate::class::{access, attr, ClassFile, ClassFileError, CodeAttribute, MAX_CODE_LENGTH};
use crate::constants::{Constant, ConstantPool, ReferenceKind};
use crate::descriptor::{
    is_valid_method_name, parse_field_descriptor, parse_method_descriptor, DescriptorError,
};
use crate::encoder::DecodeError;
use crate::opcode::Opcode;
use rustc_hash::FxHashSet;

/// Verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Class structure could not be read
    #[error("Class file error: {0}")]
    ClassFile(#[from] ClassFileError),

    /// A pool index does not resolve to the expected kind of entry
    #[error("Index {index} referenced from {from} is not a valid {expected}")]
    BadReference {
        /// Where the reference came from
        from: String,
        /// The referenced index
        index: u16,
        /// Expected entry kind
        expected: &'static str,
    },

    /// A method handle whose kind does not fit its target
    #[error("Method handle #{index} is malformed: {reason}")]
    BadMethodHandle {
        /// Pool index of the handle
        index: u16,
        /// What is wrong with it
        reason: &'static str,
    },

    /// An invokedynamic or dynamic constant names a missing bootstrap method
    #[error("Constant #{index} names bootstrap method {bootstrap} but the table has {len}")]
    BootstrapOutOfRange {
        /// Pool index of the dynamic constant
        index: u16,
        /// Requested bootstrap index
        bootstrap: u16,
        /// Bootstrap table length
        len: usize,
    },

    /// A descriptor failed to parse
    #[error("Bad descriptor in {from}: {source}")]
    BadDescriptor {
        /// Where the descriptor came from
        from: String,
        /// Parse error
        #[source]
        source: DescriptorError,
    },

    /// A member name is not legal
    #[error("Illegal method name '{0}'")]
    BadName(String),

    /// A code array could not be decoded
    #[error("Code of {method} does not decode: {source}")]
    Decode {
        /// Method label
        method: String,
        /// Decode failure
        #[source]
        source: DecodeError,
    },

    /// A code array is empty or larger than 65535 bytes
    #[error("Code of {method} has illegal length {length}")]
    CodeLength {
        /// Method label
        method: String,
        /// Code length
        length: usize,
    },

    /// An instruction operand points at the wrong kind of pool entry
    #[error("{opcode} at {method}+{offset} references #{index}, expected {expected}")]
    BadOperand {
        /// Method label
        method: String,
        /// Instruction offset
        offset: usize,
        /// Instruction mnemonic
        opcode: &'static str,
        /// Operand index
        index: u16,
        /// Expected entry kind
        expected: &'static str,
    },

    /// A branch lands outside the code or inside an instruction
    #[error("Branch at {method}+{offset} targets {target}, which is not an instruction")]
    BadBranchTarget {
        /// Method label
        method: String,
        /// Instruction offset
        offset: usize,
        /// Absolute target
        target: i64,
    },

    /// An exception handler range is not on instruction boundaries
    #[error("Exception handler {start}..{end} -> {handler} in {method} is malformed")]
    BadExceptionRange {
        /// Method label
        method: String,
        /// Range start
        start: u16,
        /// Range end
        end: u16,
        /// Handler offset
        handler: u16,
    },
}

fn is_loadable(constant: &Constant) -> bool {
    matches!(
        constant,
        Constant::Integer(_)
            | Constant::Float(_)
            | Constant::Long(_)
            | Constant::Double(_)
            | Constant::Class { .. }
            | Constant::String { .. }
            | Constant::MethodHandle { .. }
            | Constant::MethodType { .. }
            | Constant::Dynamic { .. }
    )
}

struct Verifier<'a> {
    class: &'a ClassFile,
    pool: &'a ConstantPool,
    bootstrap_len: usize,
}

impl<'a> Verifier<'a> {
    fn expect(
        &self,
        from: impl FnOnce() -> String,
        index: u16,
        expected: &'static str,
        ok: impl FnOnce(&Constant) -> bool,
    ) -> Result<&'a Constant, VerifyError> {
        match self.pool.get(index) {
            Some(constant) if ok(constant) => Ok(constant),
            _ => Err(VerifyError::BadReference {
                from: from(),
                index,
                expected,
            }),
        }
    }

    fn utf8(&self, from: impl FnOnce() -> String, index: u16) -> Result<&'a str, VerifyError> {
        match self.pool.get(index) {
            Some(Constant::Utf8(value)) => Ok(value.as_str()),
            _ => Err(VerifyError::BadReference {
                from: from(),
                index,
                expected: "Utf8",
            }),
        }
    }

    fn class_ref(&self, from: impl FnOnce() -> String, index: u16) -> Result<(), VerifyError> {
        self.expect(from, index, "Class", |c| matches!(c, Constant::Class { .. }))
            .map(|_| ())
    }

    fn field_descriptor(&self, from: &str, descriptor: &str) -> Result<(), VerifyError> {
        parse_field_descriptor(descriptor)
            .map(|_| ())
            .map_err(|source| VerifyError::BadDescriptor {
                from: from.to_string(),
                source,
            })
    }

    /// `receiver` counts `this` toward the parameter slot limit
    fn method_descriptor(&self, from: &str, descriptor: &str, receiver: bool) -> Result<(), VerifyError> {
        parse_method_descriptor(descriptor)
            .and_then(|method| method.argument_slots(receiver))
            .map(|_| ())
            .map_err(|source| VerifyError::BadDescriptor {
                from: from.to_string(),
                source,
            })
    }

    /// Name and descriptor behind a NameAndType index
    fn name_and_type(&self, from: &str, index: u16) -> Result<(&'a str, &'a str), VerifyError> {
        match self.pool.get(index) {
            Some(Constant::NameAndType {
                name_index,
                descriptor_index,
            }) => {
                let label = format!("#{}", index);
                let name = self.utf8(|| label.clone(), *name_index)?;
                let descriptor = self.utf8(|| label, *descriptor_index)?;
                Ok((name, descriptor))
            }
            _ => Err(VerifyError::BadReference {
                from: from.to_string(),
                index,
                expected: "NameAndType",
            }),
        }
    }

    // ===== Constant pool =====

    fn verify_pool(&self) -> Result<(), VerifyError> {
        for (index, constant) in self.pool.iter() {
            let from = format!("#{}", index);
            match *constant {
                Constant::Utf8(_)
                | Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_) => {}
                Constant::Class { name_index }
                | Constant::Module { name_index }
                | Constant::Package { name_index } => {
                    self.utf8(|| from.clone(), name_index)?;
                }
                Constant::String { string_index } => {
                    self.utf8(|| from.clone(), string_index)?;
                }
                Constant::Fieldref {
                    class_index,
                    name_and_type_index,
                } => {
                    self.class_ref(|| from.clone(), class_index)?;
                    let (_, descriptor) = self.name_and_type(&from, name_and_type_index)?;
                    self.field_descriptor(&from, descriptor)?;
                }
                Constant::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | Constant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    self.class_ref(|| from.clone(), class_index)?;
                    let (name, descriptor) = self.name_and_type(&from, name_and_type_index)?;
                    self.method_descriptor(&from, descriptor, false)?;
                    if !is_valid_method_name(name) {
                        return Err(VerifyError::BadName(name.to_string()));
                    }
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    self.utf8(|| from.clone(), name_index)?;
                    self.utf8(|| from.clone(), descriptor_index)?;
                }
                Constant::MethodHandle {
                    kind,
                    reference_index,
                } => self.verify_method_handle(index, kind, reference_index)?,
                Constant::MethodType { descriptor_index } => {
                    let descriptor = self.utf8(|| from.clone(), descriptor_index)?;
                    self.method_descriptor(&from, descriptor, false)?;
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    self.verify_bootstrap_index(index, bootstrap_method_attr_index)?;
                    let (_, descriptor) = self.name_and_type(&from, name_and_type_index)?;
                    self.field_descriptor(&from, descriptor)?;
                }
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    self.verify_bootstrap_index(index, bootstrap_method_attr_index)?;
                    let (_, descriptor) = self.name_and_type(&from, name_and_type_index)?;
                    self.method_descriptor(&from, descriptor, false)?;
                }
            }
        }
        Ok(())
    }

    fn verify_bootstrap_index(&self, index: u16, bootstrap: u16) -> Result<(), VerifyError> {
        if bootstrap as usize >= self.bootstrap_len {
            return Err(VerifyError::BootstrapOutOfRange {
                index,
                bootstrap,
                len: self.bootstrap_len,
            });
        }
        Ok(())
    }

    fn verify_method_handle(
        &self,
        index: u16,
        kind: ReferenceKind,
        reference_index: u16,
    ) -> Result<(), VerifyError> {
        let bad = |reason| VerifyError::BadMethodHandle { index, reason };
        let target = self.pool.get(reference_index).ok_or(bad("target index is unusable"))?;
        let interface_allowed = self.class.major_version >= 52;
        let fits = match (kind, target) {
            (k, Constant::Fieldref { .. }) => k.is_field(),
            (ReferenceKind::InvokeVirtual | ReferenceKind::NewInvokeSpecial, Constant::Methodref { .. }) => true,
            (ReferenceKind::InvokeStatic | ReferenceKind::InvokeSpecial, Constant::Methodref { .. }) => true,
            (ReferenceKind::InvokeStatic | ReferenceKind::InvokeSpecial, Constant::InterfaceMethodref { .. }) => {
                interface_allowed
            }
            (ReferenceKind::InvokeInterface, Constant::InterfaceMethodref { .. }) => true,
            _ => false,
        };
        if !fits {
            return Err(bad("reference kind does not match the target entry"));
        }
        if let Some((_, name, _)) = self.pool.member_ref(reference_index) {
            let is_init = name == "<init>";
            if kind == ReferenceKind::NewInvokeSpecial && !is_init {
                return Err(bad("REF_newInvokeSpecial must target <init>"));
            }
            if kind != ReferenceKind::NewInvokeSpecial && (is_init || name == "<clinit>") {
                return Err(bad("only REF_newInvokeSpecial may target an initializer"));
            }
        }
        Ok(())
    }

    // ===== Class structure =====

    fn verify_header(&self) -> Result<(), VerifyError> {
        self.class_ref(|| "this_class".to_string(), self.class.this_class)?;
        if self.class.super_class != 0 {
            self.class_ref(|| "super_class".to_string(), self.class.super_class)?;
        }
        for &interface in &self.class.interfaces {
            self.class_ref(|| "interfaces".to_string(), interface)?;
        }
        for attribute in &self.class.attributes {
            self.utf8(|| "class attribute".to_string(), attribute.name_index)?;
        }
        Ok(())
    }

    fn verify_members(&self) -> Result<(), VerifyError> {
        for field in &self.class.fields {
            let name = self.utf8(|| "field name".to_string(), field.name_index)?;
            let descriptor = self.utf8(|| format!("field {}", name), field.descriptor_index)?;
            self.field_descriptor(name, descriptor)?;
            for attribute in &field.attributes {
                self.utf8(|| format!("attribute of field {}", name), attribute.name_index)?;
            }
        }
        for (index, method) in self.class.methods.iter().enumerate() {
            let name = self.utf8(|| "method name".to_string(), method.name_index)?;
            if !is_valid_method_name(name) {
                return Err(VerifyError::BadName(name.to_string()));
            }
            let descriptor = self.utf8(|| format!("method {}", name), method.descriptor_index)?;
            let label = format!("{}{}", name, descriptor);
            let receiver = method.access_flags & access::STATIC == 0;
            self.method_descriptor(&label, descriptor, receiver)?;
            for attribute in &method.attributes {
                self.utf8(|| format!("attribute of {}", label), attribute.name_index)?;
            }
            if method.attribute(self.pool, attr::CODE).is_some() {
                let code = self.class.code(index)?;
                self.verify_code(&label, &code)?;
            }
        }
        Ok(())
    }

    // ===== Code =====

    fn verify_code(&self, method: &str, code: &CodeAttribute) -> Result<(), VerifyError> {
        if code.code.is_empty() || code.code.len() > MAX_CODE_LENGTH {
            return Err(VerifyError::CodeLength {
                method: method.to_string(),
                length: code.code.len(),
            });
        }

        let mut boundaries = FxHashSet::default();
        let mut branches = Vec::new();
        for instruction in code.instructions() {
            let instruction = instruction.map_err(|source| VerifyError::Decode {
                method: method.to_string(),
                source,
            })?;
            boundaries.insert(instruction.offset);
            if let Some(target) = instruction.branch_target() {
                branches.push((instruction.offset, target));
            }
            if let Some(index) = instruction.pool_index() {
                self.verify_operand(method, instruction.offset, instruction.opcode, index)?;
            }
        }

        for (offset, target) in branches {
            if target < 0 || !boundaries.contains(&(target as usize)) {
                return Err(VerifyError::BadBranchTarget {
                    method: method.to_string(),
                    offset,
                    target,
                });
            }
        }

        for entry in &code.exception_table {
            let end_ok = entry.end_pc as usize == code.code.len()
                || boundaries.contains(&(entry.end_pc as usize));
            if entry.start_pc >= entry.end_pc
                || !boundaries.contains(&(entry.start_pc as usize))
                || !boundaries.contains(&(entry.handler_pc as usize))
                || !end_ok
            {
                return Err(VerifyError::BadExceptionRange {
                    method: method.to_string(),
                    start: entry.start_pc,
                    end: entry.end_pc,
                    handler: entry.handler_pc,
                });
            }
            if entry.catch_type != 0 {
                self.class_ref(|| format!("exception table of {}", method), entry.catch_type)?;
            }
        }

        for attribute in &code.attributes {
            self.utf8(|| format!("code attribute of {}", method), attribute.name_index)?;
        }
        Ok(())
    }

    fn verify_operand(
        &self,
        method: &str,
        offset: usize,
        opcode: Opcode,
        index: u16,
    ) -> Result<(), VerifyError> {
        let constant = self.pool.get(index);
        let (expected, ok) = match opcode {
            Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield => (
                "Fieldref",
                matches!(constant, Some(Constant::Fieldref { .. })),
            ),
            Opcode::Invokevirtual => (
                "Methodref",
                matches!(constant, Some(Constant::Methodref { .. })),
            ),
            Opcode::Invokespecial | Opcode::Invokestatic => (
                "Methodref or InterfaceMethodref",
                matches!(
                    constant,
                    Some(Constant::Methodref { .. } | Constant::InterfaceMethodref { .. })
                ),
            ),
            Opcode::Invokeinterface => (
                "InterfaceMethodref",
                matches!(constant, Some(Constant::InterfaceMethodref { .. })),
            ),
            Opcode::Invokedynamic => (
                "InvokeDynamic",
                matches!(constant, Some(Constant::InvokeDynamic { .. })),
            ),
            Opcode::New
            | Opcode::Anewarray
            | Opcode::Checkcast
            | Opcode::Instanceof
            | Opcode::Multianewarray => ("Class", matches!(constant, Some(Constant::Class { .. }))),
            Opcode::Ldc | Opcode::LdcW => (
                "single-slot loadable constant",
                constant.map_or(false, |c| is_loadable(c) && c.width() == 1),
            ),
            Opcode::Ldc2W => (
                "Long or Double",
                matches!(constant, Some(Constant::Long(_) | Constant::Double(_))),
            ),
            _ => return Ok(()),
        };
        if ok {
            return Ok(());
        }
        Err(VerifyError::BadOperand {
            method: method.to_string(),
            offset,
            opcode: opcode.mnemonic(),
            index,
            expected,
        })
    }

    // ===== Bootstrap methods =====

    fn verify_bootstrap_methods(&self) -> Result<(), VerifyError> {
        for (position, method) in self.class.bootstrap_methods()?.iter().enumerate() {
            let from = || format!("bootstrap method {}", position);
            self.expect(from, method.method_ref, "MethodHandle", |c| {
                matches!(c, Constant::MethodHandle { .. })
            })?;
            for &argument in &method.arguments {
                self.expect(from, argument, "loadable constant", is_loadable)?;
            }
        }
        Ok(())
    }
}

/// Check the structural consistency of a class file
pub fn verify_class(class: &ClassFile) -> Result<(), VerifyError> {
    let bootstrap_len = class.bootstrap_methods()?.len();
    let verifier = Verifier {
        class,
        pool: &class.constant_pool,
        bootstrap_len,
    };
    verifier.verify_pool()?;
    verifier.verify_header()?;
    verifier.verify_members()?;
    verifier.verify_bootstrap_methods()?;
    log::trace!(
        "verified {} ({} methods)",
        class.name().unwrap_or("?"),
        class.methods.len()
    );
    Ok(())
}
