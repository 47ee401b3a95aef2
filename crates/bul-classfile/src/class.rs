//! Class file model (JVMS 4.1)
//!
//! Attributes are kept as raw bytes. The few the insertion engine touches
//! (`Code`, `BootstrapMethods` and the two class annotation tables) are
//! parsed on demand and written back through [`ClassFile::set_code`] and
//! [`ClassFile::set_bootstrap_methods`]. Everything else round-trips
//! untouched.

use crate::constants::{ConstantPool, PoolError};
use crate::encoder::{ClassReader, ClassWriter, DecodeError};
use crate::opcode::Instructions;
use thiserror::Error;

/// Magic number at the start of every class file
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Major version used for classes built with [`ClassFile::new`] (Java 8)
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// Largest code array a `Code` attribute may hold
pub const MAX_CODE_LENGTH: usize = 65535;

/// Well-known attribute names
pub mod attr {
    #![allow(missing_docs)]
    pub const CODE: &str = "Code";
    pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";
    pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
    pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
}

/// Access flags
pub mod access {
    /// Declared public
    pub const PUBLIC: u16 = 0x0001;
    /// Declared private
    pub const PRIVATE: u16 = 0x0002;
    /// Declared protected
    pub const PROTECTED: u16 = 0x0004;
    /// Declared static
    pub const STATIC: u16 = 0x0008;
    /// Declared final
    pub const FINAL: u16 = 0x0010;
    /// Class: treat superclass methods specially. Method: synchronized.
    pub const SUPER: u16 = 0x0020;
    /// Method is synchronized
    pub const SYNCHRONIZED: u16 = 0x0020;
    /// Field is volatile
    pub const VOLATILE: u16 = 0x0040;
    /// Method is a bridge
    pub const BRIDGE: u16 = 0x0040;
    /// Field is transient
    pub const TRANSIENT: u16 = 0x0080;
    /// Method takes varargs
    pub const VARARGS: u16 = 0x0080;
    /// Method is native
    pub const NATIVE: u16 = 0x0100;
    /// Class is an interface
    pub const INTERFACE: u16 = 0x0200;
    /// Declared abstract
    pub const ABSTRACT: u16 = 0x0400;
    /// Method uses strict floating point
    pub const STRICT: u16 = 0x0800;
    /// Not present in source
    pub const SYNTHETIC: u16 = 0x1000;
    /// Annotation interface
    pub const ANNOTATION: u16 = 0x2000;
    /// Enum class or constant
    pub const ENUM: u16 = 0x4000;
    /// Module descriptor
    pub const MODULE: u16 = 0x8000;
}

/// Class file errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassFileError {
    /// Byte-level decode failure
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The file does not start with 0xCAFEBABE
    #[error("Invalid magic number: expected 0xcafebabe, got {0:#010x}")]
    InvalidMagic(u32),

    /// The constant pool is full
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A pool index does not point at the expected kind of entry
    #[error("Constant pool index {index} is not a valid {expected} entry")]
    BadIndex {
        /// Offending index
        index: u16,
        /// Expected entry kind
        expected: &'static str,
    },

    /// A method index is out of range
    #[error("No method at index {0}")]
    NoSuchMethod(usize),

    /// A required attribute is absent
    #[error("Method {method} has no {name} attribute")]
    MissingAttribute {
        /// `name descriptor` of the method
        method: String,
        /// Attribute name
        name: &'static str,
    },

    /// Unknown annotation element value tag
    #[error("Invalid annotation element tag {0:#04x}")]
    InvalidElementTag(u8),
}

// ===== Attributes =====

/// A raw attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Utf8 index of the attribute name
    pub name_index: u16,
    /// Attribute body
    pub info: Vec<u8>,
}

impl Attribute {
    /// Resolve the attribute name
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Option<&'p str> {
        pool.get_utf8(self.name_index)
    }

    fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_u16(self.name_index);
        writer.emit_u32(self.info.len() as u32);
        writer.emit_bytes(&self.info);
    }

    fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        let name_index = reader.read_u16()?;
        let len = reader.read_u32()? as usize;
        let info = reader.read_bytes(len)?;
        Ok(Self { name_index, info })
    }
}

fn encode_attributes(attributes: &[Attribute], writer: &mut ClassWriter) {
    writer.emit_u16(attributes.len() as u16);
    for attribute in attributes {
        attribute.encode(writer);
    }
}

fn decode_attributes(reader: &mut ClassReader<'_>) -> Result<Vec<Attribute>, DecodeError> {
    let count = reader.read_u16()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        attributes.push(Attribute::decode(reader)?);
    }
    Ok(attributes)
}

fn find_attribute<'a>(
    attributes: &'a [Attribute],
    pool: &ConstantPool,
    name: &str,
) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.name(pool) == Some(name))
}

/// Replace the attribute called `name`, or append one
fn put_attribute(
    attributes: &mut Vec<Attribute>,
    pool: &mut ConstantPool,
    name: &str,
    info: Vec<u8>,
) -> Result<(), PoolError> {
    if let Some(existing) = attributes.iter_mut().find(|a| pool.get_utf8(a.name_index) == Some(name)) {
        existing.info = info;
        return Ok(());
    }
    let name_index = pool.utf8(name)?;
    attributes.push(Attribute { name_index, info });
    Ok(())
}

fn check_consumed(name: &str, reader: &ClassReader<'_>, declared: usize) -> Result<(), DecodeError> {
    if reader.position() != declared {
        return Err(DecodeError::AttributeLength {
            name: name.to_string(),
            declared,
            actual: reader.position(),
        });
    }
    Ok(())
}

// ===== Code =====

/// An exception table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// Start of the protected range (inclusive)
    pub start_pc: u16,
    /// End of the protected range (exclusive)
    pub end_pc: u16,
    /// Handler offset
    pub handler_pc: u16,
    /// Class index of the caught type, 0 for any
    pub catch_type: u16,
}

/// Parsed `Code` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth in slots
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// Instruction bytes
    pub code: Vec<u8>,
    /// Exception handlers
    pub exception_table: Vec<ExceptionEntry>,
    /// Nested attributes (line numbers, stack maps, ...)
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    /// Create a code attribute with no handlers and no nested attributes
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Iterate over the instructions in the code array
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions::new(&self.code)
    }

    /// Parse the body of a `Code` attribute
    pub fn parse(info: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ClassReader::new(info);
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;
        let handler_count = reader.read_u16()? as usize;
        let mut exception_table = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            exception_table.push(ExceptionEntry {
                start_pc: reader.read_u16()?,
                end_pc: reader.read_u16()?,
                handler_pc: reader.read_u16()?,
                catch_type: reader.read_u16()?,
            });
        }
        let attributes = decode_attributes(&mut reader)?;
        check_consumed(attr::CODE, &reader, info.len())?;
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Encode the body of a `Code` attribute
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ClassWriter::with_capacity(self.code.len() + 16);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);
        writer.emit_u32(self.code.len() as u32);
        writer.emit_bytes(&self.code);
        writer.emit_u16(self.exception_table.len() as u16);
        for entry in &self.exception_table {
            writer.emit_u16(entry.start_pc);
            writer.emit_u16(entry.end_pc);
            writer.emit_u16(entry.handler_pc);
            writer.emit_u16(entry.catch_type);
        }
        encode_attributes(&self.attributes, &mut writer);
        writer.into_bytes()
    }
}

// ===== Bootstrap methods =====

/// One entry of the `BootstrapMethods` attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapMethod {
    /// MethodHandle index of the bootstrap routine
    pub method_ref: u16,
    /// Loadable constant indices passed as static arguments
    pub arguments: Vec<u16>,
}

/// Parse the body of a `BootstrapMethods` attribute
pub fn parse_bootstrap_methods(info: &[u8]) -> Result<Vec<BootstrapMethod>, DecodeError> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u16()? as usize;
    let mut methods = Vec::with_capacity(count);
    for _ in 0..count {
        let method_ref = reader.read_u16()?;
        let arg_count = reader.read_u16()? as usize;
        let mut arguments = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            arguments.push(reader.read_u16()?);
        }
        methods.push(BootstrapMethod {
            method_ref,
            arguments,
        });
    }
    check_consumed(attr::BOOTSTRAP_METHODS, &reader, info.len())?;
    Ok(methods)
}

/// Encode the body of a `BootstrapMethods` attribute
pub fn encode_bootstrap_methods(methods: &[BootstrapMethod]) -> Vec<u8> {
    let mut writer = ClassWriter::new();
    writer.emit_u16(methods.len() as u16);
    for method in methods {
        writer.emit_u16(method.method_ref);
        writer.emit_u16(method.arguments.len() as u16);
        for &arg in &method.arguments {
            writer.emit_u16(arg);
        }
    }
    writer.into_bytes()
}

// ===== Annotations =====

/// An annotation element value (JVMS 4.7.16.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    /// Primitive or string constant; `tag` is one of `BCDFIJSZs`
    Const {
        /// Tag byte
        tag: u8,
        /// Pool index of the value
        index: u16,
    },
    /// Enum constant
    Enum {
        /// Utf8 index of the enum type descriptor
        type_name_index: u16,
        /// Utf8 index of the constant name
        const_name_index: u16,
    },
    /// Class literal
    Class(u16),
    /// Nested annotation
    Annotation(Box<Annotation>),
    /// Array of values
    Array(Vec<ElementValue>),
}

/// A class annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Field descriptor of the annotation type, e.g. `Lru/DmN/bul/BytecodeProcessor;`
    pub descriptor: String,
    /// From `RuntimeVisibleAnnotations` rather than the invisible table
    pub visible: bool,
    /// Element name index and value pairs
    pub elements: Vec<(u16, ElementValue)>,
}

fn parse_annotation(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    visible: bool,
) -> Result<Annotation, ClassFileError> {
    let type_index = reader.read_u16()?;
    let descriptor = pool
        .get_utf8(type_index)
        .ok_or(ClassFileError::BadIndex {
            index: type_index,
            expected: "Utf8",
        })?
        .to_string();
    let pair_count = reader.read_u16()? as usize;
    let mut elements = Vec::with_capacity(pair_count);
    for _ in 0..pair_count {
        let name_index = reader.read_u16()?;
        elements.push((name_index, parse_element_value(reader, pool, visible)?));
    }
    Ok(Annotation {
        descriptor,
        visible,
        elements,
    })
}

fn parse_element_value(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    visible: bool,
) -> Result<ElementValue, ClassFileError> {
    let tag = reader.read_u8()?;
    Ok(match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => ElementValue::Const {
            tag,
            index: reader.read_u16()?,
        },
        b'e' => ElementValue::Enum {
            type_name_index: reader.read_u16()?,
            const_name_index: reader.read_u16()?,
        },
        b'c' => ElementValue::Class(reader.read_u16()?),
        b'@' => ElementValue::Annotation(Box::new(parse_annotation(reader, pool, visible)?)),
        b'[' => {
            let count = reader.read_u16()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(parse_element_value(reader, pool, visible)?);
            }
            ElementValue::Array(values)
        }
        other => return Err(ClassFileError::InvalidElementTag(other)),
    })
}

/// Parse the body of a `Runtime(In)VisibleAnnotations` attribute
pub fn parse_annotations(
    info: &[u8],
    pool: &ConstantPool,
    visible: bool,
) -> Result<Vec<Annotation>, ClassFileError> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u16()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(parse_annotation(&mut reader, pool, visible)?);
    }
    let name = if visible {
        attr::RUNTIME_VISIBLE_ANNOTATIONS
    } else {
        attr::RUNTIME_INVISIBLE_ANNOTATIONS
    };
    check_consumed(name, &reader, info.len())?;
    Ok(annotations)
}

// ===== Members =====

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Access flags
    pub access_flags: u16,
    /// Utf8 index of the name
    pub name_index: u16,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Member attributes
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    /// Resolve the member name
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Option<&'p str> {
        pool.get_utf8(self.name_index)
    }

    /// Resolve the member descriptor
    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Option<&'p str> {
        pool.get_utf8(self.descriptor_index)
    }

    /// Find an attribute by name
    pub fn attribute(&self, pool: &ConstantPool, name: &str) -> Option<&Attribute> {
        find_attribute(&self.attributes, pool, name)
    }

    /// Check the static flag
    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }

    fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_u16(self.access_flags);
        writer.emit_u16(self.name_index);
        writer.emit_u16(self.descriptor_index);
        encode_attributes(&self.attributes, writer);
    }

    fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            access_flags: reader.read_u16()?,
            name_index: reader.read_u16()?,
            descriptor_index: reader.read_u16()?,
            attributes: decode_attributes(reader)?,
        })
    }
}

// ===== Class file =====

/// A decoded class file
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: u16,
    /// Class index of this class
    pub this_class: u16,
    /// Class index of the superclass, 0 for `java/lang/Object` itself
    pub super_class: u16,
    /// Class indices of direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Fields
    pub fields: Vec<MemberInfo>,
    /// Methods
    pub methods: Vec<MemberInfo>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Create an empty public class
    pub fn new(name: &str, super_name: Option<&str>) -> Result<Self, ClassFileError> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.class(name)?;
        let super_class = match super_name {
            Some(super_name) => constant_pool.class(super_name)?,
            None => 0,
        };
        Ok(Self {
            minor_version: 0,
            major_version: DEFAULT_MAJOR_VERSION,
            constant_pool,
            access_flags: access::PUBLIC | access::SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Decode a class file
    pub fn decode(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = ClassReader::new(bytes);
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        let constant_pool = ConstantPool::decode(&mut reader)?;
        let access_flags = reader.read_u16()?;
        let this_class = reader.read_u16()?;
        let super_class = reader.read_u16()?;

        let interface_count = reader.read_u16()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(reader.read_u16()?);
        }

        let field_count = reader.read_u16()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(MemberInfo::decode(&mut reader)?);
        }

        let method_count = reader.read_u16()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(MemberInfo::decode(&mut reader)?);
        }

        let attributes = decode_attributes(&mut reader)?;
        if reader.has_more() {
            return Err(DecodeError::TrailingBytes(reader.remaining()).into());
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Encode to class file bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ClassWriter::with_capacity(1024);
        writer.emit_u32(MAGIC);
        writer.emit_u16(self.minor_version);
        writer.emit_u16(self.major_version);
        self.constant_pool.encode(&mut writer);
        writer.emit_u16(self.access_flags);
        writer.emit_u16(self.this_class);
        writer.emit_u16(self.super_class);

        writer.emit_u16(self.interfaces.len() as u16);
        for &interface in &self.interfaces {
            writer.emit_u16(interface);
        }

        writer.emit_u16(self.fields.len() as u16);
        for field in &self.fields {
            field.encode(&mut writer);
        }

        writer.emit_u16(self.methods.len() as u16);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        encode_attributes(&self.attributes, &mut writer);
        writer.into_bytes()
    }

    /// Internal name of this class
    pub fn name(&self) -> Option<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass
    pub fn super_name(&self) -> Option<&str> {
        self.constant_pool.class_name(self.super_class)
    }

    /// Check the interface flag
    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }

    // ===== Builders =====

    /// Add a method and return its index
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Option<CodeAttribute>,
    ) -> Result<usize, ClassFileError> {
        let name_index = self.constant_pool.utf8(name)?;
        let descriptor_index = self.constant_pool.utf8(descriptor)?;
        let mut attributes = Vec::new();
        if let Some(code) = code {
            attributes.push(Attribute {
                name_index: self.constant_pool.utf8(attr::CODE)?,
                info: code.encode(),
            });
        }
        self.methods.push(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(self.methods.len() - 1)
    }

    /// Add a field and return its index
    pub fn add_field(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<usize, ClassFileError> {
        let name_index = self.constant_pool.utf8(name)?;
        let descriptor_index = self.constant_pool.utf8(descriptor)?;
        self.fields.push(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        Ok(self.fields.len() - 1)
    }

    /// Add an element-less class annotation to the visible or invisible table
    pub fn add_annotation(&mut self, descriptor: &str, visible: bool) -> Result<(), ClassFileError> {
        let name = if visible {
            attr::RUNTIME_VISIBLE_ANNOTATIONS
        } else {
            attr::RUNTIME_INVISIBLE_ANNOTATIONS
        };
        let type_index = self.constant_pool.utf8(descriptor)?;
        let position = self
            .attributes
            .iter()
            .position(|a| a.name(&self.constant_pool) == Some(name));
        match position {
            Some(position) => {
                let info = &mut self.attributes[position].info;
                let count = ClassReader::new(&info[..]).read_u16()?;
                info[0..2].copy_from_slice(&count.wrapping_add(1).to_be_bytes());
                info.extend_from_slice(&type_index.to_be_bytes());
                info.extend_from_slice(&0u16.to_be_bytes());
            }
            None => {
                let mut writer = ClassWriter::new();
                writer.emit_u16(1);
                writer.emit_u16(type_index);
                writer.emit_u16(0);
                self.attributes.push(Attribute {
                    name_index: self.constant_pool.utf8(name)?,
                    info: writer.into_bytes(),
                });
            }
        }
        Ok(())
    }

    // ===== Queries =====

    /// Index of the first method with this name (and descriptor, if given)
    pub fn find_method(&self, name: &str, descriptor: Option<&str>) -> Option<usize> {
        self.methods.iter().position(|m| {
            m.name(&self.constant_pool) == Some(name)
                && descriptor.map_or(true, |d| m.descriptor(&self.constant_pool) == Some(d))
        })
    }

    /// Name of the method at `index`
    pub fn method_name(&self, index: usize) -> Option<&str> {
        self.methods.get(index)?.name(&self.constant_pool)
    }

    /// Descriptor of the method at `index`
    pub fn method_descriptor(&self, index: usize) -> Option<&str> {
        self.methods.get(index)?.descriptor(&self.constant_pool)
    }

    fn method_label(&self, index: usize) -> String {
        format!(
            "{}{}",
            self.method_name(index).unwrap_or("?"),
            self.method_descriptor(index).unwrap_or("?")
        )
    }

    /// Parse the `Code` attribute of the method at `index`
    pub fn code(&self, index: usize) -> Result<CodeAttribute, ClassFileError> {
        let method = self
            .methods
            .get(index)
            .ok_or(ClassFileError::NoSuchMethod(index))?;
        let attribute = method
            .attribute(&self.constant_pool, attr::CODE)
            .ok_or_else(|| ClassFileError::MissingAttribute {
                method: self.method_label(index),
                name: attr::CODE,
            })?;
        Ok(CodeAttribute::parse(&attribute.info)?)
    }

    /// Replace (or add) the `Code` attribute of the method at `index`
    pub fn set_code(&mut self, index: usize, code: &CodeAttribute) -> Result<(), ClassFileError> {
        let method = self
            .methods
            .get_mut(index)
            .ok_or(ClassFileError::NoSuchMethod(index))?;
        put_attribute(
            &mut method.attributes,
            &mut self.constant_pool,
            attr::CODE,
            code.encode(),
        )?;
        Ok(())
    }

    /// Entries of the `BootstrapMethods` attribute (empty if absent)
    pub fn bootstrap_methods(&self) -> Result<Vec<BootstrapMethod>, ClassFileError> {
        match find_attribute(&self.attributes, &self.constant_pool, attr::BOOTSTRAP_METHODS) {
            Some(attribute) => Ok(parse_bootstrap_methods(&attribute.info)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the `BootstrapMethods` attribute; an empty table removes it
    pub fn set_bootstrap_methods(&mut self, methods: &[BootstrapMethod]) -> Result<(), ClassFileError> {
        if methods.is_empty() {
            let pool = &self.constant_pool;
            self.attributes
                .retain(|a| a.name(pool) != Some(attr::BOOTSTRAP_METHODS));
            return Ok(());
        }
        put_attribute(
            &mut self.attributes,
            &mut self.constant_pool,
            attr::BOOTSTRAP_METHODS,
            encode_bootstrap_methods(methods),
        )?;
        Ok(())
    }

    /// Class annotations from both annotation tables, visible first
    pub fn annotations(&self) -> Result<Vec<Annotation>, ClassFileError> {
        let mut annotations = Vec::new();
        for (name, visible) in [
            (attr::RUNTIME_VISIBLE_ANNOTATIONS, true),
            (attr::RUNTIME_INVISIBLE_ANNOTATIONS, false),
        ] {
            if let Some(attribute) = find_attribute(&self.attributes, &self.constant_pool, name) {
                annotations.extend(parse_annotations(&attribute.info, &self.constant_pool, visible)?);
            }
        }
        Ok(annotations)
    }

    /// Check for a class annotation with this descriptor
    pub fn has_annotation(&self, descriptor: &str) -> Result<bool, ClassFileError> {
        Ok(self.annotations()?.iter().any(|a| a.descriptor == descriptor))
    }

    /// Find a class attribute by name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        find_attribute(&self.attributes, &self.constant_pool, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn sample() -> ClassFile {
        let mut class = ClassFile::new("ru/DmN/bul/Test", Some("java/lang/Object")).unwrap();
        class
            .add_method(
                access::PUBLIC | access::STATIC,
                "test",
                "()V",
                Some(CodeAttribute::new(0, 0, vec![Opcode::Return.to_u8()])),
            )
            .unwrap();
        class
            .add_method(access::PUBLIC | access::ABSTRACT, "run", "(I)V", None)
            .unwrap();
        class
    }

    #[test]
    fn test_new_class() {
        let class = sample();
        assert_eq!(class.name(), Some("ru/DmN/bul/Test"));
        assert_eq!(class.super_name(), Some("java/lang/Object"));
        assert_eq!(class.major_version, DEFAULT_MAJOR_VERSION);
    }

    #[test]
    fn test_encode_decode() {
        let mut class = sample();
        class.add_field(access::PRIVATE, "count", "I").unwrap();
        class.add_annotation("Lru/DmN/bul/BytecodeProcessor;", false).unwrap();
        let bytes = class.encode();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        let decoded = ClassFile::decode(&bytes).unwrap();
        assert_eq!(decoded.name(), Some("ru/DmN/bul/Test"));
        assert_eq!(decoded.methods, class.methods);
        assert_eq!(decoded.fields, class.fields);
        assert_eq!(decoded.attributes, class.attributes);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_find_method() {
        let class = sample();
        assert_eq!(class.find_method("test", None), Some(0));
        assert_eq!(class.find_method("run", Some("(I)V")), Some(1));
        assert_eq!(class.find_method("run", Some("()V")), None);
        assert_eq!(class.method_descriptor(1), Some("(I)V"));
    }

    #[test]
    fn test_code_access() {
        let mut class = sample();
        let mut code = class.code(0).unwrap();
        assert_eq!(code.code, vec![0xB1]);
        code.code.insert(0, Opcode::Nop.to_u8());
        code.max_stack = 3;
        class.set_code(0, &code).unwrap();
        assert_eq!(class.code(0).unwrap(), code);
        assert!(matches!(
            class.code(1),
            Err(ClassFileError::MissingAttribute { name: "Code", .. })
        ));
        assert!(matches!(class.code(9), Err(ClassFileError::NoSuchMethod(9))));
    }

    #[test]
    fn test_code_attribute_with_handlers() {
        let mut code = CodeAttribute::new(2, 1, vec![0x00, 0x00, 0xB1]);
        code.exception_table.push(ExceptionEntry {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: 0,
        });
        code.attributes.push(Attribute {
            name_index: 7,
            info: vec![1, 2, 3],
        });
        assert_eq!(CodeAttribute::parse(&code.encode()).unwrap(), code);
    }

    #[test]
    fn test_code_attribute_length_mismatch() {
        let mut info = CodeAttribute::new(1, 1, vec![0xB1]).encode();
        info.push(0);
        assert!(matches!(
            CodeAttribute::parse(&info),
            Err(DecodeError::AttributeLength { .. })
        ));
    }

    #[test]
    fn test_bootstrap_methods() {
        let mut class = sample();
        assert!(class.bootstrap_methods().unwrap().is_empty());
        let table = vec![
            BootstrapMethod {
                method_ref: 3,
                arguments: vec![],
            },
            BootstrapMethod {
                method_ref: 4,
                arguments: vec![5, 6],
            },
        ];
        class.set_bootstrap_methods(&table).unwrap();
        assert_eq!(class.bootstrap_methods().unwrap(), table);
        class.set_bootstrap_methods(&table[..1]).unwrap();
        assert_eq!(class.bootstrap_methods().unwrap().len(), 1);
        assert_eq!(
            class
                .attributes
                .iter()
                .filter(|a| a.name(&class.constant_pool) == Some(attr::BOOTSTRAP_METHODS))
                .count(),
            1
        );
        class.set_bootstrap_methods(&[]).unwrap();
        assert!(class.attribute(attr::BOOTSTRAP_METHODS).is_none());
    }

    #[test]
    fn test_annotations() {
        let mut class = sample();
        assert!(!class.has_annotation("LMarker;").unwrap());
        class.add_annotation("LOther;", true).unwrap();
        class.add_annotation("LMarker;", false).unwrap();
        class.add_annotation("LThird;", false).unwrap();
        let annotations = class.annotations().unwrap();
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations[0].descriptor, "LOther;");
        assert!(annotations[0].visible);
        assert!(!annotations[1].visible);
        assert!(class.has_annotation("LMarker;").unwrap());
        assert!(class.has_annotation("LThird;").unwrap());
    }

    #[test]
    fn test_annotation_element_values() {
        let mut pool = ConstantPool::new();
        let ty = pool.utf8("LA;").unwrap();
        let nested = pool.utf8("LB;").unwrap();
        let value = pool.utf8("value").unwrap();
        let int = pool.integer(4).unwrap();

        let mut writer = ClassWriter::new();
        writer.emit_u16(1); // one annotation
        writer.emit_u16(ty);
        writer.emit_u16(2); // two pairs
        writer.emit_u16(value);
        writer.emit_u8(b'[');
        writer.emit_u16(2);
        writer.emit_u8(b'I');
        writer.emit_u16(int);
        writer.emit_u8(b'c');
        writer.emit_u16(ty);
        writer.emit_u16(value);
        writer.emit_u8(b'@');
        writer.emit_u16(nested);
        writer.emit_u16(0);

        let annotations = parse_annotations(writer.buffer(), &pool, true).unwrap();
        assert_eq!(annotations.len(), 1);
        let elements = &annotations[0].elements;
        assert_eq!(
            elements[0].1,
            ElementValue::Array(vec![
                ElementValue::Const { tag: b'I', index: int },
                ElementValue::Class(ty),
            ])
        );
        match &elements[1].1 {
            ElementValue::Annotation(inner) => assert_eq!(inner.descriptor, "LB;"),
            other => panic!("unexpected element {:?}", other),
        }
    }

    #[test]
    fn test_invalid_element_tag() {
        let mut pool = ConstantPool::new();
        let ty = pool.utf8("LA;").unwrap();
        let bytes = [0, 1, (ty >> 8) as u8, ty as u8, 0, 1, 0, 1, b'x', 0, 0];
        assert_eq!(
            parse_annotations(&bytes, &pool, false).unwrap_err(),
            ClassFileError::InvalidElementTag(b'x')
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            ClassFile::decode(&[0xDE, 0xAD, 0xBE, 0xEF]),
            Err(ClassFileError::InvalidMagic(0xDEADBEEF))
        ));
        assert!(matches!(
            ClassFile::decode(&[0xCA, 0xFE]),
            Err(ClassFileError::Decode(DecodeError::UnexpectedEnd(_)))
        ));

        let mut bytes = sample().encode();
        bytes.push(0);
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::Decode(DecodeError::TrailingBytes(1)))
        ));
    }
}
