//! Constant pool for class files
//!
//! Indices are 1-based. `Long` and `Double` entries occupy two slots; the
//! slot after them is unusable. The pool can hold at most [`MAX_POOL_INDEX`]
//! as its highest index because `constant_pool_count` is a u16.

use crate::encoder::{modified_utf8_len, ClassReader, ClassWriter, DecodeError};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Highest index a constant pool entry may occupy
pub const MAX_POOL_INDEX: u16 = 65534;

/// Longest Utf8 entry in bytes of modified UTF-8, bounded by its u16 length prefix
pub const MAX_UTF8_LENGTH: usize = u16::MAX as usize;

/// Constant pool tags (JVMS 4.4)
pub mod tags {
    #![allow(missing_docs)]
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// Constant pool errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Adding the entry would push an index past [`MAX_POOL_INDEX`]
    #[error("Constant pool is full ({count} slots in use, limit {MAX_POOL_INDEX})")]
    Full {
        /// Slots in use, including the unused slot 0
        count: usize,
    },

    /// A Utf8 entry does not fit its length prefix
    #[error("Utf8 constant of {length} bytes exceeds the {MAX_UTF8_LENGTH} byte limit")]
    Utf8TooLong {
        /// Encoded length in bytes
        length: usize,
    },
}

/// Method handle reference kind (JVMS 5.4.3.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ReferenceKind {
    /// `REF_getField`
    GetField = 1,
    /// `REF_getStatic`
    GetStatic = 2,
    /// `REF_putField`
    PutField = 3,
    /// `REF_putStatic`
    PutStatic = 4,
    /// `REF_invokeVirtual`
    InvokeVirtual = 5,
    /// `REF_invokeStatic`
    InvokeStatic = 6,
    /// `REF_invokeSpecial`
    InvokeSpecial = 7,
    /// `REF_newInvokeSpecial`
    NewInvokeSpecial = 8,
    /// `REF_invokeInterface`
    InvokeInterface = 9,
}

impl ReferenceKind {
    /// Convert from the raw kind byte
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::GetField,
            2 => Self::GetStatic,
            3 => Self::PutField,
            4 => Self::PutStatic,
            5 => Self::InvokeVirtual,
            6 => Self::InvokeStatic,
            7 => Self::InvokeSpecial,
            8 => Self::NewInvokeSpecial,
            9 => Self::InvokeInterface,
            _ => return None,
        })
    }

    /// Raw kind byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Kinds 1-4 refer to a `Fieldref`
    pub fn is_field(self) -> bool {
        self.to_u8() <= 4
    }

    /// Mnemonic as written in the JVMS
    pub fn name(self) -> &'static str {
        match self {
            Self::GetField => "REF_getField",
            Self::GetStatic => "REF_getStatic",
            Self::PutField => "REF_putField",
            Self::PutStatic => "REF_putStatic",
            Self::InvokeVirtual => "REF_invokeVirtual",
            Self::InvokeStatic => "REF_invokeStatic",
            Self::InvokeSpecial => "REF_invokeSpecial",
            Self::NewInvokeSpecial => "REF_newInvokeSpecial",
            Self::InvokeInterface => "REF_invokeInterface",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A constant pool entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tag", content = "value", rename_all = "snake_case")]
pub enum Constant {
    /// `CONSTANT_Utf8`
    Utf8(String),
    /// `CONSTANT_Integer`
    Integer(i32),
    /// `CONSTANT_Float`
    Float(f32),
    /// `CONSTANT_Long` (two slots)
    Long(i64),
    /// `CONSTANT_Double` (two slots)
    Double(f64),
    /// `CONSTANT_Class`
    Class {
        /// Utf8 index of the internal name
        name_index: u16,
    },
    /// `CONSTANT_String`
    String {
        /// Utf8 index of the contents
        string_index: u16,
    },
    /// `CONSTANT_Fieldref`
    Fieldref {
        /// Class index of the owner
        class_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// `CONSTANT_Methodref`
    Methodref {
        /// Class index of the owner
        class_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethodref {
        /// Class index of the owner
        class_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// `CONSTANT_NameAndType`
    NameAndType {
        /// Utf8 index of the member name
        name_index: u16,
        /// Utf8 index of the descriptor
        descriptor_index: u16,
    },
    /// `CONSTANT_MethodHandle`
    MethodHandle {
        /// Reference kind
        kind: ReferenceKind,
        /// Index of the referenced member entry
        reference_index: u16,
    },
    /// `CONSTANT_MethodType`
    MethodType {
        /// Utf8 index of the method descriptor
        descriptor_index: u16,
    },
    /// `CONSTANT_Dynamic`
    Dynamic {
        /// Index into the BootstrapMethods attribute
        bootstrap_method_attr_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// `CONSTANT_InvokeDynamic`
    InvokeDynamic {
        /// Index into the BootstrapMethods attribute
        bootstrap_method_attr_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// `CONSTANT_Module`
    Module {
        /// Utf8 index of the module name
        name_index: u16,
    },
    /// `CONSTANT_Package`
    Package {
        /// Utf8 index of the package name
        name_index: u16,
    },
}

impl Constant {
    /// Tag byte
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => tags::UTF8,
            Constant::Integer(_) => tags::INTEGER,
            Constant::Float(_) => tags::FLOAT,
            Constant::Long(_) => tags::LONG,
            Constant::Double(_) => tags::DOUBLE,
            Constant::Class { .. } => tags::CLASS,
            Constant::String { .. } => tags::STRING,
            Constant::Fieldref { .. } => tags::FIELDREF,
            Constant::Methodref { .. } => tags::METHODREF,
            Constant::InterfaceMethodref { .. } => tags::INTERFACE_METHODREF,
            Constant::NameAndType { .. } => tags::NAME_AND_TYPE,
            Constant::MethodHandle { .. } => tags::METHOD_HANDLE,
            Constant::MethodType { .. } => tags::METHOD_TYPE,
            Constant::Dynamic { .. } => tags::DYNAMIC,
            Constant::InvokeDynamic { .. } => tags::INVOKE_DYNAMIC,
            Constant::Module { .. } => tags::MODULE,
            Constant::Package { .. } => tags::PACKAGE,
        }
    }

    /// Number of pool slots this entry occupies
    pub fn width(&self) -> u16 {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    /// Human readable tag name, e.g. `Methodref`
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::Fieldref { .. } => "Fieldref",
            Constant::Methodref { .. } => "Methodref",
            Constant::InterfaceMethodref { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module { .. } => "Module",
            Constant::Package { .. } => "Package",
        }
    }

    /// Indices of other pool entries this entry refers to
    pub fn references(&self) -> Vec<u16> {
        match *self {
            Constant::Utf8(_)
            | Constant::Integer(_)
            | Constant::Float(_)
            | Constant::Long(_)
            | Constant::Double(_) => Vec::new(),
            Constant::Class { name_index }
            | Constant::Module { name_index }
            | Constant::Package { name_index } => vec![name_index],
            Constant::String { string_index } => vec![string_index],
            Constant::MethodType { descriptor_index } => vec![descriptor_index],
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => vec![class_index, name_and_type_index],
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => vec![name_index, descriptor_index],
            Constant::MethodHandle {
                reference_index, ..
            } => vec![reference_index],
            Constant::Dynamic {
                name_and_type_index,
                ..
            }
            | Constant::InvokeDynamic {
                name_and_type_index,
                ..
            } => vec![name_and_type_index],
        }
    }

    /// Encode the entry, tag included
    pub fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_u8(self.tag());
        match self {
            Constant::Utf8(value) => writer.emit_utf8(value),
            Constant::Integer(value) => writer.emit_i32(*value),
            Constant::Float(value) => writer.emit_f32(*value),
            Constant::Long(value) => writer.emit_i64(*value),
            Constant::Double(value) => writer.emit_f64(*value),
            Constant::Class { name_index }
            | Constant::Module { name_index }
            | Constant::Package { name_index } => writer.emit_u16(*name_index),
            Constant::String { string_index } => writer.emit_u16(*string_index),
            Constant::MethodType { descriptor_index } => writer.emit_u16(*descriptor_index),
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                writer.emit_u16(*class_index);
                writer.emit_u16(*name_and_type_index);
            }
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => {
                writer.emit_u16(*name_index);
                writer.emit_u16(*descriptor_index);
            }
            Constant::MethodHandle {
                kind,
                reference_index,
            } => {
                writer.emit_u8(kind.to_u8());
                writer.emit_u16(*reference_index);
            }
            Constant::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
            | Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                writer.emit_u16(*bootstrap_method_attr_index);
                writer.emit_u16(*name_and_type_index);
            }
        }
    }

    /// Decode one entry, tag included. `index` is only used for error reporting.
    pub fn decode(reader: &mut ClassReader<'_>, index: u16) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            tags::UTF8 => Constant::Utf8(reader.read_utf8()?),
            tags::INTEGER => Constant::Integer(reader.read_i32()?),
            tags::FLOAT => Constant::Float(reader.read_f32()?),
            tags::LONG => Constant::Long(reader.read_i64()?),
            tags::DOUBLE => Constant::Double(reader.read_f64()?),
            tags::CLASS => Constant::Class {
                name_index: reader.read_u16()?,
            },
            tags::STRING => Constant::String {
                string_index: reader.read_u16()?,
            },
            tags::FIELDREF => Constant::Fieldref {
                class_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?,
            },
            tags::METHODREF => Constant::Methodref {
                class_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?,
            },
            tags::INTERFACE_METHODREF => Constant::InterfaceMethodref {
                class_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?,
            },
            tags::NAME_AND_TYPE => Constant::NameAndType {
                name_index: reader.read_u16()?,
                descriptor_index: reader.read_u16()?,
            },
            tags::METHOD_HANDLE => {
                let raw = reader.read_u8()?;
                let kind = ReferenceKind::from_u8(raw)
                    .ok_or(DecodeError::UnknownConstantTag { tag, index })?;
                Constant::MethodHandle {
                    kind,
                    reference_index: reader.read_u16()?,
                }
            }
            tags::METHOD_TYPE => Constant::MethodType {
                descriptor_index: reader.read_u16()?,
            },
            tags::DYNAMIC => Constant::Dynamic {
                bootstrap_method_attr_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?,
            },
            tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_method_attr_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?,
            },
            tags::MODULE => Constant::Module {
                name_index: reader.read_u16()?,
            },
            tags::PACKAGE => Constant::Package {
                name_index: reader.read_u16()?,
            },
            other => return Err(DecodeError::UnknownConstantTag { tag: other, index }),
        })
    }

    /// Encoded bytes, used as the interning key
    fn key(&self) -> Vec<u8> {
        let mut writer = ClassWriter::new();
        self.encode(&mut writer);
        writer.into_bytes()
    }
}

/// A saved pool length that [`ConstantPool::rollback`] can return to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    len: usize,
}

/// Constant pool with interning
///
/// Slot 0 and the slot after each wide entry hold `None`.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Option<Constant>>,
    interned: FxHashMap<Vec<u8>, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self {
            entries: vec![None],
            interned: FxHashMap::default(),
        }
    }

    /// Value of `constant_pool_count`: one past the highest used slot
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Number of real entries (wide entries count once)
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Check if the pool has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.len() == 1
    }

    /// Slots still available before the pool is full
    pub fn remaining(&self) -> usize {
        (MAX_POOL_INDEX as usize + 1).saturating_sub(self.entries.len())
    }

    /// Append an entry without deduplication and return its index
    pub fn push(&mut self, constant: Constant) -> Result<u16, PoolError> {
        if let Constant::Utf8(value) = &constant {
            let length = modified_utf8_len(value);
            if length > MAX_UTF8_LENGTH {
                return Err(PoolError::Utf8TooLong { length });
            }
        }
        let index = self.entries.len();
        let width = constant.width() as usize;
        if index + width - 1 > MAX_POOL_INDEX as usize {
            return Err(PoolError::Full { count: index });
        }
        let index = index as u16;
        self.interned.entry(constant.key()).or_insert(index);
        self.entries.push(Some(constant));
        if width == 2 {
            self.entries.push(None);
        }
        Ok(index)
    }

    /// Return the index of an equal entry, adding one if none exists
    pub fn intern(&mut self, constant: Constant) -> Result<u16, PoolError> {
        if let Some(&index) = self.interned.get(&constant.key()) {
            return Ok(index);
        }
        self.push(constant)
    }

    /// Look up an equal entry without adding it
    pub fn find(&self, constant: &Constant) -> Option<u16> {
        self.interned.get(&constant.key()).copied()
    }

    /// Look up a Utf8 entry by value
    pub fn find_utf8(&self, value: &str) -> Option<u16> {
        self.find(&Constant::Utf8(value.to_string()))
    }

    // ===== Typed interning helpers =====

    /// Intern a Utf8 entry
    pub fn utf8(&mut self, value: &str) -> Result<u16, PoolError> {
        self.intern(Constant::Utf8(value.to_string()))
    }

    /// Intern a Class entry for an internal name
    pub fn class(&mut self, name: &str) -> Result<u16, PoolError> {
        let name_index = self.utf8(name)?;
        self.intern(Constant::Class { name_index })
    }

    /// Intern a String entry
    pub fn string(&mut self, value: &str) -> Result<u16, PoolError> {
        let string_index = self.utf8(value)?;
        self.intern(Constant::String { string_index })
    }

    /// Intern an Integer entry
    pub fn integer(&mut self, value: i32) -> Result<u16, PoolError> {
        self.intern(Constant::Integer(value))
    }

    /// Intern a Float entry
    pub fn float(&mut self, value: f32) -> Result<u16, PoolError> {
        self.intern(Constant::Float(value))
    }

    /// Intern a Long entry
    pub fn long(&mut self, value: i64) -> Result<u16, PoolError> {
        self.intern(Constant::Long(value))
    }

    /// Intern a Double entry
    pub fn double(&mut self, value: f64) -> Result<u16, PoolError> {
        self.intern(Constant::Double(value))
    }

    /// Intern a NameAndType entry
    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, PoolError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.intern(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Intern a Fieldref entry
    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, PoolError> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.intern(Constant::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    /// Intern a Methodref, or an InterfaceMethodref when `interface` is set
    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16, PoolError> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        if interface {
            self.intern(Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            })
        } else {
            self.intern(Constant::Methodref {
                class_index,
                name_and_type_index,
            })
        }
    }

    /// Intern a MethodHandle entry
    pub fn method_handle(&mut self, kind: ReferenceKind, reference_index: u16) -> Result<u16, PoolError> {
        self.intern(Constant::MethodHandle {
            kind,
            reference_index,
        })
    }

    /// Intern a MethodType entry
    pub fn method_type(&mut self, descriptor: &str) -> Result<u16, PoolError> {
        let descriptor_index = self.utf8(descriptor)?;
        self.intern(Constant::MethodType { descriptor_index })
    }

    /// Intern an InvokeDynamic entry
    pub fn invoke_dynamic(
        &mut self,
        bootstrap_method_attr_index: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, PoolError> {
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.intern(Constant::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        })
    }

    // ===== Lookup =====

    /// Get the entry at `index`
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    /// Get a Utf8 entry's value
    pub fn get_utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Utf8(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Internal name of the Class entry at `index`
    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.get_utf8(*name_index),
            _ => None,
        }
    }

    /// Name and descriptor of the NameAndType entry at `index`
    pub fn name_and_type_at(&self, index: u16) -> Option<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Some((self.get_utf8(*name_index)?, self.get_utf8(*descriptor_index)?)),
            _ => None,
        }
    }

    /// Owner, name and descriptor of a Fieldref/Methodref/InterfaceMethodref
    pub fn member_ref(&self, index: u16) -> Option<(&str, &str, &str)> {
        match self.get(index)? {
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                let owner = self.class_name(*class_index)?;
                let (name, descriptor) = self.name_and_type_at(*name_and_type_index)?;
                Some((owner, name, descriptor))
            }
            _ => None,
        }
    }

    /// Iterate over `(index, entry)` pairs in index order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|c| (i as u16, c)))
    }

    // ===== Transactions =====

    /// Record the current length
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.entries.len(),
        }
    }

    /// Drop every entry added since `checkpoint`
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        if checkpoint.len >= self.entries.len() {
            return;
        }
        self.entries.truncate(checkpoint.len);
        let len = checkpoint.len;
        self.interned.retain(|_, index| (*index as usize) < len);
    }

    // ===== Encoding =====

    /// Encode `constant_pool_count` followed by every entry
    pub fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_u16(self.entries.len() as u16);
        for constant in self.entries.iter().flatten() {
            constant.encode(writer);
        }
    }

    /// Decode `constant_pool_count` followed by the entries it announces
    pub fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u16()?;
        let mut pool = ConstantPool::new();
        pool.entries.reserve(count as usize);
        let mut index: u16 = 1;
        while index < count {
            let constant = Constant::decode(reader, index)?;
            let width = constant.width();
            let tag = constant.tag();
            // A wide entry in the last slot would overflow the declared count
            if index as u32 + width as u32 > count as u32 {
                return Err(DecodeError::UnknownConstantTag { tag, index });
            }
            pool.entries.push(Some(constant));
            if width == 2 {
                pool.entries.push(None);
            }
            index += width;
        }
        pool.rebuild_index();
        Ok(pool)
    }

    fn rebuild_index(&mut self) {
        self.interned.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(constant) = entry {
                self.interned.entry(constant.key()).or_insert(i as u16);
            }
        }
    }
}
