//! JVM class file definitions
//!
//! This crate provides the class file model, constant pool, descriptor grammar
//! and instruction set used by the bul insertion engine. Everything here works
//! on the binary layout of JVMS chapter 4 and nothing else: no class loading,
//! no type hierarchy, no full bytecode verification.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod constants;
pub mod descriptor;
pub mod encoder;
pub mod opcode;
pub mod verify;

pub use class::{
    access, Annotation, Attribute, BootstrapMethod, ClassFile, ClassFileError, CodeAttribute,
    ExceptionEntry, MemberInfo,
};
pub use constants::{
    Checkpoint, Constant, ConstantPool, PoolError, ReferenceKind, MAX_POOL_INDEX, MAX_UTF8_LENGTH,
};
pub use descriptor::{
    parse_descriptor, parse_field_descriptor, parse_method_descriptor, Descriptor,
    DescriptorError, FieldType, MethodDescriptor, ReturnType, MAX_PARAMETER_SLOTS,
};
pub use encoder::{ClassReader, ClassWriter, DecodeError};
pub use opcode::{Instruction, Instructions, Opcode};
pub use verify::{verify_class, VerifyError};
