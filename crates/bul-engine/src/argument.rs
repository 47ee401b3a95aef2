//! Static arguments passed to a bootstrap method

use crate::error::InsertError;
use crate::handle::HandleDescriptor;
use bul_classfile::{parse_descriptor, ConstantPool, Descriptor, FieldType, PoolError};

/// A loadable constant value
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// `String` constant
    String(String),
    /// `int` constant
    Int(i32),
    /// `long` constant
    Long(i64),
    /// `float` constant
    Float(f32),
    /// `double` constant
    Double(f64),
    /// A type given by descriptor: method descriptors become `MethodType`,
    /// object and array descriptors become `Class`
    Type(String),
}

impl ConstantValue {
    /// Check that a `Type` value names something loadable
    pub fn validate(&self) -> Result<(), InsertError> {
        if let ConstantValue::Type(descriptor) = self {
            let parsed = parse_descriptor(descriptor)
                .map_err(|e| InsertError::malformed(descriptor, e.to_string()))?;
            if let Descriptor::Field(ty) = parsed {
                if ty.is_primitive() {
                    return Err(InsertError::invalid(
                        descriptor,
                        "invokedynamic",
                        "primitive types cannot be passed as a Type argument",
                    ));
                }
            }
        }
        Ok(())
    }

    fn intern(&self, pool: &mut ConstantPool) -> Result<u16, PoolError> {
        match self {
            ConstantValue::String(value) => pool.string(value),
            ConstantValue::Int(value) => pool.integer(*value),
            ConstantValue::Long(value) => pool.long(*value),
            ConstantValue::Float(value) => pool.float(*value),
            ConstantValue::Double(value) => pool.double(*value),
            ConstantValue::Type(descriptor) => match parse_descriptor(descriptor) {
                Ok(Descriptor::Field(FieldType::Object(name))) => pool.class(&name),
                Ok(Descriptor::Field(_)) => pool.class(descriptor),
                _ => pool.method_type(descriptor),
            },
        }
    }
}

/// One static argument of an `invokedynamic` insertion
#[derive(Debug, Clone, PartialEq)]
pub enum InsertionArgument {
    /// A method handle
    Handle(HandleDescriptor),
    /// A constant
    Constant(ConstantValue),
}

impl InsertionArgument {
    /// Validate the argument before it is queued
    pub fn validate(&self) -> Result<(), InsertError> {
        match self {
            InsertionArgument::Handle(_) => Ok(()),
            InsertionArgument::Constant(value) => value.validate(),
        }
    }

    /// Intern the argument and return its pool index
    pub(crate) fn intern(&self, pool: &mut ConstantPool) -> Result<u16, PoolError> {
        let index = match self {
            InsertionArgument::Handle(handle) => handle.intern(pool)?,
            InsertionArgument::Constant(value) => value.intern(pool)?,
        };
        log::trace!("interned argument {:?} as #{}", self, index);
        Ok(index)
    }
}

impl From<HandleDescriptor> for InsertionArgument {
    fn from(handle: HandleDescriptor) -> Self {
        InsertionArgument::Handle(handle)
    }
}

impl From<ConstantValue> for InsertionArgument {
    fn from(value: ConstantValue) -> Self {
        InsertionArgument::Constant(value)
    }
}

impl From<i32> for InsertionArgument {
    fn from(value: i32) -> Self {
        InsertionArgument::Constant(ConstantValue::Int(value))
    }
}

impl From<&str> for InsertionArgument {
    fn from(value: &str) -> Self {
        InsertionArgument::Constant(ConstantValue::String(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bul_classfile::Constant;

    #[test]
    fn test_type_validation() {
        assert!(ConstantValue::Type("()V".into()).validate().is_ok());
        assert!(ConstantValue::Type("Ljava/lang/String;".into()).validate().is_ok());
        assert!(ConstantValue::Type("[I".into()).validate().is_ok());
        assert!(matches!(
            ConstantValue::Type("I".into()).validate(),
            Err(InsertError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            ConstantValue::Type("(I".into()).validate(),
            Err(InsertError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_type_interning() {
        let mut pool = ConstantPool::new();
        let class = InsertionArgument::from(ConstantValue::Type("Ljava/lang/String;".into()))
            .intern(&mut pool)
            .unwrap();
        assert_eq!(pool.class_name(class), Some("java/lang/String"));

        let array = InsertionArgument::from(ConstantValue::Type("[I".into()))
            .intern(&mut pool)
            .unwrap();
        assert_eq!(pool.class_name(array), Some("[I"));

        let method = InsertionArgument::from(ConstantValue::Type("(I)V".into()))
            .intern(&mut pool)
            .unwrap();
        assert!(matches!(pool.get(method), Some(Constant::MethodType { .. })));
    }

    #[test]
    fn test_constants_keyed_by_type_and_value() {
        let mut pool = ConstantPool::new();
        let int = InsertionArgument::from(1).intern(&mut pool).unwrap();
        let long = InsertionArgument::from(ConstantValue::Long(1)).intern(&mut pool).unwrap();
        let again = InsertionArgument::from(1).intern(&mut pool).unwrap();
        assert_ne!(int, long);
        assert_eq!(int, again);

        let text = InsertionArgument::from("1").intern(&mut pool).unwrap();
        assert!(matches!(pool.get(text), Some(Constant::String { .. })));
    }
}
