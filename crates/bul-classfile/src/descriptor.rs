//! Field and method descriptor grammar (JVMS 4.3)
//!
//! ```text
//! FieldDescriptor  := FieldType
//! FieldType        := B | C | D | F | I | J | S | Z | L ClassName ; | [ FieldType
//! MethodDescriptor := ( FieldType* ) ReturnType
//! ReturnType       := FieldType | V
//! ```

use std::fmt;
use thiserror::Error;

/// Maximum number of array dimensions a descriptor may declare
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

/// Parameter slots a method may take, `this` included (JVMS 4.3.3)
pub const MAX_PARAMETER_SLOTS: u32 = 255;

/// Descriptor parse errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Input ended in the middle of a type
    #[error("Descriptor '{descriptor}' ends unexpectedly")]
    UnexpectedEnd {
        /// The descriptor text
        descriptor: String,
    },

    /// A character that cannot start or continue a type
    #[error("Unexpected '{found}' at position {position} in descriptor '{descriptor}'")]
    UnexpectedChar {
        /// The descriptor text
        descriptor: String,
        /// Offending character
        found: char,
        /// Character position
        position: usize,
    },

    /// Bytes left over after a complete descriptor
    #[error("Trailing characters at position {position} in descriptor '{descriptor}'")]
    Trailing {
        /// The descriptor text
        descriptor: String,
        /// Position of the first trailing character
        position: usize,
    },

    /// Bad class name inside an `L...;` type
    #[error("Invalid class name '{name}' in descriptor '{descriptor}'")]
    InvalidClassName {
        /// The descriptor text
        descriptor: String,
        /// The class name
        name: String,
    },

    /// Too many array dimensions
    #[error("Descriptor '{0}' has more than 255 array dimensions")]
    TooManyDimensions(String),

    /// `V` used as a parameter or field type
    #[error("'V' is only valid as a method return type in '{0}'")]
    VoidNotAllowed(String),

    /// Parameters need more than [`MAX_PARAMETER_SLOTS`] slots
    #[error("Method descriptor needs {slots} parameter slots, limit {MAX_PARAMETER_SLOTS}")]
    TooManySlots {
        /// Slots needed, receiver included
        slots: u32,
    },
}

/// A field type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `L<internal name>;`
    Object(String),
    /// `[<component>`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Number of operand stack / local slots a value of this type occupies
    pub fn slot_size(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Check if this is a primitive type
    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Number of array dimensions (0 for non-arrays)
    pub fn dimensions(&self) -> usize {
        match self {
            FieldType::Array(inner) => 1 + inner.dimensions(),
            _ => 0,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

/// A method return type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// `V`
    Void,
    /// Any field type
    Value(FieldType),
}

impl ReturnType {
    /// Slots pushed on the operand stack by a call returning this type
    pub fn slot_size(&self) -> u16 {
        match self {
            ReturnType::Void => 0,
            ReturnType::Value(ty) => ty.slot_size(),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in order
    pub params: Vec<FieldType>,
    /// Return type
    pub ret: ReturnType,
}

impl MethodDescriptor {
    /// Total slots taken by the parameters
    pub fn param_slots(&self) -> u32 {
        self.params
            .iter()
            .fold(0u32, |slots, param| slots.saturating_add(u32::from(param.slot_size())))
    }

    /// Slots an invocation pops for its arguments, `this` included when
    /// `receiver` is set. Fails past [`MAX_PARAMETER_SLOTS`].
    pub fn argument_slots(&self, receiver: bool) -> Result<u16, DescriptorError> {
        let slots = self.param_slots().saturating_add(u32::from(receiver));
        if slots > MAX_PARAMETER_SLOTS {
            return Err(DescriptorError::TooManySlots { slots });
        }
        Ok(slots as u16)
    }

    /// Slots pushed by the return value
    pub fn return_slots(&self) -> u16 {
        self.ret.slot_size()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        match &self.ret {
            ReturnType::Void => f.write_str("V"),
            ReturnType::Value(ty) => write!(f, "{}", ty),
        }
    }
}

/// Either kind of descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Descriptor {
    /// A field descriptor
    Field(FieldType),
    /// A method descriptor
    Method(MethodDescriptor),
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            position: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn unexpected(&self, found: char) -> DescriptorError {
        DescriptorError::UnexpectedChar {
            descriptor: self.text.to_string(),
            found,
            position: self.position,
        }
    }

    fn end(&self) -> DescriptorError {
        DescriptorError::UnexpectedEnd {
            descriptor: self.text.to_string(),
        }
    }

    fn finish(&self) -> Result<(), DescriptorError> {
        if self.position != self.chars.len() {
            return Err(DescriptorError::Trailing {
                descriptor: self.text.to_string(),
                position: self.position,
            });
        }
        Ok(())
    }

    fn field_type(&mut self) -> Result<FieldType, DescriptorError> {
        let mut dimensions = 0;
        while self.peek() == Some('[') {
            dimensions += 1;
            self.position += 1;
        }
        if dimensions > MAX_ARRAY_DIMENSIONS {
            return Err(DescriptorError::TooManyDimensions(self.text.to_string()));
        }

        let c = self.peek().ok_or_else(|| self.end())?;
        let mut ty = match c {
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'D' => FieldType::Double,
            'F' => FieldType::Float,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'S' => FieldType::Short,
            'Z' => FieldType::Boolean,
            'L' => return self.object_type(dimensions),
            'V' => return Err(DescriptorError::VoidNotAllowed(self.text.to_string())),
            other => return Err(self.unexpected(other)),
        };
        self.position += 1;
        for _ in 0..dimensions {
            ty = FieldType::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn object_type(&mut self, dimensions: usize) -> Result<FieldType, DescriptorError> {
        self.position += 1; // 'L'
        let start = self.position;
        loop {
            match self.peek() {
                Some(';') => break,
                Some(_) => self.position += 1,
                None => return Err(self.end()),
            }
        }
        let name: String = self.chars[start..self.position].iter().collect();
        self.position += 1; // ';'
        if !is_valid_internal_class_name(&name) {
            return Err(DescriptorError::InvalidClassName {
                descriptor: self.text.to_string(),
                name,
            });
        }
        let mut ty = FieldType::Object(name);
        for _ in 0..dimensions {
            ty = FieldType::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn method(&mut self) -> Result<MethodDescriptor, DescriptorError> {
        match self.peek() {
            Some('(') => self.position += 1,
            Some(other) => return Err(self.unexpected(other)),
            None => return Err(self.end()),
        }
        let mut params = Vec::new();
        loop {
            match self.peek() {
                Some(')') => {
                    self.position += 1;
                    break;
                }
                Some(_) => params.push(self.field_type()?),
                None => return Err(self.end()),
            }
        }
        let ret = match self.peek() {
            Some('V') => {
                self.position += 1;
                ReturnType::Void
            }
            Some(_) => ReturnType::Value(self.field_type()?),
            None => return Err(self.end()),
        };
        Ok(MethodDescriptor { params, ret })
    }
}

/// Parse a field descriptor such as `Ljava/lang/String;` or `[I`
pub fn parse_field_descriptor(text: &str) -> Result<FieldType, DescriptorError> {
    let mut parser = Parser::new(text);
    let ty = parser.field_type()?;
    parser.finish()?;
    Ok(ty)
}

/// Parse a method descriptor such as `(ILjava/lang/Object;)V`
pub fn parse_method_descriptor(text: &str) -> Result<MethodDescriptor, DescriptorError> {
    let mut parser = Parser::new(text);
    let method = parser.method()?;
    parser.finish()?;
    Ok(method)
}

/// Parse either kind of descriptor, deciding by the leading `(`
pub fn parse_descriptor(text: &str) -> Result<Descriptor, DescriptorError> {
    if text.starts_with('(') {
        parse_method_descriptor(text).map(Descriptor::Method)
    } else {
        parse_field_descriptor(text).map(Descriptor::Field)
    }
}

/// Unqualified name (JVMS 4.2.2): non-empty, none of `. ; [ /`
pub fn is_valid_unqualified_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', ';', '[', '/'])
}

/// Method name: `<init>`, `<clinit>`, or an unqualified name without `<`/`>`
pub fn is_valid_method_name(name: &str) -> bool {
    name == "<init>"
        || name == "<clinit>"
        || (is_valid_unqualified_name(name) && !name.contains(['<', '>']))
}

/// Internal class name in binary form, e.g. `java/lang/Object`
pub fn is_valid_internal_class_name(name: &str) -> bool {
    !name.is_empty() && name.split('/').all(is_valid_unqualified_name)
}
