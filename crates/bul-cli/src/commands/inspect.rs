//! `bul inspect`: dump the structure of a class file.

use crate::output::{self, StyledOutput, Tone};
use anyhow::Context;
use bul_classfile::{ClassFile, Constant, ConstantPool, Instruction};
use serde_json::{json, Value};
use std::path::Path;

pub fn execute(file: &Path, as_json: bool, color: &str) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let class = ClassFile::decode(&bytes).with_context(|| format!("failed to decode {}", file.display()))?;

    if as_json {
        let summary = summarize(&class)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut out = StyledOutput::new(output::resolve_color_choice(Some(color)));
    print_class(&mut out, &class)?;
    out.flush();
    Ok(())
}

/// Short human-readable rendering of a pool entry
pub fn describe(pool: &ConstantPool, constant: &Constant) -> String {
    let utf8 = |index: u16| pool.get_utf8(index).unwrap_or("?").to_string();
    let member = |index: u16| match pool.member_ref(index) {
        Some((owner, name, descriptor)) => format!("{}.{}:{}", owner, name, descriptor),
        None => format!("#{}", index),
    };
    match constant {
        Constant::Utf8(value) => format!("{:?}", value),
        Constant::Integer(v) => v.to_string(),
        Constant::Float(v) => format!("{}f", v),
        Constant::Long(v) => format!("{}L", v),
        Constant::Double(v) => format!("{}d", v),
        Constant::Class { name_index } => utf8(*name_index),
        Constant::String { string_index } => format!("{:?}", utf8(*string_index)),
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
            let owner = pool.class_name(*class_index).unwrap_or("?");
            let (name, descriptor) = pool.name_and_type_at(*name_and_type_index).unwrap_or(("?", "?"));
            format!("{}.{}:{}", owner, name, descriptor)
        }
        Constant::NameAndType {
            name_index,
            descriptor_index,
        } => format!("{}:{}", utf8(*name_index), utf8(*descriptor_index)),
        Constant::MethodHandle {
            kind,
            reference_index,
        } => format!("{} {}", kind, member(*reference_index)),
        Constant::MethodType { descriptor_index } => utf8(*descriptor_index),
        Constant::Dynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        }
        | Constant::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => {
            let (name, descriptor) = pool.name_and_type_at(*name_and_type_index).unwrap_or(("?", "?"));
            format!("bsm #{} {}:{}", bootstrap_method_attr_index, name, descriptor)
        }
        Constant::Module { name_index } | Constant::Package { name_index } => utf8(*name_index),
    }
}

fn render_instruction(pool: &ConstantPool, instruction: &Instruction<'_>) -> String {
    let mut text = format!("{:5}: {}", instruction.offset, instruction.opcode.mnemonic());
    if let Some(index) = instruction.pool_index() {
        let target = pool
            .get(index)
            .map(|c| describe(pool, c))
            .unwrap_or_else(|| "?".to_string());
        text.push_str(&format!(" #{} // {}", index, target));
    } else if let Some(target) = instruction.branch_target() {
        text.push_str(&format!(" {}", target));
    } else if !instruction.operands.is_empty() {
        for byte in instruction.operands {
            text.push_str(&format!(" {}", byte));
        }
    }
    text
}

fn disassemble(class: &ClassFile, method: usize) -> anyhow::Result<Option<Vec<String>>> {
    let code = match class.code(method) {
        Ok(code) => code,
        Err(bul_classfile::ClassFileError::MissingAttribute { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut lines = Vec::new();
    for instruction in code.instructions() {
        lines.push(render_instruction(&class.constant_pool, &instruction?));
    }
    Ok(Some(lines))
}

fn summarize(class: &ClassFile) -> anyhow::Result<Value> {
    let pool = &class.constant_pool;
    let constants: Vec<Value> = pool
        .iter()
        .map(|(index, constant)| {
            json!({
                "index": index,
                "constant": constant,
                "text": describe(pool, constant),
            })
        })
        .collect();
    let bootstrap: Vec<Value> = class
        .bootstrap_methods()?
        .iter()
        .map(|entry| json!({ "method_ref": entry.method_ref, "arguments": entry.arguments }))
        .collect();
    let mut methods = Vec::new();
    for (index, method) in class.methods.iter().enumerate() {
        let code = disassemble(class, index)?;
        methods.push(json!({
            "name": method.name(pool),
            "descriptor": method.descriptor(pool),
            "access_flags": method.access_flags,
            "code": code,
        }));
    }
    let annotations: Vec<Value> = class
        .annotations()?
        .iter()
        .map(|a| json!({ "descriptor": a.descriptor, "visible": a.visible }))
        .collect();
    Ok(json!({
        "name": class.name(),
        "super": class.super_name(),
        "version": format!("{}.{}", class.major_version, class.minor_version),
        "constant_pool_count": pool.count(),
        "constants": constants,
        "bootstrap_methods": bootstrap,
        "methods": methods,
        "annotations": annotations,
    }))
}

fn print_class(out: &mut StyledOutput, class: &ClassFile) -> anyhow::Result<()> {
    let pool = &class.constant_pool;
    out.paint(Tone::Heading, &format!("class {}", class.name().unwrap_or("?")));
    if let Some(super_name) = class.super_name() {
        out.paint(Tone::Plain, &format!(" extends {}", super_name));
    }
    out.line(Tone::Detail, &format!(" (version {}.{})", class.major_version, class.minor_version));
    for annotation in class.annotations()? {
        out.line(Tone::Plain, &format!("  @{}", annotation.descriptor));
    }

    out.newline();
    out.line(Tone::Heading, &format!("Constant pool ({} slots):", pool.count()));
    for (index, constant) in pool.iter() {
        out.paint(Tone::Plain, &format!("  #{:<5} ", index));
        out.paint(Tone::Detail, &format!("{:<18}", constant.kind_name()));
        out.line(Tone::Plain, &describe(pool, constant));
    }

    let bootstrap = class.bootstrap_methods()?;
    if !bootstrap.is_empty() {
        out.newline();
        out.line(Tone::Heading, "Bootstrap methods:");
        for (index, entry) in bootstrap.iter().enumerate() {
            let handle = pool
                .get(entry.method_ref)
                .map(|c| describe(pool, c))
                .unwrap_or_else(|| "?".to_string());
            out.line(
                Tone::Plain,
                &format!("  {}: #{} {} args {:?}", index, entry.method_ref, handle, entry.arguments),
            );
        }
    }

    for (index, method) in class.methods.iter().enumerate() {
        out.newline();
        out.line(
            Tone::Heading,
            &format!("{}{}", method.name(pool).unwrap_or("?"), method.descriptor(pool).unwrap_or("?")),
        );
        match disassemble(class, index)? {
            Some(lines) => {
                for line in lines {
                    out.line(Tone::Plain, &format!("  {}", line));
                }
            }
            None => {
                out.line(Tone::Caution, "  no code");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bul_classfile::{access, CodeAttribute};

    fn class() -> ClassFile {
        let mut class = ClassFile::new("a/Shown", Some("java/lang/Object")).unwrap();
        let field = class.constant_pool.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;").unwrap();
        let [hi, lo] = field.to_be_bytes();
        class
            .add_method(access::STATIC, "main", "()V", Some(CodeAttribute::new(1, 0, vec![0xB2, hi, lo, 0x57, 0xB1])))
            .unwrap();
        class.add_method(access::ABSTRACT, "bare", "()V", None).unwrap();
        class
    }

    #[test]
    fn test_disassemble() {
        let class = class();
        let lines = disassemble(&class, 0).unwrap().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("getstatic"));
        assert!(lines[0].contains("java/lang/System.out:Ljava/io/PrintStream;"));
        assert!(disassemble(&class, 1).unwrap().is_none());
    }

    #[test]
    fn test_summary_json() {
        let summary = summarize(&class()).unwrap();
        assert_eq!(summary["name"], "a/Shown");
        assert_eq!(summary["methods"].as_array().unwrap().len(), 2);
        assert!(summary["methods"][1]["code"].is_null());
        assert!(summary["constants"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c["text"] == "a/Shown"));
    }
}
