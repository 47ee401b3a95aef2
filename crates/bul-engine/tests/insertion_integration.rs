//! End-to-end tests for the insertion engine

use bul_classfile::{access, verify_class, ClassFile, CodeAttribute, Constant, Opcode, MAX_POOL_INDEX};
use bul_engine::{
    handle, ConstantValue, DispatchKind, InsertError, Pipeline, PipelineConfig, Plan,
    ProcessorRegistry, UnitHandle, UnitInput, UnitOutcome, DEFAULT_MARKER,
};
use std::collections::HashSet;
use std::thread;

const BSM: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_class() -> ClassFile {
    let mut class = ClassFile::new("ru/DmN/bul/Test", Some("java/lang/Object")).unwrap();
    class
        .add_method(
            access::PUBLIC | access::STATIC,
            "test",
            "()V",
            Some(CodeAttribute::new(0, 0, vec![])),
        )
        .unwrap();
    class.add_annotation(DEFAULT_MARKER, false).unwrap();
    class
}

fn utf8_set(class: &ClassFile) -> HashSet<String> {
    class
        .constant_pool
        .iter()
        .filter_map(|(_, c)| match c {
            Constant::Utf8(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_println_end_to_end() {
    init_logger();
    let class = test_class();
    let before = utf8_set(&class);
    assert!(!before.contains("Owner"));
    assert!(!before.contains("bootstrap"));
    assert!(!before.contains(BSM));

    let unit = UnitHandle::from_class(class).unwrap();
    let bootstrap = handle(DispatchKind::Static, "Owner", "bootstrap", BSM, false).unwrap();
    let position = unit
        .begin_insertion("test", "println", "()V", bootstrap)
        .unwrap()
        .commit()
        .unwrap();

    let unit = unit.into_inner().unwrap();
    assert_eq!(unit.bootstrap_methods().len(), 1);
    let log = unit.patch_log(position.method).unwrap();
    assert_eq!(log.entries().len(), 1);
    assert_eq!(log.entries()[0].pops, 0);
    assert_eq!(log.entries()[0].pushes, 0);

    let class = ClassFile::decode(&unit.encode()).unwrap();
    verify_class(&class).unwrap();
    let code = class.code(0).unwrap();
    let instructions: Vec<_> = code.instructions().map(|i| i.unwrap()).collect();
    assert_eq!(instructions.len(), 1);
    assert_eq!(instructions[0].opcode, Opcode::Invokedynamic);

    let after = utf8_set(&class);
    for symbol in ["Owner", "bootstrap", BSM, "println", "()V"] {
        assert!(after.contains(symbol), "missing symbol {}", symbol);
    }
    assert_eq!(class.bootstrap_methods().unwrap().len(), 1);
}

#[test]
fn test_n_commits_give_n_entries() {
    init_logger();
    let unit = UnitHandle::from_class(test_class()).unwrap();
    let bootstrap = handle(DispatchKind::Static, "Owner", "bootstrap", BSM, false).unwrap();
    let mut positions = Vec::new();
    for i in 0..6 {
        let mut builder = unit.begin_insertion("test", "call", "(I)V", bootstrap.clone()).unwrap();
        builder.argument(ConstantValue::Int(i)).unwrap();
        positions.push(builder.commit().unwrap());
    }

    let guard = unit.lock();
    let table = guard.bootstrap_methods();
    assert_eq!(table.len(), 6);
    let code = guard.class().code(0).unwrap();
    for (i, position) in positions.iter().enumerate() {
        assert_eq!(position.bootstrap_index, Some(i as u16));
        assert_eq!(position.offset, i * 5);
        match guard.class().constant_pool.get(position.operand) {
            Some(Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                ..
            }) => assert_eq!(*bootstrap_method_attr_index as usize, i),
            other => panic!("unexpected operand {:?}", other),
        }
        let operand = u16::from_be_bytes([code.code[position.offset + 1], code.code[position.offset + 2]]);
        assert_eq!(operand, position.operand);
    }
    // identical handles share one pool entry
    assert!(table.iter().all(|entry| entry.method_ref == table[0].method_ref));
}

#[test]
fn test_full_pool_leaves_code_unchanged() {
    init_logger();
    let unit = UnitHandle::from_class(test_class()).unwrap();
    {
        let mut guard = unit.lock();
        let mut class = guard.class().clone();
        let mut value = 0;
        while class.constant_pool.remaining() > 0 {
            class.constant_pool.integer(value).unwrap();
            value += 1;
        }
        assert_eq!(class.constant_pool.count(), MAX_POOL_INDEX as usize + 1);
        *guard = bul_engine::PatchedUnit::new(class).unwrap();
    }
    let code_before = unit.lock().class().code(0).unwrap();
    let bootstrap = handle(DispatchKind::Static, "Owner", "bootstrap", BSM, false).unwrap();
    let result = unit.begin_insertion("test", "println", "()V", bootstrap).unwrap().commit();
    assert!(matches!(result, Err(InsertError::CapacityExceeded(_))));
    assert_eq!(unit.lock().class().code(0).unwrap(), code_before);
    assert!(unit.lock().bootstrap_methods().is_empty());
}

#[test]
fn test_concurrent_commits_are_serialized() {
    init_logger();
    let unit = UnitHandle::from_class(test_class()).unwrap();
    let bootstrap = handle(DispatchKind::Static, "Owner", "bootstrap", BSM, false).unwrap();
    thread::scope(|scope| {
        for t in 0..4 {
            let unit = unit.clone();
            let bootstrap = bootstrap.clone();
            scope.spawn(move || {
                for i in 0..25 {
                    unit.begin_insertion("test", "tick", "()V", bootstrap.clone())
                        .unwrap()
                        .argument(t * 100 + i)
                        .unwrap()
                        .commit()
                        .unwrap();
                }
            });
        }
    });

    let unit = unit.into_inner().unwrap();
    assert_eq!(unit.insertions(), 100);
    assert_eq!(unit.bootstrap_methods().len(), 100);
    let class = unit.into_class();
    verify_class(&class).unwrap();
    let code = class.code(0).unwrap();
    assert_eq!(code.code.len(), 500);
    let mut seen = HashSet::new();
    for instruction in code.instructions() {
        let instruction = instruction.unwrap();
        let operand = u16::from_be_bytes([instruction.operands[0], instruction.operands[1]]);
        match class.constant_pool.get(operand) {
            Some(Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                ..
            }) => assert!(seen.insert(*bootstrap_method_attr_index)),
            other => panic!("unexpected operand {:?}", other),
        }
    }
    assert_eq!(seen.len(), 100);
}

#[test]
fn test_plan_file_through_pipeline() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let plan_path = dir.path().join("plan.toml");
    std::fs::write(
        &plan_path,
        format!(
            r#"
[[unit]]
name = "ru/DmN/bul/Test"

[[unit.insertion]]
method = "test"
kind = "invokedynamic"
name = "println"
descriptor = "()V"
bootstrap = {{ kind = "static", owner = "Owner", name = "bootstrap", descriptor = "{}" }}
arguments = [{{ string = "hello" }}, {{ long = 7 }}]
"#,
            BSM
        ),
    )
    .unwrap();

    let plan = Plan::from_file(&plan_path).unwrap();
    let mut registry = plan.compile().unwrap();
    registry.register_fn("ru/DmN/bul/Other", "noop", |_| Ok(()));

    let mut other = ClassFile::new("ru/DmN/bul/Other", Some("java/lang/Object")).unwrap();
    other.add_annotation(DEFAULT_MARKER, true).unwrap();
    let inputs = vec![
        UnitInput::new("Test.class", test_class().encode()),
        UnitInput::new("Other.class", other.encode()),
    ];
    let config = PipelineConfig {
        jobs: 2,
        ..PipelineConfig::default()
    };
    let report = Pipeline::new(registry, config).run(inputs);
    assert_eq!(report.patched(), 2);

    match &report.outcomes[0] {
        UnitOutcome::Patched { name, bytes, insertions, .. } => {
            assert_eq!(name, "ru/DmN/bul/Test");
            assert_eq!(*insertions, 1);
            let class = ClassFile::decode(bytes).unwrap();
            let table = class.bootstrap_methods().unwrap();
            assert_eq!(table[0].arguments.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }
    match &report.outcomes[1] {
        UnitOutcome::Patched { insertions, .. } => assert_eq!(*insertions, 0),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_failed_unit_does_not_affect_others() {
    init_logger();
    let mut registry = ProcessorRegistry::new();
    registry.register_fn("a/Good", "ok", |unit: &UnitHandle| {
        unit.insertion("test", None).alloc("java/lang/Object")?.commit()?;
        Ok(())
    });
    registry.register_fn("a/Bad", "broken", |unit: &UnitHandle| {
        unit.insertion("test", None).alloc("java/lang/Object")?.commit()?;
        unit.insertion("absent", None).alloc("java/lang/Object")?.commit()?;
        Ok(())
    });
    let class = |name: &str| {
        let mut class = ClassFile::new(name, Some("java/lang/Object")).unwrap();
        class
            .add_method(access::STATIC, "test", "()V", Some(CodeAttribute::new(0, 0, vec![])))
            .unwrap();
        class.add_annotation(DEFAULT_MARKER, false).unwrap();
        class.encode()
    };
    let report = Pipeline::new(registry, PipelineConfig::default()).run(vec![
        UnitInput::new("bad", class("a/Bad")),
        UnitInput::new("good", class("a/Good")),
    ]);
    assert!(report.outcomes[0].is_failed());
    assert!(matches!(report.outcomes[1], UnitOutcome::Patched { insertions: 1, .. }));
}

#[test]
fn test_format_limits_fail_the_unit() {
    init_logger();
    let mut registry = ProcessorRegistry::new();
    registry.register_fn("ru/DmN/bul/Test", "long-string", |unit: &UnitHandle| {
        let bootstrap = handle(DispatchKind::Static, "ru/DmN/bul/Test", "bootstrap", BSM, false)?;
        unit.insertion("test", None)
            .begin("println", "()V", bootstrap)?
            .argument(ConstantValue::String("x".repeat(70_000)))?
            .commit()?;
        Ok(())
    });
    registry.register_fn("a/Wide", "wide-call", |unit: &UnitHandle| {
        let descriptor = format!("({})V", "J".repeat(200));
        unit.insertion("test", None)
            .invoke(DispatchKind::Static, "a/Wide", "m", &descriptor, false)?
            .commit()?;
        Ok(())
    });
    let mut wide = ClassFile::new("a/Wide", Some("java/lang/Object")).unwrap();
    wide.add_method(access::STATIC, "test", "()V", Some(CodeAttribute::new(0, 0, vec![])))
        .unwrap();
    wide.add_annotation(DEFAULT_MARKER, false).unwrap();

    let report = Pipeline::new(registry, PipelineConfig::default()).run(vec![
        UnitInput::new("long", test_class().encode()),
        UnitInput::new("wide", wide.encode()),
    ]);
    match &report.outcomes[0] {
        UnitOutcome::Failed { error, .. } => assert!(error.to_string().contains("70000 bytes")),
        other => panic!("unexpected outcome {:?}", other),
    }
    match &report.outcomes[1] {
        UnitOutcome::Failed { error, .. } => assert!(error.to_string().contains("400 parameter slots")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.patched(), 0);
}
