//! Unit processing pipeline
//!
//! Units are independent, so the pipeline fans them out over a pool of
//! scoped worker threads fed from a shared injector queue. Everything a unit
//! needs lives inside its own [`UnitHandle`]; workers share only the
//! read-only registry.

use crate::error::UnitError;
use crate::registry::{EntryPoint, ProcessorRegistry};
use crate::scanner::{Selection, SkipReason, UnitScanner, DEFAULT_MARKER};
use crate::unit::{PatchedUnit, UnitHandle};
use bul_classfile::{verify_class, ClassFile};
use crossbeam::channel::Sender;
use crossbeam_deque::{Injector, Steal};
use std::thread;

/// Run every entry point against one class
///
/// The first failing entry point aborts the unit; the caller never sees a
/// partially patched class.
pub fn process_unit(class: ClassFile, entries: &[EntryPoint]) -> Result<PatchedUnit, UnitError> {
    let handle = UnitHandle::from_class(class)?;
    let name = handle.lock().name().to_string();
    for entry in entries {
        log::debug!("{}: running entry point {}", name, entry.name());
        entry
            .invoke(&handle)
            .map_err(|source| UnitError::EntryPoint {
                unit: name.clone(),
                entry: entry.name().to_string(),
                source,
            })?;
    }
    handle.into_inner().map_err(|_| UnitError::StillShared(name))
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker threads, including the calling thread
    pub jobs: usize,
    /// Run structural verification on patched units
    pub verify: bool,
    /// Marker annotation descriptor
    pub marker: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            verify: true,
            marker: DEFAULT_MARKER.to_string(),
        }
    }
}

/// One unit to process
#[derive(Debug, Clone)]
pub struct UnitInput {
    /// Where the bytes came from, typically a path
    pub label: String,
    /// Class file bytes
    pub bytes: Vec<u8>,
}

impl UnitInput {
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            bytes,
        }
    }
}

/// Result of processing one input
#[derive(Debug)]
pub enum UnitOutcome {
    /// Entry points ran and the unit was re-encoded
    Patched {
        label: String,
        /// Internal class name
        name: String,
        /// Encoded class
        bytes: Vec<u8>,
        /// Committed insertions
        insertions: usize,
    },
    /// The unit was left untouched
    Skipped {
        label: String,
        name: String,
        reason: SkipReason,
    },
    /// Nothing of the unit may be written
    Failed { label: String, error: UnitError },
}

impl UnitOutcome {
    /// The input label
    pub fn label(&self) -> &str {
        match self {
            UnitOutcome::Patched { label, .. }
            | UnitOutcome::Skipped { label, .. }
            | UnitOutcome::Failed { label, .. } => label,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitOutcome::Failed { .. })
    }
}

/// Outcomes of a pipeline run, in input order
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl PipelineReport {
    pub fn patched(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Patched { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(UnitOutcome::is_failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

type Job = (usize, UnitInput);

/// Parallel unit processor
#[derive(Debug)]
pub struct Pipeline {
    registry: ProcessorRegistry,
    scanner: UnitScanner,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(registry: ProcessorRegistry, config: PipelineConfig) -> Self {
        Self {
            scanner: UnitScanner::new(config.marker.clone()),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process all inputs and return their outcomes in input order
    pub fn run(&self, inputs: Vec<UnitInput>) -> PipelineReport {
        let total = inputs.len();
        if total == 0 {
            return PipelineReport::default();
        }
        let injector = Injector::new();
        for job in inputs.into_iter().enumerate() {
            injector.push(job);
        }
        let (sender, receiver) = crossbeam::channel::unbounded();
        let workers = self.config.jobs.clamp(1, total);
        log::debug!("processing {} units on {} workers", total, workers);

        thread::scope(|scope| {
            for id in 1..workers {
                let sender = sender.clone();
                let injector = &injector;
                let spawned = thread::Builder::new()
                    .name(format!("bul-worker-{}", id))
                    .spawn_scoped(scope, move || self.drain(injector, &sender));
                if let Err(e) = spawned {
                    log::warn!("could not start worker {}: {}", id, e);
                    break;
                }
            }
            self.drain(&injector, &sender);
        });
        drop(sender);

        let mut slots: Vec<Option<UnitOutcome>> = (0..total).map(|_| None).collect();
        for (index, outcome) in receiver.iter() {
            slots[index] = Some(outcome);
        }
        PipelineReport {
            outcomes: slots.into_iter().flatten().collect(),
        }
    }

    fn drain(&self, injector: &Injector<Job>, results: &Sender<(usize, UnitOutcome)>) {
        loop {
            match injector.steal() {
                Steal::Success((index, input)) => {
                    let outcome = self.process(input);
                    if results.send((index, outcome)).is_err() {
                        return;
                    }
                }
                Steal::Empty => return,
                Steal::Retry => continue,
            }
        }
    }

    /// Process a single input on the calling thread
    pub fn process(&self, input: UnitInput) -> UnitOutcome {
        let label = input.label;
        match self.patch(&input.bytes) {
            Ok(Patch::Done(name, bytes, insertions)) => {
                log::info!("{}: patched {} ({} insertions)", label, name, insertions);
                UnitOutcome::Patched {
                    label,
                    name,
                    bytes,
                    insertions,
                }
            }
            Ok(Patch::Skipped(name, reason)) => UnitOutcome::Skipped {
                label,
                name,
                reason,
            },
            Err(error) => {
                log::warn!("{}: {}", label, error);
                UnitOutcome::Failed { label, error }
            }
        }
    }

    fn patch(&self, bytes: &[u8]) -> Result<Patch, UnitError> {
        let class = ClassFile::decode(bytes)?;
        let name = class.name().unwrap_or("<unnamed>").to_string();
        let entries = match self.scanner.select(&class, &self.registry)? {
            Selection::Selected(entries) => entries,
            Selection::Skipped(reason) => return Ok(Patch::Skipped(name, reason)),
        };
        let unit = process_unit(class, entries)?;
        if self.config.verify {
            verify_class(unit.class()).map_err(|source| UnitError::Verify {
                unit: name.clone(),
                source,
            })?;
        }
        Ok(Patch::Done(name, unit.encode(), unit.insertions()))
    }
}

enum Patch {
    Done(String, Vec<u8>, usize),
    Skipped(String, SkipReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InsertError;
    use crate::handle::{handle, DispatchKind};
    use bul_classfile::{access, CodeAttribute};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const BSM: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

    fn class_bytes(name: &str, marked: bool) -> Vec<u8> {
        let mut class = ClassFile::new(name, Some("java/lang/Object")).unwrap();
        class
            .add_method(access::PUBLIC | access::STATIC, "test", "()V", Some(CodeAttribute::new(0, 0, vec![])))
            .unwrap();
        if marked {
            class.add_annotation(DEFAULT_MARKER, false).unwrap();
        }
        class.encode()
    }

    fn println(unit: &UnitHandle) -> Result<(), InsertError> {
        let bootstrap = handle(DispatchKind::Static, "a/Boot", "bootstrap", BSM, false)?;
        unit.begin_insertion("test", "println", "()V", bootstrap)?.commit()?;
        Ok(())
    }

    fn config(jobs: usize) -> PipelineConfig {
        PipelineConfig {
            jobs,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_process_unit_runs_entries_in_order() {
        let class = ClassFile::decode(&class_bytes("a/One", true)).unwrap();
        let entries = vec![EntryPoint::new("first", println), EntryPoint::new("second", println)];
        let unit = process_unit(class, &entries).unwrap();
        assert_eq!(unit.insertions(), 2);
        assert_eq!(unit.bootstrap_methods().len(), 2);
    }

    #[test]
    fn test_process_unit_stops_at_first_error() {
        let class = ClassFile::decode(&class_bytes("a/One", true)).unwrap();
        let entries = vec![
            EntryPoint::new("broken", |unit: &UnitHandle| {
                unit.insertion("missing", None).alloc("a/B")?.commit()?;
                Ok(())
            }),
            EntryPoint::new("never", |_: &UnitHandle| panic!("must not run")),
        ];
        match process_unit(class, &entries) {
            Err(UnitError::EntryPoint { entry, source, .. }) => {
                assert_eq!(entry, "broken");
                assert!(matches!(source, InsertError::UnresolvedTarget(_)));
            }
            other => panic!("unexpected {:?}", other.map(|u| u.insertions())),
        }
    }

    #[test]
    fn test_leaked_handle_fails_unit() {
        let leaked: Arc<Mutex<Vec<UnitHandle>>> = Arc::default();
        let sink = leaked.clone();
        let entries = vec![EntryPoint::new("leak", move |unit: &UnitHandle| {
            sink.lock().push(unit.clone());
            Ok(())
        })];
        let class = ClassFile::decode(&class_bytes("a/One", true)).unwrap();
        assert!(matches!(process_unit(class, &entries), Err(UnitError::StillShared(_))));
    }

    #[test]
    fn test_run_preserves_order_and_isolates_failures() {
        let mut registry = ProcessorRegistry::new();
        let mut inputs = Vec::new();
        for i in 0..24 {
            let name = format!("a/Unit{}", i);
            if i % 5 == 0 {
                registry.register_fn(name.clone(), "broken", |unit: &UnitHandle| {
                    unit.insertion("nope", None).alloc("a/B")?.commit()?;
                    Ok(())
                });
            } else {
                registry.register_fn(name.clone(), "println", println);
            }
            inputs.push(UnitInput::new(format!("in{}", i), class_bytes(&name, i % 7 != 3)));
        }
        inputs.push(UnitInput::new("garbage", vec![1, 2, 3]));

        let report = Pipeline::new(registry, config(4)).run(inputs);
        assert_eq!(report.outcomes.len(), 25);
        for (i, outcome) in report.outcomes.iter().enumerate().take(24) {
            assert_eq!(outcome.label(), format!("in{}", i));
            match outcome {
                UnitOutcome::Skipped { reason, .. } => {
                    assert_eq!(i % 7, 3);
                    assert_eq!(*reason, SkipReason::Unmarked);
                }
                UnitOutcome::Failed { .. } => assert_eq!(i % 5, 0),
                UnitOutcome::Patched { bytes, insertions, .. } => {
                    assert_eq!(*insertions, 1);
                    let class = ClassFile::decode(bytes).unwrap();
                    assert_eq!(class.bootstrap_methods().unwrap().len(), 1);
                }
            }
        }
        assert!(report.outcomes[24].is_failed());
        assert!(report.has_failures());
        assert_eq!(report.patched() + report.skipped() + report.failed(), 25);
    }

    #[test]
    fn test_marked_without_entries_is_skipped() {
        let pipeline = Pipeline::new(ProcessorRegistry::new(), config(1));
        let outcome = pipeline.process(UnitInput::new("x", class_bytes("a/Lonely", true)));
        assert!(matches!(
            outcome,
            UnitOutcome::Skipped {
                reason: SkipReason::NoEntryPoints,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_run() {
        let report = Pipeline::new(ProcessorRegistry::new(), config(8)).run(Vec::new());
        assert!(report.outcomes.is_empty());
        assert!(!report.has_failures());
    }
}
