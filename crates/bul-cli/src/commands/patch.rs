//! `bul patch`: apply an insertion plan to class files.

use crate::files::collect_class_files;
use crate::output::{self, Status, StyledOutput, Tone};
use anyhow::Context;
use bul_engine::{Pipeline, PipelineConfig, PipelineReport, Plan, UnitInput, UnitOutcome, DEFAULT_MARKER};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct PatchArgs {
    pub plan: PathBuf,
    pub out_dir: Option<PathBuf>,
    pub jobs: usize,
    pub marker: Option<String>,
    pub verify: bool,
    pub color: String,
    pub inputs: Vec<PathBuf>,
}

/// Run the command. Returns `false` if any unit failed.
pub fn execute(args: PatchArgs) -> anyhow::Result<bool> {
    let mut out = StyledOutput::new(output::resolve_color_choice(Some(&args.color)));

    let plan = Plan::from_file(&args.plan)?;
    let registry = plan
        .compile()
        .with_context(|| format!("invalid plan {}", args.plan.display()))?;
    let marker = args
        .marker
        .or(plan.marker)
        .unwrap_or_else(|| DEFAULT_MARKER.to_string());

    let paths = collect_class_files(&args.inputs)?;
    let mut inputs = Vec::with_capacity(paths.len());
    for path in &paths {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        inputs.push(UnitInput::new(path.display().to_string(), bytes));
    }
    log::info!("{} class files, {} planned units", inputs.len(), registry.len());

    let config = PipelineConfig {
        jobs: args.jobs,
        verify: args.verify,
        marker,
    };
    let report = Pipeline::new(registry, config).run(inputs);

    // destination -> label of the unit written there
    let mut written: HashMap<PathBuf, String> = HashMap::new();
    let mut write_failures = 0;
    for (path, outcome) in paths.iter().zip(&report.outcomes) {
        match outcome {
            UnitOutcome::Patched {
                label,
                name,
                bytes,
                insertions,
            } => {
                let destination = destination(path, args.out_dir.as_deref(), name);
                match claim(&mut written, &destination, label)
                    .and_then(|()| write_class(&destination, bytes))
                {
                    Ok(()) => {
                        let detail = format!("{} insertions -> {}", insertions, destination.display());
                        out.status(Status::Patched, name, Some(&detail));
                    }
                    Err(error) => {
                        write_failures += 1;
                        out.status(Status::Failed, label, None);
                        out.diagnostic(&format!("error: {:#}", error));
                    }
                }
            }
            UnitOutcome::Skipped { name, reason, .. } => {
                out.status(Status::Skipped, name, Some(&format!("({})", reason)));
            }
            UnitOutcome::Failed { label, error } => {
                out.status(Status::Failed, label, None);
                out.diagnostic(&format!("error: {}", error));
            }
        }
    }
    print_summary(&mut out, &report, write_failures);
    out.flush();
    Ok(!report.has_failures() && write_failures == 0)
}

/// Reserve `destination` for `label`, failing if another unit already went there
fn claim(written: &mut HashMap<PathBuf, String>, destination: &Path, label: &str) -> anyhow::Result<()> {
    if let Some(previous) = written.get(destination) {
        anyhow::bail!(
            "{} would overwrite {}, already written from {}",
            label,
            destination.display(),
            previous
        );
    }
    written.insert(destination.to_path_buf(), label.to_string());
    Ok(())
}

/// Where a patched class goes: under `out_dir` by internal name, or in place
fn destination(input: &Path, out_dir: Option<&Path>, name: &str) -> PathBuf {
    match out_dir {
        Some(dir) => dir.join(format!("{}.class", name)),
        None => input.to_path_buf(),
    }
}

fn write_class(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn print_summary(out: &mut StyledOutput, report: &PipelineReport, write_failures: usize) {
    let failed = report.failed() + write_failures;
    out.newline();
    out.paint(Tone::Good, &format!("{} patched", report.patched() - write_failures));
    out.paint(Tone::Plain, ", ");
    out.paint(Tone::Caution, &format!("{} skipped", report.skipped()));
    out.paint(Tone::Plain, ", ");
    let tone = if failed > 0 { Tone::Bad } else { Tone::Plain };
    out.line(tone, &format!("{} failed", failed));
}
