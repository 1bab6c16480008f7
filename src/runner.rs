//! Pipeline runner behind the `discover`, `load` and `check` commands
//!
//! Builds the settings, factory and manager, runs the passes up to the
//! requested [`Stage`] and writes a report of every event they produce.
//! The returned flag is the verdict of the last pass run; `main` turns a
//! `false` into exit code 1.

use std::io::Write;
use std::path::Path;
use std::sync::mpsc::Receiver;
use strum::{Display, EnumString};
use tracing::info;

use crate::error::Result;
use crate::instance_key::InstanceKey;
use crate::manager::{ManagerEvent, ModuleManager};
use crate::module::ModuleFactory;
use crate::settings::Settings;

/// Last pass to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// Discovery and the dependency filter only
    Discover,
    /// Discovery, then the load pass
    Load,
    /// Discovery, load, then requirements checking
    Check,
}

/// Run the pipeline described by the settings file up to `stage`.
///
/// Discovery alone always succeeds. `Load` fails when any configured
/// instance failed to load, `Check` when a mandatory requirement is
/// unsatisfied. Settings problems and write failures are errors.
pub fn run<W: Write>(settings_path: &Path, stage: Stage, out: &mut W) -> Result<bool> {
    info!("Loading settings from: {:?}", settings_path);
    let settings = Settings::load_from_file(settings_path)?;
    settings.validate()?;

    let (mut manager, events) =
        ModuleManager::from_settings(&settings, ModuleFactory::with_builtin());

    let report = manager.init();
    for (dir, reason) in &report.skipped {
        writeln!(out, "  skipped {}: {}", dir.display(), reason)?;
    }
    report_events(&events, out)?;
    if stage == Stage::Discover {
        write_available(&manager, out)?;
        return Ok(true);
    }

    let loaded = manager.load_modules(settings.modules_sequence());
    report_events(&events, out)?;
    for key in manager.loaded_instance_keys() {
        writeln!(out, "  loaded {}", key)?;
    }
    for failure in manager.load_failures() {
        writeln!(out, "  failed {}: {}", failure.entry, failure.kind)?;
    }
    if stage == Stage::Load {
        return Ok(loaded);
    }

    let satisfied = manager.check_requirements();
    report_events(&events, out)?;
    Ok(satisfied)
}

/// Print the parts of an instance key. Returns whether it is valid.
pub fn print_key<W: Write>(raw: &str, out: &mut W) -> Result<bool> {
    let key = InstanceKey::from_string(raw);
    if !key.is_valid() {
        writeln!(out, "✗ '{}' is not a valid instance key", raw)?;
        return Ok(false);
    }
    writeln!(out, "key:    {}", key)?;
    writeln!(out, "module: {}", key.module())?;
    writeln!(out, "id:     {}", key.id())?;
    writeln!(out, "custom: {}", key.is_custom())?;
    Ok(true)
}

fn write_available<W: Write>(manager: &ModuleManager, out: &mut W) -> Result<()> {
    for name in manager.available_modules() {
        let Some(descriptor) = manager.module_descriptor(&name) else {
            continue;
        };
        let location = manager
            .module_location(&name)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        writeln!(
            out,
            "  {} (type: {}, interface: {}, requires: [{}]) at {}",
            name,
            descriptor.get_str("type").unwrap_or("?"),
            descriptor.get_str("interface").unwrap_or("?"),
            descriptor.required_modules().join(", "),
            location
        )?;
    }
    Ok(())
}

/// Drain whatever the last pass emitted.
fn report_events<W: Write>(events: &Receiver<ManagerEvent>, out: &mut W) -> Result<()> {
    for event in events.try_iter() {
        match event {
            ManagerEvent::InitDone { failed } if failed.is_empty() => {
                writeln!(out, "✓ Module discovery complete")?;
            }
            ManagerEvent::InitDone { failed } => {
                writeln!(
                    out,
                    "✓ Module discovery complete, unusable: {}",
                    failed.join(", ")
                )?;
            }
            ManagerEvent::ModulesLoaded => writeln!(out, "✓ All modules loaded")?,
            ManagerEvent::ModulesFailed(failed) => {
                writeln!(out, "✗ Modules failed to load: {}", failed.join(", "))?;
            }
            ManagerEvent::RequirementsProgress(message) => writeln!(out, "  … {}", message)?,
            ManagerEvent::RequirementsResult(entries) => {
                for entry in entries {
                    writeln!(out, "  {}", entry)?;
                }
            }
            ManagerEvent::RequirementsComplete(true) => {
                writeln!(out, "✓ Requirements satisfied")?;
            }
            ManagerEvent::RequirementsComplete(false) => {
                writeln!(out, "✗ Requirements not satisfied")?;
            }
        }
    }
    Ok(())
}
