//! Generated units handed to the toolchain.
//!
//! Every compile gets a fixed prelude unit, an entry unit that wraps the
//! manifest's entry source in the factory export, and one unit per
//! remaining source file. All of them are placed in the module's own
//! package and import the public `kiln.api` surface.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use kiln_workspace::{Manifest, SOURCE_EXTENSION};
use tracing::debug;

use crate::error::{BuildResult, CompileError};

/// Unit name of the generated prelude.
pub const PRELUDE_UNIT: &str = "__prelude";

/// Unit name of the generated entry wrapper.
pub const ENTRY_UNIT: &str = "__entry";

/// Export the entry unit must provide; the loader calls it to construct
/// the module.
pub const ENTRY_FACTORY: &str = "kiln_module_entry";

/// Game ticks per second, the unit behind the prelude's time helpers.
pub const TICKS_PER_SECOND: u32 = 20;

/// A unit written to the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedUnit {
    /// Unit name; the toolchain emits `<name>.wasm`.
    pub name: String,
    /// Path of the generated source.
    pub path: PathBuf,
    /// Workspace source it was generated from, if any.
    pub origin: Option<String>,
}

/// Render the prelude for `namespace`.
#[must_use]
pub fn prelude(namespace: &str) -> String {
    let ticks = TICKS_PER_SECOND;
    let minute = ticks.saturating_mul(60);
    let hour = minute.saturating_mul(60);
    let mut out = header(namespace, None);
    let _ = write!(
        out,
        "\n\
         const TICKS_PER_SECOND = {ticks}\n\
         fun ticks(n: Int): Int = n\n\
         fun seconds(n: Int): Int = n * {ticks}\n\
         fun minutes(n: Int): Int = n * {minute}\n\
         fun hours(n: Int): Int = n * {hour}\n\
         \n\
         fun context(): Context = kiln.api.context()\n\
         fun log(): Logger = context().logger\n\
         fun config(): Config = context().config\n\
         fun storage(): Storage = context().storage\n\
         fun commands(): Commands = context().commands\n\
         fun events(): Events = context().events\n"
    );
    out
}

fn header(namespace: &str, origin: Option<&str>) -> String {
    let mut out = String::from("// generated by kiln; do not edit\n");
    if let Some(origin) = origin {
        let _ = writeln!(out, "// source: {origin}");
    }
    let _ = writeln!(out, "package \"{namespace}\"");
    out.push_str("import kiln.api.*\n");
    out
}

/// Regenerate the staging directory `gen_dir` for one compile.
///
/// `sources` holds `(relative path, text)`; the entry is picked out by the
/// manifest. The directory is cleared first.
///
/// # Errors
///
/// Returns [`CompileError::Io`] if the staging area cannot be rewritten.
pub fn generate(
    gen_dir: &Path,
    manifest: &Manifest,
    namespace: &str,
    entry: &str,
    sources: &[(String, String)],
) -> BuildResult<Vec<GeneratedUnit>> {
    if gen_dir.exists() {
        std::fs::remove_dir_all(gen_dir).map_err(|e| CompileError::io(gen_dir, e))?;
    }
    std::fs::create_dir_all(gen_dir).map_err(|e| CompileError::io(gen_dir, e))?;

    let mut units = Vec::with_capacity(sources.len().saturating_add(1));
    units.push(write_unit(gen_dir, PRELUDE_UNIT, None, &prelude(namespace))?);

    let mut index = 0usize;
    for (path, text) in sources {
        if path == entry {
            continue;
        }
        let mut body = header(namespace, Some(path));
        body.push('\n');
        body.push_str(text);
        units.push(write_unit(gen_dir, &format!("unit_{index}"), Some(path), &body)?);
        index = index.saturating_add(1);
    }

    if let Some((path, text)) = sources.iter().find(|(path, _)| path == entry) {
        let mut body = header(namespace, Some(path));
        let _ = write!(
            body,
            "\n// module: {id} {version}\nexport fun {ENTRY_FACTORY}(): Module =\n",
            id = manifest.id.as_str().escape_debug(),
            version = manifest.version.escape_debug(),
        );
        body.push_str(text);
        if !body.ends_with('\n') {
            body.push('\n');
        }
        units.push(write_unit(gen_dir, ENTRY_UNIT, Some(path), &body)?);
    }

    debug!(module_id = %manifest.id, units = units.len(), dir = %gen_dir.display(), "Generated sources");
    Ok(units)
}

fn write_unit(
    dir: &Path,
    name: &str,
    origin: Option<&str>,
    body: &str,
) -> BuildResult<GeneratedUnit> {
    let path = dir.join(format!("{name}.{SOURCE_EXTENSION}"));
    std::fs::write(&path, body).map_err(|e| CompileError::io(&path, e))?;
    Ok(GeneratedUnit {
        name: name.to_string(),
        path,
        origin: origin.map(str::to_string),
    })
}
