//! Structural rewriting of third-party documentation build scripts.
//!
//! A script is split into top-level statements ([`parser`]), then
//! [`transform::rewrite`] drops deploy calls, forces HTML output on the build
//! call, pins its `root` to the script directory and prepends install
//! statements for imported dependencies. The result is only ever executed in a
//! separate worker process.

pub mod parser;
pub mod transform;

use std::fs;
use std::path::Path;

use tracing::{debug, instrument};

use docbuilder_shared::{DocBuilderError, Result, ScriptRules};

pub use parser::{Argument, Call, Script, Statement, parse, parse_call};
pub use transform::{DEFAULT_BUILD_DIR, TransformedScript, rewrite};

/// Read, parse and rewrite the build script at `script_path`.
///
/// `skip` names dependencies that must not get an install statement.
#[instrument(skip_all, fields(script = %script_path.display()))]
pub fn transform(script_path: &Path, rules: &ScriptRules, skip: &[String]) -> Result<TransformedScript> {
    let source = fs::read_to_string(script_path).map_err(|e| DocBuilderError::io(script_path, e))?;
    let script_dir = script_path
        .parent()
        .ok_or_else(|| DocBuilderError::script(format!("{} has no parent directory", script_path.display())))?;
    let script_dir = fs::canonicalize(script_dir).map_err(|e| DocBuilderError::io(script_dir, e))?;

    let script = parse(&source)?;
    let rewritten = rewrite(script, &script_dir, rules, skip);
    debug!(
        statements = rewritten.statements.len(),
        installs = rewritten.installs.len(),
        removed_deploys = rewritten.removed_deploys,
        build_dir = %rewritten.build_dir.display(),
        "script transformed"
    );
    Ok(rewritten)
}
