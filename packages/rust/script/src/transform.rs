//! Rewriting rules applied to a parsed build script.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use docbuilder_shared::ScriptRules;

use crate::parser::{Call, Script, Statement};

/// Default build output folder, relative to the script's directory.
pub const DEFAULT_BUILD_DIR: &str = "build";

/// A build script after rewriting, ready to run in a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedScript {
    /// Install statements for imported dependencies (prelude first).
    pub installs: Vec<String>,
    /// Rewritten top-level statements in source order.
    pub statements: Vec<Statement>,
    /// Where the build call will write its HTML.
    pub build_dir: PathBuf,
    /// Number of deploy calls that were dropped.
    pub removed_deploys: usize,
}

impl TransformedScript {
    /// Whether the rewritten program does nothing.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Number of build calls in the rewritten program.
    pub fn build_calls(&self, rules: &ScriptRules) -> usize {
        self.statements
            .iter()
            .filter(|s| matches!(s, Statement::Call { call, .. } if call.operation() == rules.build_op))
            .count()
    }

    /// Render the program as source text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.installs {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(
            &Script {
                statements: self.statements.clone(),
            }
            .render(),
        );
        out
    }
}

/// Apply the rewriting rules to `script`, which lives in `script_dir`.
///
/// `skip` names dependencies that are already provided (typically the
/// package being documented).
pub fn rewrite(script: Script, script_dir: &Path, rules: &ScriptRules, skip: &[String]) -> TransformedScript {
    let mut build_dir = script_dir.join(DEFAULT_BUILD_DIR);
    let mut dependencies: Vec<String> = Vec::new();
    let mut statements = Vec::with_capacity(script.statements.len());
    let mut removed_deploys = 0;

    for stmt in script.statements {
        match stmt {
            Statement::Call { call, .. } if call.operation() == rules.deploy_op => {
                debug!(call = %call.name, "dropping deploy call");
                removed_deploys += 1;
            }
            Statement::Call { call, .. } if call.operation() == rules.build_op => {
                let (call, custom_dir) = rewrite_build_call(call, script_dir, rules);
                if let Some(dir) = custom_dir {
                    build_dir = dir;
                }
                statements.push(Statement::from_call(call));
            }
            Statement::Import { modules, text } => {
                for module in &modules {
                    let provided = rules.builtin_modules.contains(module) || skip.contains(module);
                    if !provided && !dependencies.contains(module) {
                        dependencies.push(module.clone());
                    }
                }
                statements.push(Statement::Import { modules, text });
            }
            other => statements.push(other),
        }
    }

    let installs = if dependencies.is_empty() {
        Vec::new()
    } else {
        std::iter::once(rules.install_prelude.clone())
            .chain(
                dependencies
                    .iter()
                    .map(|name| rules.install_template.replace("{name}", name)),
            )
            .collect()
    };

    TransformedScript {
        installs,
        statements,
        build_dir,
        removed_deploys,
    }
}

/// Force HTML output, pin `root` to the script directory and resolve a custom
/// `build` directory. Returns the custom directory when one was given.
fn rewrite_build_call(mut call: Call, script_dir: &Path, rules: &ScriptRules) -> (Call, Option<PathBuf>) {
    call.set_keyword("format", rules.html_format.clone());

    let custom_dir = match call.keyword("build").map(str::to_owned) {
        Some(value) => match string_literal(&value) {
            Some(relative) => Some(script_dir.join(relative)),
            None => {
                warn!(build = %value, "build directory is not a string literal, using default");
                call.set_keyword("build", quote(DEFAULT_BUILD_DIR));
                None
            }
        },
        None => None,
    };

    call.set_keyword("root", quote(&script_dir.to_string_lossy()));
    (call, custom_dir)
}

/// Contents of a plain `"..."` literal without escapes or interpolation.
fn string_literal(expr: &str) -> Option<&str> {
    let inner = expr.trim().strip_prefix('"')?.strip_suffix('"')?;
    if inner.contains(['"', '\\', '$']) {
        return None;
    }
    Some(inner)
}

/// Quote `s` as a string literal, escaping what the interpreter would expand.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
