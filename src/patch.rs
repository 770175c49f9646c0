//! Unified-diff application inside a container workspace.
//!
//! Strategies are tried in order from strict to tolerant; the first success
//! wins. When every strategy fails, the diagnostic output of the run is
//! returned and any `.rej`/`.orig` droppings left by partial attempts are
//! deleted so a failed application can never look like a success to later
//! steps.

use std::time::Duration;

use tracing::{info, warn};

use crate::container::{ContainerHandle, ContainerManager};
use crate::errors::PatchError;

/// Ordered application strategies. Each is a shell command reading the
/// patch file at `$PATCH_FILE`.
const STRATEGIES: &[(&str, &str)] = &[
    ("git-apply", "git apply --verbose \"$PATCH_FILE\""),
    ("git-apply-reject", "git apply --verbose --reject \"$PATCH_FILE\""),
    (
        "git-apply-whitespace",
        "git apply --verbose --ignore-space-change --ignore-whitespace \"$PATCH_FILE\"",
    ),
    ("patch-p1", "patch -p1 --batch < \"$PATCH_FILE\""),
    ("patch-fuzz", "patch -p1 --batch --fuzz=5 < \"$PATCH_FILE\""),
];

const PATCH_TIMEOUT: Duration = Duration::from_secs(120);
const HEREDOC_SENTINEL: &str = "PATCHBENCH_PATCH_EOF";

/// Apply `patch_text` at `workdir` inside the container. Returns the
/// combined output of the winning strategy; an empty patch is a no-op
/// success.
pub fn apply_in_container(
    containers: &ContainerManager,
    handle: &ContainerHandle,
    patch_text: &str,
    label: &str,
    workdir: &str,
) -> Result<String, PatchError> {
    if patch_text.trim().is_empty() {
        info!(label, "empty patch, nothing to apply");
        return Ok("empty patch - nothing to apply".to_string());
    }

    let script = application_script(patch_text, label);
    let result = containers.exec(handle, &script, workdir, PATCH_TIMEOUT)?;

    if result.success() {
        info!(label, container = %handle.name, "patch applied");
        Ok(result.output)
    } else {
        warn!(label, container = %handle.name, "all patch strategies exhausted");
        Err(PatchError::Exhausted {
            label: label.to_string(),
            diagnostic: result.output,
        })
    }
}

fn application_script(patch_text: &str, label: &str) -> String {
    let mut script = String::new();

    // Exactly one trailing newline before the sentinel; patch tools reject
    // trailing blank lines.
    let body = patch_text.trim_end();
    script.push_str(&format!(
        "PATCH_FILE=/tmp/{label}.patch\n\
         cat > \"$PATCH_FILE\" << '{HEREDOC_SENTINEL}'\n\
         {body}\n\
         {HEREDOC_SENTINEL}\n"
    ));

    for (name, command) in STRATEGIES {
        script.push_str(&format!(
            "echo \"=== strategy: {name} ===\"\n\
             if {command} 2>&1; then\n\
                 echo \"strategy {name} succeeded\"\n\
                 rm -f \"$PATCH_FILE\"\n\
                 exit 0\n\
             fi\n"
        ));
    }

    // Tolerant attempts may leave partial-application droppings; they must
    // not survive to look like an applied patch.
    script.push_str(
        "echo \"=== all patch strategies failed ===\"\n\
         find . -name '*.rej' -delete 2>/dev/null\n\
         find . -name '*.orig' -delete 2>/dev/null\n\
         rm -f \"$PATCH_FILE\"\n\
         exit 1\n",
    );

    script
}

/// File paths touched by a unified diff, from `+++ b/` and `diff --git`
/// headers.
pub fn changed_files(patch_text: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in patch_text.lines() {
        let path = if let Some(rest) = line.strip_prefix("+++ b/") {
            Some(rest)
        } else if let Some(rest) = line.strip_prefix("diff --git a/") {
            rest.split(" b/").nth(1)
        } else {
            None
        };

        if let Some(path) = path {
            let path = path.trim();
            if !path.is_empty() && !files.iter().any(|f| f == path) {
                files.push(path.to_string());
            }
        }
    }
    files
}
