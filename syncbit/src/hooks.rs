//! Turning configured hook lists into the commands a pipeline stage runs

use common::{HookKind, HookSet, TransferSpec};

/// Commands for one hook stage, in execution order
///
/// Global hooks come first and run as configured. Hooks scoped to the transfer follow, each
/// prefixed with a `cd` into the directory of the side the category belongs to.
pub fn commands(global: &HookSet, spec: &TransferSpec, kind: HookKind) -> Vec<String> {
    let dir = remote::shell_escape(spec.path(kind.side()));
    global[kind]
        .iter()
        .cloned()
        .chain(spec.scoped(kind).iter().map(|hook| format!("cd {dir} && {hook}")))
        .collect()
}
