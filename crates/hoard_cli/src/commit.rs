//! `hoard commit`: freeze the working manifest as a revision.

use crate::GlobalArgs;

/// Runs the `hoard commit` command.
pub fn run(message: &str, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let repo = global.open_repo()?;
    let record = repo.commit(message)?;
    if !global.quiet {
        eprintln!(
            "  Committed {} ({} output{})",
            record.short_id(),
            record.entries,
            if record.entries == 1 { "" } else { "s" }
        );
    }
    Ok(0)
}
