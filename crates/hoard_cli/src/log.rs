//! `hoard log`: list committed revisions.

use crate::GlobalArgs;

/// Runs the `hoard log` command, printing newest revisions first.
pub fn run(json: bool, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let repo = global.open_repo()?;
    let entries = repo.revisions().entries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    if entries.is_empty() {
        if !global.quiet {
            eprintln!("No revisions committed yet");
        }
        return Ok(0);
    }
    for record in &entries {
        println!("{}  {:>4} outputs  {}", record.short_id(), record.entries, record.message);
        if global.verbose {
            println!("          id {} manifest {}", record.id, record.manifest);
        }
    }
    Ok(0)
}
