//! `hoard remove`: stop tracking outputs.

use std::path::PathBuf;

use crate::{absolutize, GlobalArgs};

/// Runs the `hoard remove` command.
///
/// Returns exit code 1 if any target was not tracked.
pub fn run(targets: &[PathBuf], global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let repo = global.open_repo()?;
    let mut missing = 0;
    for target in targets {
        match repo.untrack(&absolutize(target)?)? {
            Some(entry) => {
                if !global.quiet {
                    eprintln!("     Removed {}", entry.path);
                }
            }
            None => {
                eprintln!("warning: {} is not tracked", target.display());
                missing += 1;
            }
        }
    }
    Ok(if missing == 0 { 0 } else { 1 })
}
