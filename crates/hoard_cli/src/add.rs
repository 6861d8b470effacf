//! `hoard add`: track outputs.

use hoard_cache::{AddOptions, Destination};

use crate::{absolutize, AddArgs, GlobalArgs};

/// Runs the `hoard add` command.
///
/// Option conflicts abort before any target is touched. Per-target failures
/// are printed and turn the exit code to 1 without stopping other targets.
pub fn run(args: &AddArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let repo = global.open_repo()?;

    let out = args.out.as_deref().map(absolutize).transpose()?;
    let destination =
        Destination::from_flags(out, args.to_remote, args.remote.clone(), args.remote_jobs)?;
    let opts = AddOptions {
        no_commit: args.no_commit,
        glob: args.glob,
        destination,
        force: args.force,
        relink: !args.no_relink,
        jobs: args.jobs,
        cancel: None,
    };
    let targets = args
        .targets
        .iter()
        .map(|t| absolutize(t))
        .collect::<Result<Vec<_>, _>>()?;

    let report = repo.add(&targets, &opts)?;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(added) if added.unchanged => {
                if global.verbose {
                    eprintln!("   Unchanged {}", added.entry.path);
                }
            }
            Ok(added) => {
                if !global.quiet {
                    eprintln!(
                        "       Added {} ({})",
                        added.entry.path,
                        added.entry.fingerprint.short()
                    );
                }
            }
            Err(e) => eprintln!("error: {}: {e}", outcome.target.display()),
        }
    }

    if !global.quiet {
        eprintln!(
            "    Finished {} target(s), {} new blob(s)",
            report.outcomes.len(),
            report.blobs_written()
        );
    }
    Ok(if report.is_success() { 0 } else { 1 })
}
