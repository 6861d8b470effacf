//! `hoard diff`: compare two snapshots.

use std::fmt::Write as _;
use std::fs;

use hoard_cache::{DiffOptions, DiffResult, Revision};

use crate::{absolutize, DiffArgs, GlobalArgs};

/// Runs the `hoard diff` command.
///
/// Always exits 0 when the comparison succeeds, whether or not anything
/// changed.
pub fn run(args: &DiffArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let repo = global.open_repo()?;

    let a: Revision = args.a_rev.parse()?;
    let b = args
        .b_rev
        .as_deref()
        .map(str::parse::<Revision>)
        .transpose()?;
    let mut targets = Vec::with_capacity(args.targets.len());
    for target in &args.targets {
        let (_, tracked) = repo.tracked_path(&absolutize(target)?)?;
        targets.push(tracked);
    }
    let opts = DiffOptions {
        targets,
        recursive: args.recursive,
    };

    let result = repo.diff_revisions(&a, b.as_ref(), &opts)?;

    let rendered = if args.json || args.pretty {
        let mut json = result.to_json(args.pretty)?;
        json.push('\n');
        json
    } else if args.summary {
        render_summary(&result)
    } else {
        render_listing(&result)
    };

    match &args.output {
        Some(path) => {
            fs::write(path, rendered)?;
            if !global.quiet {
                eprintln!("     Written {}", path.display());
            }
        }
        None => print!("{rendered}"),
    }
    Ok(0)
}

/// Per-category counts, e.g. `2 files added, 1 file modified`.
fn render_summary(result: &DiffResult) -> String {
    if result.is_empty() {
        return "No changes found\n".to_string();
    }
    let counts = [
        (result.added.len(), "added"),
        (result.deleted.len(), "deleted"),
        (result.modified.len(), "modified"),
        (result.renamed.len(), "renamed"),
        (result.not_in_cache.len(), "not in cache"),
    ];
    let parts: Vec<String> = counts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} file{} {label}", if *n == 1 { "" } else { "s" }))
        .collect();
    format!("{}\n", parts.join(", "))
}

/// One section per non-empty category with abbreviated hashes.
fn render_listing(result: &DiffResult) -> String {
    if result.is_empty() {
        return "No changes found\n".to_string();
    }
    let mut out = String::new();

    let mut section = |title: &str, rows: Vec<String>| {
        if rows.is_empty() {
            return;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "{title}:");
        for row in rows {
            let _ = writeln!(out, "    {row}");
        }
    };

    section(
        "Added",
        result
            .added
            .iter()
            .map(|c| format!("{}  {}", c.hash.short(), c.path))
            .collect(),
    );
    section(
        "Deleted",
        result
            .deleted
            .iter()
            .map(|c| format!("{}  {}", c.hash.short(), c.path))
            .collect(),
    );
    section(
        "Modified",
        result
            .modified
            .iter()
            .map(|c| format!("{}..{}  {}", c.hash.old.short(), c.hash.new.short(), c.path))
            .collect(),
    );
    section(
        "Renamed",
        result
            .renamed
            .iter()
            .map(|c| format!("{}  {} -> {}", c.hash.short(), c.path.old, c.path.new))
            .collect(),
    );
    section(
        "Not in cache",
        result
            .not_in_cache
            .iter()
            .map(|c| format!("{}  {}", c.hash.short(), c.path))
            .collect(),
    );
    out
}
