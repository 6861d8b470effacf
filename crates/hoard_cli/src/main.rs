//! Hoard CLI: the command-line front end of the artifact tracker.
//!
//! Provides `hoard init` to create a repository, `hoard add` to track outputs,
//! `hoard remove` to stop tracking them, `hoard commit` to freeze the working
//! manifest, `hoard diff` to compare snapshots and `hoard log` to list history.

#![warn(missing_docs)]

mod add;
mod commit;
mod diff;
mod init;
mod log;
mod logging;
mod remove;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use hoard_cache::Repository;

/// Hoard: content-addressed tracking for large files and directories.
#[derive(Parser, Debug)]
#[command(name = "hoard", version, about = "Hoard artifact tracker")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Repository root. Searched upwards from the current directory if omitted.
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a repository in the current directory (or `--repo`).
    Init {
        /// Reinitialize an existing repository. Cached content is kept.
        #[arg(short, long)]
        force: bool,
    },
    /// Track files or directories.
    Add(AddArgs),
    /// Stop tracking outputs. Workspace files and cached content stay.
    Remove {
        /// Tracked outputs to forget.
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },
    /// Record the tracked outputs as a new revision.
    Commit {
        /// Commit message.
        #[arg(short, long)]
        message: String,
    },
    /// Show changes between two revisions, or a revision and the workspace.
    Diff(DiffArgs),
    /// List committed revisions, newest first.
    Log {
        /// Print the history as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Arguments for the `hoard add` subcommand.
#[derive(Parser, Debug)]
pub struct AddArgs {
    /// Files or directories to track.
    #[arg(required = true)]
    pub targets: Vec<PathBuf>,

    /// Record fingerprints without storing content in the cache.
    #[arg(long)]
    pub no_commit: bool,

    /// Expand wildcard patterns in targets.
    #[arg(long)]
    pub glob: bool,

    /// Track the content under this path instead of the target's own.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Store content directly in a remote instead of the local cache.
    #[arg(long)]
    pub to_remote: bool,

    /// Remote to use with `--to-remote` (defaults to `core.remote`).
    #[arg(short, long)]
    pub remote: Option<String>,

    /// Parallel transfer jobs for `--to-remote`.
    #[arg(long)]
    pub remote_jobs: Option<usize>,

    /// Overwrite outputs already tracked with different content.
    #[arg(short, long)]
    pub force: bool,

    /// Leave the workspace copy in place instead of linking it from the cache.
    #[arg(long)]
    pub no_relink: bool,

    /// Number of targets processed in parallel.
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Arguments for the `hoard diff` subcommand.
#[derive(Parser, Debug)]
pub struct DiffArgs {
    /// Old revision (`HEAD`, `HEAD~n`, a revision id, or `workspace`).
    #[arg(default_value = "HEAD")]
    pub a_rev: String,

    /// New revision. The workspace if omitted.
    pub b_rev: Option<String>,

    /// Restrict the comparison to these paths.
    #[arg(short, long, num_args = 1..)]
    pub targets: Vec<PathBuf>,

    /// Report individual files inside tracked directories.
    #[arg(short = 'R', long)]
    pub recursive: bool,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,

    /// Indent JSON output. Implies `--json`.
    #[arg(long)]
    pub pretty: bool,

    /// Write the output to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print only the number of changes per category.
    #[arg(long, conflicts_with_all = ["json", "pretty"])]
    pub summary: bool,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Explicit repository root.
    pub repo: Option<PathBuf>,
}

impl GlobalArgs {
    /// Opens the repository named by `--repo`, or the one enclosing the
    /// current directory.
    pub fn open_repo(&self) -> Result<Repository, Box<dyn std::error::Error>> {
        let repo = match &self.repo {
            Some(root) => Repository::open(root)?,
            None => Repository::discover(&std::env::current_dir()?)?,
        };
        Ok(repo)
    }
}

/// Makes a command-line path absolute against the current directory.
///
/// The core resolves relative paths against the repository root, which
/// differs from the caller's directory when running inside a subdirectory.
pub(crate) fn absolutize(path: &Path) -> Result<PathBuf, std::io::Error> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn main() {
    let cli = Cli::parse();

    logging::init(logging::Verbosity::from_flags(cli.quiet, cli.verbose));

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        repo: cli.repo,
    };

    let result = match cli.command {
        Command::Init { force } => init::run(force, &global),
        Command::Add(ref args) => add::run(args, &global),
        Command::Remove { ref targets } => remove::run(targets, &global),
        Command::Commit { ref message } => commit::run(message, &global),
        Command::Diff(ref args) => diff::run(args, &global),
        Command::Log { json } => log::run(json, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_init_default() {
        let cli = Cli::parse_from(["hoard", "init"]);
        match cli.command {
            Command::Init { force } => assert!(!force),
            _ => panic!("expected Init command"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["hoard", "init", "--force"]);
        match cli.command {
            Command::Init { force } => assert!(force),
            _ => panic!("expected Init command"),
        }
    }

    #[test]
    fn parse_add_default() {
        let cli = Cli::parse_from(["hoard", "add", "data.csv"]);
        match cli.command {
            Command::Add(ref args) => {
                assert_eq!(args.targets, vec![PathBuf::from("data.csv")]);
                assert!(!args.no_commit);
                assert!(!args.glob);
                assert!(args.out.is_none());
                assert!(!args.to_remote);
                assert!(args.remote.is_none());
                assert!(args.remote_jobs.is_none());
                assert!(!args.force);
                assert!(!args.no_relink);
                assert!(args.jobs.is_none());
            }
            _ => panic!("expected Add command"),
        }
    }

    #[test]
    fn parse_add_with_args() {
        let cli = Cli::parse_from([
            "hoard",
            "add",
            "model.bin",
            "--to-remote",
            "--remote",
            "backup",
            "--remote-jobs",
            "4",
            "--jobs",
            "2",
            "--no-relink",
        ]);
        match cli.command {
            Command::Add(ref args) => {
                assert!(args.to_remote);
                assert_eq!(args.remote.as_deref(), Some("backup"));
                assert_eq!(args.remote_jobs, Some(4));
                assert_eq!(args.jobs, Some(2));
                assert!(args.no_relink);
            }
            _ => panic!("expected Add command"),
        }
    }

    #[test]
    fn parse_add_requires_target() {
        assert!(Cli::try_parse_from(["hoard", "add"]).is_err());
    }

    #[test]
    fn parse_remove() {
        let cli = Cli::parse_from(["hoard", "remove", "a", "b"]);
        match cli.command {
            Command::Remove { ref targets } => assert_eq!(targets.len(), 2),
            _ => panic!("expected Remove command"),
        }
    }

    #[test]
    fn parse_commit() {
        let cli = Cli::parse_from(["hoard", "commit", "-m", "baseline"]);
        match cli.command {
            Command::Commit { ref message } => assert_eq!(message, "baseline"),
            _ => panic!("expected Commit command"),
        }
    }

    #[test]
    fn parse_diff_default() {
        let cli = Cli::parse_from(["hoard", "diff"]);
        match cli.command {
            Command::Diff(ref args) => {
                assert_eq!(args.a_rev, "HEAD");
                assert!(args.b_rev.is_none());
                assert!(args.targets.is_empty());
                assert!(!args.recursive);
                assert!(!args.json);
                assert!(!args.summary);
                assert!(args.output.is_none());
            }
            _ => panic!("expected Diff command"),
        }
    }

    #[test]
    fn parse_diff_with_args() {
        let cli = Cli::parse_from([
            "hoard",
            "diff",
            "HEAD~1",
            "HEAD",
            "--targets",
            "data",
            "-R",
            "--pretty",
            "--output",
            "diff.json",
        ]);
        match cli.command {
            Command::Diff(ref args) => {
                assert_eq!(args.a_rev, "HEAD~1");
                assert_eq!(args.b_rev.as_deref(), Some("HEAD"));
                assert_eq!(args.targets, vec![PathBuf::from("data")]);
                assert!(args.recursive);
                assert!(args.pretty);
                assert_eq!(args.output, Some(PathBuf::from("diff.json")));
            }
            _ => panic!("expected Diff command"),
        }
    }

    #[test]
    fn parse_diff_summary_conflicts_with_json() {
        assert!(Cli::try_parse_from(["hoard", "diff", "--summary", "--json"]).is_err());
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["hoard", "--quiet", "--repo", "/tmp/r", "log"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.repo, Some(PathBuf::from("/tmp/r")));
    }

    #[test]
    fn parse_verbose_flag() {
        let cli = Cli::parse_from(["hoard", "--verbose", "init"]);
        assert!(cli.verbose);
        assert!(!cli.quiet);
    }

    #[test]
    fn absolutize_keeps_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(absolutize(dir.path()).unwrap(), dir.path());
    }
}
