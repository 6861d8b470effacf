//! `hoard init`: repository creation.

use hoard_cache::Repository;

use crate::GlobalArgs;

/// Runs the `hoard init` command.
///
/// Initializes `--repo` if given, otherwise the current directory.
/// Returns exit code 0 on success.
pub fn run(force: bool, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = match &global.repo {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let repo = Repository::init(&root, force)?;
    if !global.quiet {
        let verb = if force { "Reinitialized" } else { "Initialized" };
        eprintln!("  {verb} hoard repository in {}", repo.hoard_dir().display());
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn global(dir: &TempDir) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            repo: Some(dir.path().to_path_buf()),
        }
    }

    #[test]
    fn init_creates_metadata() {
        let dir = TempDir::new().unwrap();
        assert_eq!(run(false, &global(&dir)).unwrap(), 0);
        assert!(dir.path().join(".hoard").join("config.toml").is_file());
    }

    #[test]
    fn second_init_needs_force() {
        let dir = TempDir::new().unwrap();
        run(false, &global(&dir)).unwrap();
        assert!(run(false, &global(&dir)).is_err());
        assert_eq!(run(true, &global(&dir)).unwrap(), 0);
    }
}
