//! End-to-end tests: init a repository, add outputs, commit, edit the
//! workspace, and diff revisions against each other and the workspace.

use hoard_cache::{
    AddOptions, CacheError, Destination, DiffOptions, ErrorKind, Repository, Revision,
    RevisionResolver,
};
use hoard_config::{save_config, RemoteConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path(), false).unwrap();
    (dir, repo)
}

/// Replaces a file's content; removing first avoids writing through links.
fn rewrite(path: &Path, content: &[u8]) {
    if path.exists() {
        fs::remove_file(path).unwrap();
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn add(repo: &Repository, targets: &[&str]) {
    let targets: Vec<PathBuf> = targets.iter().map(PathBuf::from).collect();
    let report = repo.add(&targets, &AddOptions::default()).unwrap();
    assert!(report.is_success(), "{:?}", report.failures());
}

fn head_vs_workspace(repo: &Repository) -> hoard_cache::DiffResult {
    repo.diff_revisions(&Revision::Head, None, &DiffOptions::all())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Diff scenarios
// ---------------------------------------------------------------------------

#[test]
fn first_snapshot_diff_is_empty() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("data.csv"), b"a,b\n1,2\n");
    add(&repo, &["data.csv"]);
    assert!(head_vs_workspace(&repo).is_empty());
}

#[test]
fn clean_workspace_matches_head() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("data.csv"), b"a,b\n1,2\n");
    add(&repo, &["data.csv"]);
    repo.commit("initial").unwrap();
    assert!(head_vs_workspace(&repo).is_empty());
}

#[test]
fn modify_and_rename_against_head() {
    let (dir, repo) = init();
    let root = dir.path();
    rewrite(&root.join("data.csv"), b"h1");
    rewrite(&root.join("old.txt"), b"h2");
    add(&repo, &["data.csv", "old.txt"]);
    repo.commit("first").unwrap();

    rewrite(&root.join("data.csv"), b"h1-new");
    fs::rename(root.join("old.txt"), root.join("new.txt")).unwrap();
    let report = repo
        .add(&[PathBuf::from("data.csv")], &AddOptions {
            force: true,
            ..AddOptions::default()
        })
        .unwrap();
    assert!(report.is_success());
    add(&repo, &["new.txt"]);
    repo.untrack(Path::new("old.txt")).unwrap();
    repo.commit("second").unwrap();

    let result = repo
        .diff_revisions(&Revision::HeadAncestor(1), Some(&Revision::Head), &DiffOptions::all())
        .unwrap();
    assert!(result.added.is_empty());
    assert!(result.deleted.is_empty());
    assert_eq!(result.modified.len(), 1);
    assert_eq!(result.modified[0].path, "data.csv");
    assert_eq!(result.renamed.len(), 1);
    assert_eq!(result.renamed[0].path.old, "old.txt");
    assert_eq!(result.renamed[0].path.new, "new.txt");
    assert!(result.not_in_cache.is_empty());
}

#[test]
fn workspace_edits_show_as_modified_and_deleted() {
    let (dir, repo) = init();
    let root = dir.path();
    rewrite(&root.join("model.bin"), b"weights v1");
    rewrite(&root.join("notes.txt"), b"notes");
    add(&repo, &["model.bin", "notes.txt"]);
    repo.commit("baseline").unwrap();

    rewrite(&root.join("model.bin"), b"weights v2, retrained");
    fs::remove_file(root.join("notes.txt")).unwrap();

    let result = head_vs_workspace(&repo);
    assert_eq!(result.modified.len(), 1);
    assert_eq!(result.modified[0].path, "model.bin");
    assert_eq!(result.deleted.len(), 1);
    assert_eq!(result.deleted[0].path, "notes.txt");
    assert_eq!(result.total(), 2);
}

#[test]
fn directory_diff_aggregate_and_recursive() {
    let (dir, repo) = init();
    let data = dir.path().join("data");
    rewrite(&data.join("a.csv"), b"a");
    rewrite(&data.join("nested").join("b.csv"), b"b");
    add(&repo, &["data"]);
    repo.commit("dir").unwrap();

    rewrite(&data.join("nested").join("b.csv"), b"b changed");
    rewrite(&data.join("c.csv"), b"c");

    let aggregate = head_vs_workspace(&repo);
    assert_eq!(aggregate.modified.len(), 1);
    assert_eq!(aggregate.modified[0].path, "data");

    let recursive = repo
        .diff_revisions(
            &Revision::Head,
            None,
            &DiffOptions {
                targets: vec![],
                recursive: true,
            },
        )
        .unwrap();
    assert_eq!(recursive.modified.len(), 1);
    assert_eq!(recursive.modified[0].path, "data/nested/b.csv");
    assert_eq!(recursive.added.len(), 1);
    assert_eq!(recursive.added[0].path, "data/c.csv");
}

#[test]
fn missing_blob_is_not_in_cache() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("big.bin"), b"large payload");
    add(&repo, &["big.bin"]);
    repo.commit("tracked").unwrap();

    let fp = repo.manifest().get("big.bin").unwrap().fingerprint;
    let blob = repo.store().blob_path(&fp);
    let mut perms = fs::metadata(&blob).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    fs::set_permissions(&blob, perms).unwrap();
    fs::remove_file(&blob).unwrap();

    let result = head_vs_workspace(&repo);
    assert_eq!(result.not_in_cache.len(), 1);
    assert_eq!(result.not_in_cache[0].path, "big.bin");
    assert_eq!(result.not_in_cache[0].hash, fp);
}

#[test]
fn json_output_has_all_keys() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("x"), b"x");
    add(&repo, &["x"]);
    repo.commit("x").unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&head_vs_workspace(&repo).to_json(false).unwrap()).unwrap();
    for key in ["added", "deleted", "modified", "renamed", "not in cache"] {
        assert!(json[key].is_array(), "missing {key}");
    }
}

// ---------------------------------------------------------------------------
// Add pipeline
// ---------------------------------------------------------------------------

#[test]
fn uninitialized_repository_is_fatal() {
    let dir = TempDir::new().unwrap();
    let err = Repository::open(dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RepositoryUninitialized);
}

#[test]
fn relinked_file_keeps_content() {
    let (dir, repo) = init();
    let path = dir.path().join("asset.bin");
    rewrite(&path, b"asset bytes");
    add(&repo, &["asset.bin"]);
    assert_eq!(fs::read(&path).unwrap(), b"asset bytes");
    let fp = repo.manifest().get("asset.bin").unwrap().fingerprint;
    assert_eq!(fs::read(repo.store().blob_path(&fp)).unwrap(), b"asset bytes");
}

#[test]
fn manifest_survives_reopen() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("a"), b"a");
    add(&repo, &["a"]);
    drop(repo);

    let reopened = Repository::open(dir.path()).unwrap();
    assert!(reopened.manifest().contains("a"));
}

#[test]
fn concurrent_adds_of_same_output_serialize() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("shared.bin"), b"shared");

    let outcomes: Vec<bool> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    repo.add(&[PathBuf::from("shared.bin")], &AddOptions::default())
                        .unwrap()
                        .outcomes
                        .remove(0)
                        .result
                        .unwrap()
                        .unchanged
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|unchanged| !**unchanged).count(), 1);
    assert_eq!(repo.manifest().len(), 1);
}

#[test]
fn to_remote_writes_remote_store_only() {
    let dir = TempDir::new().unwrap();
    let remote_dir = TempDir::new().unwrap();
    Repository::init(dir.path(), false).unwrap();

    let hoard_dir = dir.path().join(".hoard");
    let mut config = hoard_config::load_config(&hoard_dir).unwrap();
    config.transfer.enabled = true;
    config.remotes.insert(
        "backup".to_string(),
        RemoteConfig {
            url: remote_dir.path().to_string_lossy().into_owned(),
        },
    );
    save_config(&hoard_dir, &config).unwrap();
    let repo = Repository::open(dir.path()).unwrap();

    rewrite(&dir.path().join("dataset.bin"), b"remote bound");
    let opts = AddOptions {
        destination: Destination::ToRemote {
            remote: Some("backup".to_string()),
            jobs: Some(2),
        },
        ..AddOptions::default()
    };
    let report = repo.add(&[PathBuf::from("dataset.bin")], &opts).unwrap();
    assert!(report.is_success(), "{:?}", report.failures());

    let fp = repo.manifest().get("dataset.bin").unwrap().fingerprint;
    assert!(!repo.store().blob_path(&fp).exists());
    let remote = hoard_cache::CacheStore::new(remote_dir.path());
    assert!(remote.blob_path(&fp).is_file());
}

#[test]
fn to_remote_without_transfer_mode_fails_fast() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("a"), b"a");
    let opts = AddOptions {
        destination: Destination::ToRemote {
            remote: Some("r".to_string()),
            jobs: None,
        },
        ..AddOptions::default()
    };
    let err = repo.add(&[PathBuf::from("a")], &opts).unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgumentCombination { .. }));
    assert!(repo.manifest().is_empty());
}

#[test]
fn workspace_revision_resolves_live_state() {
    let (dir, repo) = init();
    rewrite(&dir.path().join("live.txt"), b"one");
    add(&repo, &["live.txt"]);
    let live = repo.resolve(&Revision::Workspace).unwrap().unwrap();
    assert_eq!(live, repo.manifest());
}
