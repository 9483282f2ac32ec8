// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

use super::*;
use mill_core::FakeClock;
use std::time::Instant;

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    registry: Arc<RepoRegistry<FakeClock>>,
}

async fn fixture(indexer: Option<&str>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let registry = RepoRegistry::open(
        RepoCatalog::new(root.join("repos.json")),
        root.join("repos"),
        indexer.map(String::from),
        CloneEngine::new(),
        FakeClock::new(),
    )
    .await
    .unwrap();
    Fixture { _dir: dir, root, registry }
}

fn seed_folder(root: &Path) -> PathBuf {
    let src = root.join("seed");
    std::fs::create_dir_all(src.join("docs")).unwrap();
    std::fs::write(src.join("README.md"), "hello\n").unwrap();
    std::fs::write(src.join("docs/guide.md"), "guide\n").unwrap();
    src
}

fn seed_git_repo(root: &Path) -> PathBuf {
    let src = root.join("git-seed");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("file.txt"), "tracked\n").unwrap();
    for args in [
        vec!["init", "--quiet"],
        vec!["config", "user.email", "specs@example.com"],
        vec!["config", "user.name", "Specs"],
        vec!["add", "."],
        vec!["commit", "--quiet", "-m", "seed"],
    ] {
        let status = std::process::Command::new("git")
            .args(&args)
            .current_dir(&src)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }
    src
}

#[test]
fn repo_name_validation() {
    assert!(validate_repo_name("demo").is_ok());
    assert!(validate_repo_name("my-app_2.0").is_ok());
    assert!(validate_repo_name("0leading-digit").is_ok());

    assert!(validate_repo_name("").is_err());
    assert!(validate_repo_name(".hidden").is_err());
    assert!(validate_repo_name("has/slash").is_err());
    assert!(validate_repo_name("has space").is_err());
    assert!(validate_repo_name(&"x".repeat(65)).is_err());
}

#[tokio::test]
async fn folder_registration_reaches_ready() {
    let f = fixture(None).await;
    let src = seed_folder(&f.root);

    let repo = f
        .registry
        .register("demo", RepoKind::Folder, src.display().to_string(), false)
        .await
        .unwrap();
    assert_eq!(repo.registration_status, RegistrationStatus::Cloning);
    assert!(f.registry.local_path("demo").is_none(), "not usable until ready");

    let registry = Arc::clone(&f.registry);
    wait_until("folder clone", || {
        registry.get("demo").map(|r| r.registration_status) == Some(RegistrationStatus::Ready)
    })
    .await;

    let path = f.registry.local_path("demo").unwrap();
    assert_eq!(std::fs::read_to_string(path.join("README.md")).unwrap(), "hello\n");
}

#[tokio::test]
async fn git_registration_captures_metadata() {
    let f = fixture(None).await;
    let src = seed_git_repo(&f.root);

    f.registry
        .register("gitrepo", RepoKind::Git, src.display().to_string(), false)
        .await
        .unwrap();

    let registry = Arc::clone(&f.registry);
    wait_until("git clone", || {
        registry.get("gitrepo").map(|r| r.registration_status)
            == Some(RegistrationStatus::Ready)
    })
    .await;

    let repo = f.registry.get("gitrepo").unwrap();
    let meta = repo.git_metadata.expect("git metadata captured");
    assert!(meta.head_commit.is_some());
    assert!(f.registry.local_path("gitrepo").unwrap().join("file.txt").exists());
}

#[tokio::test]
async fn failed_clone_lands_in_clone_failed() {
    let f = fixture(None).await;
    f.registry
        .register("broken", RepoKind::Git, "/nonexistent/source/repo".to_string(), false)
        .await
        .unwrap();

    let registry = Arc::clone(&f.registry);
    wait_until("clone failure", || {
        registry.get("broken").map(|r| r.registration_status)
            == Some(RegistrationStatus::CloneFailed)
    })
    .await;
    assert!(f.registry.local_path("broken").is_none());
}

#[tokio::test]
async fn index_aware_registration_runs_the_indexer() {
    let f = fixture(Some("true")).await;
    let src = seed_folder(&f.root);

    f.registry
        .register("indexed", RepoKind::Folder, src.display().to_string(), true)
        .await
        .unwrap();

    let registry = Arc::clone(&f.registry);
    wait_until("index build", || {
        registry.get("indexed").map(|r| (r.registration_status, r.index_status))
            == Some((RegistrationStatus::Ready, IndexStatus::Built))
    })
    .await;
}

#[tokio::test]
async fn failing_indexer_lands_in_index_failed() {
    let f = fixture(Some("false")).await;
    let src = seed_folder(&f.root);

    f.registry
        .register("sad-index", RepoKind::Folder, src.display().to_string(), true)
        .await
        .unwrap();

    let registry = Arc::clone(&f.registry);
    wait_until("index failure", || {
        registry.get("sad-index").map(|r| r.registration_status)
            == Some(RegistrationStatus::IndexFailed)
    })
    .await;
    let repo = f.registry.get("sad-index").unwrap();
    assert_eq!(repo.index_status, IndexStatus::Failed);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let f = fixture(None).await;
    let src = seed_folder(&f.root);
    f.registry
        .register("dup", RepoKind::Folder, src.display().to_string(), false)
        .await
        .unwrap();
    let err = f
        .registry
        .register("dup", RepoKind::Folder, src.display().to_string(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Exists(_)));
}

#[tokio::test]
async fn unregister_removes_record_and_clone() {
    let f = fixture(None).await;
    let src = seed_folder(&f.root);
    f.registry
        .register("gone", RepoKind::Folder, src.display().to_string(), false)
        .await
        .unwrap();
    let registry = Arc::clone(&f.registry);
    wait_until("clone", || {
        registry.get("gone").map(|r| r.registration_status) == Some(RegistrationStatus::Ready)
    })
    .await;

    let clone_path = f.registry.get("gone").unwrap().local_path;
    f.registry.unregister("gone").await.unwrap();
    assert!(f.registry.get("gone").is_none());
    assert!(!clone_path.exists());

    assert!(matches!(
        f.registry.unregister("gone").await.unwrap_err(),
        RegistryError::NotFound(_)
    ));
}

#[tokio::test]
async fn browse_lists_and_reads_within_the_root() {
    let f = fixture(None).await;
    let src = seed_folder(&f.root);
    f.registry
        .register("browse", RepoKind::Folder, src.display().to_string(), false)
        .await
        .unwrap();
    let registry = Arc::clone(&f.registry);
    wait_until("clone", || {
        registry.get("browse").map(|r| r.registration_status)
            == Some(RegistrationStatus::Ready)
    })
    .await;

    let entries = f.registry.list_dir("browse", "").await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["README.md", "docs"]);
    assert!(entries.iter().any(|e| e.name == "docs" && e.is_dir));

    let content = f.registry.read_content("browse", "docs/guide.md").await.unwrap();
    assert_eq!(content, b"guide\n");

    assert!(matches!(
        f.registry.read_content("browse", "docs/missing.md").await.unwrap_err(),
        RegistryError::NoSuchPath(_)
    ));
}

#[tokio::test]
async fn browse_rejects_traversal_and_symlink_escape() {
    let f = fixture(None).await;
    let src = seed_folder(&f.root);
    // A file outside the repo that must stay unreachable.
    std::fs::write(f.root.join("secret.txt"), "secret").unwrap();

    f.registry
        .register("guarded", RepoKind::Folder, src.display().to_string(), false)
        .await
        .unwrap();
    let registry = Arc::clone(&f.registry);
    wait_until("clone", || {
        registry.get("guarded").map(|r| r.registration_status)
            == Some(RegistrationStatus::Ready)
    })
    .await;

    for escape in ["../secret.txt", "..", "/etc/passwd", "docs/../../secret.txt"] {
        let err = f.registry.read_content("guarded", escape).await.unwrap_err();
        assert!(matches!(err, RegistryError::PathEscape(_)), "{escape} must be rejected");
    }

    // Symlink planted inside the clone pointing outside of it.
    let clone_path = f.registry.get("guarded").unwrap().local_path;
    std::os::unix::fs::symlink(f.root.join("secret.txt"), clone_path.join("sneaky")).unwrap();
    let err = f.registry.read_content("guarded", "sneaky").await.unwrap_err();
    assert!(matches!(err, RegistryError::PathEscape(_)));
}

#[tokio::test]
async fn browse_refuses_unready_repos() {
    let f = fixture(None).await;
    f.registry
        .register("pending", RepoKind::Git, "/nonexistent/never-clones".to_string(), false)
        .await
        .unwrap();

    // Whether still cloning or already failed, browsing is refused.
    let err = f.registry.list_dir("pending", "").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotReady(..)));
}
