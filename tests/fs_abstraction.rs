// tests/fs_abstraction.rs

use std::error::Error;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use watchrun::fs::mock::MockFileSystem;
use watchrun::fs::{FileSystem, RealFileSystem};
use watchrun::watch::{collect_matching_files, compute_file_hash, WatchTarget, DEFAULT_IGNORES};

type TestResult = Result<(), Box<dyn Error>>;

const HELLO_WORLD_BLAKE3: &str =
    "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24";

fn default_ignores() -> Vec<String> {
    DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect()
}

#[test]
fn mock_fs_hashes_contents() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("/p/a.txt", "hello world");
    fs.add_file("/p/b.txt", "hello world");

    let a = compute_file_hash(&fs, Path::new("/p/a.txt"))?;
    assert_eq!(a, HELLO_WORLD_BLAKE3);
    assert_eq!(a, compute_file_hash(&fs, Path::new("/p/b.txt"))?);

    fs.add_file("/p/b.txt", "hello world!");
    assert_ne!(a, compute_file_hash(&fs, Path::new("/p/b.txt"))?);

    assert!(compute_file_hash(&fs, Path::new("/p")).is_err());
    assert!(compute_file_hash(&fs, Path::new("/p/missing")).is_err());
    Ok(())
}

#[test]
fn mock_fs_tracks_implicit_directories() {
    let fs = MockFileSystem::new();
    fs.add_file("/p/src/bin/tool.rs", "");
    fs.add_dir("/p/empty");

    assert!(fs.is_dir(Path::new("/p/src/bin")));
    assert!(fs.is_dir(Path::new("/p/empty")));
    assert!(fs.is_file(Path::new("/p/src/bin/tool.rs")));
    assert!(!fs.is_file(Path::new("/p/src")));

    let mut entries = fs.read_dir(Path::new("/p")).expect("dir");
    entries.sort();
    assert_eq!(entries, vec![PathBuf::from("/p/empty"), PathBuf::from("/p/src")]);

    fs.remove("/p/src");
    assert!(!fs.exists(Path::new("/p/src/bin/tool.rs")));
    assert!(fs.exists(Path::new("/p/empty")));
}

#[test]
fn collect_skips_ignored_directories() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("/p/src/main.rs", "");
    fs.add_file("/p/src/nested/mod.rs", "");
    fs.add_file("/p/target/debug/app", "");
    fs.add_file("/p/.git/HEAD", "");
    fs.add_file("/p/notes.txt~", "");

    let target = WatchTarget::new("/p", &[], &default_ignores(), false)?;
    let files = collect_matching_files(&fs, &target)?;

    assert_eq!(
        files,
        vec![
            PathBuf::from("/p/src/main.rs"),
            PathBuf::from("/p/src/nested/mod.rs"),
        ]
    );
    Ok(())
}

#[test]
fn real_fs_reads_a_temp_tree() -> TestResult {
    let dir = TempDir::new()?;
    std::fs::create_dir_all(dir.path().join("src"))?;
    std::fs::write(dir.path().join("src/main.rs"), "hello world")?;
    std::fs::create_dir_all(dir.path().join("target"))?;
    std::fs::write(dir.path().join("target/out"), "x")?;

    let fs = RealFileSystem;
    assert!(fs.is_dir(dir.path()));
    assert_eq!(
        compute_file_hash(&fs, &dir.path().join("src/main.rs"))?,
        HELLO_WORLD_BLAKE3
    );

    let target = WatchTarget::new(dir.path(), &["src/**".to_string()], &default_ignores(), true)?;
    let files = collect_matching_files(&fs, &target)?;
    assert_eq!(files, vec![dir.path().join("src/main.rs")]);
    Ok(())
}
