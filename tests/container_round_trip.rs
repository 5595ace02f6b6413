//! Integration tests for the create/commit/open/extract lifecycle

use capsule::bootstrap::SENTINEL;
use capsule::compression::{self, Compression};
use capsule::container::{PathStore, Reader};
use capsule::{Capsule, CapsuleError, Memory, PathKind, PathManager};
use std::fs::File;
use std::path::PathBuf;
use tempfile::{NamedTempFile, TempDir};

fn workspace() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("app.capsule");

    (dir, dest)
}

/// Pull the raw record store back out of a committed container
fn reopen_store(dest: &PathBuf) -> (NamedTempFile, PathStore) {
    let mut reader = Reader::new(File::open(dest).unwrap()).unwrap();
    let mut db = NamedTempFile::new().unwrap();
    reader.store_into(db.as_file_mut()).unwrap();

    let store = PathStore::open(db.path()).unwrap();

    (db, store)
}

#[test]
fn round_trip_preserves_every_record() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule
        .set_path(
            "src/main.rs",
            Memory::file("fn main() {}").with_modified(1000).with_permissions(0o644),
        )
        .unwrap();
    capsule
        .set_path(
            "bin/tool",
            Memory::file(&b"\x7fELF binary"[..]).with_modified(2000).with_permissions(0o755),
        )
        .unwrap();
    capsule
        .set_path(
            "empty-dir",
            Memory::directory().with_modified(3000).with_permissions(0o700),
        )
        .unwrap();
    capsule.commit().unwrap();

    let reopened = Capsule::open(&dest).unwrap();
    assert_eq!(reopened.count().unwrap(), 3);

    let main = reopened.get_path("src/main.rs").unwrap();
    assert_eq!(main.kind(), PathKind::File);
    assert_eq!(main.contents().unwrap().unwrap(), b"fn main() {}");
    assert_eq!(main.modified(), 1000);
    assert_eq!(main.permissions(), 0o644);

    let tool = reopened.get_path("bin/tool").unwrap();
    assert_eq!(tool.contents().unwrap().unwrap(), b"\x7fELF binary");
    assert_eq!(tool.permissions(), 0o755);

    let dir = reopened.get_path("empty-dir").unwrap();
    assert_eq!(dir.kind(), PathKind::Directory);
    assert!(dir.contents().unwrap().is_none());
    assert_eq!(dir.modified(), 3000);
    assert_eq!(dir.permissions(), 0o700);
}

#[test]
fn create_without_a_stub_uses_the_default() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    assert!(capsule.stub().ends_with(SENTINEL));

    capsule.commit().unwrap();

    let reopened = Capsule::open(&dest).unwrap();
    assert_eq!(reopened.stub(), capsule.stub());
}

#[test]
fn stored_contents_survive_commit_and_open() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule.set_path("a.txt", Memory::file("hi")).unwrap();
    capsule.commit().unwrap();

    let contents = Capsule::open(&dest)
        .unwrap()
        .get_path("a.txt")
        .unwrap()
        .contents()
        .unwrap()
        .unwrap();

    assert_eq!(contents, b"hi");
}

#[test]
fn gzip_mode_stores_gzip_bytes() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule.set_compression(Compression::Gzip);
    capsule.set_path("x", Memory::file("payload")).unwrap();
    capsule.commit().unwrap();

    let (_db, store) = reopen_store(&dest);
    let record = store.record("x").unwrap();

    assert_eq!(record.compression, Compression::Gzip);
    assert_eq!(
        record.contents.unwrap(),
        compression::compress(b"payload", Compression::Gzip).unwrap()
    );

    // Reads still return the original bytes.
    let reopened = Capsule::open(&dest).unwrap();
    assert_eq!(
        reopened.get_path("x").unwrap().contents().unwrap().unwrap(),
        b"payload"
    );
}

#[test]
fn every_compression_mode_round_trips() {
    for mode in [Compression::None, Compression::Gzip, Compression::Bzip2] {
        let (_dir, dest) = workspace();
        let payload = b"compression round trip payload".repeat(10);

        let mut capsule = Capsule::create(&dest).unwrap();
        capsule.set_compression(mode);
        capsule.set_path("data.bin", Memory::file(payload.clone())).unwrap();
        capsule.commit().unwrap();

        let reopened = Capsule::open(&dest).unwrap();
        assert_eq!(
            reopened.get_path("data.bin").unwrap().contents().unwrap().unwrap(),
            payload,
            "mode {mode:?}"
        );

        let (_db, store) = reopen_store(&dest);
        let raw = store.record("data.bin").unwrap().contents.unwrap();

        match mode {
            Compression::None => assert_eq!(raw, payload),
            Compression::Gzip | Compression::Bzip2 => assert_ne!(raw, payload),
        }
    }
}

#[test]
fn compression_mode_is_never_retroactive() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule.set_path("before", Memory::file("plain")).unwrap();
    capsule.set_compression(Compression::Gzip);
    capsule.set_path("after", Memory::file("zipped")).unwrap();
    capsule.commit().unwrap();

    let (_db, store) = reopen_store(&dest);
    assert_eq!(store.record("before").unwrap().compression, Compression::None);
    assert_eq!(store.record("after").unwrap().compression, Compression::Gzip);
}

#[test]
fn signature_is_valid_after_commit() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule.set_path("a", Memory::file("a")).unwrap();
    capsule.commit().unwrap();

    assert!(Capsule::is_valid(&dest).unwrap());
}

#[test]
fn any_single_byte_flip_invalidates_the_signature() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule.set_path("a", Memory::file("contents")).unwrap();
    capsule.commit().unwrap();

    let pristine = std::fs::read(&dest).unwrap();

    // One flip in the stub, one in the store, one in the signature itself.
    for position in [5, pristine.len() / 2, pristine.len() - 1] {
        let mut corrupt = pristine.clone();
        corrupt[position] ^= 0x01;
        std::fs::write(&dest, &corrupt).unwrap();

        assert!(!Capsule::is_valid(&dest).unwrap(), "flip at {position}");
        assert!(matches!(Capsule::open(&dest), Err(CapsuleError::Integrity)));
    }
}

#[test]
fn is_valid_reports_false_for_truncated_files() {
    let (_dir, dest) = workspace();
    std::fs::write(&dest, b"short").unwrap();

    assert!(!Capsule::is_valid(&dest).unwrap());
}

#[test]
fn paths_are_normalized_on_write() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule
        .set_path("./dir/to/../test.php", Memory::file("x"))
        .unwrap();
    capsule
        .set_path("\\windows\\style", Memory::file("y"))
        .unwrap();

    assert!(capsule.has_path("dir/test.php").unwrap());
    assert!(capsule.has_path("windows/style").unwrap());
}

#[test]
fn unstorable_paths_are_rejected() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();

    assert!(matches!(
        capsule.set_path("..", Memory::file("x")),
        Err(CapsuleError::Validation(_))
    ));
}

#[test]
fn set_path_overwrites_and_remove_path_deletes() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule.set_path("a", Memory::file("one")).unwrap();
    capsule.set_path("a", Memory::file("two")).unwrap();

    assert_eq!(capsule.count().unwrap(), 1);
    assert_eq!(
        capsule.get_path("a").unwrap().contents().unwrap().unwrap(),
        b"two"
    );

    capsule.remove_path("a").unwrap();
    assert!(!capsule.has_path("a").unwrap());
    assert!(matches!(
        capsule.get_path("a"),
        Err(CapsuleError::NotFound(_))
    ));
}

#[test]
fn batch_writes_are_atomic() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();

    let entries = vec![
        Ok((
            "good.txt".to_string(),
            Box::new(Memory::file("good")) as Box<dyn PathManager>,
        )),
        // Normalizes to nothing, so the whole batch must fail.
        Ok((
            "..".to_string(),
            Box::new(Memory::file("bad")) as Box<dyn PathManager>,
        )),
    ];

    let result = capsule.set_paths_from_iter(entries);

    assert!(matches!(result, Err(CapsuleError::Validation(_))));
    assert!(!capsule.has_path("good.txt").unwrap());
    assert_eq!(capsule.count().unwrap(), 0);

    // The store stays usable after the rollback.
    capsule.set_path("later", Memory::file("works")).unwrap();
    assert!(capsule.has_path("later").unwrap());
}

#[test]
fn batch_success_persists_every_entry() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();

    let entries: Vec<capsule::Result<_>> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            Ok((
                name.to_string(),
                Box::new(Memory::file(*name)) as Box<dyn PathManager>,
            ))
        })
        .collect();

    capsule.set_paths_from_iter(entries).unwrap();
    assert_eq!(capsule.count().unwrap(), 3);
}

#[test]
fn extraction_materializes_contents_and_attributes() {
    let (_dir, dest) = workspace();
    let out = tempfile::tempdir().unwrap();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule
        .set_path(
            "nested/deep/file.txt",
            Memory::file("extracted").with_modified(1234).with_permissions(0o600),
        )
        .unwrap();
    capsule
        .set_path(
            "empty",
            Memory::directory().with_modified(4321).with_permissions(0o750),
        )
        .unwrap();

    capsule.extract_to(out.path(), &[], true).unwrap();

    let file = out.path().join("nested/deep/file.txt");
    assert_eq!(std::fs::read(&file).unwrap(), b"extracted");

    let metadata = std::fs::metadata(&file).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(metadata.permissions().mode() & 0o7777, 0o600);
    }
    assert_eq!(
        filetime::FileTime::from_last_modification_time(&metadata).unix_seconds(),
        1234
    );

    let empty = out.path().join("empty");
    assert!(empty.is_dir());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&empty).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o750);
    }
}

#[test]
fn extraction_honors_the_subset() {
    let (_dir, dest) = workspace();
    let out = tempfile::tempdir().unwrap();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule.set_path("keep.txt", Memory::file("keep")).unwrap();
    capsule.set_path("skip.txt", Memory::file("skip")).unwrap();

    capsule
        .extract_to(out.path(), &["keep.txt".to_string()], true)
        .unwrap();

    assert!(out.path().join("keep.txt").exists());
    assert!(!out.path().join("skip.txt").exists());
}

#[test]
fn extraction_without_overwrite_leaves_existing_files_alone() {
    let (_dir, dest) = workspace();
    let out = tempfile::tempdir().unwrap();

    let existing = out.path().join("file.txt");
    std::fs::write(&existing, b"already here").unwrap();
    filetime::set_file_mtime(&existing, filetime::FileTime::from_unix_time(5000, 0)).unwrap();

    let mut capsule = Capsule::create(&dest).unwrap();
    capsule
        .set_path("file.txt", Memory::file("new contents").with_modified(1000))
        .unwrap();

    capsule.extract_to(out.path(), &[], false).unwrap();

    assert_eq!(std::fs::read(&existing).unwrap(), b"already here");
    let metadata = std::fs::metadata(&existing).unwrap();
    assert_eq!(
        filetime::FileTime::from_last_modification_time(&metadata).unix_seconds(),
        5000
    );

    // The same extraction with overwrite replaces the file.
    capsule.extract_to(out.path(), &[], true).unwrap();
    assert_eq!(std::fs::read(&existing).unwrap(), b"new contents");
}

#[test]
fn commit_replaces_an_existing_container() {
    let (_dir, dest) = workspace();

    let mut first = Capsule::create(&dest).unwrap();
    first.set_path("old", Memory::file("old")).unwrap();
    first.commit().unwrap();
    drop(first);

    let mut second = Capsule::create(&dest).unwrap();
    second.set_path("new", Memory::file("new")).unwrap();
    second.commit().unwrap();

    let reopened = Capsule::open(&dest).unwrap();
    assert!(!reopened.has_path("old").unwrap());
    assert!(reopened.has_path("new").unwrap());
}

#[test]
fn custom_stub_round_trips() {
    let (_dir, dest) = workspace();
    let stub = format!("#!/bin/sh\n# capsule-bootstrap\necho custom\n{SENTINEL}");

    let mut capsule = Capsule::create_with_stub(&dest, stub.clone()).unwrap();
    capsule.commit().unwrap();

    assert_eq!(Capsule::open(&dest).unwrap().stub(), stub);
}

#[test]
fn invalid_stub_is_rejected_at_create() {
    let (_dir, dest) = workspace();

    assert!(matches!(
        Capsule::create_with_stub(&dest, "echo not a stub"),
        Err(CapsuleError::Validation(_))
    ));
}

#[test]
fn lazy_path_iteration_supports_early_break() {
    let (_dir, dest) = workspace();

    let mut capsule = Capsule::create(&dest).unwrap();
    for name in ["a", "b", "c", "d"] {
        capsule.set_path(name, Memory::file(name)).unwrap();
    }

    let mut seen = 0;
    for item in capsule.paths() {
        item.unwrap();
        seen += 1;

        if seen == 2 {
            break;
        }
    }

    // Breaking out of iteration leaves the store fully usable.
    assert_eq!(capsule.count().unwrap(), 4);
    assert_eq!(capsule.paths().count(), 4);
}
