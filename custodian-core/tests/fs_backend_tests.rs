/*!
End-to-end tests of the filesystem backend through the manager.
*/

#![cfg(feature = "fs")]

mod common;

use std::fs;
use std::io::Read;
use std::path::Path;

use common::{entry_names, read_entry};
use custodian_core::fs::{FsMetadata, FsTypeManager, TransportSource, TYPE_NAME};
use custodian_core::{
    Context, CopyCreateOptions, CopyDestination, CopyEngine, CopySource, CustodianError, FsConfig,
    ManagerConfig, ProtectedEntityId, ProtectedEntityManager, ProtectedEntitySnapshotId,
    ProtectedEntityTypeManager, UNKNOWN_SIZE,
};
use tempfile::TempDir;

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes.txt"), b"remember the milk").unwrap();
    fs::create_dir(dir.path().join("project")).unwrap();
    fs::write(dir.path().join("project").join("main.rs"), b"fn main() {}").unwrap();
    fs::create_dir(dir.path().join("project").join("src")).unwrap();
    fs::write(dir.path().join("project").join("src").join("lib.rs"), b"pub mod x;").unwrap();
    fs::write(dir.path().join(".hidden"), b"skip me").unwrap();
    dir
}

fn fs_id(name: &str) -> ProtectedEntityId {
    ProtectedEntityId::new(TYPE_NAME, name).unwrap()
}

fn manager_for(root: &Path) -> ProtectedEntityManager {
    let tm = FsTypeManager::new(FsConfig::new(root), TransportSource::None).unwrap();
    ProtectedEntityManager::builder()
        .register(Box::new(tm))
        .unwrap()
        .build()
}

fn read_all(mut reader: Box<dyn Read + Send>) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_lists_visible_entries_sorted() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let tm = manager.get_type_manager(TYPE_NAME).unwrap();

    let ids = tm.get_protected_entities(&Context::new()).unwrap();
    assert_eq!(ids, vec![fs_id("notes.txt"), fs_id("project")]);
}

#[test]
fn test_file_and_directory_info() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let ctx = Context::new();

    let notes = manager.get_protected_entity(&ctx, &fs_id("notes.txt")).unwrap();
    let info = notes.info(&ctx).unwrap();
    assert_eq!(info.name(), "notes.txt");
    assert_eq!(info.size(), 17);
    assert!(info.component_ids().is_empty());

    let project = manager.get_protected_entity(&ctx, &fs_id("project")).unwrap();
    assert_eq!(project.info(&ctx).unwrap().size(), UNKNOWN_SIZE);

    let md: FsMetadata =
        serde_json::from_slice(&read_all(project.metadata_reader(&ctx).unwrap().unwrap())).unwrap();
    assert_eq!(md.name, "project");
    assert!(md.size.is_none());
}

#[test]
fn test_missing_and_hidden_entries_are_not_found() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let ctx = Context::new();

    for name in ["absent", ".hidden", ".snapshots"] {
        let result = manager.get_protected_entity(&ctx, &fs_id(name));
        assert!(
            matches!(result, Err(CustodianError::EntityNotFound { .. })),
            "{name} should not resolve"
        );
    }
}

#[test]
fn test_snapshot_lifecycle() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let ctx = Context::new();
    let notes = manager.get_protected_entity(&ctx, &fs_id("notes.txt")).unwrap();

    let first = notes.snapshot(&ctx).unwrap();
    fs::write(dir.path().join("notes.txt"), b"remember the eggs too").unwrap();
    let second = notes.snapshot(&ctx).unwrap();

    let mut expected = vec![first.clone(), second.clone()];
    expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(notes.list_snapshots(&ctx).unwrap(), expected);

    // Snapshot contents are frozen at snapshot time.
    let snap_id = fs_id("notes.txt").with_snapshot(first.clone()).unwrap();
    let snap = manager.get_protected_entity(&ctx, &snap_id).unwrap();
    assert_eq!(read_all(snap.data_reader(&ctx).unwrap().unwrap()), b"remember the milk");
    assert_eq!(snap.info(&ctx).unwrap().size(), 17);
    assert_eq!(notes.info_for_snapshot(&ctx, &second).unwrap().size(), 21);

    let combined = notes.combined_info(&ctx).unwrap();
    assert_eq!(combined.len(), 3);
    assert!(!combined[0].id().has_snapshot());

    // No snapshot-of-snapshot.
    assert!(matches!(
        snap.snapshot(&ctx),
        Err(CustodianError::InvalidOperation(_))
    ));
    assert!(matches!(
        snap.list_snapshots(&ctx),
        Err(CustodianError::InvalidOperation(_))
    ));

    assert!(notes.delete_snapshot(&ctx, &first).unwrap());
    assert!(!notes.delete_snapshot(&ctx, &first).unwrap());
    assert!(!notes
        .delete_snapshot(&ctx, &ProtectedEntitySnapshotId::new("never-existed"))
        .unwrap());
    assert_eq!(notes.list_snapshots(&ctx).unwrap(), vec![second]);
}

#[test]
fn test_directory_snapshot_is_a_tar_stream() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let ctx = Context::new();
    let project = manager.get_protected_entity(&ctx, &fs_id("project")).unwrap();

    let snapshot = project.snapshot(&ctx).unwrap();
    let snap_info = project.info_for_snapshot(&ctx, &snapshot).unwrap();
    assert_eq!(snap_info.size(), UNKNOWN_SIZE);

    let snap = manager
        .get_protected_entity(&ctx, &fs_id("project").with_snapshot(snapshot).unwrap())
        .unwrap();
    let bytes = read_all(snap.data_reader(&ctx).unwrap().unwrap());

    let mut archive = tar::Archive::new(bytes.as_slice());
    let mut names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert!(names.iter().any(|n| n.ends_with("main.rs")));
    assert!(names.iter().any(|n| n.ends_with("src/lib.rs")));
}

#[test]
fn test_copy_allocates_new_objects_only() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let tm = manager.get_type_manager(TYPE_NAME).unwrap();
    let ctx = Context::new();
    let notes = tm.get_protected_entity(&ctx, &fs_id("notes.txt")).unwrap();

    for option in [
        CopyCreateOptions::UpdateExistingObject,
        CopyCreateOptions::AllocateObjectWithId,
    ] {
        assert!(matches!(
            tm.copy(&ctx, notes.as_ref(), option),
            Err(CustodianError::UnsupportedOperation(_))
        ));
    }

    let copy = tm
        .copy(&ctx, notes.as_ref(), CopyCreateOptions::AllocateNewObject)
        .unwrap();
    assert_ne!(copy.id(), notes.id());
    assert_eq!(read_all(copy.data_reader(&ctx).unwrap().unwrap()), b"remember the milk");
    assert_eq!(tm.get_protected_entities(&ctx).unwrap().len(), 3);
}

#[test]
fn test_copy_directory_round_trips_through_tar() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let tm = manager.get_type_manager(TYPE_NAME).unwrap();
    let ctx = Context::new();
    let project = tm.get_protected_entity(&ctx, &fs_id("project")).unwrap();
    let info = project.info(&ctx).unwrap();

    let copy = tm
        .copy_from_info(&ctx, &info, CopyCreateOptions::AllocateNewObject)
        .unwrap();
    let copied_root = dir.path().join(copy.id().id());
    assert!(copied_root.is_dir());
    assert_eq!(fs::read(copied_root.join("main.rs")).unwrap(), b"fn main() {}");
    assert_eq!(
        fs::read(copied_root.join("src").join("lib.rs")).unwrap(),
        b"pub mod x;"
    );
}

#[test]
fn test_copy_from_foreign_info_is_unsupported() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let tm = manager.get_type_manager(TYPE_NAME).unwrap();
    let ctx = Context::new();

    let foreign = custodian_core::ProtectedEntityInfo::new(
        ProtectedEntityId::new("ivd", "disk-1").unwrap(),
        "disk-1",
        1024,
        vec![],
        vec![],
        vec![],
        vec![],
    );
    assert!(matches!(
        tm.copy_from_info(&ctx, &foreign, CopyCreateOptions::AllocateNewObject),
        Err(CustodianError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_delete_entity_and_snapshot() {
    let dir = fixture();
    let manager = manager_for(dir.path());
    let tm = manager.get_type_manager(TYPE_NAME).unwrap();
    let ctx = Context::new();

    let snapshot = {
        let notes = tm.get_protected_entity(&ctx, &fs_id("notes.txt")).unwrap();
        notes.snapshot(&ctx).unwrap()
    };
    let snap_id = fs_id("notes.txt").with_snapshot(snapshot).unwrap();
    tm.delete(&ctx, &snap_id).unwrap();
    assert!(matches!(
        tm.delete(&ctx, &snap_id),
        Err(CustodianError::EntityNotFound { .. })
    ));

    tm.delete(&ctx, &fs_id("project")).unwrap();
    assert!(!dir.path().join("project").exists());
    assert_eq!(tm.get_protected_entities(&ctx).unwrap(), vec![fs_id("notes.txt")]);
}

#[test]
fn test_copy_engine_archives_directory_entity() {
    let dir = fixture();
    let out = TempDir::new().unwrap();
    let manager = manager_for(dir.path());
    let dest = out.path().join("project.zip");

    let report = CopyEngine::new(&manager)
        .with_conduit_capacity(512)
        .copy(
            &Context::new(),
            &CopySource::parse("fs:project"),
            &CopyDestination::File(dest.clone()),
        )
        .unwrap();

    let archive = fs::read(&dest).unwrap();
    assert_eq!(report.bytes_copied, archive.len() as u64);
    assert_eq!(
        entry_names(&archive),
        vec!["fs:project.peinfo", "fs:project.md", "fs:project.data"]
    );

    let tar_bytes = read_entry(&archive, "fs:project.data");
    let mut entries = tar::Archive::new(tar_bytes.as_slice());
    assert!(entries
        .entries()
        .unwrap()
        .any(|e| e.unwrap().path().unwrap().ends_with("main.rs")));
}

#[test]
fn test_manager_from_config_directory() {
    let data = fixture();
    let conf = TempDir::new().unwrap();
    fs::create_dir(conf.path().join("pes")).unwrap();
    fs::write(
        conf.path().join("pes").join("fs.pe.json"),
        serde_json::json!({ "root": data.path() }).to_string(),
    )
    .unwrap();
    fs::write(
        conf.path().join("pes").join("ivd.pe.json"),
        r#"{"vcHost":"vc.local"}"#,
    )
    .unwrap();
    fs::write(
        conf.path().join("s3config.json"),
        r#"{"host":"minio","port":9000,"accessKey":"AKID","secret":"SECRET","urlBase":"http://minio:9000"}"#,
    )
    .unwrap();

    let config = ManagerConfig::from_dir(conf.path()).unwrap();
    let manager = ProtectedEntityManager::from_config(&config).unwrap();

    let types: Vec<&str> = manager
        .list_entity_type_managers()
        .into_iter()
        .map(|tm| tm.type_name())
        .collect();
    assert_eq!(types, vec!["fs"]);

    let ctx = Context::new();
    let notes = manager.get_protected_entity(&ctx, &fs_id("notes.txt")).unwrap();
    let info = notes.info(&ctx).unwrap();
    assert_eq!(info.id(), &fs_id("notes.txt"));
    assert!(matches!(
        manager.get_protected_entity(&ctx, &ProtectedEntityId::new("ivd", "x").unwrap()),
        Err(CustodianError::UnknownEntityType(t)) if t == "ivd"
    ));
}
