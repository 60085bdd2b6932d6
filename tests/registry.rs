#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use llmpal::registry::{ModelStore, DESIGNATOR};

fn write_model(dir: &Path, name: &str, bytes: usize) {
    fs::write(dir.join(name), vec![7u8; bytes]).unwrap();
}

#[test]
fn at_most_one_model_is_ever_active() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["alpha-Q4_K_M.gguf", "beta-Q8_0.gguf", "gamma-Q5_K_M.gguf"] {
        write_model(dir.path(), name, 64);
    }
    let store = ModelStore::open(dir.path()).unwrap();
    assert!(store.active().is_none());

    for name in ["beta-Q8_0", "alpha-Q4_K_M", "gamma-Q5_K_M", "alpha-Q4_K_M", "alpha-Q4_K_M"] {
        let model = store.find(name).unwrap().expect("model should be listed");
        store.activate(&model).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 3);
        let active: Vec<&str> = listed.iter().filter(|m| m.is_active).map(|m| m.name.as_str()).collect();
        assert_eq!(active, vec![name]);
    }

    // the designator is a relative link so the directory can move
    let link = fs::read_link(dir.path().join(DESIGNATOR)).unwrap();
    assert_eq!(link, Path::new("alpha-Q4_K_M.gguf"));

    let reopened = ModelStore::open(dir.path()).unwrap();
    assert_eq!(reopened.active_model().unwrap().map(|m| m.name), Some("alpha-Q4_K_M".to_string()));
}

#[test]
fn readers_always_see_a_complete_designator() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "one.gguf", 16);
    write_model(dir.path(), "two.gguf", 16);
    let store = ModelStore::open(dir.path()).unwrap();
    let one = store.find("one").unwrap().unwrap();
    let two = store.find("two").unwrap().unwrap();
    store.activate(&one).unwrap();

    let designator = dir.path().join(DESIGNATOR);
    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        let reader = scope.spawn(|| loop {
            let target = fs::read_link(&designator).expect("designator vanished mid-switch");
            assert!(target == Path::new("one.gguf") || target == Path::new("two.gguf"));
            if done.load(Ordering::SeqCst) {
                break;
            }
        });

        for i in 0..200 {
            let model = if i % 2 == 0 { &two } else { &one };
            store.activate(model).unwrap();
        }
        done.store(true, Ordering::SeqCst);
        reader.join().unwrap();
    });

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn removing_the_active_model_clears_the_designator() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "solo.gguf", 8);
    let store = ModelStore::open(dir.path()).unwrap();
    let solo = store.find("solo.gguf").unwrap().unwrap();
    store.activate(&solo).unwrap();

    store.remove(&solo).unwrap();
    assert!(store.active().is_none());
    assert!(fs::symlink_metadata(dir.path().join(DESIGNATOR)).is_err());
    assert!(store.list().unwrap().is_empty());
}
