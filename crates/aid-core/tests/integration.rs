use aid_core::{CoreError, Engine, PackageRef, RemoveTarget, TemplateRenderer};
use aid_runtime::{MockOp, MockRuntime};
use aid_schema::DESCRIPTOR_FILE;
use aid_store::{EntityStore, FileEntityStore, StoreLayout};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

const FACE: &str = r#"
[package]
name = "face"
vendor = "aidmodels"
tagline = "face detection"

[[solvers]]
name = "mtcnn"
class = "face/solver/MtcnnSolver"
"#;

struct Home {
    dir: tempfile::TempDir,
    runtime: Arc<MockRuntime>,
    engine: Engine,
}

fn write_package(root: &Path, descriptor: &str) {
    let pkg = StoreLayout::new(root).package_dir("aidmodels", "face");
    fs::create_dir_all(&pkg).unwrap();
    fs::write(pkg.join(DESCRIPTOR_FILE), descriptor).unwrap();
    fs::write(pkg.join("setup.sh"), "apt-get update\napt-get install -y libgl1\n").unwrap();
}

fn engine_over(root: &Path, runtime: Arc<MockRuntime>) -> Engine {
    let layout = StoreLayout::new(root);
    let store = Arc::new(FileEntityStore::open(layout.clone()).unwrap());
    Engine::with_parts(
        layout,
        store,
        runtime,
        TemplateRenderer::from_embedded().unwrap(),
    )
}

fn home() -> Home {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), FACE);
    let runtime = Arc::new(MockRuntime::new());
    let engine = engine_over(dir.path(), Arc::clone(&runtime));
    Home {
        dir,
        runtime,
        engine,
    }
}

fn mtcnn() -> PackageRef {
    "aidmodels/face/mtcnn".parse().unwrap()
}

fn record_bytes(root: &Path, kind: &str, uid: &str) -> Vec<u8> {
    fs::read(root.join("store").join(kind).join(uid)).unwrap()
}

#[test]
fn container_lifecycle_end_to_end() {
    let h = home();
    let image = h.engine.build(&mtcnn(), false).unwrap().image;

    let container = h.engine.create(&image.uid, "9000").unwrap();
    assert!(!container.running);
    assert_eq!(container.port, "9000");
    assert_eq!(container.image, image.uid);
    assert_eq!(container.uid.len(), 10);

    let started = h.engine.start(&container.uid).unwrap();
    assert!(started.running);
    assert_eq!(h.runtime.calls(MockOp::Start), 1);

    let err = h.engine.start(&container.uid).unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
    assert!(err.to_string().contains("already running"));
    assert_eq!(h.runtime.calls(MockOp::Start), 1);

    let stopped = h.engine.stop(&container.uid).unwrap();
    assert!(!stopped.running);

    h.engine.remove_container(&container.uid).unwrap();
    assert_eq!(h.runtime.calls(MockOp::RemoveContainer), 1);

    let err = h.engine.inspect_container(&container.uid).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn guards_reject_without_calling_runtime() {
    let h = home();
    let image = h.engine.build(&mtcnn(), false).unwrap().image;
    let container = h.engine.create(&image.uid, "9000").unwrap();

    let err = h.engine.stop(&container.uid).unwrap_err();
    assert!(err.to_string().contains("not running"));
    assert_eq!(h.runtime.calls(MockOp::Stop), 0);

    h.engine.start(&container.uid).unwrap();
    let err = h.engine.remove_container(&container.uid).unwrap_err();
    assert!(err.to_string().contains("stop it first"));
    assert_eq!(h.runtime.calls(MockOp::RemoveContainer), 0);
}

#[test]
fn unknown_container_is_not_found() {
    let h = home();
    for result in [
        h.engine.start("0000000000").map(drop),
        h.engine.stop("0000000000").map(drop),
        h.engine.remove(RemoveTarget::Container, "0000000000"),
    ] {
        assert!(result.unwrap_err().is_not_found());
    }
    assert_eq!(h.runtime.calls(MockOp::Start), 0);
}

#[test]
fn runtime_failure_leaves_record_unchanged() {
    let h = home();
    let image = h.engine.build(&mtcnn(), false).unwrap().image;
    let container = h.engine.create(&image.uid, "9000").unwrap();
    let before = record_bytes(h.dir.path(), "containers", &container.uid);

    h.runtime.fail_next(MockOp::Start);
    assert!(matches!(
        h.engine.start(&container.uid),
        Err(CoreError::Runtime(_))
    ));
    assert_eq!(before, record_bytes(h.dir.path(), "containers", &container.uid));

    h.engine.start(&container.uid).unwrap();
    let running = record_bytes(h.dir.path(), "containers", &container.uid);
    h.runtime.fail_next(MockOp::RemoveContainer);
    h.engine.stop(&container.uid).unwrap();
    let stopped = record_bytes(h.dir.path(), "containers", &container.uid);
    assert_ne!(running, stopped);
    assert!(h.engine.remove_container(&container.uid).is_err());
    assert_eq!(stopped, record_bytes(h.dir.path(), "containers", &container.uid));
}

#[test]
fn failed_create_records_no_container() {
    let h = home();
    let image = h.engine.build(&mtcnn(), false).unwrap().image;
    h.runtime.fail_next(MockOp::Create);
    assert!(h.engine.create(&image.uid, "9000").is_err());
    assert!(h.engine.list_containers().unwrap().is_empty());
}

#[test]
fn new_engine_sees_prior_state() {
    let h = home();
    let image = h.engine.build(&mtcnn(), false).unwrap().image;
    let container = h.engine.create(&image.uid, "9000").unwrap();
    h.engine.start(&container.uid).unwrap();

    let again = engine_over(h.dir.path(), Arc::new(MockRuntime::new()));
    assert_eq!(again.list_images().unwrap(), vec![image]);
    assert!(again.inspect_container(&container.uid).unwrap().running);
    assert_eq!(again.list_solvers().unwrap().len(), 1);

    // The stored state is authoritative for guards.
    assert!(matches!(
        again.start(&container.uid),
        Err(CoreError::InvalidTransition { .. })
    ));
    again.stop(&container.uid).unwrap();
    again.remove_container(&container.uid).unwrap();
}

#[test]
fn concurrent_starts_invoke_runtime_once() {
    let h = home();
    let image = h.engine.build(&mtcnn(), false).unwrap().image;
    let uid = h.engine.create(&image.uid, "9000").unwrap().uid;

    let engine = Arc::new(h.engine);
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let uid = uid.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.start(&uid)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, CoreError::InvalidTransition { .. })));
    assert_eq!(h.runtime.calls(MockOp::Start), 1);
}

#[test]
fn image_removal_is_refused_while_referenced() {
    let h = home();
    let image = h.engine.build(&mtcnn(), false).unwrap().image;
    let container = h.engine.create(&image.uid, "9000").unwrap();

    let err = h.engine.remove(RemoveTarget::Image, &image.uid).unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
    assert!(err.to_string().contains(container.uid.as_str()));
    assert_eq!(h.runtime.calls(MockOp::RemoveImage), 0);

    h.engine.remove(RemoveTarget::Container, &container.uid).unwrap();
    h.engine.remove(RemoveTarget::Image, &image.uid).unwrap();
    assert_eq!(h.runtime.calls(MockOp::RemoveImage), 1);
    assert!(h.engine.list_images().unwrap().is_empty());
}

#[test]
fn malformed_class_fails_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    write_package(
        dir.path(),
        r#"
[package]
name = "face"
vendor = "aidmodels"

[[solvers]]
name = "mtcnn"
class = "pkgonly"
"#,
    );
    let runtime = Arc::new(MockRuntime::new());
    let engine = engine_over(dir.path(), Arc::clone(&runtime));

    let err = engine.build(&mtcnn(), false).unwrap_err();
    assert!(matches!(err, CoreError::MalformedDescriptor(_)));
    assert_eq!(runtime.calls(MockOp::Build), 0);

    let pkg = StoreLayout::new(dir.path()).package_dir("aidmodels", "face");
    assert!(!pkg.join("runner_mtcnn.py").exists());
    assert!(!pkg.join("docker_mtcnn").exists());

    let store = FileEntityStore::new(StoreLayout::new(dir.path()));
    assert!(store.list_solvers().unwrap().is_empty());
}

#[test]
fn generated_dockerfile_carries_setup_snippet() {
    let h = home();
    let dockerfile = h.engine.read_dockerfile(&mtcnn()).unwrap();
    assert!(dockerfile.contains("RUN apt-get update && apt-get install -y libgl1"));
    assert!(dockerfile.contains("runner_mtcnn.py"));
}

#[test]
fn engine_new_reads_config() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), FACE);
    fs::write(
        dir.path().join("config.toml"),
        "runtime = \"mock\"\n[daemon]\nport = 12000\n",
    )
    .unwrap();

    let engine = Engine::new(dir.path()).unwrap();
    assert_eq!(engine.config().daemon.port, 12000);
    let image = engine.build(&mtcnn(), false).unwrap().image;
    assert_eq!(image.title, "aidmodels-face-mtcnn");
}

#[test]
fn template_override_is_used() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), FACE);
    fs::write(dir.path().join("config.toml"), "runtime = \"mock\"\n").unwrap();
    let templates = StoreLayout::new(dir.path()).templates_dir();
    fs::create_dir_all(&templates).unwrap();
    fs::write(
        templates.join("dockerfile.j2"),
        "FROM nvidia/cuda:12.2.0-runtime-ubuntu22.04\nRUN {{ setup }}\nCMD [\"python\", \"runner_{{ solver_name }}.py\"]\n",
    )
    .unwrap();

    let engine = Engine::new(dir.path()).unwrap();
    let dockerfile = engine.read_dockerfile(&mtcnn()).unwrap();
    assert!(dockerfile.starts_with("FROM nvidia/cuda"));
}
