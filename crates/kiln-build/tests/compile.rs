//! Artifact compiler behaviour against the fake toolchain.

use std::sync::Arc;
use std::thread;

use kiln_build::{ArtifactCompiler, Bundle, CacheStore, CompileError, ENTRY_UNIT, PRELUDE_UNIT};
use kiln_test::{FakeToolchain, WorkspaceFixture};
use kiln_workspace::Workspace;
use tempfile::TempDir;

fn compiler(build: &TempDir, toolchain: &FakeToolchain) -> ArtifactCompiler {
    ArtifactCompiler::new(CacheStore::new(build.path()), Arc::new(toolchain.clone()))
}

#[test]
fn second_compile_reuses_artifact() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("alpha").write()).unwrap();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let compiler = compiler(&build, &toolchain);

    let first = compiler.compile(&ws).unwrap();
    let second = compiler.compile(&ws).unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.key, second.key);
    assert_eq!(first.path, second.path);
    assert_eq!(toolchain.invocations(), 1);
    assert!(compiler.store().current_path(ws.id()).exists());
}

#[test]
fn artifact_contains_every_unit() {
    let fixture = WorkspaceFixture::new();
    let root = fixture
        .module("alpha")
        .source("src/util.ks", "fun helper() = 1\n")
        .write();
    let ws = Workspace::load(root).unwrap();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();

    let artifact = compiler(&build, &toolchain).compile(&ws).unwrap();
    let bundle = Bundle::read(&artifact.path).unwrap();

    assert_eq!(bundle.meta.module_id, "alpha");
    assert_eq!(bundle.meta.namespace, "kiln:module/alpha/");
    assert_eq!(bundle.meta.entry_unit, ENTRY_UNIT);
    assert_eq!(bundle.meta.cache_key, artifact.key.as_str());
    assert!(bundle.unit(PRELUDE_UNIT).is_some());
    assert!(bundle.unit("unit_0").is_some());
    assert!(bundle.unit(ENTRY_UNIT).is_some());
}

#[test]
fn ids_are_sanitized_for_paths_and_packages() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("My.Shop v2").in_dir("shop").write()).unwrap();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let compiler = compiler(&build, &toolchain);

    let artifact = compiler.compile(&ws).unwrap();
    let bundle = Bundle::read(&artifact.path).unwrap();

    assert_eq!(compiler.namespace_for(ws.id()), "kiln:module/My_Shop_v2/");
    assert_eq!(bundle.meta.module_id, "My.Shop v2");
    assert_eq!(bundle.meta.namespace, "kiln:module/My_Shop_v2/");
    assert!(artifact.path.starts_with(build.path().join("My.Shop_v2")));
    assert!(compiler.store().current_path(ws.id()).exists());
}

#[test]
fn changed_source_invalidates_key() {
    let fixture = WorkspaceFixture::new();
    let root = fixture.module("alpha").write();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let compiler = compiler(&build, &toolchain);

    let first = compiler.compile(&Workspace::load(root.clone()).unwrap()).unwrap();
    std::fs::write(root.join("src/main.ks"), "module {\n    enable { log(\"hi\") }\n}\n").unwrap();
    let second = compiler.compile(&Workspace::load(root).unwrap()).unwrap();

    assert_ne!(first.key, second.key);
    assert!(!second.cache_hit);
    assert_eq!(toolchain.invocations(), 2);
    // Superseded entries are kept.
    assert!(first.path.exists());
}

#[test]
fn toolchain_version_is_part_of_key() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("alpha").write()).unwrap();
    let build = TempDir::new().unwrap();

    let old = compiler(&build, &FakeToolchain::new()).cache_key(&ws).unwrap();
    let new = compiler(&build, &FakeToolchain::new().with_version("2.0.0"))
        .cache_key(&ws)
        .unwrap();
    assert_ne!(old, new);
}

#[test]
fn structural_error_skips_toolchain() {
    let fixture = WorkspaceFixture::new();
    let root = fixture
        .module("alpha")
        .source("src/util.ks", "import other.stuff\nfun helper() = 1\n")
        .write();
    let ws = Workspace::load(root).unwrap();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();

    let err = compiler(&build, &toolchain).compile(&ws).unwrap_err();
    match err {
        CompileError::Structural { unit, .. } => assert_eq!(unit, "src/util.ks"),
        other => panic!("expected structural error, got {other}"),
    }
    assert_eq!(toolchain.invocations(), 0);
}

#[test]
fn entry_without_initializer_is_rejected() {
    let fixture = WorkspaceFixture::new();
    let root = fixture
        .module("alpha")
        .entry_source("// greeter\nfun main() = 1\n")
        .write();
    let ws = Workspace::load(root).unwrap();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();

    let err = compiler(&build, &toolchain).compile(&ws).unwrap_err();
    assert!(matches!(err, CompileError::Structural { .. }));
    assert_eq!(toolchain.invocations(), 0);
}

#[test]
fn toolchain_failure_keeps_diagnostics_and_cache() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("alpha").write()).unwrap();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let compiler = compiler(&build, &toolchain);
    toolchain.fail("alpha", &["main.ks:1: unexpected token", "1 error"]);

    let err = compiler.compile(&ws).unwrap_err();
    assert_eq!(
        err.diagnostics(),
        vec!["main.ks:1: unexpected token".to_string(), "1 error".to_string()]
    );
    assert!(compiler.store().keys(ws.id()).unwrap().is_empty());

    toolchain.heal("alpha");
    assert!(!compiler.compile(&ws).unwrap().cache_hit);
}

#[test]
fn missing_unit_output_is_an_error() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("alpha").write()).unwrap();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    toolchain.skip_output("alpha", PRELUDE_UNIT);

    let err = compiler(&build, &toolchain).compile(&ws).unwrap_err();
    match err {
        CompileError::MissingOutput { unit } => assert_eq!(unit, PRELUDE_UNIT),
        other => panic!("expected missing output, got {other}"),
    }
}

#[test]
fn concurrent_compiles_of_one_module_run_toolchain_once() {
    let fixture = WorkspaceFixture::new();
    let root = fixture.module("alpha").write();
    let build = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let gate = toolchain.gate("alpha");
    let compiler = Arc::new(compiler(&build, &toolchain));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let compiler = Arc::clone(&compiler);
            let root = root.clone();
            thread::spawn(move || compiler.compile(&Workspace::load(root).unwrap()).unwrap())
        })
        .collect();

    while gate.entered() == 0 {
        thread::yield_now();
    }
    gate.open();

    let artifacts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(artifacts[0].key, artifacts[1].key);
    assert_eq!(toolchain.invocations(), 1);
}
