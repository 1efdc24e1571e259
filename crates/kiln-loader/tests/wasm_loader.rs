//! End-to-end load of a bundle through Extism.

use std::sync::Arc;

use kiln_build::{Artifact, CacheKey, ENTRY_FACTORY, ENTRY_UNIT};
use kiln_context::HostServices;
use kiln_loader::{LoadError, ModuleLoader, ON_ENABLE_EXPORT, WasmModuleLoader};
use kiln_test::WorkspaceFixture;
use kiln_test::wasm::{bundle, unit, write_bundle};
use kiln_workspace::Workspace;

fn artifact(ws: &Workspace, fixture: &WorkspaceFixture, units: Vec<(&str, Vec<u8>)>) -> Artifact {
    let ns = format!("kiln:module/{}/", ws.id().package_part());
    let path = fixture.root().join("bundle.kart");
    write_bundle(&path, &bundle(ws.id().as_str(), &ns, units));
    Artifact {
        module: ws.id().clone(),
        key: CacheKey::from_hex(&"a".repeat(64)).unwrap(),
        path,
        cache_hit: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn loads_instantiates_and_enables() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("alpha").write()).unwrap();
    let artifact = artifact(
        &ws,
        &fixture,
        vec![(ENTRY_UNIT, unit(&[], &[ENTRY_FACTORY, ON_ENABLE_EXPORT]))],
    );

    let services = HostServices::new(tokio::runtime::Handle::current());
    let ctx = services.create_context(&ws).unwrap();

    let mut handle = WasmModuleLoader::new().load(&ws, &artifact).unwrap();
    assert_eq!(handle.module(), ws.id());
    let mut instance = handle.instantiate(Arc::clone(&ctx)).unwrap();
    instance.enable().unwrap();
    // No disable export: nothing to run.
    instance.disable().unwrap();

    drop(instance);
    handle.release();
    ctx.close();
}

#[test]
fn denied_import_fails_before_instantiation() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("alpha").write()).unwrap();
    let artifact = artifact(
        &ws,
        &fixture,
        vec![(
            ENTRY_UNIT,
            unit(&[("kiln:internal/host", "shutdown")], &[ENTRY_FACTORY]),
        )],
    );

    let Err(err) = WasmModuleLoader::new().load(&ws, &artifact) else {
        panic!("denied import loaded");
    };
    assert!(matches!(err, LoadError::Denied { .. }));
}

#[test]
fn unreadable_artifact_is_reported() {
    let fixture = WorkspaceFixture::new();
    let ws = Workspace::load(fixture.module("alpha").write()).unwrap();
    let artifact = Artifact {
        module: ws.id().clone(),
        key: CacheKey::from_hex(&"b".repeat(64)).unwrap(),
        path: fixture.root().join("missing.kart"),
        cache_hit: false,
    };

    let Err(err) = WasmModuleLoader::new().load(&ws, &artifact) else {
        panic!("missing artifact loaded");
    };
    assert!(matches!(err, LoadError::Artifact { .. }));
}
