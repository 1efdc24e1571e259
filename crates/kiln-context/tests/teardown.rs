//! Context teardown and leak detection.

use std::sync::Arc;
use std::time::Duration;

use kiln_context::{ContextError, HostServices, ModuleContext, ResourceKind};
use kiln_workspace::Workspace;
use tempfile::TempDir;

fn workspace(manifest: &str) -> (TempDir, Workspace) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("module.toml"), manifest).unwrap();
    std::fs::write(dir.path().join("src/main.ks"), "module {}\n").unwrap();
    let ws = Workspace::load(dir.path()).unwrap();
    (dir, ws)
}

fn context(services: &HostServices, manifest: &str) -> (TempDir, Arc<ModuleContext>) {
    let (dir, ws) = workspace(manifest);
    let ctx = services.create_context(&ws).unwrap();
    (dir, ctx)
}

const SHOP: &str = r#"
id = "shop"
commands = ["Buy", "sell"]
permissions = ["shop.use"]

[prices]
apple = 3
"#;

#[tokio::test]
async fn only_declared_commands_and_permissions_register() {
    let services = HostServices::new(tokio::runtime::Handle::current());
    let (_dir, ctx) = context(&services, SHOP);

    assert_eq!(ctx.register_command(" BUY ", Some("shop.use")).unwrap(), "buy");
    assert!(matches!(
        ctx.register_command("steal", None),
        Err(ContextError::UndeclaredCommand { .. })
    ));
    assert!(matches!(
        ctx.register_command("sell", Some("admin")),
        Err(ContextError::UndeclaredPermission { .. })
    ));
    assert_eq!(services.commands().owned_by(ctx.id()), vec!["buy"]);
}

#[tokio::test]
async fn config_values_are_reachable_by_path() {
    let services = HostServices::new(tokio::runtime::Handle::current());
    let (_dir, ctx) = context(&services, SHOP);
    assert_eq!(
        ctx.config_value("prices.apple").and_then(toml::Value::as_integer),
        Some(3)
    );
    assert!(ctx.config_value("prices.pear").is_none());
}

#[tokio::test]
async fn close_releases_everything_and_flushes_storage() {
    let services = HostServices::new(tokio::runtime::Handle::current());
    let (dir, ctx) = context(&services, SHOP);

    ctx.register_command("buy", None).unwrap();
    ctx.subscribe("player.join").unwrap();
    ctx.subscribe("tick").unwrap();
    ctx.spawn(async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    })
    .unwrap();
    ctx.storage().set("visits", "1");

    let report = ctx.close();
    assert_eq!(report.subscriptions, 2);
    assert_eq!(report.commands, 1);
    assert_eq!(report.tasks, 1);
    assert!(report.storage_flushed);
    assert!(report.storage_error.is_none());

    assert!(services.commands().get("buy").is_none());
    assert_eq!(services.events().subscription_count(ctx.id()), 0);
    assert!(dir.path().join("data.toml").is_file());

    let second = ctx.close();
    assert_eq!(second.subscriptions, 0);
    assert!(!second.storage_flushed);
}

#[tokio::test]
async fn acquiring_after_close_is_refused_and_reported() {
    let services = HostServices::new(tokio::runtime::Handle::current());
    let (_dir, ctx) = context(&services, SHOP);
    ctx.close();

    assert!(matches!(ctx.subscribe("tick"), Err(ContextError::Closed(_))));
    assert!(matches!(ctx.register_command("buy", None), Err(ContextError::Closed(_))));
    assert_eq!(services.events().subscription_count(ctx.id()), 0);
    assert!(services.commands().get("buy").is_none());

    let leaks = ctx.leaks();
    assert_eq!(leaks.len(), 2);
    assert_eq!(leaks[0].kind, ResourceKind::Subscription);
    assert_eq!(leaks[1].kind, ResourceKind::Command);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_that_ignores_abort_is_a_leak() {
    let services = HostServices::new(tokio::runtime::Handle::current());
    let (_dir, ctx) = context(&services, SHOP);

    let (started_tx, started_rx) = std::sync::mpsc::channel();
    ctx.spawn(async move {
        started_tx.send(()).unwrap();
        // Blocks the worker without yielding, so abort cannot land yet.
        std::thread::sleep(Duration::from_millis(300));
    })
    .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    ctx.close();
    let leaks = ctx.leaks();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].kind, ResourceKind::Task);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(ctx.leaks().is_empty());
}

#[tokio::test]
async fn unsubscribe_untracks() {
    let services = HostServices::new(tokio::runtime::Handle::current());
    let (_dir, ctx) = context(&services, SHOP);
    let sub = ctx.subscribe("tick").unwrap();
    assert!(ctx.unsubscribe(sub));
    assert!(!ctx.unsubscribe(sub));
    assert_eq!(ctx.resources().count(ResourceKind::Subscription), 0);
    assert_eq!(ctx.close().subscriptions, 0);
}
