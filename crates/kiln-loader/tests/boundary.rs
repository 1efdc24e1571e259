//! Import resolution across the isolation boundary.

use kiln_build::{ENTRY_FACTORY, ENTRY_UNIT, PRELUDE_UNIT};
use kiln_loader::{IsolationBoundary, LoadError, Resolution};
use kiln_test::wasm::{bundle, unit};

const NS: &str = "kiln:module/alpha/";

fn entry_link() -> String {
    format!("{NS}{ENTRY_UNIT}")
}

#[test]
fn clean_bundle_resolves() {
    let helper = format!("{NS}unit_0");
    let b = bundle(
        "alpha",
        NS,
        vec![
            (PRELUDE_UNIT, unit(&[], &[])),
            ("unit_0", unit(&[("kiln:api", "kiln_log")], &["helper"])),
            (
                ENTRY_UNIT,
                unit(
                    &[(helper.as_str(), "helper"), ("wasi_snapshot_preview1", "fd_write")],
                    &[ENTRY_FACTORY],
                ),
            ),
        ],
    );

    let resolved = IsolationBoundary::default().check(b, NS).unwrap();
    let entry = resolved.entry_unit();
    assert_eq!(entry.link_name, entry_link());
    assert_eq!(
        entry.imports,
        vec![
            (format!("{helper}::helper"), Resolution::Child { unit: helper.clone() }),
            ("wasi_snapshot_preview1::fd_write".to_string(), Resolution::Parent),
        ]
    );
    let unit_0 = resolved.units.iter().find(|u| u.name == "unit_0").unwrap();
    assert_eq!(unit_0.imports, vec![("kiln:api::kiln_log".to_string(), Resolution::Parent)]);
}

#[test]
fn direct_denied_import_fails() {
    let b = bundle(
        "alpha",
        NS,
        vec![(
            ENTRY_UNIT,
            unit(&[("kiln:internal/registry", "lookup")], &[ENTRY_FACTORY]),
        )],
    );

    match IsolationBoundary::default().check(b, NS).unwrap_err() {
        LoadError::Denied { symbol, chain } => {
            assert_eq!(symbol, "kiln:internal/registry::lookup");
            assert_eq!(chain, vec![entry_link()]);
        },
        other => panic!("expected denial, got {other}"),
    }
}

#[test]
fn transitive_denied_import_names_the_chain() {
    let helper = format!("{NS}unit_0");
    let b = bundle(
        "alpha",
        NS,
        vec![
            ("unit_0", unit(&[("kiln:host/secrets", "read")], &["helper"])),
            (ENTRY_UNIT, unit(&[(helper.as_str(), "helper")], &[ENTRY_FACTORY])),
        ],
    );

    let err = IsolationBoundary::default().check(b, NS).unwrap_err();
    let message = err.to_string();
    match err {
        LoadError::Denied { symbol, chain } => {
            assert_eq!(symbol, "kiln:host/secrets::read");
            assert_eq!(chain, vec![entry_link(), helper]);
        },
        other => panic!("expected denial, got {other}"),
    }
    assert!(message.contains("kiln:host/secrets"));
}

#[test]
fn unreachable_unit_is_still_checked() {
    let b = bundle(
        "alpha",
        NS,
        vec![
            ("unit_3", unit(&[("extism:host/user", "anything")], &[])),
            (ENTRY_UNIT, unit(&[], &[ENTRY_FACTORY])),
        ],
    );

    match IsolationBoundary::default().check(b, NS).unwrap_err() {
        LoadError::Denied { chain, .. } => assert_eq!(chain, vec![format!("{NS}unit_3")]),
        other => panic!("expected denial, got {other}"),
    }
}

#[test]
fn missing_factory_fails() {
    let b = bundle("alpha", NS, vec![(ENTRY_UNIT, unit(&[], &["something_else"]))]);
    assert!(matches!(
        IsolationBoundary::default().check(b, NS).unwrap_err(),
        LoadError::MissingFactory { factory: ENTRY_FACTORY, .. }
    ));
}

#[test]
fn unknown_host_function_is_unresolved() {
    let b = bundle(
        "alpha",
        NS,
        vec![(ENTRY_UNIT, unit(&[("kiln:api", "kiln_reboot")], &[ENTRY_FACTORY]))],
    );
    match IsolationBoundary::default().check(b, NS).unwrap_err() {
        LoadError::Unresolved { symbol, unit } => {
            assert_eq!(symbol, "kiln:api::kiln_reboot");
            assert_eq!(unit, entry_link());
        },
        other => panic!("expected unresolved, got {other}"),
    }
}

#[test]
fn other_modules_namespace_is_unreachable() {
    let b = bundle(
        "alpha",
        NS,
        vec![(
            ENTRY_UNIT,
            unit(&[("kiln:module/beta/__entry", ENTRY_FACTORY)], &[ENTRY_FACTORY]),
        )],
    );
    assert!(matches!(
        IsolationBoundary::default().check(b, NS).unwrap_err(),
        LoadError::Unresolved { .. }
    ));
}

#[test]
fn foreign_bundle_is_rejected() {
    let b = bundle(
        "beta",
        "kiln:module/beta/",
        vec![(ENTRY_UNIT, unit(&[], &[ENTRY_FACTORY]))],
    );
    match IsolationBoundary::default().check(b, NS).unwrap_err() {
        LoadError::ForeignUnit { found, expected } => {
            assert_eq!(found, "kiln:module/beta/");
            assert_eq!(expected, NS);
        },
        other => panic!("expected foreign unit, got {other}"),
    }
}

#[test]
fn malformed_unit_is_rejected() {
    let b = bundle(
        "alpha",
        NS,
        vec![
            ("unit_0", b"not wasm".to_vec()),
            (ENTRY_UNIT, unit(&[], &[ENTRY_FACTORY])),
        ],
    );
    match IsolationBoundary::default().check(b, NS).unwrap_err() {
        LoadError::Malformed { unit, .. } => assert_eq!(unit, "unit_0"),
        other => panic!("expected malformed unit, got {other}"),
    }
}

#[test]
fn importing_from_the_entry_unit_is_rejected() {
    let entry = entry_link();
    let b = bundle(
        "alpha",
        NS,
        vec![
            ("unit_0", unit(&[(entry.as_str(), "shared")], &["helper"])),
            (ENTRY_UNIT, unit(&[], &[ENTRY_FACTORY, "shared"])),
        ],
    );

    match IsolationBoundary::default().check(b, NS).unwrap_err() {
        LoadError::EntryImported { symbol, unit } => {
            assert_eq!(symbol, format!("{entry}::shared"));
            assert_eq!(unit, format!("{NS}unit_0"));
        },
        other => panic!("expected entry import rejection, got {other}"),
    }
}
