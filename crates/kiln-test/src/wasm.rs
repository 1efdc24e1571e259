//! Minimal WebAssembly units and bundles.

use std::path::Path;

use kiln_build::{Bundle, BundleMeta, BundleUnit, ENTRY_UNIT, ToolchainInfo};
use wasm_encoder::{
    CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection, ImportSection,
    Instruction, Module, TypeSection, ValType,
};

/// A unit importing `imports` as `() -> ()` functions and exporting each of
/// `exports` as a `() -> i32` function returning 0.
#[must_use]
pub fn unit(imports: &[(&str, &str)], exports: &[&str]) -> Vec<u8> {
    let exports: Vec<(&str, i32)> = exports.iter().map(|name| (*name, 0)).collect();
    unit_returning(imports, &exports)
}

/// Like [`unit`], with an explicit return value per export. Extism treats a
/// non-zero return as a failed call.
#[must_use]
pub fn unit_returning(imports: &[(&str, &str)], exports: &[(&str, i32)]) -> Vec<u8> {
    let mut module = Module::new();

    let mut types = TypeSection::new();
    // type 0: () -> ()  for imports
    types.ty().function([], []);
    // type 1: () -> i32  for exports
    types.ty().function([], [ValType::I32]);
    module.section(&types);

    let mut import_section = ImportSection::new();
    for (namespace, name) in imports {
        import_section.import(namespace, name, EntityType::Function(0));
    }
    if !imports.is_empty() {
        module.section(&import_section);
    }

    let mut funcs = FunctionSection::new();
    for _ in exports {
        funcs.function(1);
    }
    module.section(&funcs);

    let offset = u32::try_from(imports.len()).unwrap_or(u32::MAX);
    let mut export_section = ExportSection::new();
    let mut index = offset;
    for (name, _) in exports {
        export_section.export(name, ExportKind::Func, index);
        index = index.saturating_add(1);
    }
    module.section(&export_section);

    let mut code = CodeSection::new();
    for (_, value) in exports {
        let mut f = Function::new([]);
        f.instruction(&Instruction::I32Const(*value));
        f.instruction(&Instruction::End);
        code.function(&f);
    }
    module.section(&code);

    module.finish()
}

/// Toolchain identity recorded in bundles built by these helpers.
#[must_use]
pub fn test_toolchain_info() -> ToolchainInfo {
    ToolchainInfo {
        name: "fake".into(),
        version: "1.0.0".into(),
        target: "wasm32-unknown-unknown".into(),
    }
}

/// A bundle for `module_id` in `namespace`. The unit named
/// [`ENTRY_UNIT`] is the entry.
#[must_use]
pub fn bundle(module_id: &str, namespace: &str, units: Vec<(&str, Vec<u8>)>) -> Bundle {
    Bundle {
        meta: BundleMeta::new(
            module_id,
            namespace,
            ENTRY_UNIT,
            "0".repeat(64),
            test_toolchain_info(),
        ),
        units: units
            .into_iter()
            .map(|(name, bytes)| BundleUnit {
                name: name.to_string(),
                bytes,
            })
            .collect(),
    }
}

/// Write `bundle` to `path`.
///
/// # Panics
///
/// Panics if the bundle cannot be encoded or written.
pub fn write_bundle(path: &Path, bundle: &Bundle) {
    let bytes = bundle.to_bytes().expect("encode bundle");
    std::fs::write(path, bytes).expect("write bundle");
}
