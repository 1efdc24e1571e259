//! Resolution of an artifact's imports against the symbol policy.

use std::collections::{BTreeSet, HashMap, VecDeque};

use kiln_build::{Bundle, BundleMeta, ENTRY_FACTORY};
use tracing::debug;
use wasmparser::{Parser, Payload};

use crate::error::{LoadError, LoadResult};
use crate::policy::{RuleAction, SymbolPolicy};
use crate::surface::HostSurface;

/// Where an import was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// From the host.
    Parent,
    /// From another unit of the same artifact.
    Child {
        /// Link name of the providing unit.
        unit: String,
    },
}

/// A unit that passed the boundary.
#[derive(Debug, Clone)]
pub struct ResolvedUnit {
    /// Unit name inside the bundle.
    pub name: String,
    /// Name other units import it by: `<namespace><name>`. The entry unit
    /// cannot be imported.
    pub link_name: String,
    /// WebAssembly bytes.
    pub bytes: Vec<u8>,
    /// Every import with its resolution, in declaration order.
    pub imports: Vec<(String, Resolution)>,
    /// Exported names.
    pub exports: BTreeSet<String>,
}

/// An artifact whose every import is accounted for.
#[derive(Debug, Clone)]
pub struct ResolvedBundle {
    /// Bundle header.
    pub meta: BundleMeta,
    /// Units in bundle order.
    pub units: Vec<ResolvedUnit>,
    /// Index of the entry unit in `units`.
    pub entry: usize,
}

impl ResolvedBundle {
    /// The entry unit.
    #[must_use]
    pub fn entry_unit(&self) -> &ResolvedUnit {
        &self.units[self.entry]
    }
}

struct ParsedUnit {
    name: String,
    link_name: String,
    bytes: Vec<u8>,
    imports: Vec<(String, String)>,
    exports: BTreeSet<String>,
}

/// Policy plus host surface.
#[derive(Debug, Clone)]
pub struct IsolationBoundary {
    policy: SymbolPolicy,
    surface: HostSurface,
}

impl Default for IsolationBoundary {
    fn default() -> Self {
        Self::new(SymbolPolicy::default(), HostSurface::kiln_default())
    }
}

impl IsolationBoundary {
    /// Create a boundary.
    #[must_use]
    pub fn new(policy: SymbolPolicy, surface: HostSurface) -> Self {
        Self { policy, surface }
    }

    /// The policy table.
    #[must_use]
    pub fn policy(&self) -> &SymbolPolicy {
        &self.policy
    }

    /// Resolve every import of `bundle`, which must belong to
    /// `expected_namespace`.
    ///
    /// Units reachable from the entry are checked first, so a denial names
    /// the chain of units that leads to it. Unreachable units are checked
    /// afterwards since they are instantiated all the same.
    ///
    /// # Errors
    ///
    /// Returns the first [`LoadError`] found.
    pub fn check(&self, bundle: Bundle, expected_namespace: &str) -> LoadResult<ResolvedBundle> {
        if bundle.meta.namespace != expected_namespace {
            return Err(LoadError::ForeignUnit {
                found: bundle.meta.namespace.clone(),
                expected: expected_namespace.to_string(),
            });
        }

        let Bundle { meta, units } = bundle;
        let parsed = units
            .into_iter()
            .map(|u| parse_unit(u.name, u.bytes, &meta.namespace))
            .collect::<LoadResult<Vec<_>>>()?;

        let entry = parsed
            .iter()
            .position(|u| u.name == meta.entry_unit)
            .ok_or_else(|| LoadError::MissingFactory {
                unit: meta.entry_unit.clone(),
                factory: ENTRY_FACTORY,
            })?;
        if !parsed[entry].exports.contains(ENTRY_FACTORY) {
            return Err(LoadError::MissingFactory {
                unit: parsed[entry].link_name.clone(),
                factory: ENTRY_FACTORY,
            });
        }

        let by_link: HashMap<&str, usize> = parsed
            .iter()
            .enumerate()
            .map(|(i, u)| (u.link_name.as_str(), i))
            .collect();

        let mut resolved: Vec<Option<Vec<(String, Resolution)>>> = vec![None; parsed.len()];
        let mut queue = VecDeque::from([(entry, vec![parsed[entry].link_name.clone()])]);
        let mut seen = vec![false; parsed.len()];
        seen[entry] = true;

        let mut order: Vec<usize> = Vec::with_capacity(parsed.len());
        while let Some((idx, chain)) = queue.pop_front() {
            let imports = self.resolve_unit(&parsed, &by_link, entry, idx, &chain)?;
            for (_, resolution) in &imports {
                if let Resolution::Child { unit } = resolution
                    && let Some(&next) = by_link.get(unit.as_str())
                    && !seen[next]
                {
                    seen[next] = true;
                    let mut next_chain = chain.clone();
                    next_chain.push(unit.clone());
                    queue.push_back((next, next_chain));
                }
            }
            resolved[idx] = Some(imports);
            order.push(idx);
        }

        for idx in 0..parsed.len() {
            if resolved[idx].is_none() {
                let chain = vec![parsed[idx].link_name.clone()];
                resolved[idx] = Some(self.resolve_unit(&parsed, &by_link, entry, idx, &chain)?);
            }
        }

        debug!(
            namespace = %meta.namespace,
            units = parsed.len(),
            reachable = order.len(),
            "Artifact passed isolation boundary"
        );

        let units = parsed
            .into_iter()
            .zip(resolved)
            .map(|(unit, imports)| ResolvedUnit {
                name: unit.name,
                link_name: unit.link_name,
                bytes: unit.bytes,
                imports: imports.unwrap_or_default(),
                exports: unit.exports,
            })
            .collect();
        Ok(ResolvedBundle { meta, units, entry })
    }

    fn resolve_unit(
        &self,
        parsed: &[ParsedUnit],
        by_link: &HashMap<&str, usize>,
        entry: usize,
        idx: usize,
        chain: &[String],
    ) -> LoadResult<Vec<(String, Resolution)>> {
        let unit = &parsed[idx];
        let mut out = Vec::with_capacity(unit.imports.len());
        for (namespace, name) in &unit.imports {
            let symbol = format!("{namespace}::{name}");
            let child = by_link
                .get(namespace.as_str())
                .filter(|&&i| parsed[i].exports.contains(name))
                .map(|_| Resolution::Child {
                    unit: namespace.clone(),
                });
            let parent = self
                .surface
                .provides(namespace, name)
                .then_some(Resolution::Parent);

            let resolution = match self.policy.evaluate(&symbol) {
                RuleAction::Deny => {
                    return Err(LoadError::Denied {
                        symbol,
                        chain: chain.to_vec(),
                    });
                },
                RuleAction::ChildFirst => child.or(parent),
                RuleAction::ParentFirst => parent.or(child),
            };
            let Some(resolution) = resolution else {
                return Err(LoadError::Unresolved {
                    symbol,
                    unit: unit.link_name.clone(),
                });
            };
            if let Resolution::Child { unit: target } = &resolution
                && by_link.get(target.as_str()) == Some(&entry)
            {
                return Err(LoadError::EntryImported {
                    symbol,
                    unit: unit.link_name.clone(),
                });
            }
            out.push((symbol, resolution));
        }
        Ok(out)
    }
}

fn parse_unit(name: String, bytes: Vec<u8>, namespace: &str) -> LoadResult<ParsedUnit> {
    let malformed = |message: String| LoadError::Malformed {
        unit: name.clone(),
        message,
    };
    let mut imports = Vec::new();
    let mut exports = BTreeSet::new();

    for payload in Parser::new(0).parse_all(&bytes) {
        match payload.map_err(|e| malformed(e.to_string()))? {
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(|e| malformed(e.to_string()))?;
                    imports.push((import.module.to_string(), import.name.to_string()));
                }
            },
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(|e| malformed(e.to_string()))?;
                    exports.insert(export.name.to_string());
                }
            },
            _ => {},
        }
    }

    Ok(ParsedUnit {
        link_name: format!("{namespace}{name}"),
        name,
        bytes,
        imports,
        exports,
    })
}
