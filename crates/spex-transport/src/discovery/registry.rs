use std::collections::HashMap;
use std::fmt;

/// Remote interface a module (or control session) speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Commutator,
    Ship,
    Engine,
    ResourceContainer,
    CelestialScanner,
    AsteroidMiner,
    AsteroidScanner,
    PassiveScanner,
    Shipyard,
    BlueprintsLibrary,
    SystemClock,
    Messanger,
}

impl InterfaceKind {
    /// Interface name carried in module payloads.
    pub fn interface_name(self) -> &'static str {
        match self {
            InterfaceKind::Commutator => "commutator",
            InterfaceKind::Ship => "ship",
            InterfaceKind::Engine => "engine",
            InterfaceKind::ResourceContainer => "resource_container",
            InterfaceKind::CelestialScanner => "celestial_scanner",
            InterfaceKind::AsteroidMiner => "asteroid_miner",
            InterfaceKind::AsteroidScanner => "asteroid_scanner",
            InterfaceKind::PassiveScanner => "passive_scanner",
            InterfaceKind::Shipyard => "shipyard",
            InterfaceKind::BlueprintsLibrary => "blueprints_library",
            InterfaceKind::SystemClock => "system_clock",
            InterfaceKind::Messanger => "messanger",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interface_name())
    }
}

/// Maps remote module type names to interface kinds.
///
/// Exact names win over prefixes; among prefixes the longest match wins.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    exact: HashMap<String, InterfaceKind>,
    prefixes: Vec<(String, InterfaceKind)>,
}

impl ModuleRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry for the stock module set.
    pub fn standard() -> Self {
        let mut r = Self::empty();
        r.register_prefix("Ship/", InterfaceKind::Ship);
        for (name, kind) in [
            ("Engine", InterfaceKind::Engine),
            ("ResourceContainer", InterfaceKind::ResourceContainer),
            ("CelestialScanner", InterfaceKind::CelestialScanner),
            ("AsteroidMiner", InterfaceKind::AsteroidMiner),
            ("AsteroidScanner", InterfaceKind::AsteroidScanner),
            ("PassiveScanner", InterfaceKind::PassiveScanner),
            ("Shipyard", InterfaceKind::Shipyard),
            ("BlueprintsLibrary", InterfaceKind::BlueprintsLibrary),
            ("SystemClock", InterfaceKind::SystemClock),
            ("Messanger", InterfaceKind::Messanger),
        ] {
            r.register_exact(name, kind);
        }
        r
    }

    pub fn register_exact(&mut self, type_name: impl Into<String>, kind: InterfaceKind) -> &mut Self {
        self.exact.insert(type_name.into(), kind);
        self
    }

    pub fn register_prefix(&mut self, prefix: impl Into<String>, kind: InterfaceKind) -> &mut Self {
        self.prefixes.push((prefix.into(), kind));
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn resolve(&self, type_name: &str) -> Option<InterfaceKind> {
        if let Some(kind) = self.exact.get(type_name) {
            return Some(*kind);
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| type_name.starts_with(prefix.as_str()))
            .map(|(_, kind)| *kind)
    }
}
