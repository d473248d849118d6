//! Variable routing declarations
//!
//! The declaration file maps each model variable to the wire protocols that
//! carry it, the externally visible pvname, whether this process serves the
//! variable or mirrors an externally hosted one, and the optional set of
//! child fields a protocol exposes as separately addressable handles.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use varmodel::{Kind, Model};

/// A wire protocol identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ca,
    Pva,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Ca => write!(f, "ca"),
            Protocol::Pva => write!(f, "pva"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ca" => Ok(Protocol::Ca),
            "pva" => Ok(Protocol::Pva),
            other => Err(eyre!("invalid protocol '{}': options are \"ca\" and \"pva\"", other)),
        }
    }
}

/// Which protocol(s) carry a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolChoice {
    Ca,
    Pva,
    Both,
}

impl ProtocolChoice {
    /// Whether this choice includes the given protocol
    pub fn carries(&self, protocol: Protocol) -> bool {
        match self {
            ProtocolChoice::Both => true,
            ProtocolChoice::Ca => protocol == Protocol::Ca,
            ProtocolChoice::Pva => protocol == Protocol::Pva,
        }
    }
}

fn default_serve() -> bool {
    true
}

fn default_protocol() -> ProtocolChoice {
    ProtocolChoice::Both
}

/// Routing for a single variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// Externally visible identifier; may differ from the variable name
    pub pvname: String,

    #[serde(default = "default_protocol")]
    pub protocol: ProtocolChoice,

    /// When false this process mirrors an externally hosted variable: it is
    /// read once at startup and never written by the coordinator
    #[serde(default = "default_serve")]
    pub serve: bool,

    /// Child fields exposed as separately addressable handles; None means
    /// the protocol's full default set for the variable kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

impl RoutingEntry {
    pub fn new(pvname: impl Into<String>) -> Self {
        Self {
            pvname: pvname.into(),
            protocol: ProtocolChoice::Both,
            serve: true,
            fields: None,
        }
    }
}

/// The full variable -> routing mapping consumed at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Routing {
    pub variables: HashMap<String, RoutingEntry>,
}

impl Routing {
    /// Load routing declarations from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .context(format!("Failed to read declarations from {}", path.as_ref().display()))?;
        let routing: Self = serde_yaml::from_str(&content).context("Failed to parse declarations file")?;
        Ok(routing)
    }

    /// Build a routing that serves every model variable on both protocols,
    /// with pvnames formed as `<prefix>:<name>`
    pub fn default_for_model(model: &dyn Model, prefix: &str) -> Self {
        let mut variables = HashMap::new();
        for name in model.input_variables().into_keys().chain(model.output_variables().into_keys()) {
            let entry = RoutingEntry::new(format!("{prefix}:{name}"));
            variables.insert(name, entry);
        }
        Self { variables }
    }

    pub fn entry(&self, name: &str) -> Option<&RoutingEntry> {
        self.variables.get(name)
    }

    /// Whether the named variable is carried by the given protocol
    pub fn carried_by(&self, name: &str, protocol: Protocol) -> bool {
        self.variables
            .get(name)
            .is_some_and(|entry| entry.protocol.carries(protocol))
    }

    /// Map of pvname -> variable name
    pub fn pvname_to_varname(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(name, entry)| (entry.pvname.clone(), name.clone()))
            .collect()
    }

    /// Check the routing against the model's declared variables
    ///
    /// Every model variable must have exactly one entry, entries must not
    /// reference unknown variables, mirrors are inputs only, fields only
    /// make sense on decomposable kinds, and every input must be reachable
    /// through at least one enabled protocol (otherwise the cold-start gate
    /// could never resolve).
    pub fn validate(&self, model: &dyn Model, protocols: &[Protocol]) -> Result<()> {
        let inputs = model.input_variables();
        let outputs = model.output_variables();

        for name in inputs.keys().chain(outputs.keys()) {
            if !self.variables.contains_key(name) {
                return Err(eyre!("model variable '{}' has no routing entry", name));
            }
        }

        let mut seen_pvnames: HashSet<&str> = HashSet::new();
        for (name, entry) in &self.variables {
            let variable = match (inputs.get(name), outputs.get(name)) {
                (Some(v), _) | (_, Some(v)) => v,
                (None, None) => {
                    return Err(eyre!("routing entry '{}' does not match any model variable", name));
                }
            };

            if !seen_pvnames.insert(entry.pvname.as_str()) {
                return Err(eyre!("pvname '{}' is declared more than once", entry.pvname));
            }

            if !entry.serve && !inputs.contains_key(name) {
                return Err(eyre!(
                    "variable '{}' is an output and cannot mirror an external source (serve: false)",
                    name
                ));
            }

            if entry.fields.is_some() && variable.kind() == Kind::Scalar {
                return Err(eyre!("scalar variable '{}' cannot declare child fields", name));
            }
        }

        for name in inputs.keys() {
            let entry = &self.variables[name];
            if !protocols.iter().any(|p| entry.protocol.carries(*p)) {
                return Err(eyre!(
                    "input '{}' is not carried by any enabled protocol; it would never be seeded",
                    name
                ));
            }
        }

        Ok(())
    }
}
