//! Service address resolution.
//!
//! Local mode loops every call back into this process. Cluster mode names
//! one service per atom (`atom-<symbol>`) and chains bonds through a ring of
//! `bond-1..bond-<max>` that ends in the catch-all `bond-n`.

use crate::config::{Config, DeployMode, Role, BASE_PATH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolver {
    mode: DeployMode,
    port: u16,
    role: Role,
    max_bond: usize,
}

impl Resolver {
    pub fn new(config: &Config) -> Self {
        Self {
            mode: config.mode,
            port: config.port,
            role: config.role,
            max_bond: config.max_bond,
        }
    }

    /// Endpoint serving `symbol` (query string not included).
    pub fn atom_url(&self, symbol: &str) -> String {
        let symbol = symbol.to_ascii_lowercase();
        match self.mode {
            DeployMode::Local => {
                format!("http://localhost:{}{}/atoms/{}", self.port, BASE_PATH, symbol)
            }
            DeployMode::Cluster => format!("http://atom-{}{}/atoms/{}", symbol, BASE_PATH, symbol),
        }
    }

    /// Endpoint receiving the next bond fragment from this instance.
    pub fn bond_url(&self) -> String {
        match self.mode {
            DeployMode::Local => format!("http://localhost:{}{}/bonds/n", self.port, BASE_PATH),
            DeployMode::Cluster => match self.next_bond() {
                Some(k) => format!("http://bond-{}{}/bonds/{}", k, BASE_PATH, k),
                None => format!("http://bond-n{}/bonds/n", BASE_PATH),
            },
        }
    }

    /// Next numbered hop in the ring, or `None` for `bond-n`.
    fn next_bond(&self) -> Option<usize> {
        let next = match self.role {
            Role::App => 1,
            Role::Bond(k) => k + 1,
            Role::BondN => return None,
        };
        (next <= self.max_bond).then_some(next)
    }
}
