//! On-call candidates and the registry that tracks who is on duty.

use std::collections::HashSet;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An on-call candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Responder {
    /// Display name presented during escalation.
    pub name: String,
    /// Delivery target handed to notifiers (phone number, handle, ...).
    ///
    /// Also used as the opaque identifier of the escalation choice.
    #[serde(rename = "phone")]
    pub address: String,
}

impl Responder {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// One entry of the choice set presented by an escalation transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub id: String,
}

/// Fixed, ordered list of candidates loaded once at startup.
///
/// Exactly one entry is on duty after a selection round. The flag is written
/// only by the escalation manager, between activation windows.
#[derive(Debug)]
pub struct ResponderRegistry {
    responders: Vec<Responder>,
    on_duty: RwLock<Option<usize>>,
}

impl ResponderRegistry {
    /// Build a registry, rejecting empty lists and duplicate addresses.
    pub fn new(responders: Vec<Responder>) -> Result<Self> {
        if responders.is_empty() {
            return Err(Error::config("responder registry is empty"));
        }

        let mut seen = HashSet::new();
        for responder in &responders {
            if responder.address.trim().is_empty() {
                return Err(Error::config(format!(
                    "responder '{}' has an empty address",
                    responder.name
                )));
            }
            if !seen.insert(responder.address.as_str()) {
                return Err(Error::config(format!(
                    "duplicate responder address '{}'",
                    responder.address
                )));
            }
        }

        Ok(Self {
            responders,
            on_duty: RwLock::new(None),
        })
    }

    pub fn responders(&self) -> &[Responder] {
        &self.responders
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }

    /// First entry in registry order.
    pub fn first(&self) -> &Responder {
        // Non-empty by construction.
        &self.responders[0]
    }

    pub fn find(&self, address: &str) -> Option<&Responder> {
        self.responders.iter().find(|r| r.address == address)
    }

    /// Choice set presented to the escalation transport, in registry order.
    pub fn choices(&self) -> Vec<Choice> {
        self.responders
            .iter()
            .map(|r| Choice {
                label: r.name.clone(),
                id: r.address.clone(),
            })
            .collect()
    }

    /// Mark the responder with `address` on duty and clear every other flag.
    ///
    /// Returns `None` (and leaves the current flag untouched) for unknown
    /// addresses.
    pub fn mark_on_duty(&self, address: &str) -> Option<Responder> {
        let index = self.responders.iter().position(|r| r.address == address)?;
        *self.on_duty.write() = Some(index);
        Some(self.responders[index].clone())
    }

    /// Clear the on-duty flag ahead of a new selection round.
    pub fn clear_on_duty(&self) {
        *self.on_duty.write() = None;
    }

    pub fn on_duty(&self) -> Option<Responder> {
        self.on_duty.read().map(|i| self.responders[i].clone())
    }

    pub fn is_on_duty(&self, address: &str) -> bool {
        self.on_duty()
            .is_some_and(|responder| responder.address == address)
    }
}
