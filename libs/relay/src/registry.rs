//! Connection registry.
//!
//! Keeps the symmetric downstream/upstream pairing for every live session.
//! Both directions of a pair are inserted and removed together, so a lookup
//! never observes half a pair.

use std::collections::HashMap;

use crate::error::RegistryError;
use crate::handle::{Handle, Pair, Role};

#[derive(Debug, Clone, Copy)]
struct Entry {
    partner: Handle,
    role: Role,
}

/// Pairing table for one listener.
#[derive(Debug)]
pub struct Registry {
    listener: Handle,
    entries: HashMap<Handle, Entry>,
}

impl Registry {
    pub fn new(listener: Handle) -> Self {
        Self {
            listener,
            entries: HashMap::new(),
        }
    }

    /// Register `downstream` and `upstream` as mutual partners.
    ///
    /// Fails without touching the table if either handle is already known,
    /// is the listener, or both handles are the same.
    pub fn pair(&mut self, downstream: Handle, upstream: Handle) -> Result<(), RegistryError> {
        for handle in [downstream, upstream] {
            if handle == self.listener || self.entries.contains_key(&handle) {
                return Err(RegistryError::AlreadyPaired(handle));
            }
        }
        if downstream == upstream {
            return Err(RegistryError::AlreadyPaired(downstream));
        }

        self.entries.insert(
            downstream,
            Entry {
                partner: upstream,
                role: Role::Downstream,
            },
        );
        self.entries.insert(
            upstream,
            Entry {
                partner: downstream,
                role: Role::Upstream,
            },
        );
        Ok(())
    }

    /// Partner of `handle`.
    pub fn lookup(&self, handle: Handle) -> Result<Handle, RegistryError> {
        self.entries
            .get(&handle)
            .map(|entry| entry.partner)
            .ok_or(RegistryError::UnknownHandle(handle))
    }

    /// Remove `handle` and its partner in one step.
    ///
    /// Returns the removed pair, or `None` if it was already gone.
    pub fn unpair(&mut self, handle: Handle) -> Option<Pair> {
        let entry = self.entries.remove(&handle)?;
        self.entries.remove(&entry.partner);

        let pair = match entry.role {
            Role::Upstream => Pair {
                downstream: entry.partner,
                upstream: handle,
            },
            _ => Pair {
                downstream: handle,
                upstream: entry.partner,
            },
        };
        Some(pair)
    }

    pub fn role_of(&self, handle: Handle) -> Option<Role> {
        if handle == self.listener {
            return Some(Role::Listener);
        }
        self.entries.get(&handle).map(|entry| entry.role)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live pairs.
    pub fn len(&self) -> usize {
        self.entries.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every live pair.
    pub fn pairs(&self) -> Vec<Pair> {
        let mut pairs: Vec<Pair> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.role == Role::Downstream)
            .map(|(&downstream, entry)| Pair {
                downstream,
                upstream: entry.partner,
            })
            .collect();
        pairs.sort_by_key(|pair| pair.downstream);
        pairs
    }
}
