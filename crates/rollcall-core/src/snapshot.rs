//! Immutable, session-scoped view of the identity registry.
//!
//! A snapshot is loaded once when a monitoring session starts and never
//! mutated afterwards. Picking up registry changes means building a new
//! snapshot (and in practice starting a new session).

use crate::types::{IdentityId, Identity, InvalidInput};
use std::collections::HashSet;

/// Known identities, ordered by ascending id.
#[derive(Debug, Clone)]
pub struct Snapshot {
    dimension: usize,
    identities: Vec<Identity>,
}

impl Snapshot {
    /// Build a snapshot whose reference encodings all have `dimension` components.
    ///
    /// Rejects duplicate ids, duplicate names, and reference encodings of the
    /// wrong dimension or with non-finite values.
    pub fn load(
        dimension: usize,
        identities: impl IntoIterator<Item = Identity>,
    ) -> Result<Self, InvalidInput> {
        if dimension == 0 {
            return Err(InvalidInput("encoding dimension must be non-zero".into()));
        }

        let mut identities: Vec<Identity> = identities.into_iter().collect();
        {
            let mut names = HashSet::with_capacity(identities.len());
            for identity in &identities {
                identity.reference_encoding.validate(dimension).map_err(|e| {
                    InvalidInput(format!("identity {} ({}): {}", identity.id, identity.name, e.0))
                })?;
                if !names.insert(identity.name.as_str()) {
                    return Err(InvalidInput(format!("duplicate identity name: {}", identity.name)));
                }
            }
        }

        identities.sort_by_key(|i| i.id);
        if let Some(pair) = identities.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(InvalidInput(format!("duplicate identity id: {}", pair[0].id)));
        }

        Ok(Self {
            dimension,
            identities,
        })
    }

    /// A snapshot with no identities; every match against it is rejected.
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            identities: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Expected dimension of probe encodings.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities
            .binary_search_by_key(&id, |i| i.id)
            .ok()
            .map(|idx| &self.identities[idx])
    }

    /// Iterate identities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }
}
