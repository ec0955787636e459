//! Administrator set for privileged operations.

use crate::error::GovernanceError;
use agora_types::Identity;
use std::collections::HashSet;

#[derive(Clone, Debug, Default)]
pub struct AdminSet {
    admins: HashSet<Identity>,
}

impl AdminSet {
    pub fn new(admins: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }

    pub fn is_admin(&self, actor: &Identity) -> bool {
        self.admins.contains(actor)
    }

    /// Fail with `Unauthorized` unless `actor` is an administrator.
    pub fn authorize(&self, actor: &Identity) -> Result<(), GovernanceError> {
        if self.is_admin(actor) {
            Ok(())
        } else {
            tracing::warn!(actor = %actor, "unauthorized administrative call");
            Err(GovernanceError::Unauthorized(actor.to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.admins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }
}
