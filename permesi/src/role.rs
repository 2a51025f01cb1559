//! Roles granted to a credential

use std::iter::FromIterator;

use ahash::AHashSet;
use aliri_braid::braid;
use serde::{Deserialize, Serialize};

/// A role name asserted in a credential's `roles` claim
#[braid(serde, ref_doc = "A borrowed reference to a [`Role`]")]
pub struct Role;

/// The set of roles granted to a credential
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Role>", into = "Vec<Role>")]
pub struct RoleSet(AHashSet<Role>);

impl RoleSet {
    /// Produces an empty role set
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(AHashSet::new())
    }

    /// Adds a role to the set
    #[inline]
    pub fn insert(&mut self, role: Role) {
        self.0.insert(role);
    }

    /// Whether the set grants the given role
    #[inline]
    #[must_use]
    pub fn contains(&self, role: &RoleRef) -> bool {
        self.0.contains(role)
    }

    /// Indicates whether no roles are granted
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Produces an iterator of the roles in this set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &RoleRef> {
        self.0.iter().map(AsRef::as_ref)
    }
}

impl From<Vec<Role>> for RoleSet {
    #[inline]
    fn from(roles: Vec<Role>) -> Self {
        Self(roles.into_iter().collect())
    }
}

impl From<RoleSet> for Vec<Role> {
    #[inline]
    fn from(set: RoleSet) -> Self {
        set.0.into_iter().collect()
    }
}

impl<R> FromIterator<R> for RoleSet
where
    R: Into<Role>,
{
    #[inline]
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = R>,
    {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
