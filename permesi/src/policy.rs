//! Authorization policy over verified claims

use std::fmt;

use ahash::AHashSet;
use aliri_braid::braid;
use thiserror::Error;

use crate::{
    jwt::ClaimSet,
    role::Role,
    scope::{Scope, ScopeToken},
};

/// A protected resource family, such as `tools` or `prompts`
#[braid(serde, ref_doc = "A borrowed reference to a [`Resource`]")]
pub struct Resource;

/// The kind of access requested against a resource
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Listing or reading the resource
    Read,

    /// Invoking or mutating the resource
    Execute,
}

impl Action {
    /// The name of the action
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request was denied by policy
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("access denied by policy")]
pub struct AccessDenied;

/// Decides whether a verified identity may act on a resource
///
/// Grants are checked in a fixed order of precedence:
///
/// 1. holders of the admin role may do anything;
/// 2. a scope token naming the resource exactly (`<prefix>:<resource>`)
///    grants every action on it;
/// 3. the generic read scope (`<prefix>:read`) grants [`Action::Read`]
///    on any resource not explicitly excluded from it.
///
/// Anything else is denied. Note that precedence means an exclusion in
/// rule 3 never blocks a grant under rules 1 or 2.
#[derive(Clone, Debug)]
#[must_use]
pub struct AccessPolicy {
    scope_prefix: String,
    read_scope: ScopeToken,
    admin_role: Role,
    read_excluded: AHashSet<Resource>,
}

impl AccessPolicy {
    /// A policy where the generic read scope covers every resource
    pub fn permissive() -> Self {
        Self::with_scope_prefix("mcp")
    }

    /// A policy where `tools` and `prompts` require their own scopes
    ///
    /// Tool and prompt listings can reveal the shape of an
    /// installation, so a deployment may prefer to keep them out of
    /// the generic read grant.
    pub fn strict() -> Self {
        Self::permissive()
            .exclude_from_read(Resource::from_static("tools"))
            .exclude_from_read(Resource::from_static("prompts"))
    }

    /// Constructs a permissive policy with a custom scope prefix
    ///
    /// # Panics
    ///
    /// Panics if `prefix` contains characters not permitted in a scope
    /// token.
    pub fn with_scope_prefix(prefix: impl Into<String>) -> Self {
        let scope_prefix = prefix.into();
        let read_scope = match ScopeToken::new(format!("{scope_prefix}:read")) {
            Ok(token) => token,
            Err(err) => panic!("{}: scope prefix = {}", err, scope_prefix),
        };

        Self {
            scope_prefix,
            read_scope,
            admin_role: Role::from_static("admin"),
            read_excluded: AHashSet::new(),
        }
    }

    /// Replaces the role that bypasses scope checks
    pub fn with_admin_role(mut self, role: Role) -> Self {
        self.admin_role = role;
        self
    }

    /// Removes a resource from the generic read grant
    pub fn exclude_from_read(mut self, resource: Resource) -> Self {
        self.read_excluded.insert(resource);
        self
    }

    /// The scope prefix used to qualify resource names
    #[must_use]
    pub fn scope_prefix(&self) -> &str {
        &self.scope_prefix
    }

    /// Decides whether `claims` may perform `action` on `resource`
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied`] if no grant covers the request.
    pub fn allow(
        &self,
        claims: &ClaimSet,
        resource: &ResourceRef,
        action: Action,
    ) -> Result<(), AccessDenied> {
        if claims.roles().contains(&self.admin_role) {
            return Ok(());
        }

        let scope = claims.scope();

        if let Ok(qualified) = ScopeToken::new(format!("{}:{}", self.scope_prefix, resource)) {
            if scope.contains(&qualified) {
                return Ok(());
            }
        }

        if action == Action::Read
            && !self.read_excluded.contains(resource)
            && scope.contains(&self.read_scope)
        {
            return Ok(());
        }

        Err(AccessDenied)
    }

    /// Whether the claims hold the admin role
    #[must_use]
    pub fn is_admin(&self, claims: &ClaimSet) -> bool {
        claims.roles().contains(&self.admin_role)
    }

    fn scope_for(&self, resource: &ResourceRef) -> String {
        format!("{}:{}", self.scope_prefix, resource)
    }

    /// The scope tokens a caller could usefully request for `resources`
    ///
    /// Produces the generic read scope followed by the exact scope for
    /// each named resource, suitable for advertising in protected
    /// resource metadata.
    pub fn advertised_scopes<'a, I>(&self, resources: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a ResourceRef>,
    {
        let mut scopes = vec![self.read_scope.as_str().to_owned()];
        for resource in resources {
            let qualified = self.scope_for(resource);
            if !scopes.contains(&qualified) {
                scopes.push(qualified);
            }
        }
        scopes
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}
