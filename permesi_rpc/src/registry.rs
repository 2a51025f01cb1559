//! The table of callable methods and their required permissions

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;
use permesi::{jwt::ClaimSet, policy::Action, Resource, ResourceRef};
use serde_json::Value;

/// An error produced by a method handler
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The future returned by a method handler
pub type HandlerFuture = BoxFuture<'static, Result<Value, BoxError>>;

type Handler = Box<dyn Fn(Option<Value>, Arc<ClaimSet>) -> HandlerFuture + Send + Sync>;

/// The permission a caller must hold to invoke a method
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Permission {
    resource: Resource,
    action: Action,
}

impl Permission {
    /// A permission for the given resource and action
    pub fn new(resource: impl Into<Resource>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
        }
    }

    /// A permission to read the given resource
    pub fn read(resource: impl Into<Resource>) -> Self {
        Self::new(resource, Action::Read)
    }

    /// A permission to execute against the given resource
    pub fn execute(resource: impl Into<Resource>) -> Self {
        Self::new(resource, Action::Execute)
    }

    /// The resource being protected
    #[must_use]
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// The action being requested
    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }
}

/// A registered method: its permission and its handler
pub struct MethodEntry {
    permission: Option<Permission>,
    handler: Handler,
}

impl MethodEntry {
    /// The permission required to invoke this method, if any
    #[must_use]
    pub fn permission(&self) -> Option<&Permission> {
        self.permission.as_ref()
    }

    pub(crate) fn invoke(&self, params: Option<Value>, claims: Arc<ClaimSet>) -> HandlerFuture {
        (self.handler)(params, claims)
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

/// The set of methods a dispatcher can route to
///
/// Methods without a permission are open to any authenticated caller
/// (or to the anonymous identity, on an unsecured dispatcher).
#[derive(Debug, Default)]
#[must_use]
pub struct MethodRegistry {
    methods: HashMap<String, MethodEntry>,
}

impl MethodRegistry {
    /// Starts building a registry
    pub fn builder() -> MethodRegistryBuilder {
        MethodRegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Looks up a method by name
    #[must_use]
    pub fn get(&self, method: &str) -> Option<&MethodEntry> {
        self.methods.get(method)
    }

    /// The number of registered methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// A builder for a [`MethodRegistry`]
#[must_use]
pub struct MethodRegistryBuilder {
    entries: Vec<(String, MethodEntry)>,
}

impl MethodRegistryBuilder {
    /// Registers a method
    ///
    /// The handler receives the request parameters as they appeared on
    /// the wire along with the verified identity of the caller.
    /// Registering a name twice replaces the earlier entry.
    pub fn method<F, Fut>(
        mut self,
        name: impl Into<String>,
        permission: impl Into<Option<Permission>>,
        handler: F,
    ) -> Self
    where
        F: Fn(Option<Value>, Arc<ClaimSet>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let handler: Handler = Box::new(move |params, claims| Box::pin(handler(params, claims)));
        self.entries.push((
            name.into(),
            MethodEntry {
                permission: permission.into(),
                handler,
            },
        ));
        self
    }

    /// Finishes the registry
    pub fn build(self) -> MethodRegistry {
        let mut methods = HashMap::with_capacity(self.entries.len());
        for (name, entry) in self.entries {
            if methods.insert(name.clone(), entry).is_some() {
                tracing::warn!(rpc.method = %name, "replacing earlier registration");
            }
        }
        MethodRegistry { methods }
    }
}

impl fmt::Debug for MethodRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MethodRegistryBuilder")
            .field("methods", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn registered_method_is_invocable() {
        let registry = MethodRegistry::builder()
            .method("echo", None, |params, _claims| async move {
                Ok(params.unwrap_or(Value::Null))
            })
            .build();

        let entry = registry.get("echo").unwrap();
        assert!(entry.permission().is_none());

        let result = entry
            .invoke(
                Some(json!({"msg": "hi"})),
                Arc::new(ClaimSet::anonymous()),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"msg": "hi"}));
    }

    #[test]
    fn later_registration_wins() {
        let registry = MethodRegistry::builder()
            .method("ping", None, |_, _| async { Ok(json!("old")) })
            .method("ping", Permission::read("status"), |_, _| async {
                Ok(json!("new"))
            })
            .build();

        assert_eq!(registry.len(), 1);
        let entry = registry.get("ping").unwrap();
        assert_eq!(
            entry.permission().map(Permission::action),
            Some(Action::Read)
        );
    }
}
