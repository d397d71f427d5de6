//! Action registry.
//!
//! Maps every registered method to its canonical actions and assigns each
//! action its wire discriminant. The codec decodes against a registry, so the
//! tagged union and the method table can never drift apart.

use crate::action::{
    ActionId, ActionKind, HANDSHAKE_METHOD, RequestMethod, SubscriptionMethod, action_name,
};
use std::collections::HashMap;

/// Shape of a registered method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodShape {
    /// Request + response.
    Request,
    /// Start, stop, interrupt, receive.
    Subscription,
}

impl MethodShape {
    fn kinds(self) -> &'static [ActionKind] {
        match self {
            MethodShape::Request => &ActionKind::REQUEST_SHAPE,
            MethodShape::Subscription => &ActionKind::SUBSCRIPTION_SHAPE,
        }
    }
}

/// One entry of the tagged union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEntry {
    /// Canonical name, `{method}_{suffix}`.
    pub name: String,
    /// Owning method.
    pub method: String,
    /// Role within the method.
    pub kind: ActionKind,
}

/// Error building or querying a registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("method name cannot be empty")]
    EmptyName,
    #[error("invalid method name {0:?}: only [a-z0-9_] allowed")]
    InvalidName(String),
    #[error("method name {0:?} is reserved")]
    Reserved(String),
    #[error("method {0:?} registered twice")]
    DuplicateMethod(String),
    #[error("action {action:?} of method {method:?} collides with an existing action")]
    ActionCollision { method: String, action: String },
    #[error("too many actions: {0}")]
    TooManyActions(usize),
    #[error("action {0:?} is not registered")]
    UnknownAction(String),
}

/// Collects method declarations and validates them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    methods: Vec<(String, MethodShape)>,
}

impl RegistryBuilder {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a request/response method.
    pub fn request<M: RequestMethod>(self) -> Self {
        self.method(M::NAME, MethodShape::Request)
    }

    /// Declare a subscription method.
    pub fn subscription<M: SubscriptionMethod>(self) -> Self {
        self.method(M::NAME, MethodShape::Subscription)
    }

    /// Declare a method by name. Prefer the typed variants.
    pub fn method(mut self, name: impl Into<String>, shape: MethodShape) -> Self {
        self.methods.push((name.into(), shape));
        self
    }

    /// Validate every declaration and derive the action table.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut registry = Registry::empty();
        let mut seen_methods = HashMap::new();

        for (method, shape) in self.methods {
            validate_name(&method)?;
            if seen_methods.insert(method.clone(), shape).is_some() {
                return Err(RegistryError::DuplicateMethod(method));
            }
            for &kind in shape.kinds() {
                registry.push(&method, kind)?;
            }
        }
        registry.shapes = seen_methods;

        tracing::debug!(actions = registry.entries.len(), "action registry built");
        Ok(registry)
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name == HANDSHAKE_METHOD {
        return Err(RegistryError::Reserved(name.to_string()));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// The closed set of actions both peers understand.
///
/// Indices 0 and 1 are always `handshake_request` and `handshake_response`;
/// registered methods follow in declaration order.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<ActionEntry>,
    by_name: HashMap<String, ActionId>,
    shapes: HashMap<String, MethodShape>,
}

impl Registry {
    /// Begin declaring methods.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A registry holding only the handshake actions.
    pub fn empty() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            shapes: HashMap::new(),
        };
        for kind in ActionKind::REQUEST_SHAPE {
            // The handshake pair is written first into an empty table, so
            // neither push can collide or overflow.
            let name = action_name(HANDSHAKE_METHOD, kind);
            let id = ActionId(registry.entries.len() as u16);
            registry.by_name.insert(name.clone(), id);
            registry.entries.push(ActionEntry {
                name,
                method: HANDSHAKE_METHOD.to_string(),
                kind,
            });
        }
        registry
    }

    fn push(&mut self, method: &str, kind: ActionKind) -> Result<ActionId, RegistryError> {
        let name = action_name(method, kind);
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::ActionCollision {
                method: method.to_string(),
                action: name,
            });
        }
        let index = self.entries.len();
        let raw = u16::try_from(index).map_err(|_| RegistryError::TooManyActions(index + 1))?;
        let id = ActionId(raw);
        self.by_name.insert(name.clone(), id);
        self.entries.push(ActionEntry {
            name,
            method: method.to_string(),
            kind,
        });
        Ok(id)
    }

    /// Look up the action of `method` with role `kind`.
    pub fn action(&self, method: &str, kind: ActionKind) -> Result<ActionId, RegistryError> {
        let name = action_name(method, kind);
        self.by_name
            .get(&name)
            .copied()
            .ok_or(RegistryError::UnknownAction(name))
    }

    /// Look up an action by its canonical name.
    pub fn by_name(&self, name: &str) -> Option<ActionId> {
        self.by_name.get(name).copied()
    }

    /// Entry for a discriminant, if this build knows it.
    pub fn get(&self, id: ActionId) -> Option<&ActionEntry> {
        self.entries.get(id.0 as usize)
    }

    /// Discriminant for a raw wire value, if this build knows it.
    pub fn resolve(&self, raw: u16) -> Option<ActionId> {
        ((raw as usize) < self.entries.len()).then_some(ActionId(raw))
    }

    /// Shape of a registered method. `None` for unknown methods and for the
    /// reserved handshake.
    pub fn shape(&self, method: &str) -> Option<MethodShape> {
        self.shapes.get(method).copied()
    }

    /// Number of actions, handshake included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the handshake pair is always present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All actions in discriminant order.
    pub fn actions(&self) -> impl Iterator<Item = (ActionId, &ActionEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (ActionId(i as u16), e))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}
