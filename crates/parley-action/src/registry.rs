//! Command registry.
//!
//! Read-mostly after startup. Writers serialize on a dedicated mutex and swap
//! in a new snapshot, so lookups never wait on a registration in progress.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use parley_core::{render_signature, Fingerprint, ParamSpec, ParamType, ParamValue};
use tracing::{debug, info};

use crate::error::{CommandNotFound, RegistrationError};
use crate::handler::{CommandArgs, CommandHandler};

/// Metadata and callable for one registered command.
pub struct CommandSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub description: String,
    pub fingerprint: Fingerprint,
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    /// Build a spec, validating the name and parameter schema.
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
        params: Vec<ParamSpec>,
        description: impl Into<String>,
    ) -> Result<Self, RegistrationError> {
        let name = name.into();
        let description = description.into();
        validate_signature(&name, &params)?;
        let fingerprint = Fingerprint::compute(&name, &params, &description);
        Ok(Self {
            name,
            params,
            description,
            fingerprint,
            handler,
        })
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    pub fn optional_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| !p.required)
    }

    pub fn signature(&self) -> String {
        render_signature(&self.name, &self.params)
    }

    /// Fill absent optional parameters from their declared defaults.
    pub fn apply_defaults(&self, args: &mut CommandArgs) {
        for param in self.optional_params() {
            if args.contains(&param.name) {
                continue;
            }
            if let Some(default) = &param.default {
                args.insert(param.name.clone(), default.clone());
            }
        }
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("description", &self.description)
            .field("fingerprint", &self.fingerprint.short())
            .finish_non_exhaustive()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_signature(name: &str, params: &[ParamSpec]) -> Result<(), RegistrationError> {
    let invalid = |reason: String| RegistrationError::InvalidSignature {
        name: name.to_string(),
        reason,
    };

    if !is_identifier(name) {
        return Err(invalid("command name must be a non-empty identifier".into()));
    }

    let mut seen = HashSet::new();
    for param in params {
        if !is_identifier(&param.name) {
            return Err(invalid(format!(
                "parameter name '{}' is not an identifier",
                param.name
            )));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(invalid(format!("duplicate parameter '{}'", param.name)));
        }
        if let ParamType::Enum(variants) = &param.param_type {
            if variants.is_empty() {
                return Err(invalid(format!(
                    "enum parameter '{}' has no variants",
                    param.name
                )));
            }
        }
        match (&param.default, param.required) {
            (Some(_), true) => {
                return Err(invalid(format!(
                    "required parameter '{}' cannot have a default",
                    param.name
                )));
            }
            (Some(default), false) if !default.matches(&param.param_type) => {
                return Err(invalid(format!(
                    "default {} for '{}' is not a {}",
                    describe(default),
                    param.name,
                    param.param_type
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn describe(value: &ParamValue) -> String {
    match value {
        ParamValue::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

/// Outcome of a successful `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The command was added.
    Registered,
    /// An identical definition was already present.
    Unchanged,
}

/// Immutable view of the registry at one point in time.
///
/// Iterating is restartable and always yields specs in registration order.
#[derive(Clone)]
pub struct RegistrySnapshot {
    specs: Arc<Vec<Arc<CommandSpec>>>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CommandSpec>> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Registration index of a command, used as the tie-break key.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name == name)
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a Arc<CommandSpec>;
    type IntoIter = std::slice::Iter<'a, Arc<CommandSpec>>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

/// Explicitly constructed registry of host commands.
pub struct CommandRegistry {
    writer: Mutex<()>,
    specs: RwLock<Arc<Vec<Arc<CommandSpec>>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(()),
            specs: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Register a command.
    ///
    /// Re-registering a name with an identical fingerprint is a no-op; a
    /// differing fingerprint is rejected with `DuplicateCommand`.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
        params: Vec<ParamSpec>,
        description: impl Into<String>,
    ) -> Result<RegisterOutcome, RegistrationError> {
        let spec = CommandSpec::new(name, handler, params, description)?;
        self.insert(spec)
    }

    /// Register an already validated spec.
    pub fn insert(&self, spec: CommandSpec) -> Result<RegisterOutcome, RegistrationError> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.current();

        if let Some(existing) = current.iter().find(|s| s.name == spec.name) {
            if existing.fingerprint == spec.fingerprint {
                debug!(command = %spec.name, "Identical command re-registered");
                return Ok(RegisterOutcome::Unchanged);
            }
            return Err(RegistrationError::DuplicateCommand(spec.name));
        }

        info!(
            command = %spec.name,
            fingerprint = spec.fingerprint.short(),
            "Command registered"
        );
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::new(spec));

        let mut slot = self.specs.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(next);
        Ok(RegisterOutcome::Registered)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<CommandSpec>, CommandNotFound> {
        self.current()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| CommandNotFound(name.to_string()))
    }

    /// Snapshot of all commands in registration order.
    pub fn list(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            specs: self.current(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.current().iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn current(&self) -> Arc<Vec<Arc<CommandSpec>>> {
        Arc::clone(&self.specs.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
