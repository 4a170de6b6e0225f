//! Named session templates.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;

use super::duration::format_compact;
use super::error::SessionError;
use super::model::{SessionConfig, MAX_ID_LEN};

/// Read access to session templates.
pub trait ConfigProvider: Send + Sync {
    /// Looks up a template by exact id.
    fn lookup(&self, id: &str) -> Option<SessionConfig>;

    /// The template used when a start names none.
    fn default_config(&self) -> SessionConfig;
}

struct RegistryState {
    configs: BTreeMap<String, SessionConfig>,
    default_id: String,
}

/// In-memory template registry backing the `config` command family.
///
/// Always holds at least one template, and the default id always names one
/// of them.
pub struct ConfigRegistry {
    state: RwLock<RegistryState>,
}

fn check_template(config: &SessionConfig) -> Result<(), SessionError> {
    if config.id.trim().is_empty() {
        return Err(SessionError::Validation(
            "Session config id must not be empty".to_string(),
        ));
    }
    if config.id.chars().count() > MAX_ID_LEN {
        return Err(SessionError::Validation(format!(
            "Session config id must be at most {MAX_ID_LEN} characters"
        )));
    }
    if config.focus_duration.is_zero() {
        return Err(SessionError::Validation(format!(
            "Session config '{}' must have a non-zero focus duration",
            config.id
        )));
    }
    if config.break_duration.is_zero() {
        return Err(SessionError::Validation(format!(
            "Session config '{}' must have a non-zero break duration",
            config.id
        )));
    }
    Ok(())
}

impl ConfigRegistry {
    /// Builds a registry from templates and the id of the default one.
    pub fn new(
        configs: impl IntoIterator<Item = SessionConfig>,
        default_id: &str,
    ) -> Result<Self, SessionError> {
        let mut map = BTreeMap::new();
        for config in configs {
            check_template(&config)?;
            if map.contains_key(&config.id) {
                return Err(SessionError::Conflict(format!(
                    "Duplicate session config '{}'",
                    config.id
                )));
            }
            map.insert(config.id.clone(), config);
        }

        if !map.contains_key(default_id) {
            return Err(SessionError::NotFound(format!(
                "Default session config '{default_id}' is not defined"
            )));
        }

        Ok(Self {
            state: RwLock::new(RegistryState {
                configs: map,
                default_id: default_id.to_string(),
            }),
        })
    }

    /// All templates ordered by id.
    pub fn list(&self) -> Vec<SessionConfig> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.configs.values().cloned().collect()
    }

    /// Id of the default template.
    pub fn default_id(&self) -> String {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.default_id.clone()
    }

    /// Returns a template, or the default one when `id` is `None`.
    pub fn show(&self, id: Option<&str>) -> Result<SessionConfig, SessionError> {
        match id {
            Some(id) => self.lookup(id).ok_or_else(|| not_found(id)),
            None => Ok(self.default_config()),
        }
    }

    /// Adds a template. Ids are unique.
    pub fn add(&self, config: SessionConfig) -> Result<(), SessionError> {
        check_template(&config)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.configs.contains_key(&config.id) {
            return Err(SessionError::Conflict(format!(
                "Session config '{}' already exists",
                config.id
            )));
        }
        info!(config_id = %config.id, "Session config added");
        state.configs.insert(config.id.clone(), config);
        Ok(())
    }

    /// Removes a template. The default template cannot be removed.
    pub fn remove(&self, id: &str) -> Result<SessionConfig, SessionError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.default_id == id {
            return Err(SessionError::Validation(format!(
                "Session config '{id}' is the default and cannot be removed"
            )));
        }
        let removed = state.configs.remove(id).ok_or_else(|| not_found(id))?;
        info!(config_id = %id, "Session config removed");
        Ok(removed)
    }

    /// Makes an existing template the default.
    pub fn set_default(&self, id: &str) -> Result<(), SessionError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.configs.contains_key(id) {
            return Err(not_found(id));
        }
        state.default_id = id.to_string();
        info!(config_id = %id, "Default session config changed");
        Ok(())
    }
}

fn not_found(id: &str) -> SessionError {
    SessionError::NotFound(format!("No session config with id '{id}'"))
}

impl ConfigProvider for ConfigRegistry {
    fn lookup(&self, id: &str) -> Option<SessionConfig> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.configs.get(id).cloned()
    }

    fn default_config(&self) -> SessionConfig {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        // Construction and every mutation keep default_id pointing at an entry.
        state
            .configs
            .get(&state.default_id)
            .or_else(|| state.configs.values().next())
            .cloned()
            .unwrap_or_default()
    }
}

/// One-line description of a template.
pub fn describe_config(config: &SessionConfig, is_default: bool) -> String {
    let cycles = match config.target_cycles {
        0 => "unlimited cycles".to_string(),
        1 => "1 cycle".to_string(),
        n => format!("{n} cycles"),
    };
    let mut line = format!(
        "{}: focus {}, break {}, delay {}, {}",
        config.id,
        format_compact(config.focus_duration),
        format_compact(config.break_duration),
        format_compact(config.delay_between_phases),
        cycles
    );
    if is_default {
        line.push_str(" (default)");
    }
    line
}
