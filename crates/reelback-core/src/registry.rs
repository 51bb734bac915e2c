//! Single-instance registry.
//!
//! Only one recording container may be live per host at a time. Rather than
//! a hidden module-level flag, registration is an explicit object: the host
//! creates an [`InstanceRegistry`], the container registers itself against
//! it, and the returned [`RegistrationGuard`] releases the slot when
//! dropped. Tests get isolation for free by creating their own registry.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::RegistryError;

type Slot = Arc<Mutex<Option<String>>>;

fn lock(slot: &Slot) -> std::sync::MutexGuard<'_, Option<String>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Tracks which container, if any, currently owns recording. Cheap to
/// clone; clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    slot: Slot,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the recording slot under `label`.
    ///
    /// Fails with [`RegistryError::AlreadyRegistered`] naming the current
    /// owner if the slot is taken. The claim lasts until the returned guard
    /// is dropped.
    pub fn register(
        &self,
        label: impl Into<String>,
    ) -> Result<RegistrationGuard, RegistryError> {
        let label = label.into();
        let mut slot = lock(&self.slot);
        if let Some(existing) = slot.as_ref() {
            return Err(RegistryError::AlreadyRegistered(existing.clone()));
        }
        debug!(instance = %label, "Recording instance registered");
        *slot = Some(label.clone());
        drop(slot);
        Ok(RegistrationGuard {
            registry: self.clone(),
            label,
        })
    }

    /// Label of the currently registered instance, if any.
    #[must_use]
    pub fn active_label(&self) -> Option<String> {
        lock(&self.slot).clone()
    }

    /// Whether any instance currently holds the slot.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

/// Releases the registry slot on drop.
#[must_use = "dropping the guard releases the registration"]
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: InstanceRegistry,
    label: String,
}

impl RegistrationGuard {
    /// Label this guard registered under.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut slot = lock(&self.registry.slot);
        debug_assert_eq!(slot.as_deref(), Some(self.label.as_str()));
        debug!(instance = %self.label, "Recording instance deregistered");
        *slot = None;
    }
}
