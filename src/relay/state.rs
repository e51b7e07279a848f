//! Relay policy state: an enabled flag plus one of three relay modes.
//!
//! A single [`RelayState`] is shared by the mesh inbound path, the Signal poll loop and the
//! command handlers. All reads and writes go through its internal mutex, and the
//! check-then-set transitions (`enable`, `disable`, `set_mode`) happen under one lock so two
//! concurrent `!on` commands cannot both report a change.
use log::warn;
use std::fmt;
use std::sync::Mutex;

/// Relay policy governing which directions forward automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayMode {
    /// Symmetric open relay; reconfiguration commands allowed from the mesh.
    Mode1,
    /// Signal → mesh open; mesh → Signal only through `!relay`.
    Mode2,
    /// Signal → mesh closed; mesh → Signal only through `!relay`.
    Mode3,
}

impl RelayMode {
    pub fn number(self) -> u8 {
        match self {
            RelayMode::Mode1 => 1,
            RelayMode::Mode2 => 2,
            RelayMode::Mode3 => 3,
        }
    }

    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(RelayMode::Mode1),
            2 => Some(RelayMode::Mode2),
            3 => Some(RelayMode::Mode3),
            _ => None,
        }
    }

    /// Configured value with the documented fallback to mode 2.
    pub fn from_config(n: i64) -> Self {
        Self::from_number(n).unwrap_or_else(|| {
            warn!("RELAY_MODE={} is invalid. Defaulting to 2.", n);
            RelayMode::Mode2
        })
    }

    /// Plain mesh text is forwarded to Signal without `!relay`
    pub fn auto_mesh_to_chat(self) -> bool {
        self == RelayMode::Mode1
    }

    /// Signal messages may be forwarded onto the mesh
    pub fn chat_to_mesh_open(self) -> bool {
        self != RelayMode::Mode3
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MODE{}", self.number())
    }
}

/// Point-in-time copy of the relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub enabled: bool,
    pub mode: RelayMode,
}

#[derive(Debug)]
pub struct RelayState {
    inner: Mutex<RelaySnapshot>,
}

impl RelayState {
    /// Relaying starts enabled in the configured mode.
    pub fn new(mode: RelayMode) -> Self {
        Self {
            inner: Mutex::new(RelaySnapshot {
                enabled: true,
                mode,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelaySnapshot> {
        // The guarded value is two plain fields; a poisoned lock still holds a valid state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        *self.lock()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn mode(&self) -> RelayMode {
        self.lock().mode
    }

    /// Returns false when relaying was already enabled.
    pub fn enable(&self) -> bool {
        let mut s = self.lock();
        if s.enabled {
            return false;
        }
        s.enabled = true;
        true
    }

    /// Returns false when relaying was already disabled.
    pub fn disable(&self) -> bool {
        let mut s = self.lock();
        if !s.enabled {
            return false;
        }
        s.enabled = false;
        true
    }

    /// Returns the previous mode.
    pub fn set_mode(&self, mode: RelayMode) -> RelayMode {
        let mut s = self.lock();
        std::mem::replace(&mut s.mode, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_enabled() {
        let state = RelayState::new(RelayMode::Mode3);
        assert_eq!(
            state.snapshot(),
            RelaySnapshot {
                enabled: true,
                mode: RelayMode::Mode3
            }
        );
    }

    #[test]
    fn enable_disable_idempotent() {
        let state = RelayState::new(RelayMode::Mode1);
        assert!(!state.enable());
        assert!(state.disable());
        assert!(!state.disable());
        assert!(!state.is_enabled());
        assert!(state.enable());
        assert!(state.is_enabled());
    }

    #[test]
    fn set_mode_returns_previous() {
        let state = RelayState::new(RelayMode::Mode2);
        assert_eq!(state.set_mode(RelayMode::Mode1), RelayMode::Mode2);
        assert_eq!(state.mode(), RelayMode::Mode1);
    }

    #[test]
    fn mode_policies() {
        assert!(RelayMode::Mode1.auto_mesh_to_chat());
        assert!(!RelayMode::Mode2.auto_mesh_to_chat());
        assert!(!RelayMode::Mode3.auto_mesh_to_chat());
        assert!(RelayMode::Mode2.chat_to_mesh_open());
        assert!(!RelayMode::Mode3.chat_to_mesh_open());
        assert_eq!(RelayMode::from_config(0), RelayMode::Mode2);
        assert_eq!(RelayMode::Mode3.to_string(), "MODE3");
    }
}
