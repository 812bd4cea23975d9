//! Player plugin lifecycle
//!
//! Wraps a `CommentManager` in the host player's plugin states:
//!
//! ```text
//! Installed --enable--> Enabled <--enable/disable--> Disabled
//!     \_____________________|________________________/
//!                           v
//!                      Uninstalled
//! ```
//!
//! Disabling detaches every display handle and lane but keeps loaded
//! comments. Uninstalling destroys the engine.

use tracing::info;

use crate::features::danmaku::{CommentManager, DanmakuEventSender, PlaybackClock};
use crate::features::settings::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Installed,
    Enabled,
    Disabled,
    Uninstalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    InvalidTransition { from: PluginState, to: PluginState },
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginError::InvalidTransition { from, to } => {
                write!(f, "Cannot move plugin from {:?} to {:?}", from, to)
            }
        }
    }
}

impl std::error::Error for PluginError {}

#[derive(Debug)]
pub struct DanmakuPlugin {
    state: PluginState,
    manager: Option<CommentManager>,
}

impl DanmakuPlugin {
    /// Create the engine; it stays detached until `enable`
    pub fn install(
        config: EngineConfig,
        clock: impl PlaybackClock + 'static,
        events: DanmakuEventSender,
    ) -> Self {
        Self::install_with(CommentManager::new(config, clock, events))
    }

    /// Install a preconfigured manager
    pub fn install_with(mut manager: CommentManager) -> Self {
        manager.detach();
        info!("Danmaku plugin installed");
        Self {
            state: PluginState::Installed,
            manager: Some(manager),
        }
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn manager(&self) -> Option<&CommentManager> {
        self.manager.as_ref()
    }

    pub fn manager_mut(&mut self) -> Option<&mut CommentManager> {
        self.manager.as_mut()
    }

    fn transition(&mut self, to: PluginState) -> Result<(), PluginError> {
        let allowed = matches!(
            (self.state, to),
            (PluginState::Installed, PluginState::Enabled)
                | (PluginState::Disabled, PluginState::Enabled)
                | (PluginState::Enabled, PluginState::Disabled)
                | (PluginState::Installed, PluginState::Uninstalled)
                | (PluginState::Enabled, PluginState::Uninstalled)
                | (PluginState::Disabled, PluginState::Uninstalled)
        );
        if !allowed {
            return Err(PluginError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!("Danmaku plugin {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    pub fn enable(&mut self) -> Result<(), PluginError> {
        self.transition(PluginState::Enabled)?;
        if let Some(manager) = self.manager.as_mut() {
            manager.reattach();
        }
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), PluginError> {
        self.transition(PluginState::Disabled)?;
        if let Some(manager) = self.manager.as_mut() {
            manager.detach();
        }
        Ok(())
    }

    /// Destroy the engine and drop it
    pub fn uninstall(&mut self) -> Result<(), PluginError> {
        self.transition(PluginState::Uninstalled)?;
        if let Some(mut manager) = self.manager.take() {
            manager.destroy();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::danmaku::{
        CommentItem, DisplayStatus, EngineState, SharedPlaybackClock, event_channel,
    };
    use std::time::Instant;

    fn plugin() -> (DanmakuPlugin, SharedPlaybackClock) {
        let clock = SharedPlaybackClock::new();
        let (tx, _rx) = event_channel();
        (
            DanmakuPlugin::install(EngineConfig::default(), clock.clone(), tx),
            clock,
        )
    }

    #[test]
    fn test_full_lifecycle() {
        let (mut plugin, clock) = plugin();
        assert_eq!(plugin.state(), PluginState::Installed);
        assert!(!plugin.manager().unwrap().is_attached());

        plugin.enable().unwrap();
        let manager = plugin.manager_mut().unwrap();
        let item = CommentItem::new("hi", 1.0);
        let id = item.id;
        manager.add(item).unwrap();
        clock.set_position(1.0);
        manager.tick_at(Instant::now());
        assert_eq!(manager.status(id), Some(DisplayStatus::Active));

        plugin.disable().unwrap();
        let manager = plugin.manager().unwrap();
        assert!(manager.stage().active().is_empty());
        assert!(manager.stage().lanes().all_free());
        assert_eq!(manager.len(), 1);

        plugin.enable().unwrap();
        plugin.uninstall().unwrap();
        assert_eq!(plugin.state(), PluginState::Uninstalled);
        assert!(plugin.manager().is_none());
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut plugin, _clock) = plugin();
        assert_eq!(
            plugin.disable(),
            Err(PluginError::InvalidTransition {
                from: PluginState::Installed,
                to: PluginState::Disabled,
            })
        );
        plugin.enable().unwrap();
        assert!(plugin.enable().is_err());
        plugin.uninstall().unwrap();
        assert!(plugin.enable().is_err());
        assert!(plugin.uninstall().is_err());
    }

    #[test]
    fn test_uninstall_destroys_engine() {
        let clock = SharedPlaybackClock::new();
        let (tx, mut rx) = event_channel();
        let mut plugin = DanmakuPlugin::install(EngineConfig::default(), clock, tx);
        plugin.uninstall().unwrap();
        let mut destroyed = false;
        while let Ok(event) = rx.try_recv() {
            if let crate::features::danmaku::DanmakuEvent::StateChanged { new, .. } = event {
                destroyed |= new == EngineState::Destroyed;
            }
        }
        assert!(destroyed);
    }
}
