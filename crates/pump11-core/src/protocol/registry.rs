//! Shared channels for daisy-chained pumps
//!
//! Opening a port twice would make two pumps on the same cable fight over its
//! input buffer, so every session asks the registry instead. The registry
//! keeps the strong references; sessions only hold weak ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{Channel, ProtocolError};
use crate::config::ConnectionSettings;

type Opener = Box<dyn Fn(&ConnectionSettings) -> Result<Channel, ProtocolError> + Send + Sync>;

/// One [`Channel`] per port identity
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    opener: Opener,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("ports", &self.ports())
            .finish()
    }
}

impl ChannelRegistry {
    /// Registry opening real serial ports
    pub fn new() -> Self {
        Self::with_opener(Channel::open)
    }

    /// Registry opening channels with `opener`, e.g. over a [`super::MockLink`]
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&ConnectionSettings) -> Result<Channel, ProtocolError> + Send + Sync + 'static,
    {
        Self {
            channels: Mutex::new(HashMap::new()),
            opener: Box::new(opener),
        }
    }

    /// The channel for `settings.port`, opened on first use.
    ///
    /// Later calls for the same port return the same channel even if their
    /// baud rate or timeout differ; the first settings win.
    pub fn acquire(&self, settings: &ConnectionSettings) -> Result<Arc<Channel>, ProtocolError> {
        settings.validate()?;
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(channel) = channels.get(&settings.port) {
            debug!(port = %settings.port, "reusing serial channel");
            return Ok(Arc::clone(channel));
        }

        let channel = Arc::new((self.opener)(settings)?);
        channels.insert(settings.port.clone(), Arc::clone(&channel));
        Ok(channel)
    }

    /// Close the channel for `port`.
    ///
    /// Sessions still pointing at it fail with
    /// [`ProtocolError::ChannelClosed`] once the last other reference drops.
    pub fn release(&self, port: &str) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(port).is_some()
    }

    /// Port identities with an open channel, sorted
    pub fn ports(&self) -> Vec<String> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let mut ports: Vec<String> = channels.keys().cloned().collect();
        ports.sort();
        ports
    }

    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
