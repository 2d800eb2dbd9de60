//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Label-addressed chardev registry
//!
//! Owns every chardev created through it plus the named TLS credentials socket
//! chardevs refer to with `tls-creds`.

use crate::socket::TlsCredentials;
use crate::{BackendKind, Chardev, ChardevError, ChardevOptions, OptionSet, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Summary of one registered chardev
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChardevInfo {
    /// Unique label
    pub label: String,
    /// Endpoint description
    pub filename: String,
    /// Backend kind
    pub kind: BackendKind,
    /// Whether a frontend reported itself open
    pub frontend_open: bool,
}

/// Registry of live chardevs and TLS credentials
#[derive(Default)]
pub struct ChardevRegistry {
    /// Chardevs by label (lock-free concurrent map)
    devices: DashMap<String, Chardev>,
    /// TLS credentials by id
    credentials: DashMap<String, Arc<TlsCredentials>>,
}

impl ChardevRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a chardev and register it under its label
    ///
    /// A mux created with `mux=on` also registers its base chardev as
    /// `<label>-base`.
    #[instrument(skip(self, options), fields(label = %options.label))]
    pub async fn create(&self, options: ChardevOptions) -> Result<Chardev> {
        if self.devices.contains_key(&options.label) {
            return Err(ChardevError::LabelInUse(options.label));
        }
        let tls = match options.backend {
            crate::BackendOptions::Socket(ref socket) => match socket.tls_creds {
                Some(ref name) => Some(
                    self.tls_credentials(name)
                        .ok_or_else(|| ChardevError::TlsCredentialsNotFound(name.clone()))?,
                ),
                None => None,
            },
            _ => None,
        };

        let chr = Chardev::open_with_tls(options, tls).await?;
        let mut registered = vec![chr.clone()];
        if let Some(base) = chr.underlying() {
            registered.push(base.clone());
        }
        for (index, device) in registered.iter().enumerate() {
            let inserted = match self.devices.entry(device.label().to_string()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    entry.insert(device.clone());
                    true
                }
            };
            if !inserted {
                for added in &registered[..index] {
                    self.devices.remove(added.label());
                }
                chr.close();
                return Err(ChardevError::LabelInUse(device.label().to_string()));
            }
        }
        info!(filename = %chr.filename(), "chardev registered");
        Ok(chr)
    }

    /// Parse `kind,key=value,...` and create the chardev
    pub async fn create_from_str(&self, text: &str) -> Result<Chardev> {
        let set: OptionSet = text.parse()?;
        self.create_from_option_set(&set).await
    }

    /// Create a chardev from named options
    pub async fn create_from_option_set(&self, set: &OptionSet) -> Result<Chardev> {
        self.create(ChardevOptions::from_option_set(set)?).await
    }

    /// Look a chardev up by label
    pub fn find(&self, label: &str) -> Option<Chardev> {
        self.devices.get(label).map(|entry| entry.value().clone())
    }

    /// Close and unregister a chardev
    ///
    /// Fails while a frontend is attached.
    #[instrument(skip(self))]
    pub fn remove(&self, label: &str) -> Result<()> {
        let chr = self
            .find(label)
            .ok_or_else(|| ChardevError::NotFound(label.to_string()))?;
        if chr.has_frontend() {
            return Err(ChardevError::FrontendAttached(label.to_string()));
        }
        self.devices.remove(label);
        if let Some(base) = chr.underlying() {
            self.devices.remove(base.label());
        }
        chr.close();
        debug!("chardev removed");
        Ok(())
    }

    /// Snapshot of every registered chardev, sorted by label
    pub fn list(&self) -> Vec<ChardevInfo> {
        let mut infos: Vec<ChardevInfo> = self
            .devices
            .iter()
            .map(|entry| {
                let chr = entry.value();
                ChardevInfo {
                    label: chr.label().to_string(),
                    filename: chr.filename(),
                    kind: chr.kind(),
                    frontend_open: chr.is_frontend_open(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.label.cmp(&b.label));
        infos
    }

    /// Number of registered chardevs
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no chardev is registered
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Register TLS credentials under their name
    pub fn add_tls_credentials(&self, credentials: TlsCredentials) -> Result<Arc<TlsCredentials>> {
        match self.credentials.entry(credentials.name().to_string()) {
            Entry::Occupied(entry) => Err(ChardevError::LabelInUse(entry.key().clone())),
            Entry::Vacant(entry) => {
                let credentials = Arc::new(credentials);
                entry.insert(credentials.clone());
                Ok(credentials)
            }
        }
    }

    /// Look up TLS credentials
    pub fn tls_credentials(&self, name: &str) -> Option<Arc<TlsCredentials>> {
        self.credentials.get(name).map(|entry| entry.value().clone())
    }

    /// Unregister TLS credentials; chardevs already using them keep their copy
    pub fn remove_tls_credentials(&self, name: &str) -> Option<Arc<TlsCredentials>> {
        self.credentials.remove(name).map(|(_, credentials)| credentials)
    }

    /// Store bytes in the ring buffer chardev `label`
    pub fn ringbuf_write(&self, label: &str, data: &[u8]) -> Result<()> {
        self.find(label)
            .ok_or_else(|| ChardevError::NotFound(label.to_string()))?
            .ringbuf_write(data)
    }

    /// Take up to `max` bytes from the ring buffer chardev `label`
    pub fn ringbuf_read(&self, label: &str, max: usize) -> Result<Vec<u8>> {
        self.find(label)
            .ok_or_else(|| ChardevError::NotFound(label.to_string()))?
            .ringbuf_read(max)
    }

    /// Close and unregister everything
    pub fn close_all(&self) {
        let devices: Vec<Chardev> = self.devices.iter().map(|entry| entry.value().clone()).collect();
        self.devices.clear();
        for chr in devices {
            chr.close();
        }
    }
}

impl std::fmt::Debug for ChardevRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChardevRegistry")
            .field("devices", &self.devices.len())
            .field("credentials", &self.credentials.len())
            .finish()
    }
}
