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

//! Reconnect timer for connecting sockets

use super::ConnectionState;
use crate::backend::Backend;
use crate::{Chardev, ChardevInner};
use std::sync::Weak;
use std::time::Duration;
use tracing::{debug, error};

/// Retry the connection every `interval` until one is established
///
/// With `immediate` the first attempt is made right away. Only the first
/// failure in a row is logged as an error.
pub(super) async fn run(weak: Weak<ChardevInner>, interval: Duration, immediate: bool) {
    let mut wait = !immediate;
    loop {
        if wait {
            tokio::time::sleep(interval).await;
        }
        wait = true;

        let Some(chr) = Chardev::upgrade(&weak) else {
            return;
        };
        let Backend::Socket(ref socket) = *chr.backend() else {
            return;
        };
        if chr.is_open() || socket.phase() != ConnectionState::Disconnected {
            socket.state.lock().reconnect = None;
            return;
        }

        let attempt = match socket.connect().await {
            Ok(peer) => socket.establish(&chr, peer).await,
            Err(err) => Err(err),
        };
        match attempt {
            Ok(()) => return,
            Err(err) => {
                if socket.note_connect_failure() {
                    error!(label = %chr.label(), error = %err, "Unable to connect character device {}", chr.label());
                } else {
                    debug!(label = %chr.label(), error = %err, "reconnect attempt failed");
                }
            }
        }
    }
}
