// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! User-visible alerts for incoming messages.

use tracing::{info, warn};

use crate::storage::Message;

/// Presents a transient alert for an incoming message.
///
/// Implementations are called from the session event path and must not block.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, message: &Message);
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &Message) {
        if message.is_emergency {
            warn!(target: "crisislink::alert", "EMERGENCY from {}: {}", message.sender_name, message.content);
        } else {
            info!(target: "crisislink::alert", "New CrisisLink message from {}: {}", message.sender_name, message.content);
        }
    }
}
