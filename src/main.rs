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

//! CrisisLink Desktop Application

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crisislink::bluetooth::{
    ConnectionManager, DeviceIdentity, ManagerOptions, RfcommTransport, SendOutcome,
};
use crisislink::config::Config;
use crisislink::notify::LogNotifier;
use crisislink::state::AppState;
use crisislink::storage::MessageHistory;

/// How long `/scan` keeps discovery running.
const SCAN_DURATION: Duration = Duration::from_secs(12);

/// A line typed at the console.
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Send(String),
    Sos,
    Connect(String),
    Devices,
    Scan,
    History,
    Status,
    Quit,
    Help,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !trimmed.starts_with('/') {
            // Message bodies go out exactly as typed.
            return Some(Self::Send(line.to_string()));
        }
        let line = trimmed;

        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };
        match command {
            "/sos" => Some(Self::Sos),
            "/connect" if !arg.is_empty() => Some(Self::Connect(arg.to_string())),
            "/devices" => Some(Self::Devices),
            "/scan" => Some(Self::Scan),
            "/history" => Some(Self::History),
            "/status" => Some(Self::Status),
            "/quit" | "/exit" => Some(Self::Quit),
            _ => Some(Self::Help),
        }
    }
}

const HELP: &str = "Commands:
  <text>            send a message
  /sos              send an emergency alert
  /connect <addr>   connect to a device
  /devices          list paired devices
  /scan             discover nearby devices
  /history          show recent messages
  /status           show connection status
  /quit             exit";

struct App {
    config: Config,
    manager: ConnectionManager,
    transport: Arc<RfcommTransport>,
    history: Arc<MessageHistory>,
    state: Arc<AppState>,
}

impl App {
    /// Run one console command. Returns `false` when the app should exit.
    async fn handle(&self, command: ConsoleCommand) -> Result<bool> {
        match command {
            ConsoleCommand::Send(text) => self.report_send(self.manager.send_message(&text).await),
            ConsoleCommand::Sos => self.report_send(self.manager.send_emergency_alert().await),
            ConsoleCommand::Connect(address) => {
                let target = self
                    .transport
                    .paired_devices()
                    .await?
                    .into_iter()
                    .find(|device| device.address.eq_ignore_ascii_case(&address))
                    .unwrap_or_else(|| DeviceIdentity::new(address));
                match self.manager.connect_to_device(target).await {
                    Ok(()) => {}
                    Err(e) if e.is_precondition() => {
                        warn!("Bluetooth is not available: {}", e);
                    }
                    Err(e) => warn!("Cannot connect: {}", e),
                }
            }
            ConsoleCommand::Devices => {
                for device in self.transport.paired_devices().await? {
                    println!("  {}", device);
                }
            }
            ConsoleCommand::Scan => {
                let mut found = self.transport.start_discovery().await?;
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(SCAN_DURATION, async {
                        while let Some(device) = found.recv().await {
                            println!("  found {}", device);
                        }
                    })
                    .await;
                    transport.stop_discovery();
                });
            }
            ConsoleCommand::History => {
                for stored in self
                    .history
                    .recent(self.config.messages.recent_limit)?
                    .into_iter()
                    .rev()
                {
                    let message = &stored.message;
                    println!(
                        "[{}] {}{}: {}",
                        message.local_time().format("%H:%M:%S"),
                        if message.is_emergency { "!" } else { "" },
                        message.sender_name,
                        message.content
                    );
                }
            }
            ConsoleCommand::Status => println!("{}", self.state.summary()),
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn report_send(&self, outcome: crisislink::Result<SendOutcome>) {
        match outcome {
            Ok(SendOutcome::Sent) => {}
            Ok(SendOutcome::Dropped) => println!("Not connected, message not sent"),
            Err(e) => error!("Send failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("crisislink=info".parse()?),
        )
        .init();

    info!("Starting CrisisLink v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Initialize storage
    let history = Arc::new(MessageHistory::new(
        &config.data_dir,
        config.messages.max_entries,
    )?);
    info!("Message storage initialized");

    let transport = Arc::new(RfcommTransport::new(&config.bluetooth).await?);
    let state = AppState::new();

    let manager = ConnectionManager::new(
        transport.clone(),
        history.clone(),
        Arc::new(LogNotifier),
        state.clone(),
        ManagerOptions::from(&config),
    );
    manager.start().await?;
    info!(
        "Listening for peers as '{}'",
        config.bluetooth.device_name
    );

    let app = App {
        config,
        manager,
        transport,
        history,
        state,
    };

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(command) = ConsoleCommand::parse(&line) else {
                    continue;
                };
                match app.handle(command).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Quit requested");
                        break;
                    }
                    Err(e) => error!("Command failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    app.manager.shutdown();
    info!("CrisisLink stopped");
    Ok(())
}
