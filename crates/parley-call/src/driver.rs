use parley_proto::{ServerEvent, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::coordinator::{CallCoordinator, CallState, CallSummary};
use crate::error::CallError;
use crate::peer::{CallId, TransportEvent};

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    Start(UserId),
    HangUp,
    ToggleMute,
    ToggleCamera,
}

/// What the driver reports back to the UI.
#[derive(Debug)]
pub enum CallNotice {
    /// A call attempt could not be placed or answered.
    Failed(CallError),
    Ended(CallSummary),
    Muted(bool),
    CameraOff(bool),
}

/// UI-side handle onto a running [`CallDriver`].
pub struct CallHandle {
    commands: mpsc::Sender<CallCommand>,
    notices: mpsc::UnboundedReceiver<CallNotice>,
    state: watch::Receiver<CallState>,
}

impl CallHandle {
    /// Queues a command. Returns false once the driver has stopped.
    pub async fn send(&self, command: CallCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn start(&self, remote: UserId) -> bool {
        self.send(CallCommand::Start(remote)).await
    }

    pub async fn hang_up(&self) -> bool {
        self.send(CallCommand::HangUp).await
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Waits until the call reaches `state`. Returns false if the driver stopped first.
    pub async fn wait_for(&mut self, state: CallState) -> bool {
        self.state.wait_for(|current| *current == state).await.is_ok()
    }

    pub async fn next_notice(&mut self) -> Option<CallNotice> {
        self.notices.recv().await
    }
}

/// Runs a [`CallCoordinator`] against its inputs on one task.
pub struct CallDriver {
    coordinator: CallCoordinator,
    transport_events: mpsc::UnboundedReceiver<(CallId, TransportEvent)>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    commands: mpsc::Receiver<CallCommand>,
    notices: mpsc::UnboundedSender<CallNotice>,
}

impl CallDriver {
    pub fn new(
        coordinator: CallCoordinator,
        transport_events: mpsc::UnboundedReceiver<(CallId, TransportEvent)>,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> (Self, CallHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let handle = CallHandle {
            commands: commands_tx,
            notices: notices_rx,
            state: coordinator.subscribe(),
        };
        let driver = Self {
            coordinator,
            transport_events,
            inbound,
            commands: commands_rx,
            notices: notices_tx,
        };
        (driver, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(user = %self.coordinator.local_user(), "call driver started");
        loop {
            let deadline = self.coordinator.negotiation_deadline();
            tokio::select! {
                event = self.inbound.recv() => match event {
                    Some(event) => match self.coordinator.handle_signal(event).await {
                        Ok(ended) => self.report_end(ended),
                        Err(err) => self.notify(CallNotice::Failed(err)),
                    },
                    None => {
                        warn!("relay connection closed");
                        let ended = self.coordinator.relay_lost().await;
                        self.report_end(ended);
                        break;
                    }
                },
                Some((call, event)) = self.transport_events.recv() => {
                    let ended = self.coordinator.handle_transport_event(call, event).await;
                    self.report_end(ended);
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command).await,
                    None => {
                        debug!("call handle dropped");
                        let ended = self.coordinator.hang_up().await;
                        self.report_end(ended);
                        break;
                    }
                },
                _ = wait_until(deadline) => {
                    let ended = self.coordinator.check_deadline().await;
                    self.report_end(ended);
                }
            }
        }
        info!(user = %self.coordinator.local_user(), "call driver stopped");
    }

    async fn apply(&mut self, command: CallCommand) {
        debug!(?command, "call command");
        match command {
            CallCommand::Start(remote) => {
                if let Err(err) = self.coordinator.start_call(remote).await {
                    self.notify(CallNotice::Failed(err));
                }
            }
            CallCommand::HangUp => {
                let ended = self.coordinator.hang_up().await;
                self.report_end(ended);
            }
            CallCommand::ToggleMute => {
                if let Some(muted) = self.coordinator.toggle_mute() {
                    self.notify(CallNotice::Muted(muted));
                }
            }
            CallCommand::ToggleCamera => {
                if let Some(off) = self.coordinator.toggle_camera() {
                    self.notify(CallNotice::CameraOff(off));
                }
            }
        }
    }

    fn report_end(&self, ended: Option<CallSummary>) {
        if let Some(summary) = ended {
            self.notify(CallNotice::Ended(summary));
        }
    }

    fn notify(&self, notice: CallNotice) {
        // The UI may have dropped its handle.
        let _ = self.notices.send(notice);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
