//! Game Room
//!
//! The async shell around a [`Dispatcher`]. One task owns all peer state
//! and multiplexes the transport, operator commands, and the simulation
//! and ping timers. Handles talk to it over channels.

mod commands;
mod events;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::matchmaking::{MatchId, MatchResult};
use crate::peer::PeerId;
use crate::transport::Transport;
use crate::{Frame, GameLogic};

use commands::Command;
pub use commands::{GameView, LobbyView, OpenRequest};
pub use events::UiEvent;
use events::{LoopChannels, start_event_loop};

pub type UiEventOf<G> = UiEvent<<G as GameLogic>::State>;

pub struct GameRoom<G: GameLogic> {
    my_id: PeerId,
    commands: mpsc::Sender<Command<G>>,
    cancel: CancellationToken,
    /// UI event loop handle
    event_handle: Option<JoinHandle<()>>,
    transport_handle: Option<JoinHandle<()>>,
}

impl<G: GameLogic> Drop for GameRoom<G> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.event_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.transport_handle.take() {
            handle.abort();
        }
    }
}

impl<G: GameLogic> GameRoom<G> {
    /// Start a room for `my_id` on top of `transport`.
    pub fn create<T: Transport>(
        logic: G,
        my_id: PeerId,
        transport: T,
        config: Config,
    ) -> Result<(Self, mpsc::Receiver<UiEventOf<G>>)> {
        let dispatcher = Dispatcher::new(my_id.clone(), Arc::new(logic), &config);
        Self::with_dispatcher(dispatcher, transport, config)
    }

    /// Start a room around an existing dispatcher.
    pub fn with_dispatcher<T: Transport>(
        dispatcher: Dispatcher<G>,
        transport: T,
        config: Config,
    ) -> Result<(Self, mpsc::Receiver<UiEventOf<G>>)> {
        config.validate()?;
        let my_id = dispatcher.my_id().clone();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (ui_tx, ui_rx) = mpsc::channel(config.event_buffer);
        let cancel = CancellationToken::new();

        let transport_handle = tokio::spawn(async move {
            if let Err(e) = transport.run(inbound_tx, outbound_rx).await {
                error!("transport failed: {e:#}");
            }
        });
        let channels = LoopChannels {
            commands: command_rx,
            inbound: inbound_rx,
            outbound: outbound_tx,
            ui: ui_tx,
        };
        let event_handle = start_event_loop(dispatcher, channels, config, cancel.clone());
        info!(peer = %my_id, "room started");

        Ok((
            Self {
                my_id,
                commands: command_tx,
                cancel,
                event_handle: Some(event_handle),
                transport_handle: Some(transport_handle),
            },
            ui_rx,
        ))
    }

    pub fn id(&self) -> &PeerId {
        &self.my_id
    }

    /// Stop the event loop and let the transport wind down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.event_handle.take() {
            let _ = handle.await;
        }
        // the loop dropped its outbound sender, so the transport returns
        if let Some(handle) = self.transport_handle.take() {
            let _ = handle.await;
        }
    }

    async fn ask<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command<G>,
    ) -> Result<T, Error> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::RoomClosed)?;
        response.await.map_err(|_| Error::RoomClosed)
    }
}

/// Operator actions
impl<G: GameLogic> GameRoom<G> {
    /// Open a match request with us as host.
    pub async fn request_match(&self) -> Result<MatchId, Error> {
        self.ask(Command::RequestMatch).await?
    }

    /// Ask the host of an open request to play against us.
    pub async fn join_match(&self, match_id: MatchId) -> Result<(), Error> {
        self.ask(|reply| Command::JoinMatch(match_id, reply)).await?
    }

    /// Forget our pending join request.
    pub async fn cancel_join(&self) -> Result<Option<MatchId>, Error> {
        self.ask(Command::CancelJoin).await
    }

    pub async fn end_match(&self, match_id: MatchId, result: MatchResult) -> Result<(), Error> {
        self.ask(|reply| Command::EndMatch(match_id, result, reply)).await?
    }

    /// Returns the frame the input was scheduled for.
    pub async fn send_input(&self, input: G::Input) -> Result<Frame, Error> {
        self.ask(|reply| Command::SendInput(input, reply)).await?
    }

    pub async fn spectate(&self, match_id: MatchId) -> Result<(), Error> {
        self.ask(|reply| Command::Spectate(match_id, reply)).await?
    }

    pub async fn leave_game(&self) -> Result<Option<MatchId>, Error> {
        self.ask(Command::LeaveGame).await
    }

    pub async fn request_names(&self) -> Result<(), Error> {
        self.commands
            .send(Command::RequestNames)
            .await
            .map_err(|_| Error::RoomClosed)
    }
}

/// Queries
impl<G: GameLogic> GameRoom<G> {
    pub async fn lobby(&self) -> Result<LobbyView, Error> {
        self.ask(Command::Lobby).await
    }

    /// The simulation we are showing, if any.
    pub async fn game(&self) -> Result<Option<GameView<G::State>>, Error> {
        self.ask(Command::Game).await
    }
}
