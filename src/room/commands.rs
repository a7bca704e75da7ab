use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::dispatch::{DispatchOutbox, Dispatcher};
use crate::error::Result;
use crate::game::Readiness;
use crate::matchmaking::{MatchId, MatchRequest, MatchResult, PastMatch, RunningMatch};
use crate::peer::{PeerId, PeerStatus};
use crate::{Frame, GameLogic, Role};

/// An open request as shown in the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub request: MatchRequest,
    pub host_name: String,
    pub host_status: PeerStatus,
}

/// Everything the lobby screen needs, read in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyView {
    pub my_id: PeerId,
    pub open_requests: Vec<OpenRequest>,
    pub running: Vec<RunningMatch>,
    pub past: Vec<PastMatch>,
    pub current_join_request: Option<MatchId>,
    pub current_game: Option<MatchId>,
    pub online_peers: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameView<S> {
    pub match_id: MatchId,
    pub role: Role,
    pub readiness: Readiness,
    pub frame: Frame,
    pub state: Option<S>,
}

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command<G: GameLogic> {
    RequestMatch(Reply<Result<MatchId>>),
    JoinMatch(MatchId, Reply<Result<()>>),
    CancelJoin(Reply<Option<MatchId>>),
    EndMatch(MatchId, MatchResult, Reply<Result<()>>),
    SendInput(G::Input, Reply<Result<Frame>>),
    Spectate(MatchId, Reply<Result<()>>),
    LeaveGame(Reply<Option<MatchId>>),
    RequestNames,
    Lobby(Reply<LobbyView>),
    Game(Reply<Option<GameView<G::State>>>),
}

impl<G: GameLogic> Command<G> {
    /// Run against the dispatcher. A dropped reply only means the caller
    /// stopped waiting.
    pub(crate) fn execute(self, dispatcher: &mut Dispatcher<G>, out: &mut DispatchOutbox<G>) {
        let delivered = match self {
            Command::RequestMatch(reply) => reply.send(dispatcher.request_match(out)).is_ok(),
            Command::JoinMatch(match_id, reply) => {
                reply.send(dispatcher.join_match(&match_id, out)).is_ok()
            }
            Command::CancelJoin(reply) => reply.send(dispatcher.cancel_join()).is_ok(),
            Command::EndMatch(match_id, result, reply) => reply
                .send(dispatcher.end_match(&match_id, result, out))
                .is_ok(),
            Command::SendInput(data, reply) => reply.send(dispatcher.send_input(data, out)).is_ok(),
            Command::Spectate(match_id, reply) => {
                reply.send(dispatcher.spectate(&match_id, out)).is_ok()
            }
            Command::LeaveGame(reply) => reply.send(dispatcher.leave_game()).is_ok(),
            Command::RequestNames => {
                dispatcher.request_names(out);
                true
            }
            Command::Lobby(reply) => reply.send(lobby_view(dispatcher)).is_ok(),
            Command::Game(reply) => reply.send(game_view(dispatcher)).is_ok(),
        };
        if !delivered {
            debug!("command caller went away before the reply");
        }
    }
}

fn lobby_view<G: GameLogic>(dispatcher: &Dispatcher<G>) -> LobbyView {
    let now = Instant::now();
    let matchmaking = dispatcher.matchmaking();
    let peers = dispatcher.peers();
    let open_requests = matchmaking
        .open_requests()
        .iter()
        .map(|request| OpenRequest {
            host_name: dispatcher.names().name_of(&request.host),
            host_status: peers.status(&request.host, now),
            request: request.clone(),
        })
        .collect();
    LobbyView {
        my_id: dispatcher.my_id().clone(),
        open_requests,
        running: matchmaking.running_matches().to_vec(),
        past: matchmaking.past_matches().to_vec(),
        current_join_request: matchmaking.current_join_request().cloned(),
        current_game: matchmaking.current_game().cloned(),
        online_peers: peers.online_count(now),
    }
}

fn game_view<G: GameLogic>(dispatcher: &Dispatcher<G>) -> Option<GameView<G::State>> {
    dispatcher.game().map(|game| GameView {
        match_id: game.match_id().clone(),
        role: game.role(),
        readiness: game.readiness(),
        frame: game.current_network_frame(),
        state: game.current_state().cloned(),
    })
}
