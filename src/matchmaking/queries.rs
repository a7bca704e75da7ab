use super::*;
use crate::Role;

impl Matchmaking {
    pub fn my_id(&self) -> &PeerId {
        &self.my_id
    }

    pub fn open_requests(&self) -> &[MatchRequest] {
        &self.requests
    }

    pub fn running_matches(&self) -> &[RunningMatch] {
        &self.running
    }

    pub fn past_matches(&self) -> &[PastMatch] {
        &self.past
    }

    pub fn running_match(&self, match_id: &MatchId) -> Option<&RunningMatch> {
        self.running.iter().find(|m| m.match_id == *match_id)
    }

    /// The match we are playing in, if any.
    pub fn current_game(&self) -> Option<&MatchId> {
        self.current_game.as_ref()
    }

    /// The request we sent an accept for and are waiting to hear back on.
    pub fn current_join_request(&self) -> Option<&MatchId> {
        self.current_join_request.as_ref()
    }

    /// Role of `peer` in a running match, `None` if the match is unknown.
    pub fn role_in(&self, match_id: &MatchId, peer: &PeerId) -> Option<Role> {
        let running = self.running_match(match_id)?;
        Some(if running.host == *peer {
            Role::Host
        } else if running.guest == *peer {
            Role::Guest
        } else {
            Role::Spectator
        })
    }
}
