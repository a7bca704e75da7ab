use tracing::info;

use super::*;

impl Matchmaking {
    /// Offer a new match with ourselves as host.
    pub fn send_match_request(&mut self, out: &mut MatchOutbox) -> Result<MatchId> {
        if self.has_open_request_as_host() {
            return Err(Error::invalid_state("you already have an open match request"));
        }
        if self.running.iter().any(|m| m.host == self.my_id) {
            return Err(Error::invalid_state("you are already hosting a running match"));
        }
        if let Some(joining) = &self.current_join_request {
            return Err(Error::invalid_state(format!(
                "you are currently joining match {joining}"
            )));
        }

        let match_id = MatchId::generate(&mut self.rng);
        let request = MatchPacket::Request {
            match_id: match_id.clone(),
        };
        out.persistent(request.clone());
        let me = self.my_id.clone();
        self.process_packet(&me, &request, out)?;
        Ok(match_id)
    }

    /// Ask the host of an open request to play with us.
    pub fn send_join_request(&mut self, match_id: &MatchId, out: &mut MatchOutbox) -> Result<()> {
        if !self.requests.iter().any(|r| r.match_id == *match_id) {
            return Err(Error::invalid_state(format!(
                "there is no open match request {match_id}"
            )));
        }
        if self.has_open_request_as_host() {
            return Err(Error::invalid_state(
                "you can not join a match while your own request is open",
            ));
        }
        if self.running.iter().any(|m| m.is_participant(&self.my_id)) {
            return Err(Error::invalid_state("you are already playing a match"));
        }
        if let Some(joining) = &self.current_join_request {
            return Err(Error::invalid_state(format!(
                "you are already joining match {joining}"
            )));
        }

        info!(%match_id, "asking to join match");
        // The accept only matters to the host, so it never goes to the log.
        out.ephemeral(MatchPacket::Accept {
            match_id: match_id.clone(),
        });
        self.current_join_request = Some(match_id.clone());
        Ok(())
    }

    /// Give up on a join whose accept or confirm never made it.
    pub fn cancel_join_request(&mut self) -> Option<MatchId> {
        self.current_join_request.take()
    }

    /// Announce the outcome of a match we are playing in.
    pub fn end_match(
        &mut self,
        match_id: &MatchId,
        result: MatchResult,
        out: &mut MatchOutbox,
    ) -> Result<()> {
        let Some(running) = self.running.iter().find(|m| m.match_id == *match_id) else {
            return Err(Error::invalid_state(format!(
                "match {match_id} is not running"
            )));
        };
        if !running.is_participant(&self.my_id) {
            return Err(Error::invalid_state(format!(
                "you are not playing in match {match_id}"
            )));
        }

        let packet = MatchPacket::Result {
            match_id: match_id.clone(),
            host: running.host.clone(),
            guest: running.guest.clone(),
            result,
        };
        out.persistent(packet.clone());
        let me = self.my_id.clone();
        self.process_packet(&me, &packet, out)
    }

    fn has_open_request_as_host(&self) -> bool {
        self.requests.iter().any(|r| r.host == self.my_id)
    }
}
