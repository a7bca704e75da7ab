mod common;
use common::*;

use p2p_skirmish::*;
use proptest::prelude::*;

#[test]
fn handshake_starts_the_game_on_both_players() {
    init_tracing();
    let mut net = TestNet::with_config(Tally, 2, fast_config());
    let match_id = net.start_match(0, 1);

    for peer in 0..2 {
        let matchmaking = net.matchmaking(peer);
        assert!(matchmaking.open_requests().is_empty());
        assert_eq!(matchmaking.current_game(), Some(&match_id));
        assert_eq!(matchmaking.current_join_request(), None);
        let running = matchmaking.running_match(&match_id).expect("running");
        assert_eq!(running.host, net.id(0));
        assert_eq!(running.guest, net.id(1));
    }
    let seed = net.matchmaking(0).running_matches()[0].random_seed;
    assert_eq!(net.matchmaking(1).running_matches()[0].random_seed, seed);

    let host = net.game(0).expect("host game");
    assert_eq!(host.role(), Role::Host);
    assert!(host.is_ready());
    let guest = net.game(1).expect("guest game");
    assert_eq!(guest.role(), Role::Guest);
    assert!(guest.is_ready(), "guest adopts the host's frame 0 snapshot");
    assert_eq!(guest.state_at(0), Some(&Tally.initial_state(seed)));

    let events = net.take_events(1);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, UiEvent::CurrentGameChanged(Some(id)) if *id == match_id))
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, UiEvent::GameReady { frame: 0, .. }))
    );
}

#[test]
fn first_frame_is_calculated_from_the_initial_state() {
    let mut net = TestNet::with_config(Tally, 2, fast_config());
    net.start_match(0, 1);
    net.tick_all();

    let seed = net.game(0).expect("host").random_seed();
    let expected = Tally.calculate_frame(&Tally.initial_state(seed), &FrameInputs::default());
    for peer in 0..2 {
        let game = net.game(peer).expect("game");
        assert_eq!(game.current_network_frame(), 1);
        assert_eq!(game.current_state(), Some(&expected));
    }
}

#[test]
fn guest_input_lands_on_the_delayed_frame_for_both() {
    let mut net = TestNet::with_config(Tally, 2, fast_config());
    net.start_match(0, 1);
    net.tick_all();

    let frame = net
        .act(1, |peer, out| peer.send_input(5, out))
        .expect("guest input");
    assert_eq!(frame, 1 + fast_config().input_delay_frames);
    net.deliver_all();
    while net.game(0).expect("host").current_network_frame() < frame {
        net.tick_all();
    }

    let host = net.game(0).expect("host");
    let guest = net.game(1).expect("guest");
    assert_eq!(host.inputs_at(frame).and_then(|i| i.guest), Some(5));
    assert_eq!(host.current_state(), guest.current_state());
    assert_eq!(host.current_state().map(|s| s.guest), Some(5));
    assert_eq!(host.roll_back_to_frame(), None);
}

#[test]
fn second_request_while_one_is_open_is_rejected() {
    let mut net = TestNet::new(Tally, 2);
    net.act(0, |peer, out| peer.request_match(out))
        .expect("first request");
    let err = net
        .act(0, |peer, out| peer.request_match(out))
        .expect_err("second request");
    assert!(matches!(err, Error::InvalidState(_)), "got {err:?}");
    net.deliver_all();
    assert_eq!(net.matchmaking(1).open_requests().len(), 1);
}

#[test]
fn host_can_not_join_its_own_request() {
    let mut net = TestNet::new(Tally, 2);
    let match_id = net
        .act(0, |peer, out| peer.request_match(out))
        .expect("request");
    let err = net
        .act(0, |peer, out| peer.join_match(&match_id, out))
        .expect_err("join own request");
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn joining_twice_is_rejected_until_cancelled() {
    let mut net = TestNet::new(Tally, 3);
    let first = net
        .act(0, |peer, out| peer.request_match(out))
        .expect("request");
    let second = net
        .act(1, |peer, out| peer.request_match(out))
        .expect("request");
    net.deliver_all();

    // Nobody answers the accept.
    net.act(2, |peer, out| peer.join_match(&first, out))
        .expect("join");
    net.drop_where(|p| is_match_packet(p, "match.accept"));
    let err = net
        .act(2, |peer, out| peer.join_match(&second, out))
        .expect_err("already joining");
    assert!(matches!(err, Error::InvalidState(_)));

    assert_eq!(net.peers[2].cancel_join(), Some(first));
    net.act(2, |peer, out| peer.join_match(&second, out))
        .expect("join after cancel");
    net.deliver_all();
    assert_eq!(net.matchmaking(2).current_game(), Some(&second));
    assert_eq!(net.matchmaking(0).open_requests().len(), 1);
}

#[test]
fn redelivered_packets_change_nothing() {
    let mut net = TestNet::with_config(Tally, 2, fast_config());
    let match_id = net.start_match(0, 1);
    net.act(1, |peer, out| {
        peer.end_match(
            &match_id,
            MatchResult {
                winner: Winner::Guest,
                score: "2:3".to_string(),
            },
            out,
        )
    })
    .expect("end match");
    net.deliver_all();
    let past = net.matchmaking(0).past_matches().to_vec();
    assert_eq!(past.len(), 1);

    for envelope in net.log.clone() {
        for to in 0..2 {
            for channel in [Channel::Ephemeral, Channel::Durable] {
                net.deliver(InFlight {
                    to,
                    channel,
                    envelope: envelope.clone(),
                });
            }
        }
    }
    net.deliver_all();

    for peer in 0..2 {
        let matchmaking = net.matchmaking(peer);
        assert_eq!(matchmaking.past_matches(), past.as_slice());
        assert!(matchmaking.running_matches().is_empty());
        assert!(matchmaking.open_requests().is_empty());
        assert_eq!(matchmaking.current_game(), None);
        assert!(net.game(peer).is_none());
    }
}

#[test]
fn first_accept_wins_the_race() {
    let mut net = TestNet::new(Tally, 3);
    let match_id = net
        .act(0, |peer, out| peer.request_match(out))
        .expect("request");
    net.deliver_all();

    net.act(1, |peer, out| peer.join_match(&match_id, out))
        .expect("first join");
    net.act(2, |peer, out| peer.join_match(&match_id, out))
        .expect("second join");
    net.deliver_all();

    for peer in 0..3 {
        let matchmaking = net.matchmaking(peer);
        let running = matchmaking.running_match(&match_id).expect("running");
        assert_eq!(running.guest, net.id(1));
        assert_eq!(matchmaking.current_join_request(), None);
    }
    assert_eq!(net.matchmaking(2).current_game(), None);
    assert!(net.game(2).is_none());
    assert_eq!(
        net.log
            .iter()
            .filter(|e| e.payload.kind() == "match.confirm")
            .count(),
        1
    );
}

#[test]
fn confirm_from_somebody_but_the_host_is_dropped() {
    let mut net = TestNet::new(Tally, 3);
    let match_id = net
        .act(0, |peer, out| peer.request_match(out))
        .expect("request");
    net.deliver_all();

    let forged = Envelope {
        peer_id: net.id(2),
        payload: Packet::Match(MatchPacket::Confirm {
            match_id: match_id.clone(),
            host: net.id(0),
            guest: net.id(2),
            random_seed: 7,
        }),
    };
    net.deliver(InFlight {
        to: 1,
        channel: Channel::Durable,
        envelope: forged,
    });

    let matchmaking = net.matchmaking(1);
    assert!(matchmaking.running_matches().is_empty());
    assert_eq!(matchmaking.open_requests().len(), 1);
}

#[test]
fn result_from_a_spectator_is_dropped() {
    let mut net = TestNet::new(Tally, 3);
    let match_id = net.start_match(0, 1);
    let forged = Envelope {
        peer_id: net.id(2),
        payload: Packet::Match(MatchPacket::Result {
            match_id: match_id.clone(),
            host: net.id(0),
            guest: net.id(1),
            result: MatchResult {
                winner: Winner::Host,
                score: "9:0".to_string(),
            },
        }),
    };
    net.deliver(InFlight {
        to: 0,
        channel: Channel::Durable,
        envelope: forged,
    });
    assert!(net.matchmaking(0).running_match(&match_id).is_some());
    assert!(net.matchmaking(0).past_matches().is_empty());
}

#[test]
fn late_joiner_learns_matches_from_the_log() {
    let mut net = TestNet::new(Tally, 2);
    let running = net.start_match(0, 1);
    let busy = net
        .act(0, |peer, out| peer.request_match(out))
        .expect_err("host is busy hosting");
    assert!(matches!(busy, Error::InvalidState(_)));

    let late = net.add_peer();
    net.deliver_all();
    let matchmaking = net.matchmaking(late);
    assert!(matchmaking.running_match(&running).is_some());
    assert_eq!(matchmaking.current_game(), None);
    assert_eq!(matchmaking.role_in(&running, &net.id(late)), Some(Role::Spectator));
}

#[test]
fn restarted_peer_rebuilds_its_lobby_from_the_log() {
    let mut net = TestNet::with_config(Tally, 3, fast_config());
    let finished = net.start_match(0, 1);
    net.act(0, |peer, out| {
        peer.end_match(
            &finished,
            MatchResult {
                winner: Winner::Tie,
                score: "1:1".to_string(),
            },
            out,
        )
    })
    .expect("end");
    net.deliver_all();
    let open = net
        .act(2, |peer, out| peer.request_match(out))
        .expect("request");
    net.deliver_all();

    net.restart(2);
    assert!(net.matchmaking(2).open_requests().is_empty());
    net.deliver_all();

    let matchmaking = net.matchmaking(2);
    assert_eq!(matchmaking.past_matches().len(), 1);
    assert_eq!(matchmaking.past_matches()[0].match_id, finished);
    assert_eq!(matchmaking.open_requests().len(), 1);
    assert_eq!(matchmaking.open_requests()[0].match_id, open);
    assert_eq!(matchmaking.open_requests()[0].host, net.id(2));
}

#[test]
fn restarted_guest_resumes_from_a_snapshot() {
    let mut net = TestNet::with_config(Tally, 2, fast_config());
    let match_id = net.start_match(0, 1);
    for _ in 0..3 {
        net.tick_all();
    }

    net.restart(1);
    net.deliver_all();
    assert_eq!(net.matchmaking(1).current_game(), Some(&match_id));
    let guest = net.game(1).expect("game recreated from the durable confirm");
    assert_eq!(guest.role(), Role::Guest);
    assert!(!guest.is_ready());

    let interval = fast_config().snapshot_interval;
    while net.game(0).expect("host").current_network_frame() < interval {
        net.tick_all();
    }
    let guest = net.game(1).expect("guest");
    assert!(guest.is_ready());
    assert_eq!(guest.initial_join_frame(), interval);

    net.tick_all();
    assert_eq!(
        net.game(0).expect("host").current_state(),
        net.game(1).expect("guest").current_state()
    );
}

#[test]
fn restarted_host_resumes_from_the_guest_snapshot() {
    let mut net = TestNet::with_config(Tally, 2, fast_config());
    let match_id = net.start_match(0, 1);
    for tick in 0u8..20 {
        if tick % 6 == 2 {
            net.act(1, |peer, out| peer.send_input(tick, out))
                .expect("guest input");
        }
        net.tick_all();
    }

    net.restart(0);
    net.deliver_all();
    let host = net.game(0).expect("game recreated from the durable confirm");
    assert_eq!(host.match_id(), &match_id);
    assert_eq!(host.role(), Role::Host);
    assert!(!host.is_ready(), "frame 0 is not ours to recreate");
    assert_eq!(host.current_network_frame(), 0);

    let interval = fast_config().snapshot_interval;
    for _ in 0..interval {
        net.tick_all();
    }
    let host = net.game(0).expect("host");
    assert!(host.is_ready());
    assert_eq!(host.initial_join_frame() % interval, 0);

    net.act(0, |peer, out| peer.send_input(3, out))
        .expect("host input after resuming");
    for _ in 0..12 {
        net.tick_all();
    }
    let host = net.game(0).expect("host");
    let guest = net.game(1).expect("guest");
    assert_eq!(host.current_network_frame(), guest.current_network_frame());
    assert_eq!(host.current_state(), guest.current_state());
    assert_ne!(host.current_state().map(|s| s.host), Some(0));
}

/// Deliver the queue in the order `picks` chooses, then drain the rest.
fn deliver_shuffled<G: GameLogic>(net: &mut TestNet<G>, picks: &[usize]) {
    for pick in picks {
        if net.queue.is_empty() {
            break;
        }
        let index = pick % net.queue.len();
        if let Some(packet) = net.queue.remove(index) {
            net.deliver(packet);
        }
    }
    net.deliver_all();
}

proptest! {
    #[test]
    fn every_peer_agrees_under_any_delivery_order(
        picks in prop::collection::vec(any::<usize>(), 0..64),
        guest_first in any::<bool>(),
    ) {
        let mut net = TestNet::new(Tally, 3);
        let match_id = net
            .act(0, |peer, out| peer.request_match(out))
            .expect("request");
        net.deliver_all();

        let (first, second) = if guest_first { (1, 2) } else { (2, 1) };
        net.act(first, |peer, out| peer.join_match(&match_id, out))
            .expect("join");
        net.act(second, |peer, out| peer.join_match(&match_id, out))
            .expect("join");
        deliver_shuffled(&mut net, &picks);

        let running = net.matchmaking(0).running_matches().to_vec();
        prop_assert_eq!(running.len(), 1);
        let guest = running[0].guest.clone();
        prop_assert!(guest == net.id(1) || guest == net.id(2));

        for peer in 0..3 {
            let matchmaking = net.matchmaking(peer);
            prop_assert_eq!(matchmaking.running_matches(), running.as_slice());
            prop_assert!(matchmaking.open_requests().is_empty());
            prop_assert_eq!(matchmaking.current_join_request(), None);
            let playing = peer == 0 || net.id(peer) == guest;
            prop_assert_eq!(matchmaking.current_game().is_some(), playing);
        }

        let guest_index = if guest == net.id(1) { 1 } else { 2 };
        net.act(guest_index, |peer, out| {
            peer.end_match(
                &match_id,
                MatchResult { winner: Winner::Host, score: "3:0".to_string() },
                out,
            )
        })
        .expect("end");
        deliver_shuffled(&mut net, &picks);
        for peer in 0..3 {
            let matchmaking = net.matchmaking(peer);
            prop_assert!(matchmaking.running_matches().is_empty());
            prop_assert_eq!(matchmaking.past_matches().len(), 1);
            prop_assert_eq!(matchmaking.current_game(), None);
        }
    }
}
