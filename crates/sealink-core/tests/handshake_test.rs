//! End-to-end handshake tests over two in-memory endpoint contexts.
//!
//! Every message goes through `encode` and `decode` on its way to the other
//! side, so these tests exercise the wire format together with the state
//! machine. No sockets, no engine.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    time::Instant,
};

use sealink_core::{
    Action, ChannelError, EndpointContext, HandshakeState, IdentityStore, SystemEnv,
    context::PendingHello,
};
use sealink_proto::{Hello, Message, ProtocolError};
use tokio::sync::oneshot;

/// One side of the conversation: its identity and its view of the peer.
struct Peer {
    identity: IdentityStore,
    ctx: EndpointContext,
    trust: bool,
    presentations: Vec<bool>,
    established: Vec<u32>,
    delivered: Vec<Vec<u8>>,
    completed_hellos: Vec<u32>,
}

impl Peer {
    fn new(name: &str, peer_port: u16) -> Self {
        Self::with_identity(IdentityStore::generate(name).unwrap(), peer_port)
    }

    /// A peer with no memory of earlier exchanges, as after a restart.
    fn with_identity(identity: IdentityStore, peer_port: u16) -> Self {
        Self {
            identity,
            ctx: EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], peer_port))),
            trust: true,
            presentations: Vec::new(),
            established: Vec::new(),
            delivered: Vec::new(),
            completed_hellos: Vec::new(),
        }
    }

    /// Decode `datagram` and run the resulting actions like the engine
    /// would, returning what this side sends back.
    fn receive(&mut self, datagram: &[u8]) -> Result<Vec<Message>, ChannelError> {
        let message = Message::decode(datagram)?;
        let actions = self.ctx.handle_message(message, &self.identity, &SystemEnv)?;
        Ok(self.run(actions))
    }

    fn run(&mut self, actions: Vec<Action>) -> Vec<Message> {
        let mut queue = VecDeque::from(actions);
        let mut outgoing = Vec::new();

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(message) => outgoing.push(message),
                Action::ConsultHelloPolicy { nonce } => {
                    outgoing.push(Message::HelloResponse(Hello { nonce }));
                },
                Action::CompleteHello { nonce, pending } => {
                    pending.complete();
                    self.completed_hellos.push(nonce);
                },
                Action::ConsultTrust { presentation, is_new } => {
                    self.presentations.push(is_new);
                    let follow_up = self
                        .ctx
                        .apply_trust_decision(
                            &presentation,
                            is_new,
                            self.trust,
                            &self.identity,
                            &SystemEnv,
                        )
                        .unwrap();
                    queue.extend(follow_up);
                },
                Action::SessionEstablished { session_number } => {
                    self.established.push(session_number);
                },
                Action::Deliver(payload) => self.delivered.push(payload),
            }
        }
        outgoing
    }
}

fn wire(message: &Message) -> Vec<u8> {
    message.to_bytes().unwrap().to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum To {
    Alice,
    Bob,
}

/// Shuttle messages between the two peers until both go quiet, dropping
/// every datagram `lose` picks. Rejected datagrams are dropped like the
/// engine drops them. Returns the number of datagrams sent.
fn exchange(
    alice: &mut Peer,
    bob: &mut Peer,
    in_flight: Vec<(To, Message)>,
    mut lose: impl FnMut(&Message) -> bool,
) -> usize {
    let mut in_flight = VecDeque::from(in_flight);
    let mut count = 0;

    while let Some((to, message)) = in_flight.pop_front() {
        count += 1;
        assert!(count < 32, "handshake did not converge");
        if lose(&message) {
            continue;
        }
        let (receiver, reply_to) = match to {
            To::Bob => (&mut *bob, To::Alice),
            To::Alice => (&mut *alice, To::Bob),
        };
        if let Ok(replies) = receiver.receive(&wire(&message)) {
            in_flight.extend(replies.into_iter().map(|m| (reply_to, m)));
        }
    }
    count
}

fn pump(alice: &mut Peer, bob: &mut Peer, from_alice: Vec<Message>) -> usize {
    let in_flight = from_alice.into_iter().map(|m| (To::Bob, m)).collect();
    exchange(alice, bob, in_flight, |_| false)
}

fn session_number(peer: &Peer) -> Option<u32> {
    peer.ctx.session().map(|s| s.session_number())
}

/// Both sides hold the same session and can talk over it.
fn assert_talking(alice: &mut Peer, bob: &mut Peer) {
    assert!(session_number(alice).is_some());
    assert_eq!(session_number(alice), session_number(bob));

    let to_bob = wire(&alice.ctx.seal_data(b"ping").unwrap());
    bob.receive(&to_bob).unwrap();
    let to_alice = wire(&bob.ctx.seal_data(b"pong").unwrap());
    alice.receive(&to_alice).unwrap();

    assert_eq!(bob.delivered.last().map(Vec::as_slice), Some(&b"ping"[..]));
    assert_eq!(alice.delivered.last().map(Vec::as_slice), Some(&b"pong"[..]));
}

fn connected_pair() -> (Peer, Peer) {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);
    let introduction = alice.ctx.introduce(&alice.identity);
    pump(&mut alice, &mut bob, vec![introduction]);
    (alice, bob)
}

/// Trust established in both directions without any session traffic.
fn trusting_pair() -> (Peer, Peer) {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);
    alice.ctx.accept_presentation(
        bob.identity.signature_certificate().clone(),
        bob.identity.encryption_certificate().clone(),
    );
    bob.ctx.accept_presentation(
        alice.identity.signature_certificate().clone(),
        alice.identity.encryption_certificate().clone(),
    );
    alice.ctx.set_trust(true);
    bob.ctx.set_trust(true);
    alice.ctx.mark_presented();
    bob.ctx.mark_presented();
    (alice, bob)
}

#[test]
fn hello_round_trip_completes_pending_request() {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);

    let (responder, mut response) = oneshot::channel();
    let nonce = alice.ctx.allocate_hello_nonce();
    alice.ctx.record_pending(nonce, PendingHello::new(Instant::now(), responder));
    assert_eq!(alice.ctx.state(), HandshakeState::HelloSent);

    let exchanged = pump(&mut alice, &mut bob, vec![Message::HelloRequest(Hello { nonce })]);

    assert_eq!(exchanged, 2);
    assert_eq!(alice.completed_hellos, vec![nonce]);
    assert_eq!(alice.ctx.pending_hello_count(), 0);
    assert!(response.try_recv().is_ok());
}

#[test]
fn duplicate_hello_response_resolves_once() {
    let mut alice = Peer::new("alice", 2);
    let (responder, _response) = oneshot::channel();
    let nonce = alice.ctx.allocate_hello_nonce();
    alice.ctx.record_pending(nonce, PendingHello::new(Instant::now(), responder));

    let response = wire(&Message::HelloResponse(Hello { nonce }));
    alice.receive(&response).unwrap();
    let second = alice.receive(&response);

    assert!(matches!(second, Err(ChannelError::UnmatchedResponse { .. })));
    assert_eq!(alice.completed_hellos, vec![nonce]);
}

#[test]
fn introduction_leads_to_shared_session() {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);

    let introduction = alice.ctx.introduce(&alice.identity);
    // PRESENTATION, PRESENTATION, SESSION_REQUEST, SESSION
    assert_eq!(pump(&mut alice, &mut bob, vec![introduction]), 4);

    assert_eq!(bob.presentations, vec![true]);
    assert_eq!(alice.presentations, vec![true]);
    assert_eq!(alice.established.len(), 1);
    assert_eq!(alice.established, bob.established);
    assert_eq!(alice.ctx.state(), HandshakeState::SessionEstablished);
    assert_eq!(bob.ctx.state(), HandshakeState::SessionEstablished);
    assert_eq!(
        alice.ctx.session().map(|s| s.session_number()),
        bob.ctx.session().map(|s| s.session_number())
    );
}

#[test]
fn data_is_delivered_in_both_directions() {
    let (mut alice, mut bob) = connected_pair();

    let to_bob = alice.ctx.seal_data(b"hello").unwrap();
    assert!(bob.receive(&wire(&to_bob)).unwrap().is_empty());
    let to_alice = bob.ctx.seal_data(b"hi alice").unwrap();
    alice.receive(&wire(&to_alice)).unwrap();

    assert_eq!(bob.delivered, vec![b"hello".to_vec()]);
    assert_eq!(alice.delivered, vec![b"hi alice".to_vec()]);
}

#[test]
fn bit_flipped_data_is_rejected() {
    let (mut alice, mut bob) = connected_pair();
    let datagram = wire(&alice.ctx.seal_data(b"hello").unwrap());

    // header (3) + session number (4) + sequence number (4), then ciphertext
    for index in 3..datagram.len() {
        let mut tampered = datagram.clone();
        tampered[index] ^= 0x01;
        assert!(bob.receive(&tampered).is_err(), "flip at byte {index} accepted");
    }
    assert!(bob.delivered.is_empty());

    // The genuine datagram still gets through afterwards.
    bob.receive(&datagram).unwrap();
    assert_eq!(bob.delivered, vec![b"hello".to_vec()]);
}

#[test]
fn replayed_data_is_not_delivered_twice() {
    let (mut alice, mut bob) = connected_pair();
    let first = wire(&alice.ctx.seal_data(b"one").unwrap());
    let second = wire(&alice.ctx.seal_data(b"two").unwrap());

    bob.receive(&first).unwrap();
    bob.receive(&second).unwrap();

    assert!(matches!(bob.receive(&first), Err(ChannelError::ReplayDetected { .. })));
    assert!(matches!(bob.receive(&second), Err(ChannelError::ReplayDetected { .. })));
    assert_eq!(bob.delivered, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[test]
fn duplicate_session_request_yields_one_session() {
    let (mut alice, mut bob) = trusting_pair();
    let request = wire(&alice.ctx.begin_session(&alice.identity, &SystemEnv).unwrap());

    let first = bob.receive(&request).unwrap();
    let second = bob.receive(&request);

    assert_eq!(first.len(), 1);
    assert!(matches!(first[0], Message::Session(_)));
    assert!(matches!(second, Err(ChannelError::SessionRejected { .. })));
    assert_eq!(bob.established.len(), 1);

    alice.receive(&wire(&first[0])).unwrap();
    assert_eq!(alice.established, bob.established);
}

#[test]
fn stale_session_reply_is_ignored() {
    let (mut alice, mut bob) = trusting_pair();
    let request = wire(&alice.ctx.begin_session(&alice.identity, &SystemEnv).unwrap());
    let reply = wire(&bob.receive(&request).unwrap()[0]);

    alice.receive(&reply).unwrap();
    let again = alice.receive(&reply);

    assert!(matches!(again, Err(ChannelError::UnknownSession { .. })));
    assert_eq!(alice.established.len(), 1);
}

#[test]
fn corrupted_presentation_never_reaches_trust() {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);

    let mut datagram = wire(&alice.ctx.introduce(&alice.identity));
    let last = datagram.len() - 1;
    datagram[last] ^= 0x80;

    let result = bob.receive(&datagram);

    assert!(matches!(
        result,
        Err(ChannelError::InvalidSignature | ChannelError::MalformedMessage(_))
    ));
    assert!(bob.presentations.is_empty());
    assert!(bob.ctx.peer().is_none());
}

#[test]
fn repeated_presentation_is_not_new_and_renegotiates() {
    let (mut alice, mut bob) = connected_pair();
    let session_before = session_number(&bob).unwrap();

    let again = alice.ctx.introduce(&alice.identity);
    pump(&mut alice, &mut bob, vec![again]);

    assert!(bob.presentations[0]);
    assert!(bob.presentations.len() > 1);
    assert!(bob.presentations[1..].iter().all(|is_new| !is_new));
    assert!(session_number(&bob).unwrap() > session_before);
    assert_talking(&mut alice, &mut bob);
}

#[test]
fn new_identity_replaces_session() {
    let (_alice, mut bob) = connected_pair();
    let mut impostor = Peer::new("mallory", 1);

    let introduction = wire(&impostor.ctx.introduce(&impostor.identity));
    let replies = bob.receive(&introduction).unwrap();

    assert_eq!(bob.presentations, vec![true, true]);
    // The new identity has never seen bob's certificates.
    assert!(matches!(replies.as_slice(), [Message::Presentation(_)]));
    assert!(bob.ctx.session().is_none());
    assert_eq!(bob.ctx.state(), HandshakeState::Presented);

    let in_flight = replies.into_iter().map(|m| (To::Alice, m)).collect();
    exchange(&mut impostor, &mut bob, in_flight, |_| false);
    assert_talking(&mut impostor, &mut bob);
    assert_eq!(
        bob.ctx.trusted_peer().and_then(|p| p.signature_certificate.subject()).as_deref(),
        Some("CN=mallory")
    );
}

#[test]
fn rejected_presentation_is_remembered() {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);
    bob.trust = false;

    let introduction = wire(&alice.ctx.introduce(&alice.identity));
    assert!(bob.receive(&introduction).unwrap().is_empty());
    assert!(bob.receive(&introduction).unwrap().is_empty());

    assert_eq!(bob.presentations, vec![true, false]);
    assert!(bob.ctx.peer().is_some());
    assert!(bob.ctx.trusted_peer().is_none());

    // Trust granted on a later presentation resumes the handshake.
    bob.trust = true;
    let again = alice.ctx.introduce(&alice.identity);
    pump(&mut alice, &mut bob, vec![again]);
    assert_eq!(bob.presentations, vec![true, false, false]);
    assert_talking(&mut alice, &mut bob);
}

#[test]
fn duplicate_presentations_handled_before_trust_are_new_once() {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);
    let introduction = alice.ctx.introduce(&alice.identity);

    // Two workers pick up the same datagram before either asks the
    // application.
    let first = bob.ctx.handle_message(introduction.clone(), &bob.identity, &SystemEnv).unwrap();
    let second = bob.ctx.handle_message(introduction, &bob.identity, &SystemEnv).unwrap();

    let mut replies = bob.run(first);
    replies.extend(bob.run(second));
    assert_eq!(bob.presentations, vec![true, false]);

    let in_flight = replies.into_iter().map(|m| (To::Alice, m)).collect();
    exchange(&mut alice, &mut bob, in_flight, |_| false);
    assert_eq!(alice.established.len(), 1);
    assert_eq!(alice.established, bob.established);
    assert_talking(&mut alice, &mut bob);
}

#[test]
fn lost_handshake_datagram_recovers_on_reintroduction() {
    // PRESENTATION, PRESENTATION, SESSION_REQUEST, SESSION
    for lost in 0..4 {
        let mut alice = Peer::new("alice", 2);
        let mut bob = Peer::new("bob", 1);

        let introduction = alice.ctx.introduce(&alice.identity);
        let mut sent = 0;
        exchange(&mut alice, &mut bob, vec![(To::Bob, introduction)], |_| {
            sent += 1;
            sent == lost + 1
        });
        assert!(
            session_number(&alice).is_none() || session_number(&bob).is_none(),
            "losing datagram {lost} went unnoticed"
        );

        let again = alice.ctx.introduce(&alice.identity);
        pump(&mut alice, &mut bob, vec![again]);
        assert_talking(&mut alice, &mut bob);
    }
}

#[test]
fn restarted_peer_with_same_identity_reconnects() {
    let (alice, mut bob) = connected_pair();
    let before = session_number(&bob).unwrap();

    let mut restarted = Peer::with_identity(alice.identity, 2);
    let introduction = restarted.ctx.introduce(&restarted.identity);
    pump(&mut restarted, &mut bob, vec![introduction]);

    // Bob presents again even though he presented to this identity before.
    assert_eq!(restarted.presentations, vec![true]);
    assert!(session_number(&bob).unwrap() > before);
    assert_talking(&mut restarted, &mut bob);
}

#[test]
fn rejected_presentation_stops_the_handshake() {
    let mut alice = Peer::new("alice", 2);
    let mut bob = Peer::new("bob", 1);
    bob.trust = false;

    let introduction = alice.ctx.introduce(&alice.identity);
    let exchanged = pump(&mut alice, &mut bob, vec![introduction]);

    assert_eq!(exchanged, 1);
    assert_eq!(bob.presentations, vec![true]);
    assert!(bob.ctx.trusted_peer().is_none());
    assert!(bob.established.is_empty());
}

#[test]
fn colliding_session_requests_agree_on_one_session() {
    let (mut alice, mut bob) = trusting_pair();
    let from_alice = wire(&alice.ctx.begin_session(&alice.identity, &SystemEnv).unwrap());
    let from_bob = wire(&bob.ctx.begin_session(&bob.identity, &SystemEnv).unwrap());

    // Requests cross on the wire.
    let bob_replies = bob.receive(&from_alice).unwrap();
    let alice_replies = alice.receive(&from_bob).unwrap();

    // Exactly one side yields and answers.
    assert_eq!(bob_replies.len() + alice_replies.len(), 1);
    for reply in bob_replies {
        alice.receive(&wire(&reply)).unwrap();
    }
    for reply in alice_replies {
        bob.receive(&wire(&reply)).unwrap();
    }

    assert_eq!(alice.established.len(), 1);
    assert_eq!(alice.established, bob.established);

    let datagram = wire(&alice.ctx.seal_data(b"after collision").unwrap());
    bob.receive(&datagram).unwrap();
    assert_eq!(bob.delivered, vec![b"after collision".to_vec()]);
}

#[test]
fn renewal_moves_to_higher_session_number() {
    let (mut alice, mut bob) = connected_pair();
    let first = alice.established[0];

    let renewal = alice.ctx.begin_session(&alice.identity, &SystemEnv).unwrap();
    pump(&mut alice, &mut bob, vec![renewal]);

    assert_eq!(alice.established.len(), 2);
    assert!(alice.established[1] > first);
    assert_eq!(alice.established, bob.established);

    let datagram = wire(&alice.ctx.seal_data(b"renewed").unwrap());
    bob.receive(&datagram).unwrap();
    assert_eq!(bob.delivered, vec![b"renewed".to_vec()]);
}

#[test]
fn truncated_datagram_is_malformed() {
    let mut bob = Peer::new("bob", 1);
    let result = bob.receive(&[0x70, 0x00]);
    assert!(matches!(
        result,
        Err(ChannelError::MalformedMessage(ProtocolError::MessageTooShort { .. }))
    ));
}
