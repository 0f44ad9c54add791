//! Engine tests over real UDP sockets on the loopback interface.

use std::{net::SocketAddr, time::Duration};

use sealink_core::{
    ChannelError, Engine, EngineConfig, Handler, HandshakeState, IdentityStore, NoopHandler,
    RetryPolicy, SystemEnv,
};
use sealink_proto::{Certificate, Message};
use tokio::{
    net::UdpSocket,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

type UdpEngine = Engine<UdpSocket, SystemEnv>;

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Presented { is_new: bool },
    Established(u32),
    Data(Vec<u8>),
}

struct Recorder {
    events: UnboundedSender<(SocketAddr, Event)>,
}

impl Handler for Recorder {
    fn on_presentation_received(
        &self,
        sender: SocketAddr,
        _signature_certificate: &Certificate,
        _encryption_certificate: &Certificate,
        is_new: bool,
    ) -> bool {
        let _ = self.events.send((sender, Event::Presented { is_new }));
        true
    }

    fn on_session_established(&self, sender: SocketAddr, session_number: u32) {
        let _ = self.events.send((sender, Event::Established(session_number)));
    }

    fn on_data_received(&self, sender: SocketAddr, payload: &[u8]) {
        let _ = self.events.send((sender, Event::Data(payload.to_vec())));
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        workers: 2,
        hello_timeout: Duration::from_millis(100),
        hello_attempts: 2,
        retry_policy: RetryPolicy::Fixed,
        ..EngineConfig::default()
    }
}

async fn spawn_node(name: &str) -> (UdpEngine, UnboundedReceiver<(SocketAddr, Event)>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (events, rx) = mpsc::unbounded_channel();
    let engine = Engine::spawn(
        IdentityStore::generate(name).unwrap(),
        socket,
        SystemEnv,
        fast_config(),
        Recorder { events },
    );
    (engine, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<(SocketAddr, Event)>) -> (SocketAddr, Event) {
    timeout(Duration::from_secs(5), rx.recv()).await.expect("timed out waiting").expect("closed")
}

async fn wait_for_session(rx: &mut UnboundedReceiver<(SocketAddr, Event)>) -> (SocketAddr, u32) {
    loop {
        if let (sender, Event::Established(number)) = next_event(rx).await {
            return (sender, number);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn greet_then_data_over_loopback() {
    let (alice, mut alice_events) = spawn_node("alice").await;
    let (bob, mut bob_events) = spawn_node("bob").await;
    let alice_addr = alice.local_addr().unwrap();
    let bob_addr = bob.local_addr().unwrap();

    alice.greet(bob_addr).await.unwrap();

    let (peer_of_alice, alice_session) = wait_for_session(&mut alice_events).await;
    let (peer_of_bob, bob_session) = wait_for_session(&mut bob_events).await;
    assert_eq!(peer_of_alice, bob_addr);
    assert_eq!(peer_of_bob, alice_addr);
    assert_eq!(alice_session, bob_session);
    assert_eq!(alice.state(bob_addr), HandshakeState::SessionEstablished);
    assert_eq!(alice.session_number(bob_addr), Some(alice_session));

    alice.send_data(bob_addr, b"hello").await.unwrap();
    assert_eq!(next_event(&mut bob_events).await, (alice_addr, Event::Data(b"hello".to_vec())));

    bob.send_data(alice_addr, b"hi").await.unwrap();
    assert_eq!(next_event(&mut alice_events).await, (bob_addr, Event::Data(b"hi".to_vec())));

    alice.close();
    bob.close();
    alice.join().await;
    bob.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn greet_silent_peer_times_out() {
    let (alice, _events) = spawn_node("alice").await;
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let err = alice.greet(silent_addr).await.unwrap_err();

    let ChannelError::Timeout { elapsed } = err else {
        panic!("expected timeout, got {err:?}");
    };
    assert!(elapsed >= Duration::from_millis(200));
    assert_eq!(alice.state(silent_addr), HandshakeState::Unknown);

    alice.close();
    alice.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_hello_times_out() {
    let (alice, _events) = spawn_node("alice").await;
    let config = EngineConfig { accept_hello_by_default: false, ..fast_config() };
    let bob = Engine::spawn(
        IdentityStore::generate("bob").unwrap(),
        UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        SystemEnv,
        config,
        NoopHandler,
    );

    let result = alice.greet(bob.local_addr().unwrap()).await;
    assert!(matches!(result, Err(ChannelError::Timeout { .. })));

    alice.close();
    bob.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn untrusting_peer_never_establishes_session() {
    let (alice, mut alice_events) = spawn_node("alice").await;
    let bob = Engine::spawn(
        IdentityStore::generate("bob").unwrap(),
        UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        SystemEnv,
        fast_config(),
        NoopHandler,
    );
    let bob_addr = bob.local_addr().unwrap();

    alice.greet(bob_addr).await.unwrap();
    let quiet = timeout(Duration::from_millis(300), alice_events.recv()).await;

    assert!(quiet.is_err(), "unexpected event {quiet:?}");
    let err = alice.send_data(bob_addr, b"secret").await.unwrap_err();
    assert!(matches!(err, ChannelError::NoSession));

    alice.close();
    bob.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_fails_pending_greet() {
    let (alice, _events) = spawn_node("alice").await;
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let greeter = alice.clone();
    let greet = tokio::spawn(async move { greeter.greet(silent_addr).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    alice.close();
    alice.close();

    let result = greet.await.unwrap();
    assert!(matches!(result, Err(ChannelError::Closed)));
    assert!(alice.is_closed());
    alice.join().await;

    assert!(matches!(alice.greet(silent_addr).await, Err(ChannelError::Closed)));
    assert!(matches!(alice.send_data(silent_addr, b"x").await, Err(ChannelError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forget_drops_session() {
    let (alice, mut alice_events) = spawn_node("alice").await;
    let (bob, _bob_events) = spawn_node("bob").await;
    let bob_addr = bob.local_addr().unwrap();

    alice.greet(bob_addr).await.unwrap();
    wait_for_session(&mut alice_events).await;

    assert!(alice.forget(bob_addr));
    assert!(!alice.forget(bob_addr));
    assert_eq!(alice.state(bob_addr), HandshakeState::Unknown);
    assert!(matches!(alice.send_data(bob_addr, b"x").await, Err(ChannelError::NoSession)));

    alice.close();
    bob.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_presentations_are_new_once_across_workers() {
    const COPIES: usize = 16;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (events, mut bob_events) = mpsc::unbounded_channel();
    let bob = Engine::spawn(
        IdentityStore::generate("bob").unwrap(),
        socket,
        SystemEnv,
        EngineConfig { workers: 8, ..fast_config() },
        Recorder { events },
    );
    let bob_addr = bob.local_addr().unwrap();

    let injector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mallory = IdentityStore::generate("mallory").unwrap();
    let datagram = Message::Presentation(mallory.presentation()).to_bytes().unwrap();
    for _ in 0..COPIES {
        injector.send_to(&datagram, bob_addr).await.unwrap();
    }

    let mut flags = Vec::new();
    while flags.len() < COPIES {
        if let (_, Event::Presented { is_new }) = next_event(&mut bob_events).await {
            flags.push(is_new);
        }
    }
    assert_eq!(flags.iter().filter(|is_new| **is_new).count(), 1);

    bob.close();
    bob.join().await;
}
