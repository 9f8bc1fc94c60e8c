//! Deterministic random-action simulator
//!
//! Drives a mux with randomized connect/disconnect/subscribe/unsubscribe/
//! broadcast sequences, including known transport faults (disconnects for
//! users that are already gone). Two seeds fully determine a run, so any
//! failure reproduces from its seed pair. Used both as a property test and
//! as the `simulate` binary.

mod user;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mux::{Channel, Handler, Mux};
use user::UserDriver;

pub(crate) const SIM_MESSAGE_TYPE: &str = "sim";

/// Per-step action probabilities, in percent
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Steps to run
    pub iterations: u32,
    /// Chance a new user connects
    pub connect_probability: u32,
    /// Chance an existing user disconnects
    pub disconnect_probability: u32,
    /// Chance a disconnect targets an already-disconnected user
    pub invalid_disconnect_probability: u32,
    /// Chance a user subscribes to the simulated type
    pub subscribe_probability: u32,
    /// Chance a user unsubscribes from it
    pub unsubscribe_probability: u32,
    /// Chance of a broadcast on the simulated type
    pub broadcast_probability: u32,
    /// Population cap; connects are skipped while at the cap
    pub max_users: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            connect_probability: 80,
            disconnect_probability: 20,
            invalid_disconnect_probability: 30,
            subscribe_probability: 40,
            unsubscribe_probability: 10,
            broadcast_probability: 25,
            max_users: 256,
        }
    }
}

pub(crate) fn chance(rng: &mut StdRng, probability: u32) -> bool {
    rng.gen_range(0..100) < probability
}

fn seed_bytes(seed1: u64, seed2: u64) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&seed1.to_le_bytes());
    seed[8..16].copy_from_slice(&seed2.to_le_bytes());
    seed
}

/// Random-action driver over a fresh mux
pub struct Simulator {
    seed1: u64,
    seed2: u64,
    rng: StdRng,
    config: SimulatorConfig,
    mux: Arc<Mux>,
    users: UserDriver,
}

impl Simulator {
    /// Create a simulator fully determined by the two seeds
    pub fn new(seed1: u64, seed2: u64, config: SimulatorConfig) -> Self {
        let mux = Arc::new(Mux::new());
        mux.register_handler(
            SIM_MESSAGE_TYPE,
            Arc::new(|_: &Arc<Channel>, _: &[u8]| Ok(())) as Arc<dyn Handler>,
        );

        Self {
            seed1,
            seed2,
            rng: StdRng::from_seed(seed_bytes(seed1, seed2)),
            config,
            mux,
            users: UserDriver::default(),
        }
    }

    /// The mux under test
    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    /// Run the configured number of steps
    pub fn run(&mut self) {
        tracing::info!(seed1 = self.seed1, seed2 = self.seed2, "simulator started");
        for _ in 0..self.config.iterations {
            self.step();
        }
        tracing::info!(
            seed1 = self.seed1,
            seed2 = self.seed2,
            connected = self.users.connected.len(),
            disconnected = self.users.disconnected.len(),
            "simulator finished"
        );
    }

    /// Run one randomized step
    pub fn step(&mut self) {
        self.users.step(&self.mux, &mut self.rng, &self.config);

        if chance(&mut self.rng, self.config.broadcast_probability) {
            self.mux
                .broadcast(SIM_MESSAGE_TYPE, b"{}", None)
                .expect("broadcast of static payload");
        }
    }

    /// Assert the mux's structural invariants against the tracked users
    ///
    /// Panics on violation; run after [`Simulator::run`].
    pub fn verify(&self) {
        // No empty sessions survive in the session table.
        for session in self.mux.sessions() {
            assert!(
                !session.channels().is_empty(),
                "session {} has no channels",
                session.id()
            );
        }

        // Connected users resolve through both the channel table and their
        // session; disconnected users through neither.
        for user in &self.users.connected {
            let channel = self
                .mux
                .channel(user.channel_id)
                .unwrap_or_else(|| panic!("channel {} missing from table", user.channel_id));
            let session = self
                .mux
                .session(user.session_id)
                .unwrap_or_else(|| panic!("session {} missing from table", user.session_id));
            assert!(session.channel(user.channel_id).is_some());
            assert!(channel.is_live());
        }
        for user in &self.users.disconnected {
            assert!(
                self.mux.channel(user.channel_id).is_none(),
                "disconnected channel {} still in table",
                user.channel_id
            );
        }

        // Index and per-channel subscription sets agree, with no duplicate
        // index entries and no stale channels.
        let bucket = self.mux.subscribed_channels(SIM_MESSAGE_TYPE);
        for (i, channel) in bucket.iter().enumerate() {
            assert!(channel.is_subscribed(SIM_MESSAGE_TYPE));
            assert!(self.mux.channel(channel.id()).is_some());
            assert!(
                !bucket[..i].iter().any(|c| c.id() == channel.id()),
                "channel {} appears twice in the index",
                channel.id()
            );
        }
        for user in &self.users.connected {
            let channel = self.mux.channel(user.channel_id).expect("checked above");
            let in_bucket = bucket.iter().any(|c| c.id() == channel.id());
            assert_eq!(channel.is_subscribed(SIM_MESSAGE_TYPE), in_bucket);
        }
    }
}
