//! Randomized user actions

use rand::rngs::StdRng;
use rand::{Rng, RngCore};

use super::{chance, SimulatorConfig, SIM_MESSAGE_TYPE};
use crate::id::Id;
use crate::mux::{Mux, NullSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SimUser {
    pub session_id: Id,
    pub channel_id: Id,
}

/// Drives connect/disconnect/subscription traffic for simulated users
#[derive(Default)]
pub(crate) struct UserDriver {
    pub connected: Vec<SimUser>,
    pub disconnected: Vec<SimUser>,
}

impl UserDriver {
    pub(crate) fn step(&mut self, mux: &Mux, rng: &mut StdRng, config: &SimulatorConfig) {
        if self.connected.len() < config.max_users && chance(rng, config.connect_probability) {
            self.connect(mux, rng);
        }

        if chance(rng, config.disconnect_probability) {
            if chance(rng, config.invalid_disconnect_probability) {
                self.disconnect_gone(mux, rng);
            } else {
                self.disconnect(mux, rng);
            }
        }

        if chance(rng, config.subscribe_probability) {
            self.send_control(mux, rng, "subscribe");
        }

        if chance(rng, config.unsubscribe_probability) {
            self.send_control(mux, rng, "unsubscribe");
        }
    }

    fn connect(&mut self, mux: &Mux, rng: &mut StdRng) {
        // Sometimes open a second channel in an existing session to
        // exercise the refcounting paths.
        let session_id = match self.pick(rng, true) {
            Some(user) if rng.gen_range(0..100) < 25 => user.session_id,
            _ => random_id(rng),
        };

        let channel_id = mux.connect(session_id, Box::new(NullSink));
        self.connected.push(SimUser {
            session_id,
            channel_id,
        });
        tracing::debug!(session = %session_id, channel = %channel_id, "sim user connected");
    }

    fn disconnect(&mut self, mux: &Mux, rng: &mut StdRng) {
        if self.connected.is_empty() {
            tracing::debug!("no sim users to disconnect");
            return;
        }

        let index = rng.gen_range(0..self.connected.len());
        let user = self.connected.swap_remove(index);
        mux.disconnect(user.session_id, user.channel_id);
        self.disconnected.push(user);
        tracing::debug!(
            session = %user.session_id,
            channel = %user.channel_id,
            "sim user disconnected"
        );
    }

    // A known transport fault: disconnect arriving for a user that is
    // already gone. Must stay a no-op.
    fn disconnect_gone(&mut self, mux: &Mux, rng: &mut StdRng) {
        let user = match self.pick(rng, false) {
            Some(user) => user,
            None => return,
        };
        mux.disconnect(user.session_id, user.channel_id);
    }

    fn send_control(&mut self, mux: &Mux, rng: &mut StdRng, action: &str) {
        let user = match self.pick(rng, true) {
            Some(user) => user,
            None => return,
        };
        let data = format!(
            r#"{{"type":"mux:{action}","payload":{{"MessageType":"{SIM_MESSAGE_TYPE}"}}}}"#
        );
        if let Err(err) = mux.message(user.session_id, user.channel_id, data.as_bytes()) {
            // Unreachable under the driver's bookkeeping; a failure here is
            // a simulator bug worth surfacing loudly.
            panic!("control message for live user failed: {err}");
        }
    }

    fn pick(&self, rng: &mut StdRng, connected: bool) -> Option<SimUser> {
        let pool = if connected {
            &self.connected
        } else {
            &self.disconnected
        };
        if pool.is_empty() {
            return None;
        }
        Some(pool[rng.gen_range(0..pool.len())])
    }
}

pub(crate) fn random_id(rng: &mut StdRng) -> Id {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    Id::from_bytes(bytes)
}
