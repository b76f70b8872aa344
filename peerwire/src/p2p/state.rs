use std::time::Instant;

// Ordered, a session only ever moves forward.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum ConnState {
    Handshaking,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionState {

    pub conn_state: ConnState,

    // Whether the peer is answering our requests.
    pub peer_choking: bool,

    // Number of pieces the peer has announced.
    pub peer_pieces: usize,

    // Bytes received and written to disk.
    pub downloaded: u64,

    // When the handshake completed, None if it never did.
    pub active_since: Option<Instant>,

}

impl Default for SessionState {
    fn default() -> SessionState {
        SessionState {
            conn_state: ConnState::Handshaking,
            peer_choking: true,
            peer_pieces: 0,
            downloaded: 0,
            active_since: None,
        }
    }
}

impl SessionState {

    // Moves to a later connection state, going backwards is ignored.
    pub fn transition(&mut self, next: ConnState) -> bool {
        if next <= self.conn_state {
            tracing::warn!("ignoring transition from {:?} to {:?}", self.conn_state, next);
            return false;
        }
        tracing::debug!("{:?} -> {:?}", self.conn_state, next);
        if next == ConnState::Active {
            self.active_since = Some(Instant::now());
        }
        self.conn_state = next;
        true
    }

    #[inline(always)]
    pub fn update(&mut self, f: impl FnOnce(&mut SessionState)) {
        f(self);
    }
}
