use std::time::Duration;
use rand::Rng;
use crate::ID;

#[derive(Debug, Clone)]
pub struct Config {

    pub client_id: ID,

    // Time allowed for the outbound TCP connect.
    pub connect_timeout: Duration,

    // Time allowed for the peer's handshake to arrive.
    pub handshake_timeout: Duration,

    // A read that times out is not an error, the session loop just continues.
    pub read_timeout: Duration,

    // Send a keep alive if nothing has been written for this long.
    pub keep_alive_interval: Duration,

    // Size of each socket read.
    pub read_buf_len: usize,

    // Frames with a longer length prefix are rejected.
    pub max_frame_len: usize,

}

const CLIENT_PREFIX: &[u8; 8] = b"-PW0100-";

// Azureus style id, client prefix followed by random digits.
pub fn generate_peer_id() -> ID {
    let mut rng = rand::thread_rng();
    let mut id = [0; 20];
    id[..8].copy_from_slice(CLIENT_PREFIX);
    for b in id[8..].iter_mut() {
        *b = rng.gen_range(b'0'..=b'9');
    }
    id
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: generate_peer_id(),
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(120),
            read_buf_len: 4096,
            max_frame_len: 1 << 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_peer_id() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], CLIENT_PREFIX);
        assert!(id[8..].iter().all(u8::is_ascii_digit));
    }
}
