//! Production [`gateway_core::Environment`]: the system clock and OS RNG.

use std::time::{Duration, Instant};

use gateway_core::Environment;

/// The [`Environment`] used by every connection in the production binary.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        // OS RNG failure is unrecoverable; there is no meaningful fallback
        // for connection-id / session-id generation.
        getrandom::fill(buffer).expect("OS RNG unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_advances() {
        let env = SystemEnv;
        let first = env.now();
        std::thread::sleep(Duration::from_millis(5));
        let second = env.now();
        assert!(second > first);
    }

    #[test]
    fn random_bytes_fills_buffer() {
        let env = SystemEnv;
        let mut buf = [0u8; 32];
        env.random_bytes(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[tokio::test]
    async fn sleep_resolves() {
        let env = SystemEnv;
        env.sleep(Duration::from_millis(1)).await;
    }
}
