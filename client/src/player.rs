use std::time::Instant;

use parking_lot::Mutex;

/// Transport surface of whatever actually renders the media. The real
/// rendering pipeline (an HLS-capable player) lives outside this crate;
/// reconciliation only ever drives it through this trait.
pub trait Player {
    /// Switch to a new video reference, paused at the start.
    fn load(&self, video: &str);
    fn play(&self);
    fn pause(&self);
    fn seek(&self, seconds: f64);
    /// Current position in seconds.
    fn position(&self) -> f64;
    fn is_paused(&self) -> bool;
}

/// A player that merely keeps time: while "playing" its position advances
/// with the monotonic clock. Stands in for a media pipeline in the
/// headless seat and in tests.
pub struct VirtualPlayer {
    inner: Mutex<Transport>,
}

struct Transport {
    video: Option<String>,
    anchor: Instant,
    at_anchor: f64,
    playing: bool,
}

impl VirtualPlayer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Transport {
                video: None,
                anchor: Instant::now(),
                at_anchor: 0.0,
                playing: false,
            }),
        }
    }

    pub fn video(&self) -> Option<String> {
        self.inner.lock().video.clone()
    }
}

impl Default for VirtualPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    fn current_position(&self) -> f64 {
        if self.playing {
            self.at_anchor + self.anchor.elapsed().as_secs_f64()
        } else {
            self.at_anchor
        }
    }

    // Fold elapsed time into the stored position before changing the
    // transport, so position never jumps on a play/pause edge.
    fn re_anchor(&mut self) {
        self.at_anchor = self.current_position();
        self.anchor = Instant::now();
    }
}

impl Player for VirtualPlayer {
    fn load(&self, video: &str) {
        let mut transport = self.inner.lock();
        transport.video = Some(video.to_string());
        transport.at_anchor = 0.0;
        transport.anchor = Instant::now();
        transport.playing = false;
    }

    fn play(&self) {
        let mut transport = self.inner.lock();
        transport.re_anchor();
        transport.playing = true;
    }

    fn pause(&self) {
        let mut transport = self.inner.lock();
        transport.re_anchor();
        transport.playing = false;
    }

    fn seek(&self, seconds: f64) {
        let mut transport = self.inner.lock();
        transport.at_anchor = seconds.max(0.0);
        transport.anchor = Instant::now();
    }

    fn position(&self) -> f64 {
        self.inner.lock().current_position()
    }

    fn is_paused(&self) -> bool {
        !self.inner.lock().playing
    }
}
