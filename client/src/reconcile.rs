use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::player::Player;
use crate::protocol::PlaybackState;

/// Drift beyond which the local player is snapped to the projected
/// position. At or below it, ordinary network jitter is left alone so the
/// player is not perpetually micro-seeking.
pub const DRIFT_TOLERANCE_SECS: f64 = 1.0;

/// How long player activity keeps being attributed to a remote correction
/// after one is applied. Time-based rather than tied to event completion,
/// since player event delivery timing is not guaranteed.
pub const REMOTE_GRACE: Duration = Duration::from_millis(50);

/// Where the room's timeline says playback is *right now*, extrapolating
/// from the snapshot's timestamp when the transport is running.
pub fn projected_position(state: &PlaybackState, now_ms: u64) -> f64 {
    if state.playing {
        state.time + now_ms.saturating_sub(state.updated_at) as f64 / 1000.0
    } else {
        state.time
    }
}

/// Transport adjustments derived from one authoritative snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Correction {
    pub seek_to: Option<f64>,
    pub set_playing: Option<bool>,
}

impl Correction {
    pub fn is_noop(&self) -> bool {
        self.seek_to.is_none() && self.set_playing.is_none()
    }
}

/// Pure decision step: what should the player do, given the authoritative
/// snapshot and what the local transport is currently doing.
pub fn plan_transport(
    state: &PlaybackState,
    now_ms: u64,
    local_position: f64,
    local_paused: bool,
) -> Correction {
    let mut correction = Correction::default();
    let projected = projected_position(state, now_ms);
    if (local_position - projected).abs() > DRIFT_TOLERANCE_SECS {
        correction.seek_to = Some(projected);
    }
    if state.playing && local_paused {
        correction.set_playing = Some(true);
    } else if !state.playing && !local_paused {
        correction.set_playing = Some(false);
    }
    correction
}

/// Marks a window during which locally observed player activity must not
/// be re-sent to the server as host intent, breaking the feedback loop a
/// correction would otherwise cause on a host's own seat.
pub struct RemoteGuard {
    until: Mutex<Option<Instant>>,
}

impl RemoteGuard {
    pub fn new() -> Self {
        Self {
            until: Mutex::new(None),
        }
    }

    pub fn hold(&self, window: Duration) {
        *self.until.lock() = Some(Instant::now() + window);
    }

    pub fn is_active(&self) -> bool {
        self.until
            .lock()
            .is_some_and(|until| Instant::now() < until)
    }
}

impl Default for RemoteGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-seat reconciliation: tracks which video the seat last saw and owns
/// the applying-remote guard.
pub struct Reconciler {
    last_video: Mutex<Option<String>>,
    guard: RemoteGuard,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            last_video: Mutex::new(None),
            guard: RemoteGuard::new(),
        }
    }

    /// Drive the player toward the snapshot. Loads the video if it
    /// changed (or `force_load`, for the admission snapshot), then seeks
    /// and corrects the transport, all under the applying-remote guard.
    pub fn apply(
        &self,
        state: &PlaybackState,
        now_ms: u64,
        player: &dyn Player,
        force_load: bool,
    ) -> Correction {
        self.guard.hold(REMOTE_GRACE);

        let mut loaded = false;
        {
            let mut last = self.last_video.lock();
            let changed = state.video != *last;
            last.clone_from(&state.video);
            if let Some(video) = &state.video {
                if changed || force_load {
                    player.load(video);
                    loaded = true;
                }
            }
        }

        // A fresh load starts paused at zero; judge drift against that,
        // not against wherever the previous video was.
        let (local_position, local_paused) = if loaded {
            (0.0, true)
        } else {
            (player.position(), player.is_paused())
        };
        let correction = plan_transport(state, now_ms, local_position, local_paused);
        if let Some(target) = correction.seek_to {
            player.seek(target);
        }
        match correction.set_playing {
            Some(true) => player.play(),
            Some(false) => player.pause(),
            None => {}
        }
        correction
    }

    /// True while player activity should be swallowed instead of echoed
    /// to the server.
    pub fn applying_remote(&self) -> bool {
        self.guard.is_active()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::VirtualPlayer;

    fn state(video: Option<&str>, playing: bool, time: f64, updated_at: u64) -> PlaybackState {
        PlaybackState {
            video: video.map(str::to_string),
            playing,
            time,
            updated_at,
        }
    }

    #[test]
    fn projection_extrapolates_while_playing() {
        let snap = state(None, true, 8.0, 1_000_000);
        let projected = projected_position(&snap, 1_003_000);
        assert!((projected - 11.0).abs() < 1e-9);
    }

    #[test]
    fn projection_is_frozen_while_paused() {
        let snap = state(None, false, 8.0, 1_000_000);
        assert_eq!(projected_position(&snap, 1_003_000), 8.0);
    }

    #[test]
    fn projection_tolerates_a_snapshot_from_the_future() {
        // Clock skew: the server stamp is ahead of the local clock.
        let snap = state(None, true, 8.0, 1_005_000);
        assert_eq!(projected_position(&snap, 1_003_000), 8.0);
    }

    #[test]
    fn drift_at_the_tolerance_boundary_does_not_seek() {
        // Local 10.0 vs projected 11.0: exactly 1.0s apart, left alone.
        let snap = state(None, true, 8.0, 1_000_000);
        let correction = plan_transport(&snap, 1_003_000, 10.0, false);
        assert_eq!(correction.seek_to, None);
        assert_eq!(correction.set_playing, None);
    }

    #[test]
    fn drift_above_the_tolerance_seeks_to_projected() {
        // Projected 11.2 vs local 10.0: 1.2s apart, snap forward.
        let snap = state(None, true, 8.2, 1_000_000);
        let correction = plan_transport(&snap, 1_003_000, 10.0, false);
        let target = correction.seek_to.expect("a seek must fire");
        assert!((target - 11.2).abs() < 1e-9);
    }

    #[test]
    fn transport_follows_the_snapshot() {
        let running = state(None, true, 5.0, 1_000);
        assert_eq!(plan_transport(&running, 1_000, 5.0, true).set_playing, Some(true));
        let stopped = state(None, false, 5.0, 1_000);
        assert_eq!(plan_transport(&stopped, 1_000, 5.0, false).set_playing, Some(false));
        // Agreement means no correction.
        assert_eq!(plan_transport(&running, 1_000, 5.0, false).set_playing, None);
    }

    #[test]
    fn guard_expires_after_the_grace_window() {
        let guard = RemoteGuard::new();
        assert!(!guard.is_active());
        guard.hold(Duration::from_millis(50));
        assert!(guard.is_active());
        std::thread::sleep(Duration::from_millis(70));
        assert!(!guard.is_active());
    }

    #[test]
    fn apply_loads_on_video_change_only() {
        let reconciler = Reconciler::new();
        let player = VirtualPlayer::new();

        let first = state(Some("/videos/a/playlist.m3u8"), false, 0.0, 1_000);
        reconciler.apply(&first, 1_000, &player, false);
        assert_eq!(player.video().as_deref(), Some("/videos/a/playlist.m3u8"));

        // Same video again: no reload, position preserved.
        player.seek(42.0);
        let again = state(Some("/videos/a/playlist.m3u8"), false, 42.0, 2_000);
        reconciler.apply(&again, 2_000, &player, false);
        assert_eq!(player.position(), 42.0);

        let switched = state(Some("/videos/b/playlist.m3u8"), false, 0.0, 3_000);
        reconciler.apply(&switched, 3_000, &player, false);
        assert_eq!(player.video().as_deref(), Some("/videos/b/playlist.m3u8"));
        assert_eq!(player.position(), 0.0);
    }

    #[test]
    fn apply_drives_a_stale_player_onto_the_timeline() {
        let reconciler = Reconciler::new();
        let player = VirtualPlayer::new();

        let snap = state(Some("/videos/a/playlist.m3u8"), true, 100.0, 1_000_000);
        let correction = reconciler.apply(&snap, 1_002_000, &player, false);

        // Fresh load sits at 0, so both a seek and a play must fire.
        assert!((correction.seek_to.unwrap() - 102.0).abs() < 1e-9);
        assert_eq!(correction.set_playing, Some(true));
        assert!(!player.is_paused());
        assert!(player.position() >= 102.0);
        assert!(reconciler.applying_remote());
    }

    #[test]
    fn apply_holds_the_guard_even_for_noops() {
        let reconciler = Reconciler::new();
        let player = VirtualPlayer::new();
        let snap = state(None, false, 0.0, 1_000);
        let correction = reconciler.apply(&snap, 1_000, &player, false);
        assert!(correction.is_noop());
        assert!(reconciler.applying_remote());
    }
}
