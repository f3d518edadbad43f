//! Playback clock reconciler.
//!
//! Keeps the local play head close to the server's without fighting the
//! user. The server periodically asserts where playback should be; the
//! reconciler only snaps the local clock to it when the two have drifted
//! apart by more than a threshold. While the admin drags a seek bar, and for
//! a short guard window after releasing it, server position updates are
//! ignored so the server's echo of an older position cannot yank the play
//! head back.
//!
//! ```text
//!          load                begin_local_seek
//!   Idle ───────▶ Loaded ─────────────────────────▶ Seeking
//!                   ▲                                  │
//!                   └──────── commit_local_seek ───────┘
//!                             (guard window starts)
//! ```
//!
//! The reconciler is sans-IO: every method takes the current [`Instant`] and
//! returns the [`PlayerCommand`]s to forward to the media component.

use tokio::time::Instant;
use tracing::debug;

use crate::config::SyncConfig;
use crate::event::PlayerCommand;
use crate::protocol::{ServerMessage, SongPayload, StreamId};

/// Reconciler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    /// No track loaded.
    Idle,
    /// A track is loaded, playing or paused.
    Loaded,
    /// The local user is dragging the seek bar.
    Seeking,
}

/// A local seek that has not settled yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSeek {
    /// Latest requested position in seconds.
    pub target_secs: f64,
    /// When the gesture started.
    pub issued_at: Instant,
    /// End of the echo guard. `None` while the gesture is still in progress.
    pub guard_until: Option<Instant>,
}

/// Point-in-time view of the local playback clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub state: ReconcilerState,
    pub track_id: Option<StreamId>,
    pub position_secs: f64,
    pub is_playing: bool,
    /// Server wall clock (Unix ms) of the last accepted heartbeat.
    pub last_server_timestamp: Option<u64>,
    pub pending_seek: Option<PendingSeek>,
    pub media_ready: bool,
}

/// Playback clock reconciler. See the [module docs](self).
#[derive(Debug, Clone)]
pub struct Reconciler {
    drift_threshold_secs: f64,
    echo_tolerance_secs: f64,
    guard: std::time::Duration,

    state: ReconcilerState,
    track_id: Option<StreamId>,
    // Position is `anchor_secs` at `anchor_at`, advancing with wall time
    // while playing.
    anchor_secs: f64,
    anchor_at: Instant,
    playing: bool,
    pending: Option<PendingSeek>,
    media_ready: bool,
    last_server_timestamp: Option<u64>,
}

impl Reconciler {
    /// Create an idle reconciler.
    pub fn new(config: &SyncConfig, now: Instant) -> Self {
        Self {
            drift_threshold_secs: config.drift_threshold_secs,
            echo_tolerance_secs: config.seek_echo_tolerance_secs,
            guard: config.seek_echo_guard,
            state: ReconcilerState::Idle,
            track_id: None,
            anchor_secs: 0.0,
            anchor_at: now,
            playing: false,
            pending: None,
            media_ready: false,
            last_server_timestamp: None,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn pending_seek(&self) -> Option<&PendingSeek> {
        self.pending.as_ref()
    }

    /// Local play head at `now`, in seconds.
    pub fn position(&self, now: Instant) -> f64 {
        if self.playing {
            self.anchor_secs + now.saturating_duration_since(self.anchor_at).as_secs_f64()
        } else {
            self.anchor_secs
        }
    }

    /// Returns `true` while server position updates are being ignored.
    pub fn is_guarded(&self, now: Instant) -> bool {
        match (&self.pending, self.state) {
            (Some(_), ReconcilerState::Seeking) => true,
            (Some(pending), _) => pending.guard_until.is_some_and(|until| now < until),
            (None, _) => false,
        }
    }

    pub fn snapshot(&self, now: Instant) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state,
            track_id: self.track_id.clone(),
            position_secs: self.position(now),
            is_playing: self.playing,
            last_server_timestamp: self.last_server_timestamp,
            pending_seek: self.pending,
            media_ready: self.media_ready,
        }
    }

    // ── Server-driven transitions ───────────────────────────────────

    /// Load `song` at `start_secs`, or re-check it if it is already loaded.
    ///
    /// Re-announcing the track that is already playing never restarts it; a
    /// position in the announcement only goes through the drift check.
    pub fn load(
        &mut self,
        song: &SongPayload,
        start_secs: Option<f64>,
        play: bool,
        now: Instant,
    ) -> Vec<PlayerCommand> {
        if self.track_id.as_deref() == Some(song.id.as_str()) {
            if self.playing {
                return match start_secs {
                    Some(position) => self.apply_remote_sync(position, play, now),
                    None => Vec::new(),
                };
            }
            // Same track, paused locally: adopt the server state.
            let mut commands = Vec::new();
            if let Some(position) = start_secs.filter(|_| !self.is_guarded(now)) {
                self.set_anchor(sanitize(position), now);
                self.push_media(&mut commands, PlayerCommand::SeekTo(self.anchor_secs));
            }
            self.set_playing(play, now, &mut commands);
            return commands;
        }

        let position = start_secs.map(sanitize).unwrap_or(0.0);
        debug!(track_id = %song.id, position, play, "loading track");
        self.state = ReconcilerState::Loaded;
        self.track_id = Some(song.id.clone());
        self.pending = None;
        self.media_ready = false;
        self.playing = play;
        self.set_anchor(position, now);
        vec![PlayerCommand::Load {
            song: song.clone(),
            position,
            play,
        }]
    }

    /// Server heartbeat: correct the clock only if it drifted past the threshold.
    pub fn apply_remote_sync(
        &mut self,
        server_secs: f64,
        server_playing: bool,
        now: Instant,
    ) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        if self.state == ReconcilerState::Idle {
            return commands;
        }
        if self.is_guarded(now) {
            debug!(server_secs, "ignoring server sync during local seek");
            return commands;
        }

        let server_secs = sanitize(server_secs);
        let drift = (server_secs - self.position(now)).abs();
        if drift > self.drift_threshold_secs {
            debug!(drift, server_secs, "drift over threshold; correcting");
            self.set_anchor(server_secs, now);
            self.push_media(&mut commands, PlayerCommand::SeekTo(server_secs));
        }
        self.set_playing(server_playing, now, &mut commands);
        commands
    }

    /// Server says the admin seeked.
    ///
    /// Applied immediately unless a local seek is in progress or guarded. A
    /// remote seek close to our own pending target is its echo and ends the
    /// guard early.
    pub fn apply_remote_seek(&mut self, target_secs: f64, now: Instant) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        if self.state == ReconcilerState::Idle {
            return commands;
        }
        let target_secs = sanitize(target_secs);
        if self.state == ReconcilerState::Seeking {
            debug!(target_secs, "ignoring remote seek while seeking");
            return commands;
        }
        if self.is_guarded(now) {
            if let Some(pending) = self.pending {
                if (pending.target_secs - target_secs).abs() <= self.echo_tolerance_secs {
                    debug!(target_secs, "seek echo received; guard cleared");
                    self.pending = None;
                } else {
                    debug!(target_secs, "ignoring remote seek during guard window");
                }
            }
            return commands;
        }
        self.set_anchor(target_secs, now);
        self.push_media(&mut commands, PlayerCommand::SeekTo(target_secs));
        commands
    }

    /// Server says playback paused, optionally at a position.
    pub fn apply_remote_pause(&mut self, position: Option<f64>, now: Instant) -> Vec<PlayerCommand> {
        self.apply_remote_play_state(false, position, now)
    }

    /// Server says playback resumed, optionally at a position.
    pub fn apply_remote_resume(&mut self, position: Option<f64>, now: Instant) -> Vec<PlayerCommand> {
        self.apply_remote_play_state(true, position, now)
    }

    fn apply_remote_play_state(
        &mut self,
        play: bool,
        position: Option<f64>,
        now: Instant,
    ) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        if self.state == ReconcilerState::Idle {
            return commands;
        }
        if let Some(position) = position.map(sanitize) {
            if self.is_guarded(now) {
                debug!(position, "ignoring paused/resumed position during local seek");
            } else if (position - self.position(now)).abs() > self.echo_tolerance_secs {
                self.set_anchor(position, now);
                self.push_media(&mut commands, PlayerCommand::SeekTo(position));
            }
        }
        self.set_playing(play, now, &mut commands);
        commands
    }

    /// Route a playback server message.
    ///
    /// Messages naming a different song than the loaded one are stale and
    /// dropped.
    pub fn handle(&mut self, msg: &ServerMessage, now: Instant) -> Vec<PlayerCommand> {
        match msg {
            ServerMessage::PlaybackStateUpdate {
                current_time,
                is_playing,
                song_id,
                timestamp,
            } => {
                if self.is_stale(song_id.as_deref()) {
                    return Vec::new();
                }
                if timestamp.is_some() {
                    self.last_server_timestamp = *timestamp;
                }
                self.apply_remote_sync(*current_time, *is_playing, now)
            }
            ServerMessage::PlaybackSeeked { seek_time, song_id } => {
                if self.is_stale(song_id.as_deref()) {
                    return Vec::new();
                }
                self.apply_remote_seek(*seek_time, now)
            }
            ServerMessage::PlaybackPaused {
                current_time,
                song_id,
            } => {
                if self.is_stale(song_id.as_deref()) {
                    return Vec::new();
                }
                self.apply_remote_pause(*current_time, now)
            }
            ServerMessage::PlaybackResumed {
                current_time,
                song_id,
            } => {
                if self.is_stale(song_id.as_deref()) {
                    return Vec::new();
                }
                self.apply_remote_resume(*current_time, now)
            }
            ServerMessage::CurrentSongUpdate {
                song,
                current_time,
                is_playing,
            } => match song {
                Some(song) => self.load(song, *current_time, is_playing.unwrap_or(true), now),
                None => self.unload(),
            },
            ServerMessage::RoomJoined {
                playback_state: Some(state),
                ..
            } => match &state.current_song {
                Some(song) => self.load(song, Some(state.should_start_at), state.is_playing, now),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn is_stale(&self, song_id: Option<&str>) -> bool {
        match (song_id, self.track_id.as_deref()) {
            (Some(incoming), Some(loaded)) if incoming != loaded => {
                debug!(incoming, loaded, "discarding playback event for another song");
                true
            }
            _ => false,
        }
    }

    // ── Local transitions ───────────────────────────────────────────

    /// Start a seek gesture. Returns `false` when nothing is loaded.
    pub fn begin_local_seek(&mut self, target_secs: f64, now: Instant) -> bool {
        if self.state == ReconcilerState::Idle {
            return false;
        }
        self.state = ReconcilerState::Seeking;
        self.pending = Some(PendingSeek {
            target_secs: sanitize(target_secs),
            issued_at: now,
            guard_until: None,
        });
        true
    }

    /// Move the target of the seek in progress. Latest wins.
    pub fn update_local_seek(&mut self, target_secs: f64) {
        if self.state != ReconcilerState::Seeking {
            return;
        }
        if let Some(pending) = &mut self.pending {
            pending.target_secs = sanitize(target_secs);
        }
    }

    /// Finish the gesture: jump to the latest target and start the echo guard.
    pub fn commit_local_seek(&mut self, now: Instant) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        if self.state != ReconcilerState::Seeking {
            return commands;
        }
        self.state = ReconcilerState::Loaded;
        let Some(pending) = &mut self.pending else {
            return commands;
        };
        pending.guard_until = Some(now + self.guard);
        let target = pending.target_secs;
        self.set_anchor(target, now);
        self.push_media(&mut commands, PlayerCommand::SeekTo(target));
        commands
    }

    /// Abandon a seek gesture without moving the play head.
    pub fn cancel_local_seek(&mut self) {
        if self.state == ReconcilerState::Seeking {
            self.state = ReconcilerState::Loaded;
            self.pending = None;
        }
    }

    /// The local admin toggled playback.
    pub fn set_local_playing(&mut self, play: bool, now: Instant) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        if self.state != ReconcilerState::Idle {
            self.set_playing(play, now, &mut commands);
        }
        commands
    }

    /// The media component finished loading. Re-applies position and play state.
    pub fn on_media_ready(&mut self, now: Instant) -> Vec<PlayerCommand> {
        self.media_ready = true;
        if self.state == ReconcilerState::Idle {
            return Vec::new();
        }
        let position = match (&self.pending, self.state) {
            (Some(pending), ReconcilerState::Seeking) => pending.target_secs,
            _ => self.position(now),
        };
        let play_state = if self.playing {
            PlayerCommand::Play
        } else {
            PlayerCommand::Pause
        };
        vec![PlayerCommand::SeekTo(position), play_state]
    }

    /// Back to idle, e.g. after leaving the room. Pauses the media if it was playing.
    pub fn unload(&mut self) -> Vec<PlayerCommand> {
        let was_playing = self.playing && self.state != ReconcilerState::Idle;
        self.state = ReconcilerState::Idle;
        self.track_id = None;
        self.pending = None;
        self.playing = false;
        self.anchor_secs = 0.0;
        self.last_server_timestamp = None;
        if was_playing {
            vec![PlayerCommand::Pause]
        } else {
            Vec::new()
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// Expire the echo guard.
    pub fn on_tick(&mut self, now: Instant) {
        if self.state == ReconcilerState::Seeking {
            return;
        }
        if let Some(until) = self.pending.and_then(|p| p.guard_until) {
            if now >= until {
                debug!("seek guard expired");
                self.pending = None;
            }
        }
    }

    /// When [`on_tick`](Self::on_tick) next needs to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state == ReconcilerState::Seeking {
            return None;
        }
        self.pending.and_then(|p| p.guard_until)
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn set_anchor(&mut self, position: f64, now: Instant) {
        self.anchor_secs = position;
        self.anchor_at = now;
    }

    fn set_playing(&mut self, play: bool, now: Instant, commands: &mut Vec<PlayerCommand>) {
        if self.playing == play {
            return;
        }
        // Freeze the position before flipping the flag.
        let position = self.position(now);
        self.set_anchor(position, now);
        self.playing = play;
        let command = if play {
            PlayerCommand::Play
        } else {
            PlayerCommand::Pause
        };
        self.push_media(commands, command);
    }

    /// Media commands are held back until the player is ready; the state is
    /// still updated and [`on_media_ready`](Self::on_media_ready) re-applies it.
    fn push_media(&self, commands: &mut Vec<PlayerCommand>, command: PlayerCommand) {
        if self.media_ready {
            commands.push(command);
        } else {
            debug!(?command, "media not ready; deferring");
        }
    }
}

/// Positions are never negative or non-finite.
fn sanitize(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use crate::protocol::SourceType;
    use std::time::Duration;

    fn song(id: &str) -> SongPayload {
        SongPayload {
            id: id.into(),
            title: id.into(),
            artist: None,
            url: String::new(),
            small_img: String::new(),
            big_img: String::new(),
            source_type: SourceType::YouTube,
            vote_count: 0,
            create_at: None,
            added_by_user: None,
            upvotes: Vec::new(),
            youtube_url: None,
            spotify_url: None,
        }
    }

    /// Reconciler with track `x` loaded at `position`, playing, media ready.
    fn loaded(position: f64, now: Instant) -> Reconciler {
        let mut r = Reconciler::new(&SyncConfig::new(), now);
        r.load(&song("x"), Some(position), true, now);
        r.on_media_ready(now);
        r
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn load_emits_load_command() {
        let now = Instant::now();
        let mut r = Reconciler::new(&SyncConfig::new(), now);
        let commands = r.load(&song("x"), Some(40.0), true, now);
        assert!(matches!(
            commands.as_slice(),
            [PlayerCommand::Load { position, play: true, .. }] if *position == 40.0
        ));
        assert_eq!(r.state(), ReconcilerState::Loaded);
        assert_eq!(r.track_id(), Some("x"));
    }

    #[test]
    fn position_advances_while_playing() {
        let t0 = Instant::now();
        let r = loaded(40.0, t0);
        assert!((r.position(t0 + secs(2.0)) - 42.0).abs() < 1e-6);
    }

    #[test]
    fn small_drift_is_ignored() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        let t1 = t0 + secs(2.0);
        let commands = r.apply_remote_sync(44.5, true, t1);
        assert!(commands.is_empty());
        assert!((r.position(t1) - 42.0).abs() < 1e-6);
    }

    #[test]
    fn large_drift_snaps_to_server() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        let t1 = t0 + secs(2.0);
        let commands = r.apply_remote_sync(61.0, true, t1);
        assert_eq!(commands, vec![PlayerCommand::SeekTo(61.0)]);
        assert_eq!(r.position(t1), 61.0);
    }

    #[test]
    fn join_scenario_40_42_61() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        assert!(r.apply_remote_sync(42.0, true, t0 + secs(2.0)).is_empty());
        assert_eq!(
            r.apply_remote_sync(61.0, true, t0 + secs(2.0)),
            vec![PlayerCommand::SeekTo(61.0)]
        );
    }

    #[test]
    fn seeking_blocks_server_sync_until_commit() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        assert!(r.begin_local_seek(90.0, t0));
        assert_eq!(r.state(), ReconcilerState::Seeking);

        let before = r.position(t0 + secs(1.0));
        assert!(r.apply_remote_sync(5.0, true, t0 + secs(1.0)).is_empty());
        assert!(r.apply_remote_seek(5.0, t0 + secs(1.0)).is_empty());
        assert_eq!(r.position(t0 + secs(1.0)), before);
        assert_eq!(r.next_deadline(), None);
    }

    #[test]
    fn commit_applies_latest_target_once() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        r.begin_local_seek(50.0, t0);
        r.update_local_seek(70.0);
        r.update_local_seek(80.0);

        let commands = r.commit_local_seek(t0);
        assert_eq!(commands, vec![PlayerCommand::SeekTo(80.0)]);
        assert_eq!(r.state(), ReconcilerState::Loaded);
        assert!(r.commit_local_seek(t0).is_empty());
        assert_eq!(r.next_deadline(), Some(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn guard_ignores_sync_then_expires() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        r.begin_local_seek(80.0, t0);
        r.commit_local_seek(t0);

        // Old position echoed back inside the guard window.
        assert!(r.apply_remote_sync(41.0, true, t0 + secs(0.2)).is_empty());
        assert!((r.position(t0 + secs(0.2)) - 80.2).abs() < 1e-6);

        r.on_tick(t0 + secs(0.5));
        assert!(r.pending_seek().is_none());
        assert_eq!(
            r.apply_remote_sync(10.0, true, t0 + secs(0.6)),
            vec![PlayerCommand::SeekTo(10.0)]
        );
    }

    #[test]
    fn remote_seek_echo_clears_guard() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        r.begin_local_seek(80.0, t0);
        r.commit_local_seek(t0);

        assert!(r.apply_remote_seek(80.3, t0 + secs(0.1)).is_empty());
        assert!(r.pending_seek().is_none());
        assert!(!r.is_guarded(t0 + secs(0.1)));
    }

    #[test]
    fn unrelated_remote_seek_during_guard_is_ignored() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        r.begin_local_seek(80.0, t0);
        r.commit_local_seek(t0);

        assert!(r.apply_remote_seek(20.0, t0 + secs(0.1)).is_empty());
        assert!(r.pending_seek().is_some());
    }

    #[test]
    fn remote_seek_applies_when_unguarded() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        assert_eq!(
            r.apply_remote_seek(100.0, t0),
            vec![PlayerCommand::SeekTo(100.0)]
        );
        assert_eq!(r.position(t0), 100.0);
    }

    #[test]
    fn same_track_while_playing_does_not_restart() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        let commands = r.load(&song("x"), Some(41.0), true, t0 + secs(1.0));
        assert!(commands.is_empty());
        assert!(r.load(&song("x"), None, true, t0 + secs(1.0)).is_empty());
    }

    #[test]
    fn same_track_far_off_gets_drift_correction() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        let commands = r.load(&song("x"), Some(120.0), true, t0);
        assert_eq!(commands, vec![PlayerCommand::SeekTo(120.0)]);
    }

    #[test]
    fn new_track_replaces_loaded_one() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        let commands = r.load(&song("y"), None, true, t0);
        assert!(matches!(commands.as_slice(), [PlayerCommand::Load { song, position, .. }] if song.id == "y" && *position == 0.0));
        assert_eq!(r.track_id(), Some("y"));
    }

    #[test]
    fn stale_song_events_are_discarded() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        let msg = ServerMessage::PlaybackSeeked {
            seek_time: 5.0,
            song_id: Some("other".into()),
        };
        assert!(r.handle(&msg, t0).is_empty());
        assert_eq!(r.position(t0), 40.0);
    }

    #[test]
    fn remote_pause_freezes_position() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        let commands = r.apply_remote_pause(Some(43.0), t0 + secs(3.0));
        assert_eq!(commands, vec![PlayerCommand::Pause]);
        assert!(!r.is_playing());
        assert_eq!(r.position(t0 + secs(10.0)), 43.0);

        let commands = r.apply_remote_resume(None, t0 + secs(10.0));
        assert_eq!(commands, vec![PlayerCommand::Play]);
        assert!((r.position(t0 + secs(11.0)) - 44.0).abs() < 1e-6);
    }

    #[test]
    fn commands_wait_for_media_ready() {
        let t0 = Instant::now();
        let mut r = Reconciler::new(&SyncConfig::new(), t0);
        r.load(&song("x"), Some(10.0), true, t0);

        // Media not ready: state moves, nothing is emitted.
        assert!(r.apply_remote_seek(30.0, t0).is_empty());

        let commands = r.on_media_ready(t0 + secs(1.0));
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], PlayerCommand::SeekTo(p) if (p - 31.0).abs() < 1e-6));
        assert_eq!(commands[1], PlayerCommand::Play);
    }

    #[test]
    fn idle_ignores_everything() {
        let t0 = Instant::now();
        let mut r = Reconciler::new(&SyncConfig::new(), t0);
        assert!(r.apply_remote_sync(10.0, true, t0).is_empty());
        assert!(!r.begin_local_seek(10.0, t0));
        assert!(r.set_local_playing(true, t0).is_empty());
    }

    #[test]
    fn unload_pauses_and_goes_idle() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        assert_eq!(r.unload(), vec![PlayerCommand::Pause]);
        assert_eq!(r.state(), ReconcilerState::Idle);
        assert_eq!(r.track_id(), None);
    }

    #[test]
    fn negative_positions_are_clamped() {
        let t0 = Instant::now();
        let mut r = loaded(40.0, t0);
        assert_eq!(r.apply_remote_seek(-5.0, t0), vec![PlayerCommand::SeekTo(0.0)]);
    }
}
