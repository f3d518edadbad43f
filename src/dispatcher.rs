//! Command dispatcher: turns user intents into protocol messages.
//!
//! Transport commands (play/pause, seek, skip, queue administration) are
//! admin-only. A listener who is not the admin gets a silent no-op, logged
//! at `debug`, so a stale UI button cannot push the room around. Volume and
//! mute never leave the client.
//!
//! Seek requests are collapsed: the first request opens a short window, later
//! requests inside it replace the target, and one `seek-playback` with the
//! latest target goes out when the window closes.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::event::PlayerCommand;
use crate::membership::RoomMembership;
use crate::protocol::{ClientMessage, SpaceId};

#[derive(Debug, Clone, PartialEq)]
struct PendingOutboundSeek {
    space_id: SpaceId,
    target_secs: f64,
    send_at: Instant,
}

/// Command dispatcher. See the [module docs](self).
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    seek_debounce: Duration,
    pending_seek: Option<PendingOutboundSeek>,
    volume: f32,
    muted: bool,
}

impl CommandDispatcher {
    /// Create a dispatcher with full volume and sound on.
    pub fn new(seek_debounce: Duration) -> Self {
        Self {
            seek_debounce,
            pending_seek: None,
            volume: 1.0,
            muted: false,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Target of the seek waiting for its debounce window, if any.
    pub fn pending_seek_target(&self) -> Option<f64> {
        self.pending_seek.as_ref().map(|p| p.target_secs)
    }

    /// The room to address if the local user may control playback.
    pub fn authorize<'a>(&self, room: &'a RoomMembership, action: &'static str) -> Option<&'a SpaceId> {
        match room.room_id.as_ref() {
            Some(space_id) if room.is_admin && !room.ended => Some(space_id),
            Some(_) => {
                debug!(action, "denied: local user is not the room admin");
                None
            }
            None => {
                debug!(action, "denied: not in a room");
                None
            }
        }
    }

    // ── Transport commands ──────────────────────────────────────────

    /// Toggle playback for the room. `playing` and `position_secs` are the
    /// local clock's current values.
    pub fn request_play_pause(
        &self,
        room: &RoomMembership,
        playing: bool,
        position_secs: f64,
    ) -> Option<ClientMessage> {
        let space_id = self.authorize(room, "play-pause")?.clone();
        Some(if playing {
            ClientMessage::PausePlayback {
                space_id,
                current_time: position_secs,
            }
        } else {
            ClientMessage::ResumePlayback {
                space_id,
                current_time: position_secs,
            }
        })
    }

    /// Ask to move the room's play head. Returns `true` if the request was
    /// accepted into the debounce window.
    pub fn request_seek(&mut self, room: &RoomMembership, target_secs: f64, now: Instant) -> bool {
        let Some(space_id) = self.authorize(room, "seek") else {
            return false;
        };
        let target_secs = if target_secs.is_finite() {
            target_secs.max(0.0)
        } else {
            0.0
        };
        match &mut self.pending_seek {
            Some(pending) if pending.space_id == *space_id => {
                pending.target_secs = target_secs;
            }
            _ => {
                self.pending_seek = Some(PendingOutboundSeek {
                    space_id: space_id.clone(),
                    target_secs,
                    send_at: now + self.seek_debounce,
                });
            }
        }
        true
    }

    pub fn request_skip_next(&self, room: &RoomMembership) -> Option<ClientMessage> {
        let space_id = self.authorize(room, "skip-next")?.clone();
        Some(ClientMessage::PlayNext { space_id })
    }

    pub fn request_skip_previous(&self, room: &RoomMembership) -> Option<ClientMessage> {
        let space_id = self.authorize(room, "skip-previous")?.clone();
        Some(ClientMessage::PlayPrev { space_id })
    }

    /// Play a queued song right away.
    pub fn request_play_instant(&self, room: &RoomMembership, song_id: &str) -> Option<ClientMessage> {
        let space_id = self.authorize(room, "play-instant")?.clone();
        Some(ClientMessage::PlayInstant {
            space_id,
            song_id: song_id.to_owned(),
        })
    }

    pub fn request_remove_song(&self, room: &RoomMembership, stream_id: &str) -> Option<ClientMessage> {
        let space_id = self.authorize(room, "remove-song")?.clone();
        Some(ClientMessage::RemoveSong {
            space_id,
            stream_id: stream_id.to_owned(),
        })
    }

    pub fn request_empty_queue(&self, room: &RoomMembership) -> Option<ClientMessage> {
        let space_id = self.authorize(room, "empty-queue")?.clone();
        Some(ClientMessage::EmptyQueue { space_id })
    }

    // ── Local output ────────────────────────────────────────────────

    /// Set the local volume, clamped to `0.0..=1.0`.
    pub fn request_volume_change(&mut self, level: f32) -> PlayerCommand {
        self.volume = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 1.0)
        };
        PlayerCommand::SetVolume(self.volume)
    }

    pub fn toggle_mute(&mut self) -> PlayerCommand {
        self.muted = !self.muted;
        PlayerCommand::SetMuted(self.muted)
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// Release the debounced seek once its window has closed.
    pub fn on_tick(&mut self, now: Instant) -> Option<ClientMessage> {
        match &self.pending_seek {
            Some(pending) if now >= pending.send_at => {
                let pending = self.pending_seek.take()?;
                debug!(target_secs = pending.target_secs, "sending debounced seek");
                Some(ClientMessage::SeekPlayback {
                    space_id: pending.space_id,
                    seek_time: pending.target_secs,
                })
            }
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_seek.as_ref().map(|p| p.send_at)
    }

    /// Drop a seek that has not been sent yet.
    pub fn cancel(&mut self) {
        if self.pending_seek.take().is_some() {
            debug!("discarded pending seek");
        }
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

    const DEBOUNCE: Duration = Duration::from_millis(150);

    fn room(is_admin: bool) -> RoomMembership {
        RoomMembership {
            room_id: Some("abc".into()),
            is_admin,
            ..RoomMembership::default()
        }
    }

    #[test]
    fn seeks_within_window_collapse_to_latest() {
        let t0 = Instant::now();
        let admin = room(true);
        let mut d = CommandDispatcher::new(DEBOUNCE);

        assert!(d.request_seek(&admin, 30.0, t0));
        assert!(d.request_seek(&admin, 45.0, t0 + Duration::from_millis(50)));
        assert!(d.request_seek(&admin, 60.0, t0 + Duration::from_millis(100)));

        assert_eq!(d.on_tick(t0 + Duration::from_millis(120)), None);
        assert_eq!(d.next_deadline(), Some(t0 + DEBOUNCE));
        assert_eq!(
            d.on_tick(t0 + DEBOUNCE),
            Some(ClientMessage::SeekPlayback {
                space_id: "abc".into(),
                seek_time: 60.0,
            })
        );
        assert_eq!(d.on_tick(t0 + DEBOUNCE * 2), None);
        assert_eq!(d.next_deadline(), None);
    }

    #[test]
    fn seek_after_window_opens_a_new_one() {
        let t0 = Instant::now();
        let admin = room(true);
        let mut d = CommandDispatcher::new(DEBOUNCE);

        d.request_seek(&admin, 10.0, t0);
        assert!(d.on_tick(t0 + DEBOUNCE).is_some());
        d.request_seek(&admin, 20.0, t0 + DEBOUNCE);
        assert_eq!(d.next_deadline(), Some(t0 + DEBOUNCE * 2));
    }

    #[test]
    fn listener_cannot_seek() {
        let t0 = Instant::now();
        let mut d = CommandDispatcher::new(DEBOUNCE);
        assert!(!d.request_seek(&room(false), 100.0, t0));
        assert_eq!(d.next_deadline(), None);
        assert_eq!(d.on_tick(t0 + DEBOUNCE), None);
    }

    #[test]
    fn listener_transport_commands_are_no_ops() {
        let d = CommandDispatcher::new(DEBOUNCE);
        let listener = room(false);
        assert!(d.request_play_pause(&listener, true, 1.0).is_none());
        assert!(d.request_skip_next(&listener).is_none());
        assert!(d.request_skip_previous(&listener).is_none());
        assert!(d.request_play_instant(&listener, "s").is_none());
        assert!(d.request_remove_song(&listener, "s").is_none());
        assert!(d.request_empty_queue(&listener).is_none());
    }

    #[test]
    fn no_room_means_no_commands() {
        let d = CommandDispatcher::new(DEBOUNCE);
        let nowhere = RoomMembership {
            is_admin: true,
            ..RoomMembership::default()
        };
        assert!(d.request_skip_next(&nowhere).is_none());
    }

    #[test]
    fn play_pause_direction_follows_local_state() {
        let d = CommandDispatcher::new(DEBOUNCE);
        let admin = room(true);
        assert!(matches!(
            d.request_play_pause(&admin, true, 12.0),
            Some(ClientMessage::PausePlayback { current_time, .. }) if current_time == 12.0
        ));
        assert!(matches!(
            d.request_play_pause(&admin, false, 12.0),
            Some(ClientMessage::ResumePlayback { .. })
        ));
    }

    #[test]
    fn admin_queue_commands() {
        let d = CommandDispatcher::new(DEBOUNCE);
        let admin = room(true);
        assert_eq!(
            d.request_remove_song(&admin, "s1"),
            Some(ClientMessage::RemoveSong {
                space_id: "abc".into(),
                stream_id: "s1".into(),
            })
        );
        assert_eq!(
            d.request_play_instant(&admin, "s2"),
            Some(ClientMessage::PlayInstant {
                space_id: "abc".into(),
                song_id: "s2".into(),
            })
        );
        assert!(matches!(
            d.request_skip_previous(&admin),
            Some(ClientMessage::PlayPrev { .. })
        ));
    }

    #[test]
    fn volume_is_clamped_and_local() {
        let mut d = CommandDispatcher::new(DEBOUNCE);
        assert_eq!(d.request_volume_change(1.7), PlayerCommand::SetVolume(1.0));
        assert_eq!(d.request_volume_change(-0.2), PlayerCommand::SetVolume(0.0));
        assert_eq!(d.request_volume_change(f32::NAN), PlayerCommand::SetVolume(0.0));
        assert_eq!(d.request_volume_change(0.4), PlayerCommand::SetVolume(0.4));
        assert_eq!(d.volume(), 0.4);
    }

    #[test]
    fn mute_toggles() {
        let mut d = CommandDispatcher::new(DEBOUNCE);
        assert_eq!(d.toggle_mute(), PlayerCommand::SetMuted(true));
        assert_eq!(d.toggle_mute(), PlayerCommand::SetMuted(false));
    }

    #[test]
    fn cancel_discards_pending_seek() {
        let t0 = Instant::now();
        let mut d = CommandDispatcher::new(DEBOUNCE);
        d.request_seek(&room(true), 10.0, t0);
        d.cancel();
        assert_eq!(d.on_tick(t0 + DEBOUNCE), None);
    }
}
