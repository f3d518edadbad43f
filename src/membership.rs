//! Room membership controller.
//!
//! Tracks which room the client is in, who else is there and whether the
//! local user is the admin. Everything here changes only in response to
//! server messages, except the room id itself which is set by
//! [`MembershipController::join`].
//!
//! Authorization errors from the server are retried by rejoining the room,
//! with a linearly growing delay and a bounded number of attempts.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::protocol::{is_unauthorized_message, ClientMessage, ServerMessage, SpaceId, UserDetail, UserId};

/// A listener in the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_creator: bool,
}

impl From<UserDetail> for RoomMember {
    fn from(detail: UserDetail) -> Self {
        Self {
            id: detail.id,
            display_name: detail.name,
            avatar_url: detail.image_url,
            is_creator: detail.is_creator,
        }
    }
}

/// What the client knows about its room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomMembership {
    pub room_id: Option<SpaceId>,
    pub room_name: Option<String>,
    pub is_admin: bool,
    pub member_count: u32,
    /// Roster in server order.
    pub members: Vec<RoomMember>,
    /// The server confirmed the join.
    pub joined: bool,
    /// The room was closed by its creator.
    pub ended: bool,
}

/// Something the driver must act on after a membership update.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipAction {
    /// Send this message to the server.
    Send(ClientMessage),
    /// Rejoining was given up after `attempts` unauthorized errors.
    AuthorizationExhausted { attempts: u32 },
    /// The server reported an error that is not about authorization.
    ServerError {
        message: String,
        code: Option<String>,
    },
    /// The room is gone.
    RoomEnded { reason: Option<String> },
}

/// Room membership controller. See the [module docs](self).
#[derive(Debug, Clone)]
pub struct MembershipController {
    local_user_id: UserId,
    max_auth_retries: u32,
    auth_retry_base_delay: Duration,
    current_song_fallback: Duration,

    room: RoomMembership,
    host_id: Option<UserId>,
    admin_from_server: bool,
    auth_failures: u32,
    rejoin_at: Option<Instant>,
    current_song_fetch_at: Option<Instant>,
}

impl MembershipController {
    pub fn new(local_user_id: impl Into<UserId>, config: &SyncConfig) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            max_auth_retries: config.max_auth_retries,
            auth_retry_base_delay: config.auth_retry_base_delay,
            current_song_fallback: config.current_song_fallback,
            room: RoomMembership::default(),
            host_id: None,
            admin_from_server: false,
            auth_failures: 0,
            rejoin_at: None,
            current_song_fetch_at: None,
        }
    }

    /// Current room state.
    pub fn membership(&self) -> &RoomMembership {
        &self.room
    }

    pub fn room_id(&self) -> Option<&SpaceId> {
        self.room.room_id.as_ref()
    }

    pub fn is_admin(&self) -> bool {
        self.room.is_admin
    }

    /// Consecutive unauthorized errors since the last successful join.
    pub fn auth_failures(&self) -> u32 {
        self.auth_failures
    }

    /// Record the room creator's id as known to the application.
    ///
    /// Until the server states the admin flag, the local user is assumed to
    /// be admin exactly when they are the host. A server value always wins.
    pub fn set_host_id(&mut self, host_id: Option<UserId>) {
        self.host_id = host_id;
        if !self.admin_from_server {
            self.room.is_admin = self.host_id.as_deref() == Some(self.local_user_id.as_str());
        }
    }

    /// Enter a room. Returns the `join-room` message to send.
    pub fn join(&mut self, room_id: impl Into<SpaceId>, room_name: Option<String>, now: Instant) -> ClientMessage {
        let room_id = room_id.into();
        if self.room.room_id.as_ref() != Some(&room_id) {
            self.room = RoomMembership {
                room_id: Some(room_id.clone()),
                ..RoomMembership::default()
            };
            self.admin_from_server = false;
            self.set_host_id(self.host_id.clone());
        }
        if room_name.is_some() {
            self.room.room_name = room_name;
        }
        self.room.ended = false;
        self.auth_failures = 0;
        self.rejoin_at = None;
        self.current_song_fetch_at = Some(now + self.current_song_fallback);
        info!(room_id = %room_id, "joining room");
        self.join_message()
    }

    /// Re-send the join for the current room, e.g. after a reconnect.
    pub fn rejoin(&mut self, now: Instant) -> Option<ClientMessage> {
        if self.room.room_id.is_none() || self.room.ended {
            return None;
        }
        self.room.joined = false;
        self.current_song_fetch_at = Some(now + self.current_song_fallback);
        Some(self.join_message())
    }

    /// Leave the current room. Cancels any pending rejoin.
    pub fn leave(&mut self) -> Option<ClientMessage> {
        let room_id = self.room.room_id.take()?;
        info!(room_id = %room_id, "leaving room");
        self.room = RoomMembership::default();
        self.admin_from_server = false;
        self.auth_failures = 0;
        self.rejoin_at = None;
        self.current_song_fetch_at = None;
        Some(ClientMessage::LeaveRoom { space_id: room_id })
    }

    fn join_message(&self) -> ClientMessage {
        ClientMessage::JoinRoom {
            space_id: self.room.room_id.clone().unwrap_or_default(),
            space_name: self.room.room_name.clone(),
        }
    }

    /// Fold a server message into the membership state.
    pub fn handle(&mut self, msg: &ServerMessage, now: Instant) -> Vec<MembershipAction> {
        let mut actions = Vec::new();
        if self.room.room_id.is_none() {
            return actions;
        }
        match msg {
            ServerMessage::RoomInfo {
                is_admin,
                user_count,
                space_name,
            } => {
                if let Some(is_admin) = is_admin {
                    self.set_server_admin(*is_admin);
                }
                if let Some(count) = user_count {
                    self.room.member_count = *count;
                }
                if let Some(name) = space_name {
                    self.room.room_name = Some(name.clone());
                }
            }
            ServerMessage::RoomJoined { is_admin, .. } => {
                if self.auth_failures > 0 {
                    debug!(failures = self.auth_failures, "join succeeded; auth failures reset");
                }
                self.auth_failures = 0;
                self.rejoin_at = None;
                self.room.joined = true;
                if let Some(is_admin) = is_admin {
                    self.set_server_admin(*is_admin);
                }
            }
            ServerMessage::UserJoined { .. } => {
                self.room.member_count = self.room.member_count.saturating_add(1);
                actions.push(self.roster_refresh());
            }
            ServerMessage::UserLeft { user_id } => {
                self.room.member_count = self.room.member_count.saturating_sub(1);
                if let Some(user_id) = user_id {
                    self.room.members.retain(|m| &m.id != user_id);
                }
                actions.push(self.roster_refresh());
            }
            ServerMessage::UserUpdate {
                user_count,
                connected_users,
                user_details,
            } => {
                if let Some(details) = user_details {
                    self.room.members = details.iter().cloned().map(RoomMember::from).collect();
                }
                let listed = u32::try_from(self.room.members.len()).unwrap_or(u32::MAX);
                self.room.member_count = user_count.or(*connected_users).unwrap_or(listed);
            }
            ServerMessage::CurrentSongUpdate { .. } => {
                self.current_song_fetch_at = None;
            }
            ServerMessage::Error { message, code, .. } => {
                if is_unauthorized_message(message) {
                    actions.extend(self.on_unauthorized(now));
                } else {
                    warn!(code = ?code, "server error: {message}");
                    actions.push(MembershipAction::ServerError {
                        message: message.clone(),
                        code: code.clone(),
                    });
                }
            }
            ServerMessage::SpaceEnded { reason } => {
                info!(reason = ?reason, "room ended");
                self.room.ended = true;
                self.rejoin_at = None;
                self.current_song_fetch_at = None;
                actions.push(MembershipAction::RoomEnded {
                    reason: reason.clone(),
                });
            }
            _ => {}
        }
        actions
    }

    fn set_server_admin(&mut self, is_admin: bool) {
        if self.room.is_admin != is_admin {
            info!(is_admin, "admin flag changed");
        }
        self.room.is_admin = is_admin;
        self.admin_from_server = true;
    }

    fn roster_refresh(&self) -> MembershipAction {
        MembershipAction::Send(ClientMessage::GetRoomUsers {
            space_id: self.room.room_id.clone().unwrap_or_default(),
        })
    }

    fn on_unauthorized(&mut self, now: Instant) -> Option<MembershipAction> {
        if self.room.ended {
            return None;
        }
        self.auth_failures = self.auth_failures.saturating_add(1);
        if self.auth_failures < self.max_auth_retries {
            let delay = self.auth_retry_base_delay.saturating_mul(self.auth_failures);
            warn!(failures = self.auth_failures, ?delay, "unauthorized; scheduling rejoin");
            self.rejoin_at = Some(now + delay);
            None
        } else {
            warn!(failures = self.auth_failures, "unauthorized; giving up on rejoin");
            self.rejoin_at = None;
            Some(MembershipAction::AuthorizationExhausted {
                attempts: self.auth_failures,
            })
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// Fire due timers: scheduled rejoins and the current-song fallback.
    pub fn on_tick(&mut self, now: Instant) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        if self.rejoin_at.is_some_and(|at| now >= at) {
            self.rejoin_at = None;
            if self.room.room_id.is_some() && !self.room.ended {
                debug!(failures = self.auth_failures, "rejoining after unauthorized error");
                messages.push(self.join_message());
            }
        }
        if self.current_song_fetch_at.is_some_and(|at| now >= at) {
            self.current_song_fetch_at = None;
            if let Some(space_id) = self.room.room_id.clone() {
                messages.push(ClientMessage::GetCurrentSong { space_id });
            }
        }
        messages
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.rejoin_at, self.current_song_fetch_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn controller() -> MembershipController {
        MembershipController::new("me", &SyncConfig::new())
    }

    fn unauthorized() -> ServerMessage {
        ServerMessage::Error {
            message: "You are unauthorized to perform this action".into(),
            code: None,
            details: None,
        }
    }

    fn joined() -> ServerMessage {
        ServerMessage::RoomJoined {
            space_id: "abc".into(),
            user_id: Some("me".into()),
            message: None,
            is_admin: None,
            playback_state: None,
        }
    }

    #[test]
    fn join_returns_join_room() {
        let mut c = controller();
        let msg = c.join("abc", Some("Late Night".into()), Instant::now());
        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                space_id: "abc".into(),
                space_name: Some("Late Night".into()),
            }
        );
        assert_eq!(c.room_id().map(String::as_str), Some("abc"));
    }

    #[test]
    fn room_info_overrides_host_guess() {
        let mut c = controller();
        c.set_host_id(Some("me".into()));
        let now = Instant::now();
        c.join("abc", None, now);
        assert!(c.is_admin());

        c.handle(
            &ServerMessage::RoomInfo {
                is_admin: Some(false),
                user_count: Some(4),
                space_name: Some("Room".into()),
            },
            now,
        );
        assert!(!c.is_admin());
        assert_eq!(c.membership().member_count, 4);
        assert_eq!(c.membership().room_name.as_deref(), Some("Room"));

        // The host guess no longer applies once the server has spoken.
        c.set_host_id(Some("me".into()));
        assert!(!c.is_admin());
    }

    #[test]
    fn user_joined_and_left_adjust_count_and_refresh() {
        let mut c = controller();
        let now = Instant::now();
        c.join("abc", None, now);

        let actions = c.handle(&ServerMessage::UserJoined { user_id: Some("u2".into()) }, now);
        assert_eq!(c.membership().member_count, 1);
        assert_eq!(
            actions,
            vec![MembershipAction::Send(ClientMessage::GetRoomUsers {
                space_id: "abc".into()
            })]
        );

        c.handle(&ServerMessage::UserLeft { user_id: Some("u2".into()) }, now);
        c.handle(&ServerMessage::UserLeft { user_id: Some("u3".into()) }, now);
        assert_eq!(c.membership().member_count, 0);
    }

    #[test]
    fn user_update_replaces_roster() {
        let mut c = controller();
        let now = Instant::now();
        c.join("abc", None, now);
        c.handle(
            &ServerMessage::UserUpdate {
                user_count: None,
                connected_users: None,
                user_details: Some(vec![
                    UserDetail {
                        id: "u1".into(),
                        name: "Ada".into(),
                        image_url: None,
                        is_creator: true,
                    },
                    UserDetail {
                        id: "u2".into(),
                        name: "Bo".into(),
                        image_url: Some("https://img/bo.png".into()),
                        is_creator: false,
                    },
                ]),
            },
            now,
        );
        let room = c.membership();
        assert_eq!(room.member_count, 2);
        assert_eq!(room.members[0].display_name, "Ada");
        assert!(room.members[0].is_creator);
        assert_eq!(room.members[1].avatar_url.as_deref(), Some("https://img/bo.png"));
    }

    #[test]
    fn unauthorized_schedules_linear_rejoins_then_gives_up() {
        let mut c = controller();
        let t0 = Instant::now();
        c.join("abc", None, t0);
        c.on_tick(t0 + Duration::from_secs(1)); // fallback fetch

        assert!(c.handle(&unauthorized(), t0).is_empty());
        assert_eq!(c.next_deadline(), Some(t0 + Duration::from_secs(2)));
        let rejoin = c.on_tick(t0 + Duration::from_secs(2));
        assert!(matches!(rejoin.as_slice(), [ClientMessage::JoinRoom { .. }]));

        assert!(c.handle(&unauthorized(), t0).is_empty());
        assert_eq!(c.next_deadline(), Some(t0 + Duration::from_secs(4)));
        c.on_tick(t0 + Duration::from_secs(4));

        let actions = c.handle(&unauthorized(), t0);
        assert_eq!(
            actions,
            vec![MembershipAction::AuthorizationExhausted { attempts: 3 }]
        );
        assert_eq!(c.next_deadline(), None);
    }

    #[test]
    fn room_joined_resets_auth_failures() {
        let mut c = controller();
        let t0 = Instant::now();
        c.join("abc", None, t0);
        c.handle(&unauthorized(), t0);
        c.handle(&unauthorized(), t0);
        assert_eq!(c.auth_failures(), 2);

        c.handle(&joined(), t0);
        assert_eq!(c.auth_failures(), 0);
        assert!(c.membership().joined);
    }

    #[test]
    fn leave_cancels_pending_rejoin() {
        let mut c = controller();
        let t0 = Instant::now();
        c.join("abc", None, t0);
        c.handle(&unauthorized(), t0);
        assert_eq!(
            c.leave(),
            Some(ClientMessage::LeaveRoom {
                space_id: "abc".into()
            })
        );
        assert_eq!(c.next_deadline(), None);
        assert!(c.on_tick(t0 + Duration::from_secs(10)).is_empty());
        assert!(c.leave().is_none());
    }

    #[test]
    fn current_song_fallback_fires_once() {
        let mut c = controller();
        let t0 = Instant::now();
        c.join("abc", None, t0);
        assert!(c.on_tick(t0 + Duration::from_millis(500)).is_empty());
        assert_eq!(
            c.on_tick(t0 + Duration::from_secs(1)),
            vec![ClientMessage::GetCurrentSong {
                space_id: "abc".into()
            }]
        );
        assert!(c.on_tick(t0 + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn pushed_current_song_cancels_fallback() {
        let mut c = controller();
        let t0 = Instant::now();
        c.join("abc", None, t0);
        c.handle(
            &ServerMessage::CurrentSongUpdate {
                song: None,
                current_time: None,
                is_playing: None,
            },
            t0,
        );
        assert_eq!(c.next_deadline(), None);
    }

    #[test]
    fn space_ended_stops_rejoins() {
        let mut c = controller();
        let t0 = Instant::now();
        c.join("abc", None, t0);
        c.handle(&unauthorized(), t0);
        let actions = c.handle(&ServerMessage::SpaceEnded { reason: None }, t0);
        assert_eq!(actions, vec![MembershipAction::RoomEnded { reason: None }]);
        assert!(c.on_tick(t0 + Duration::from_secs(10)).is_empty());
        assert!(c.rejoin(t0).is_none());
    }

    #[test]
    fn other_errors_are_surfaced() {
        let mut c = controller();
        let t0 = Instant::now();
        c.join("abc", None, t0);
        let actions = c.handle(
            &ServerMessage::Error {
                message: "Queue is full".into(),
                code: Some("QUEUE_FULL".into()),
                details: None,
            },
            t0,
        );
        assert!(matches!(actions.as_slice(), [MembershipAction::ServerError { .. }]));
        assert_eq!(c.auth_failures(), 0);
    }

    #[test]
    fn messages_before_join_are_ignored() {
        let mut c = controller();
        c.handle(&ServerMessage::UserJoined { user_id: None }, Instant::now());
        assert_eq!(c.membership().member_count, 0);
    }
}
