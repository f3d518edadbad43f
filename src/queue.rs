//! Queue state projector.
//!
//! Folds `queue-update`, `song-added`, `vote-updated` and
//! `current-song-update` into a ranked view of the room's queue. The view is
//! re-sorted after every mutation: most votes first, then oldest first.
//! Sorting is stable, so entries that tie on both keys keep their arrival
//! order and every client with the same events shows the same queue.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::error::{Result, RoomSyncError};
use crate::protocol::{
    AddedByUser, ClientMessage, ServerMessage, SongPayload, SourceType, SpaceId, StreamId, Upvote,
    UserId, VoteDirection,
};

/// One song in the queue (or playing now).
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: StreamId,
    pub title: String,
    pub artist: Option<String>,
    pub source_type: SourceType,
    pub url: String,
    pub small_img: String,
    pub big_img: String,
    pub vote_count: u32,
    /// Users who currently vote for this entry.
    pub voters: Vec<UserId>,
    pub added_by: Option<AddedByUser>,
    /// Creation time. Missing or unparseable timestamps count as the epoch.
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Returns `true` if `user_id` currently votes for this entry.
    pub fn has_voted(&self, user_id: &str) -> bool {
        self.voters.iter().any(|voter| voter == user_id)
    }
}

impl From<SongPayload> for QueueEntry {
    fn from(song: SongPayload) -> Self {
        Self {
            id: song.id,
            title: song.title,
            artist: song.artist,
            source_type: song.source_type,
            url: song.url,
            small_img: song.small_img,
            big_img: song.big_img,
            vote_count: song.vote_count,
            voters: song.upvotes.into_iter().map(|u| u.user_id).collect(),
            added_by: song.added_by_user,
            added_at: parse_added_at(song.create_at.as_deref()),
        }
    }
}

fn parse_added_at(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|ts| match DateTime::parse_from_rfc3339(ts) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            debug!(raw = ts, "unparseable createAt: {e}");
            None
        }
    })
    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Ranking: vote count descending, then `added_at` ascending.
pub fn rank(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.vote_count
        .cmp(&a.vote_count)
        .then_with(|| a.added_at.cmp(&b.added_at))
}

/// Local projection of the room queue.
#[derive(Debug, Clone, Default)]
pub struct QueueProjector {
    entries: Vec<QueueEntry>,
    now_playing: Option<QueueEntry>,
}

impl QueueProjector {
    /// Create an empty projector.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ranked queue.
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// The entry currently playing, if any.
    pub fn now_playing(&self) -> Option<&QueueEntry> {
        self.now_playing.as_ref()
    }

    /// Look up a queued entry by id.
    pub fn get(&self, stream_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold a server message into the queue. Returns `true` if it changed anything.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::QueueUpdate { queue } => {
                self.apply_queue_update(queue.iter().cloned());
                true
            }
            ServerMessage::SongAdded { song } => {
                self.apply_song_added(song.clone());
                true
            }
            ServerMessage::VoteUpdated {
                stream_id,
                vote_count,
                upvotes,
            } => self.apply_vote_updated(stream_id, *vote_count, upvotes),
            ServerMessage::CurrentSongUpdate { song, .. } => {
                self.apply_current_song(song.clone());
                true
            }
            ServerMessage::RoomJoined {
                playback_state: Some(state),
                ..
            } => match &state.current_song {
                Some(song) => {
                    self.apply_current_song(Some(song.clone()));
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Replace the whole queue.
    pub fn apply_queue_update(&mut self, queue: impl IntoIterator<Item = SongPayload>) {
        self.entries = queue.into_iter().map(QueueEntry::from).collect();
        // The server may list the playing song too.
        if let Some(playing) = &self.now_playing {
            let playing_id = playing.id.clone();
            self.entries.retain(|e| e.id != playing_id);
        }
        self.resort();
    }

    /// Append one song. A song with an id already queued replaces that entry.
    pub fn apply_song_added(&mut self, song: SongPayload) {
        let entry = QueueEntry::from(song);
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.resort();
    }

    /// Patch vote totals. Returns `false` for ids not in the queue.
    pub fn apply_vote_updated(&mut self, stream_id: &str, vote_count: u32, upvotes: &[Upvote]) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == stream_id) else {
            debug!(stream_id, "vote update for unknown queue entry");
            return false;
        };
        entry.vote_count = vote_count;
        entry.voters = upvotes.iter().map(|u| u.user_id.clone()).collect();
        self.resort();
        true
    }

    /// Move a song out of the queue into the now-playing slot. `None` clears it.
    pub fn apply_current_song(&mut self, song: Option<SongPayload>) {
        self.now_playing = song.map(|song| {
            let promoted = self
                .entries
                .iter()
                .position(|e| e.id == song.id)
                .map(|index| self.entries.remove(index));
            promoted.unwrap_or_else(|| QueueEntry::from(song))
        });
    }

    /// Remove an entry, e.g. after an admin `remove-song`.
    pub fn remove(&mut self, stream_id: &str) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|e| e.id == stream_id)?;
        Some(self.entries.remove(index))
    }

    /// Drop every queued entry; the now-playing slot is kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Forget everything, including the now-playing slot.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.now_playing = None;
    }

    /// Toggle `user_id`'s vote on `stream_id`.
    ///
    /// Withdraws the vote if the user already voted, otherwise adds it. The
    /// change is applied locally right away and the matching `vote` message
    /// is returned; the server's `vote-updated` overwrites it later. Returns
    /// `None` for ids not in the queue.
    pub fn vote(&mut self, space_id: &str, stream_id: &str, user_id: &str) -> Option<ClientMessage> {
        let entry = self.entries.iter_mut().find(|e| e.id == stream_id)?;
        let direction = if entry.has_voted(user_id) {
            entry.voters.retain(|v| v != user_id);
            entry.vote_count = entry.vote_count.saturating_sub(1);
            VoteDirection::Downvote
        } else {
            entry.voters.push(user_id.to_owned());
            entry.vote_count = entry.vote_count.saturating_add(1);
            VoteDirection::Upvote
        };
        self.resort();
        Some(ClientMessage::Vote {
            space_id: space_id.to_owned(),
            stream_id: stream_id.to_owned(),
            vote: direction,
        })
    }

    fn resort(&mut self) {
        // `sort_by` is stable.
        self.entries.sort_by(rank);
    }
}

// ── URL classification ──────────────────────────────────────────────

const YOUTUBE_ID_LEN: usize = 11;

impl SourceType {
    /// Work out which service a song link points to.
    ///
    /// Recognises YouTube watch, short-link, shorts and embed URLs (plus a
    /// bare 11-character video id) and Spotify track URLs or URIs.
    ///
    /// ```
    /// use room_sync_client::protocol::SourceType;
    ///
    /// assert_eq!(
    ///     SourceType::classify_url("https://youtu.be/dQw4w9WgXcQ"),
    ///     Some(SourceType::YouTube)
    /// );
    /// assert_eq!(
    ///     SourceType::classify_url("spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
    ///     Some(SourceType::Spotify)
    /// );
    /// assert_eq!(SourceType::classify_url("https://example.com/song.mp3"), None);
    /// ```
    pub fn classify_url(url: &str) -> Option<Self> {
        let raw = url.trim();
        if is_youtube_id(raw) {
            return Some(Self::YouTube);
        }
        if let Some(id) = raw.strip_prefix("spotify:track:") {
            return is_spotify_id(id).then_some(Self::Spotify);
        }
        let link = parse_web_link(raw)?;
        if youtube_video_id(&link).is_some() {
            Some(Self::YouTube)
        } else if spotify_track_id(&link).is_some() {
            Some(Self::Spotify)
        } else {
            None
        }
    }
}

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
];
const YOUTUBE_SHORT_HOSTS: &[&str] = &["youtu.be", "www.youtu.be"];
const SPOTIFY_HOSTS: &[&str] = &["spotify.com", "open.spotify.com"];

/// Parse an http(s) link; a missing scheme is taken as `https`.
fn parse_web_link(raw: &str) -> Option<Url> {
    let parsed = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{raw}"))
    };
    let url = parsed.ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn is_youtube_id(candidate: &str) -> bool {
    candidate.len() == YOUTUBE_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_spotify_id(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

fn youtube_video_id(url: &Url) -> Option<String> {
    // `host_str` is already lower-cased and never carries the port.
    let host = url.host_str()?;
    let mut segments = url.path_segments()?;
    let candidate = if YOUTUBE_SHORT_HOSTS.contains(&host) {
        segments.next()?.to_owned()
    } else if YOUTUBE_HOSTS.contains(&host) {
        match segments.next()? {
            "watch" => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, id)| id.into_owned())?,
            "shorts" | "embed" | "live" | "v" => segments.next()?.to_owned(),
            _ => return None,
        }
    } else {
        return None;
    };
    is_youtube_id(&candidate).then_some(candidate)
}

fn spotify_track_id(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    if !SPOTIFY_HOSTS.contains(&host) {
        return None;
    }
    // Localised links look like open.spotify.com/intl-de/track/<id>.
    let mut segments = url.path_segments()?.skip_while(|s| s.starts_with("intl-"));
    if segments.next()? != "track" {
        return None;
    }
    let id = segments.next()?;
    is_spotify_id(id).then(|| id.to_owned())
}

/// Build an `add-to-queue` request, rejecting links that are neither YouTube
/// nor Spotify tracks.
///
/// # Errors
///
/// Returns [`RoomSyncError::InvalidUrl`] for unrecognised links.
pub fn add_to_queue_request(space_id: &SpaceId, url: &str) -> Result<ClientMessage> {
    let url = url.trim();
    if SourceType::classify_url(url).is_none() {
        return Err(RoomSyncError::InvalidUrl(url.to_owned()));
    }
    Ok(ClientMessage::AddToQueue {
        space_id: space_id.clone(),
        url: url.to_owned(),
    })
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

    fn song(id: &str, votes: u32, created: &str) -> SongPayload {
        SongPayload {
            id: id.into(),
            title: format!("Song {id}"),
            artist: None,
            url: format!("https://youtu.be/{id}"),
            small_img: String::new(),
            big_img: String::new(),
            source_type: SourceType::YouTube,
            vote_count: votes,
            create_at: Some(created.into()),
            added_by_user: None,
            upvotes: Vec::new(),
            youtube_url: None,
            spotify_url: None,
        }
    }

    fn ids(projector: &QueueProjector) -> Vec<&str> {
        projector.entries().iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn ranks_by_votes_then_age() {
        let mut queue = QueueProjector::new();
        queue.apply_queue_update(vec![
            song("a", 5, "2024-01-01T00:01:40Z"),
            song("b", 5, "2024-01-01T00:00:50Z"),
            song("c", 3, "2024-01-01T00:00:10Z"),
        ]);
        assert_eq!(ids(&queue), ["b", "a", "c"]);
    }

    #[test]
    fn missing_timestamp_sorts_first_among_equals() {
        let mut queue = QueueProjector::new();
        let mut undated = song("u", 1, "");
        undated.create_at = None;
        queue.apply_queue_update(vec![song("d", 1, "2024-01-01T00:00:00Z"), undated]);
        assert_eq!(ids(&queue), ["u", "d"]);
    }

    #[test]
    fn age_compares_instants_not_strings() {
        let mut queue = QueueProjector::new();
        queue.apply_queue_update(vec![
            song("later", 2, "2024-01-01T00:00:00.500Z"),
            song("earlier", 2, "2024-01-01T00:00:00Z"),
            song("offset", 2, "2024-01-01T01:59:59+02:00"),
        ]);
        assert_eq!(ids(&queue), ["offset", "earlier", "later"]);
    }

    #[test]
    fn unparseable_timestamp_counts_as_epoch() {
        let mut queue = QueueProjector::new();
        queue.apply_queue_update(vec![
            song("d", 1, "2024-01-01T00:00:00Z"),
            song("junk", 1, "yesterday"),
        ]);
        assert_eq!(ids(&queue), ["junk", "d"]);
        assert_eq!(queue.get("junk").unwrap().added_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn full_ties_keep_arrival_order() {
        let mut queue = QueueProjector::new();
        for id in ["x", "y", "z"] {
            queue.apply_song_added(song(id, 0, "2024-01-01T00:00:00Z"));
        }
        assert_eq!(ids(&queue), ["x", "y", "z"]);
    }

    #[test]
    fn song_added_with_known_id_replaces_entry() {
        let mut queue = QueueProjector::new();
        queue.apply_song_added(song("a", 0, "2024-01-01T00:00:00Z"));
        let mut newer = song("a", 2, "2024-01-01T00:00:00Z");
        newer.title = "Renamed".into();
        queue.apply_song_added(newer);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get("a").unwrap().title, "Renamed");
    }

    #[test]
    fn vote_update_reorders() {
        let mut queue = QueueProjector::new();
        queue.apply_queue_update(vec![
            song("a", 2, "2024-01-01T00:00:00Z"),
            song("b", 1, "2024-01-01T00:00:01Z"),
        ]);
        let upvotes = vec![
            Upvote { user_id: "u1".into() },
            Upvote { user_id: "u2".into() },
            Upvote { user_id: "u3".into() },
        ];
        assert!(queue.apply_vote_updated("b", 3, &upvotes));
        assert_eq!(ids(&queue), ["b", "a"]);
        assert!(queue.get("b").unwrap().has_voted("u2"));
    }

    #[test]
    fn vote_update_for_unknown_id_is_ignored() {
        let mut queue = QueueProjector::new();
        assert!(!queue.apply_vote_updated("ghost", 9, &[]));
    }

    #[test]
    fn vote_twice_restores_count() {
        let mut queue = QueueProjector::new();
        queue.apply_song_added(song("a", 4, "2024-01-01T00:00:00Z"));

        let first = queue.vote("room", "a", "me").unwrap();
        assert!(matches!(
            first,
            ClientMessage::Vote {
                vote: VoteDirection::Upvote,
                ..
            }
        ));
        assert_eq!(queue.get("a").unwrap().vote_count, 5);

        let second = queue.vote("room", "a", "me").unwrap();
        assert!(matches!(
            second,
            ClientMessage::Vote {
                vote: VoteDirection::Downvote,
                ..
            }
        ));
        assert_eq!(queue.get("a").unwrap().vote_count, 4);
        assert!(!queue.get("a").unwrap().has_voted("me"));
    }

    #[test]
    fn vote_direction_follows_server_voter_list() {
        let mut queue = QueueProjector::new();
        let mut voted = song("a", 1, "2024-01-01T00:00:00Z");
        voted.upvotes = vec![Upvote { user_id: "me".into() }];
        queue.apply_song_added(voted);

        let msg = queue.vote("room", "a", "me").unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Vote {
                vote: VoteDirection::Downvote,
                ..
            }
        ));
    }

    #[test]
    fn current_song_is_promoted_out_of_the_queue() {
        let mut queue = QueueProjector::new();
        queue.apply_queue_update(vec![
            song("a", 2, "2024-01-01T00:00:00Z"),
            song("b", 1, "2024-01-01T00:00:01Z"),
        ]);
        queue.apply_current_song(Some(song("a", 2, "2024-01-01T00:00:00Z")));
        assert_eq!(ids(&queue), ["b"]);
        assert_eq!(queue.now_playing().unwrap().id, "a");

        // A later full update that still lists the playing song hides it.
        queue.apply_queue_update(vec![
            song("a", 2, "2024-01-01T00:00:00Z"),
            song("b", 1, "2024-01-01T00:00:01Z"),
        ]);
        assert_eq!(ids(&queue), ["b"]);
    }

    #[test]
    fn remove_and_clear() {
        let mut queue = QueueProjector::new();
        queue.apply_queue_update(vec![
            song("a", 0, "2024-01-01T00:00:00Z"),
            song("b", 0, "2024-01-01T00:00:01Z"),
        ]);
        assert_eq!(queue.remove("a").unwrap().id, "a");
        assert!(queue.remove("a").is_none());
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn classifies_youtube_links() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.YouTube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com:443/watch?v=dQw4w9WgXcQ",
            "youtu.be/dQw4w9WgXcQ",
            "dQw4w9WgXcQ",
        ] {
            assert_eq!(SourceType::classify_url(url), Some(SourceType::YouTube), "{url}");
        }
    }

    #[test]
    fn classifies_spotify_links() {
        for url in [
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=xyz",
            "https://open.spotify.com/intl-de/track/4uLU6hMCjMI75M1A2tKUQC",
            "https://spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            "HTTPS://OPEN.SPOTIFY.COM/track/4uLU6hMCjMI75M1A2tKUQC",
            "open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
        ] {
            assert_eq!(SourceType::classify_url(url), Some(SourceType::Spotify), "{url}");
        }
    }

    #[test]
    fn rejects_other_links() {
        for url in [
            "https://example.com/song.mp3",
            "https://open.spotify.com/album/4uLU6hMCjMI75M1A2tKUQC",
            "https://www.youtube.com/watch?v=short",
            "https://notyoutube.com/watch?v=dQw4w9WgXcQ",
            "ftp://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "spotify:track:",
            "",
        ] {
            assert_eq!(SourceType::classify_url(url), None, "{url}");
        }
    }

    #[test]
    fn add_request_validates_url() {
        let space: SpaceId = "room".into();
        let err = add_to_queue_request(&space, "ftp://nope").unwrap_err();
        assert!(matches!(err, RoomSyncError::InvalidUrl(_)));

        let msg = add_to_queue_request(&space, " https://youtu.be/dQw4w9WgXcQ ").unwrap();
        assert_eq!(
            msg,
            ClientMessage::AddToQueue {
                space_id: "room".into(),
                url: "https://youtu.be/dQw4w9WgXcQ".into(),
            }
        );
    }
}
