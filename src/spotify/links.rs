use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://open\.spotify\.com/(?:intl-[a-z]{2}/)?([a-z]+)/([A-Za-z0-9]{22})")
        .expect("link pattern is valid")
});

static PLAYLIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:spotify:playlist:|https://open\.spotify\.com/playlist/)?([A-Za-z0-9]{22})(?:[?/].*)?$")
        .expect("playlist pattern is valid")
});

/// How a track reference was discovered in a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    Track,
    Album,
    Artist,
}

impl LinkKind {
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "track" => Some(Self::Track),
            "album" => Some(Self::Album),
            "artist" => Some(Self::Artist),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Artist => "artist",
        }
    }
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shared link. Albums and artists expand to tracks before they are appended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackRef {
    pub kind: LinkKind,
    pub id: String,
}

impl TrackRef {
    pub fn new(kind: LinkKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Parse a single open.spotify.com link
    pub fn parse(link: &str) -> Option<Self> {
        extract_links(link).into_iter().next()
    }

    pub fn url(&self) -> String {
        format!("https://open.spotify.com/{}/{}", self.kind, self.id)
    }
}

/// Find every track, album and artist link in a chat message, in order.
pub fn extract_links(text: &str) -> Vec<TrackRef> {
    LINK_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let kind = LinkKind::from_path(caps.get(1)?.as_str())?;
            Some(TrackRef::new(kind, caps.get(2)?.as_str()))
        })
        .collect()
}

/// Normalize a playlist URI, URL or bare id to the bare id.
pub fn playlist_id(input: &str) -> Option<String> {
    PLAYLIST_RE
        .captures(input.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Public link for a stored playlist identifier
pub fn playlist_url(playlist: &str) -> String {
    let id = playlist_id(playlist).unwrap_or_else(|| playlist.to_string());
    format!("https://open.spotify.com/playlist/{}", id)
}

pub fn track_uri(track_id: &str) -> String {
    format!("spotify:track:{}", track_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_mixed_links() {
        let text = "check https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc and \
                    https://open.spotify.com/album/6N9PS4QXF1D0OWPk0Sxtb4 \
                    plus https://open.spotify.com/show/6N9PS4QXF1D0OWPk0Sxtb4";
        let links = extract_links(text);
        assert_eq!(
            links,
            vec![
                TrackRef::new(LinkKind::Track, "4uLU6hMCjMI75M1A2tKUQC"),
                TrackRef::new(LinkKind::Album, "6N9PS4QXF1D0OWPk0Sxtb4"),
            ]
        );
    }

    #[test]
    fn test_extract_localized_artist_link() {
        let links = extract_links("https://open.spotify.com/intl-de/artist/0gxyHStUsqpMadRV0Di1Qt");
        assert_eq!(links, vec![TrackRef::new(LinkKind::Artist, "0gxyHStUsqpMadRV0Di1Qt")]);
    }

    #[test]
    fn test_extract_ignores_plain_text() {
        assert!(extract_links("no links here, just spotify talk").is_empty());
        assert!(extract_links("https://open.spotify.com/track/short").is_empty());
    }

    #[test]
    fn test_probe_message_parses() {
        let link = TrackRef::new(LinkKind::Track, "4uLU6hMCjMI75M1A2tKUQC");
        let posted = format!("!debug {}", link.url());
        assert_eq!(TrackRef::parse(&posted), Some(link));
    }

    #[test]
    fn test_playlist_id_forms() {
        let id = "37i9dQZF1DXcBWIGoYBM5M";
        assert_eq!(playlist_id(id).as_deref(), Some(id));
        assert_eq!(playlist_id(&format!("spotify:playlist:{}", id)).as_deref(), Some(id));
        assert_eq!(
            playlist_id(&format!("https://open.spotify.com/playlist/{}?si=x", id)).as_deref(),
            Some(id)
        );
        assert!(playlist_id("spotify:album:37i9dQZF1DXcBWIGoYBM5M").is_none());
        assert_eq!(
            playlist_url(&format!("spotify:playlist:{}", id)),
            format!("https://open.spotify.com/playlist/{}", id)
        );
    }
}
