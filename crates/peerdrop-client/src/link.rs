//! Shareable links
//!
//! The only bootstrap state two users agree on out of band is one session
//! id, passed either as-is or inside a link of the form
//! `<origin>/?peerId=<id>`.

use peerdrop_core::{Error, Result, SessionId};
use url::Url;

/// Query parameter carrying the peer id in a shareable link
pub const PEER_ID_PARAM: &str = "peerId";

/// Build the link another user opens to connect to `id`
pub fn share_link(origin: &str, id: &SessionId) -> Result<String> {
    let mut url = Url::parse(origin).map_err(|e| Error::InvalidLink(format!("{}: {}", origin, e)))?;
    url.set_path("/");
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair(PEER_ID_PARAM, id.as_str());
    Ok(url.to_string())
}

/// A peer id as typed or pasted by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    /// A bare id
    Id(SessionId),
    /// An id taken from a shareable link
    Link(SessionId),
}

impl PeerTarget {
    /// Accept either a bare id or a shareable link
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Ok(url) = Url::parse(input) {
            if url.has_host() {
                return peer_id_from_url(&url).map(PeerTarget::Link);
            }
        }
        input.parse().map(PeerTarget::Id)
    }

    pub fn id(&self) -> &SessionId {
        match self {
            PeerTarget::Id(id) | PeerTarget::Link(id) => id,
        }
    }

    pub fn into_id(self) -> SessionId {
        match self {
            PeerTarget::Id(id) | PeerTarget::Link(id) => id,
        }
    }
}

fn peer_id_from_url(url: &Url) -> Result<SessionId> {
    url.query_pairs()
        .find(|(key, _)| key == PEER_ID_PARAM)
        .ok_or_else(|| Error::InvalidLink(format!("no {} in {}", PEER_ID_PARAM, url)))?
        .1
        .parse()
}
