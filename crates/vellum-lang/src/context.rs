use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: SmolStr,
    pub handle: SmolStr,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn new(id: &str, handle: &str) -> Self {
        Self {
            id: SmolStr::new(id),
            handle: SmolStr::new(handle),
            display_name: None,
            bio: None,
            avatar_url: None,
        }
    }
}

/// Who is looking at the page. Serialized as an identity or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<Identity>", into = "Option<Identity>")]
pub enum Viewer {
    #[default]
    Anonymous,
    Authenticated(Identity),
}

impl From<Option<Identity>> for Viewer {
    fn from(identity: Option<Identity>) -> Self {
        match identity {
            Some(identity) => Viewer::Authenticated(identity),
            None => Viewer::Anonymous,
        }
    }
}

impl From<Viewer> for Option<Identity> {
    fn from(viewer: Viewer) -> Self {
        match viewer {
            Viewer::Authenticated(identity) => Some(identity),
            Viewer::Anonymous => None,
        }
    }
}

impl Viewer {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Viewer::Authenticated(identity) => Some(identity),
            Viewer::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Viewer::Anonymous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: SmolStr,
    pub url: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: SmolStr,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestbookEntry {
    pub id: SmolStr,
    pub author: Identity,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Capability {
    Flag(bool),
    Text(String),
}

/// Everything a single render may read. Assembled by the caller before
/// rendering and never mutated while a render is in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentDataContext {
    pub owner: Identity,
    #[serde(default)]
    pub viewer: Viewer,
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub guestbook: Vec<GuestbookEntry>,
    #[serde(default)]
    pub capabilities: BTreeMap<SmolStr, Capability>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl ResidentDataContext {
    pub fn new(owner: Identity, viewer: Viewer) -> Self {
        Self {
            owner,
            viewer,
            posts: Vec::new(),
            guestbook: Vec::new(),
            capabilities: BTreeMap::new(),
            media: Vec::new(),
        }
    }

    /// An anonymous viewer is never the owner.
    pub fn viewer_is_owner(&self) -> bool {
        self.viewer
            .identity()
            .is_some_and(|viewer| viewer.id == self.owner.id)
    }

    pub fn capability_flag(&self, name: &str) -> bool {
        matches!(self.capabilities.get(name), Some(Capability::Flag(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_is_owner() {
        let owner = Identity::new("u1", "alice");
        let mut context = ResidentDataContext::new(owner.clone(), Viewer::Anonymous);
        assert!(!context.viewer_is_owner());

        context.viewer = Viewer::Authenticated(Identity::new("u2", "bob"));
        assert!(!context.viewer_is_owner());

        context.viewer = Viewer::Authenticated(owner);
        assert!(context.viewer_is_owner());
    }

    #[test]
    fn test_context_from_json() {
        let json = r#"{
            "owner": {"id": "u1", "handle": "alice", "bio": "hello"},
            "viewer": null,
            "posts": [{"id": "p1", "body": "first", "created_at": "2024-01-02T03:04:05Z"}],
            "capabilities": {"canSignGuestbook": true, "theme": "dark"}
        }"#;

        let context: ResidentDataContext = serde_json::from_str(json).unwrap();

        assert_eq!(context.owner.bio.as_deref(), Some("hello"));
        assert!(context.viewer.is_anonymous());
        assert_eq!(context.posts.len(), 1);
        assert!(context.guestbook.is_empty());
        assert!(context.capability_flag("canSignGuestbook"));
        assert_eq!(
            context.capabilities.get("theme"),
            Some(&Capability::Text("dark".to_string()))
        );
    }

    #[test]
    fn test_viewer_round_trips_as_option() {
        let viewer = Viewer::Authenticated(Identity::new("u2", "bob"));
        let json = serde_json::to_string(&viewer).unwrap();
        let parsed: Viewer = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, viewer);
        assert_eq!(serde_json::to_string(&Viewer::Anonymous).unwrap(), "null");
    }
}
