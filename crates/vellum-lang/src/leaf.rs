//! Pure renderers for leaf components.
//!
//! Each renderer reads only its pre-coerced props and the resident context
//! and returns the resolved props handed to the presentation layer.
use crate::compiler::Props;
use crate::context::{GuestbookEntry, Identity, MediaRef, Post, ResidentDataContext};
use crate::registry::{LeafKind, PropValue};
use crate::sanitizer::is_safe_uri;
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub type ResolvedProps = BTreeMap<String, Value>;

const SHORT_BIO_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeafError {
    #[error("prop \"{0}\" is missing")]
    MissingProp(&'static str),
    #[error("prop \"{0}\" has the wrong type")]
    PropType(&'static str),
}

fn number(props: &Props, name: &'static str) -> Result<i64, LeafError> {
    props
        .get(name)
        .ok_or(LeafError::MissingProp(name))?
        .as_number()
        .ok_or(LeafError::PropType(name))
}

fn limit(props: &Props) -> Result<usize, LeafError> {
    number(props, "limit").map(|n| n.max(0) as usize)
}

fn string<'a>(props: &'a Props, name: &'static str) -> Result<&'a str, LeafError> {
    props
        .get(name)
        .ok_or(LeafError::MissingProp(name))?
        .as_str()
        .ok_or(LeafError::PropType(name))
}

fn boolean(props: &Props, name: &'static str) -> Result<bool, LeafError> {
    props
        .get(name)
        .ok_or(LeafError::MissingProp(name))
        .and_then(|value| match value {
            PropValue::Boolean(b) => Ok(*b),
            _ => Err(LeafError::PropType(name)),
        })
}

pub fn render_leaf(
    kind: LeafKind,
    props: &Props,
    context: &ResidentDataContext,
) -> Result<ResolvedProps, LeafError> {
    let value = match kind {
        LeafKind::PostList => post_list(props, context)?,
        LeafKind::Guestbook => guestbook(props, context)?,
        LeafKind::Bio => bio(props, context)?,
        LeafKind::DisplayName => json!({
            "name": display_name(&context.owner),
            "handle": context.owner.handle,
        }),
        LeafKind::Avatar => avatar(props, context)?,
        LeafKind::MediaGrid => media_grid(props, context)?,
        LeafKind::PostCount => json!({ "count": context.posts.len() }),
        LeafKind::FollowButton => follow_button(props, context)?,
    };

    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(ResolvedProps::new()),
    }
}

fn display_name(identity: &Identity) -> &str {
    identity
        .display_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(&identity.handle)
}

fn safe_url(url: &str) -> Option<&str> {
    (!url.trim().is_empty() && is_safe_uri(url)).then_some(url)
}

fn media_json(media: &MediaRef) -> Option<Value> {
    safe_url(&media.url).map(|url| {
        json!({
            "id": media.id,
            "url": url,
            "kind": media.kind,
            "alt": media.alt,
        })
    })
}

fn post_list(props: &Props, context: &ResidentDataContext) -> Result<Value, LeafError> {
    let limit = limit(props)?;
    let order = string(props, "order")?;
    let show_media = boolean(props, "showmedia")?;

    let mut posts = context.posts.iter().collect::<Vec<&Post>>();
    match order {
        "oldest" => posts.sort_by_key(|post| post.created_at),
        _ => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }

    let items = posts
        .into_iter()
        .take(limit)
        .map(|post| {
            let media = if show_media {
                post.media.iter().filter_map(media_json).collect()
            } else {
                Vec::new()
            };

            json!({
                "id": post.id,
                "title": post.title,
                "body": post.body,
                "created_at": post.created_at.to_rfc3339(),
                "media": media,
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "posts": items,
        "order": order,
        "total": context.posts.len(),
    }))
}

fn guestbook(props: &Props, context: &ResidentDataContext) -> Result<Value, LeafError> {
    let limit = limit(props)?;

    let mut entries = context.guestbook.iter().collect::<Vec<&GuestbookEntry>>();
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let items = entries
        .into_iter()
        .take(limit)
        .map(|entry| {
            json!({
                "id": entry.id,
                "author": {
                    "id": entry.author.id,
                    "handle": entry.author.handle,
                    "name": display_name(&entry.author),
                },
                "body": entry.body,
                "created_at": entry.created_at.to_rfc3339(),
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "entries": items,
        "can_sign": !context.viewer.is_anonymous()
            && context.capability_flag("canSignGuestbook"),
    }))
}

fn bio(props: &Props, context: &ResidentDataContext) -> Result<Value, LeafError> {
    let text = context.owner.bio.as_deref().unwrap_or_default();
    let (text, truncated) = match string(props, "format")? {
        "short" if text.chars().count() > SHORT_BIO_CHARS => {
            let mut short = text
                .chars()
                .take(SHORT_BIO_CHARS - 1)
                .collect::<String>()
                .trim_end()
                .to_string();
            short.push('…');
            (short, true)
        }
        _ => (text.to_string(), false),
    };

    Ok(json!({ "text": text, "truncated": truncated }))
}

fn avatar(props: &Props, context: &ResidentDataContext) -> Result<Value, LeafError> {
    let pixels = match string(props, "size")? {
        "small" => 48,
        "large" => 192,
        _ => 96,
    };

    Ok(json!({
        "src": context.owner.avatar_url.as_deref().and_then(safe_url),
        "alt": display_name(&context.owner),
        "size": pixels,
    }))
}

fn media_grid(props: &Props, context: &ResidentDataContext) -> Result<Value, LeafError> {
    let limit = limit(props)?;
    let columns = number(props, "columns")?;

    let items = context
        .media
        .iter()
        .filter_map(media_json)
        .take(limit)
        .collect::<Vec<_>>();

    Ok(json!({ "items": items, "columns": columns }))
}

fn follow_button(props: &Props, context: &ResidentDataContext) -> Result<Value, LeafError> {
    let label = string(props, "label")?;
    let state = if context.viewer.is_anonymous() {
        "sign_in"
    } else if context.viewer_is_owner() {
        "self"
    } else if context.capability_flag("canFollow") {
        "follow"
    } else {
        "unavailable"
    };

    Ok(json!({ "label": label, "state": state }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Capability, MediaKind, Viewer};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use smol_str::SmolStr;

    fn post(id: &str, day: u32) -> Post {
        Post {
            id: SmolStr::new(id),
            title: None,
            body: format!("body {}", id),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            media: vec![
                MediaRef {
                    id: SmolStr::new("m1"),
                    url: "https://cdn.test/a.png".to_string(),
                    kind: MediaKind::Image,
                    alt: None,
                },
                MediaRef {
                    id: SmolStr::new("m2"),
                    url: "javascript:alert(1)".to_string(),
                    kind: MediaKind::Image,
                    alt: None,
                },
            ],
        }
    }

    fn context(viewer: Viewer) -> ResidentDataContext {
        let mut context = ResidentDataContext::new(Identity::new("u1", "alice"), viewer);
        context.posts = vec![post("p1", 1), post("p2", 3), post("p3", 2)];
        context
    }

    fn props(pairs: &[(&'static str, PropValue)]) -> Props {
        pairs.iter().cloned().collect()
    }

    #[rstest]
    #[case::newest("newest", vec!["p2", "p3"])]
    #[case::oldest("oldest", vec!["p1", "p3"])]
    fn test_post_list_order_and_limit(#[case] order: &str, #[case] expected: Vec<&str>) {
        let props = props(&[
            ("limit", PropValue::Number(2)),
            ("order", PropValue::String(order.to_string())),
            ("showmedia", PropValue::Boolean(true)),
        ]);
        let resolved = render_leaf(LeafKind::PostList, &props, &context(Viewer::Anonymous)).unwrap();

        let ids = resolved["posts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|post| post["id"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, expected);
        assert_eq!(resolved["total"], json!(3));
        assert_eq!(resolved["posts"][0]["media"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_prop_is_an_error() {
        assert_eq!(
            render_leaf(LeafKind::PostList, &Props::new(), &context(Viewer::Anonymous)),
            Err(LeafError::MissingProp("limit"))
        );
    }

    #[test]
    fn test_short_bio_is_truncated() {
        let mut context = context(Viewer::Anonymous);
        context.owner.bio = Some("a".repeat(300));
        let props = props(&[("format", PropValue::String("short".to_string()))]);

        let resolved = render_leaf(LeafKind::Bio, &props, &context).unwrap();
        assert_eq!(resolved["truncated"], json!(true));
        assert_eq!(
            resolved["text"].as_str().unwrap().chars().count(),
            SHORT_BIO_CHARS
        );
    }

    #[test]
    fn test_display_name_falls_back_to_handle() {
        let resolved =
            render_leaf(LeafKind::DisplayName, &Props::new(), &context(Viewer::Anonymous)).unwrap();
        assert_eq!(resolved["name"], json!("alice"));
    }

    #[test]
    fn test_avatar_drops_unsafe_url() {
        let mut context = context(Viewer::Anonymous);
        context.owner.avatar_url = Some("javascript:alert(1)".to_string());
        let props = props(&[("size", PropValue::String("large".to_string()))]);

        let resolved = render_leaf(LeafKind::Avatar, &props, &context).unwrap();
        assert_eq!(resolved["src"], Value::Null);
        assert_eq!(resolved["size"], json!(192));
    }

    #[rstest]
    #[case::anonymous(Viewer::Anonymous, false, "sign_in")]
    #[case::owner(Viewer::Authenticated(Identity::new("u1", "alice")), true, "self")]
    #[case::can_follow(Viewer::Authenticated(Identity::new("u2", "bob")), true, "follow")]
    #[case::blocked(Viewer::Authenticated(Identity::new("u2", "bob")), false, "unavailable")]
    fn test_follow_button_state(
        #[case] viewer: Viewer,
        #[case] can_follow: bool,
        #[case] expected: &str,
    ) {
        let mut context = context(viewer);
        context
            .capabilities
            .insert(SmolStr::new("canFollow"), Capability::Flag(can_follow));
        let props = props(&[("label", PropValue::String("Follow".to_string()))]);

        let resolved = render_leaf(LeafKind::FollowButton, &props, &context).unwrap();
        assert_eq!(resolved["state"], json!(expected));
    }

    #[test]
    fn test_post_count() {
        let resolved =
            render_leaf(LeafKind::PostCount, &Props::new(), &context(Viewer::Anonymous)).unwrap();
        assert_eq!(resolved["count"], json!(3));
    }
}
