//! Dotted data paths usable from `data` props.
//!
//! Paths form a closed vocabulary over [`ResidentDataContext`]. Anything
//! outside it fails to parse, so templates can never reach fields that are
//! not listed here.
use crate::context::{Capability, Identity, ResidentDataContext};
use serde::{Serialize, Serializer};
use smol_str::SmolStr;
use std::fmt::{self, Display};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityField {
    Id,
    Handle,
    DisplayName,
    Bio,
    Avatar,
}

impl IdentityField {
    fn parse(segment: &str) -> Option<Self> {
        match normalize(segment).as_str() {
            "id" => Some(IdentityField::Id),
            "handle" => Some(IdentityField::Handle),
            "displayname" => Some(IdentityField::DisplayName),
            "bio" => Some(IdentityField::Bio),
            "avatar" | "avatarurl" => Some(IdentityField::Avatar),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IdentityField::Id => "id",
            IdentityField::Handle => "handle",
            IdentityField::DisplayName => "displayName",
            IdentityField::Bio => "bio",
            IdentityField::Avatar => "avatar",
        }
    }

    fn read(&self, identity: &Identity) -> DataValue {
        match self {
            IdentityField::Id => DataValue::Text(identity.id.to_string()),
            IdentityField::Handle => DataValue::Text(identity.handle.to_string()),
            IdentityField::DisplayName => identity.display_name.clone().into(),
            IdentityField::Bio => identity.bio.clone().into(),
            IdentityField::Avatar => identity.avatar_url.clone().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataPath {
    Owner(IdentityField),
    Viewer(IdentityField),
    ViewerIsAnonymous,
    ViewerIsOwner,
    PostsLength,
    GuestbookLength,
    MediaLength,
    Capability(SmolStr),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("\"{0}\" is not a known data path")]
pub struct UnknownDataPath(pub String);

/// A value read from the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    Null,
    Bool(bool),
    Number(i64),
    Text(String),
}

impl From<Option<String>> for DataValue {
    fn from(value: Option<String>) -> Self {
        value.map(DataValue::Text).unwrap_or(DataValue::Null)
    }
}

impl DataValue {
    /// `Null`, `false`, `0`, `""`, `"0"` and `"false"` (any ASCII case) are
    /// falsy. Everything else, including whitespace-only text, is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            DataValue::Null => false,
            DataValue::Bool(b) => *b,
            DataValue::Number(n) => *n != 0,
            DataValue::Text(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        }
    }

    /// Compares the stringified value. `Null` never equals anything.
    pub fn equals(&self, expected: &str) -> bool {
        match self {
            DataValue::Null => false,
            DataValue::Bool(b) => b.to_string() == expected,
            DataValue::Number(n) => n.to_string() == expected,
            DataValue::Text(s) => s == expected,
        }
    }
}

fn normalize(segment: &str) -> String {
    segment.replace('_', "").to_ascii_lowercase()
}

impl FromStr for DataPath {
    type Err = UnknownDataPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let unknown = || UnknownDataPath(raw.to_string());
        let (head, tail) = raw.split_once('.').ok_or_else(unknown)?;

        if tail.is_empty() {
            return Err(unknown());
        }

        match normalize(head).as_str() {
            "owner" => IdentityField::parse(tail)
                .map(DataPath::Owner)
                .ok_or_else(unknown),
            "viewer" => match normalize(tail).as_str() {
                "isanonymous" => Ok(DataPath::ViewerIsAnonymous),
                "isowner" => Ok(DataPath::ViewerIsOwner),
                _ => IdentityField::parse(tail)
                    .map(DataPath::Viewer)
                    .ok_or_else(unknown),
            },
            "posts" if normalize(tail) == "length" => Ok(DataPath::PostsLength),
            "guestbook" if normalize(tail) == "length" => Ok(DataPath::GuestbookLength),
            "media" if normalize(tail) == "length" => Ok(DataPath::MediaLength),
            "capabilities" if !tail.contains('.') => Ok(DataPath::Capability(SmolStr::new(tail))),
            _ => Err(unknown()),
        }
    }
}

impl Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataPath::Owner(field) => write!(f, "owner.{}", field.name()),
            DataPath::Viewer(field) => write!(f, "viewer.{}", field.name()),
            DataPath::ViewerIsAnonymous => write!(f, "viewer.isAnonymous"),
            DataPath::ViewerIsOwner => write!(f, "viewer.isOwner"),
            DataPath::PostsLength => write!(f, "posts.length"),
            DataPath::GuestbookLength => write!(f, "guestbook.length"),
            DataPath::MediaLength => write!(f, "media.length"),
            DataPath::Capability(name) => write!(f, "capabilities.{}", name),
        }
    }
}

impl Serialize for DataPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl DataPath {
    /// Reads the path from the context. `None` means the path does not
    /// resolve; viewer fields of an anonymous viewer resolve to `Null`.
    pub fn resolve(&self, context: &ResidentDataContext) -> Option<DataValue> {
        match self {
            DataPath::Owner(field) => Some(field.read(&context.owner)),
            DataPath::Viewer(field) => Some(
                context
                    .viewer
                    .identity()
                    .map(|viewer| field.read(viewer))
                    .unwrap_or(DataValue::Null),
            ),
            DataPath::ViewerIsAnonymous => Some(DataValue::Bool(context.viewer.is_anonymous())),
            DataPath::ViewerIsOwner => Some(DataValue::Bool(context.viewer_is_owner())),
            DataPath::PostsLength => Some(DataValue::Number(context.posts.len() as i64)),
            DataPath::GuestbookLength => Some(DataValue::Number(context.guestbook.len() as i64)),
            DataPath::MediaLength => Some(DataValue::Number(context.media.len() as i64)),
            DataPath::Capability(name) => context.capabilities.get(name).map(|cap| match cap {
                Capability::Flag(flag) => DataValue::Bool(*flag),
                Capability::Text(text) => DataValue::Text(text.clone()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Viewer;
    use rstest::rstest;

    fn context() -> ResidentDataContext {
        let mut owner = Identity::new("u1", "alice");
        owner.bio = Some("hi there".to_string());
        let mut context = ResidentDataContext::new(owner, Viewer::Anonymous);
        context
            .capabilities
            .insert(SmolStr::new("canFollow"), Capability::Flag(true));
        context
    }

    #[rstest]
    #[case::owner_id("owner.id", Ok(DataPath::Owner(IdentityField::Id)))]
    #[case::camel("owner.displayName", Ok(DataPath::Owner(IdentityField::DisplayName)))]
    #[case::snake("owner.display_name", Ok(DataPath::Owner(IdentityField::DisplayName)))]
    #[case::viewer_flag("viewer.isOwner", Ok(DataPath::ViewerIsOwner))]
    #[case::posts(" posts.length ", Ok(DataPath::PostsLength))]
    #[case::capability("capabilities.canFollow", Ok(DataPath::Capability(SmolStr::new("canFollow"))))]
    #[case::nested_capability("capabilities.a.b", Err(UnknownDataPath("capabilities.a.b".to_string())))]
    #[case::no_field("posts", Err(UnknownDataPath("posts".to_string())))]
    #[case::trailing_dot("owner.", Err(UnknownDataPath("owner.".to_string())))]
    #[case::private("owner.password", Err(UnknownDataPath("owner.password".to_string())))]
    #[case::index("posts.0.title", Err(UnknownDataPath("posts.0.title".to_string())))]
    fn test_parse(#[case] input: &str, #[case] expected: Result<DataPath, UnknownDataPath>) {
        assert_eq!(input.parse::<DataPath>(), expected);
    }

    #[rstest]
    #[case::bio("owner.bio", Some(DataValue::Text("hi there".to_string())))]
    #[case::missing_name("owner.displayName", Some(DataValue::Null))]
    #[case::anonymous_id("viewer.id", Some(DataValue::Null))]
    #[case::anonymous("viewer.isAnonymous", Some(DataValue::Bool(true)))]
    #[case::empty_posts("posts.length", Some(DataValue::Number(0)))]
    #[case::capability("capabilities.canFollow", Some(DataValue::Bool(true)))]
    #[case::missing_capability("capabilities.canEdit", None)]
    fn test_resolve(#[case] path: &str, #[case] expected: Option<DataValue>) {
        let path = path.parse::<DataPath>().unwrap();
        assert_eq!(path.resolve(&context()), expected);
    }

    #[rstest]
    #[case::null(DataValue::Null, false)]
    #[case::empty(DataValue::Text(String::new()), false)]
    #[case::zero_text(DataValue::Text("0".to_string()), false)]
    #[case::false_text(DataValue::Text("FALSE".to_string()), false)]
    #[case::space(DataValue::Text(" ".to_string()), true)]
    #[case::word(DataValue::Text("no".to_string()), true)]
    #[case::zero(DataValue::Number(0), false)]
    #[case::negative(DataValue::Number(-1), true)]
    #[case::bool_false(DataValue::Bool(false), false)]
    #[case::bool_true(DataValue::Bool(true), true)]
    fn test_truthiness(#[case] value: DataValue, #[case] expected: bool) {
        assert_eq!(value.is_truthy(), expected);
    }

    #[rstest]
    #[case(DataValue::Number(0), "0", true)]
    #[case(DataValue::Number(3), "03", false)]
    #[case(DataValue::Bool(true), "true", true)]
    #[case(DataValue::Text("Alice".to_string()), "alice", false)]
    #[case(DataValue::Null, "", false)]
    fn test_equals(#[case] value: DataValue, #[case] expected: &str, #[case] matches: bool) {
        assert_eq!(value.equals(expected), matches);
    }

    #[test]
    fn test_display_is_canonical() {
        let path = "owner.display_name".parse::<DataPath>().unwrap();
        assert_eq!(path.to_string(), "owner.displayName");
    }
}
