//! The closed vocabulary of custom tags.
//!
//! Every tag a template may use beyond plain markup is declared here with its
//! kind and prop schema. Names live in one flat, case-insensitive namespace
//! and nothing can be registered at runtime.
use crate::config::TemplateMode;
use crate::data_path::DataPath;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt::{self, Display};
use std::sync::LazyLock;

/// Bumped whenever a tag or prop schema changes.
pub const REGISTRY_VERSION: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Structure {
    Choose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Gate {
    Show,
    When,
    Otherwise,
    IfOwner,
    IfVisitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LeafKind {
    PostList,
    Guestbook,
    Bio,
    DisplayName,
    Avatar,
    MediaGrid,
    PostCount,
    FollowButton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComponentKind {
    Structural(Structure),
    Conditional(Gate),
    Leaf(LeafKind),
}

impl ComponentKind {
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            ComponentKind::Conditional(Gate::When) | ComponentKind::Conditional(Gate::Otherwise)
        )
    }
}

/// Slice of the context a leaf component reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Owner,
    Viewer,
    Posts,
    Guestbook,
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropType {
    String { max_len: usize },
    Enum { values: &'static [&'static str] },
    Number { min: i64, max: i64 },
    Boolean,
    DataPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Fallback {
    Absent,
    Str(&'static str),
    Number(i64),
    Boolean(bool),
}

/// A coerced prop value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PropValue {
    String(String),
    Number(i64),
    Boolean(bool),
    Path(DataPath),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            PropValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&DataPath> {
        match self {
            PropValue::Path(path) => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropSchema {
    pub name: &'static str,
    #[serde(flatten)]
    pub ty: PropType,
    pub fallback: Fallback,
    pub required: bool,
}

impl PropSchema {
    const fn new(name: &'static str, ty: PropType, fallback: Fallback) -> Self {
        Self {
            name,
            ty,
            fallback,
            required: false,
        }
    }

    const fn required(name: &'static str, ty: PropType) -> Self {
        Self {
            name,
            ty,
            fallback: Fallback::Absent,
            required: true,
        }
    }

    pub fn fallback_value(&self) -> Option<PropValue> {
        match self.fallback {
            Fallback::Absent => None,
            Fallback::Str(s) => Some(PropValue::String(s.to_string())),
            Fallback::Number(n) => Some(PropValue::Number(n)),
            Fallback::Boolean(b) => Some(PropValue::Boolean(b)),
        }
    }

    /// Converts a raw attribute value into this prop's type.
    pub fn coerce(&self, raw: &str) -> Result<PropValue, String> {
        match self.ty {
            PropType::String { max_len } => {
                if raw.chars().count() > max_len {
                    Err(format!("longer than {} characters", max_len))
                } else {
                    Ok(PropValue::String(raw.to_string()))
                }
            }
            PropType::Enum { values } => values
                .iter()
                .find(|value| value.eq_ignore_ascii_case(raw.trim()))
                .map(|value| PropValue::String(value.to_string()))
                .ok_or_else(|| format!("expected one of {}", values.join(", "))),
            PropType::Number { min, max } => match raw.trim().parse::<i64>() {
                Ok(n) if (min..=max).contains(&n) => Ok(PropValue::Number(n)),
                Ok(n) => Err(format!("{} is outside [{}, {}]", n, min, max)),
                Err(_) => Err(format!("\"{}\" is not a whole number", raw)),
            },
            PropType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "" | "true" | "1" | "yes" => Ok(PropValue::Boolean(true)),
                "false" | "0" | "no" => Ok(PropValue::Boolean(false)),
                _ => Err(format!("\"{}\" is not a boolean", raw)),
            },
            PropType::DataPath => raw
                .parse::<DataPath>()
                .map(PropValue::Path)
                .map_err(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComponentDescriptor {
    pub tag_name: &'static str,
    pub kind: ComponentKind,
    pub allowed_props: &'static [PropSchema],
    pub requires_data: Option<DataSource>,
    /// Lowest template mode in which the tag is available.
    pub min_mode: TemplateMode,
    /// Hydrated on the client when template islands are enabled.
    pub interactive: bool,
    pub description: &'static str,
}

impl ComponentDescriptor {
    pub fn prop(&self, name: &str) -> Option<&'static PropSchema> {
        self.allowed_props
            .iter()
            .find(|schema| schema.name.eq_ignore_ascii_case(name))
    }
}

impl Display for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag_name)
    }
}

const PREDICATE_PROPS: &[PropSchema] = &[
    PropSchema::required("data", PropType::DataPath),
    PropSchema::new("equals", PropType::String { max_len: 200 }, Fallback::Absent),
];

const LIMIT: PropType = PropType::Number { min: 1, max: 50 };

static COMPONENTS: &[ComponentDescriptor] = &[
    ComponentDescriptor {
        tag_name: "Show",
        kind: ComponentKind::Conditional(Gate::Show),
        allowed_props: PREDICATE_PROPS,
        requires_data: None,
        min_mode: TemplateMode::Enhanced,
        interactive: false,
        description: "Renders its children when the data path is truthy or equals a value.",
    },
    ComponentDescriptor {
        tag_name: "Choose",
        kind: ComponentKind::Structural(Structure::Choose),
        allowed_props: &[],
        requires_data: None,
        min_mode: TemplateMode::Advanced,
        interactive: false,
        description: "Renders the first matching When, or Otherwise.",
    },
    ComponentDescriptor {
        tag_name: "When",
        kind: ComponentKind::Conditional(Gate::When),
        allowed_props: PREDICATE_PROPS,
        requires_data: None,
        min_mode: TemplateMode::Advanced,
        interactive: false,
        description: "A Choose branch guarded like Show.",
    },
    ComponentDescriptor {
        tag_name: "Otherwise",
        kind: ComponentKind::Conditional(Gate::Otherwise),
        allowed_props: &[],
        requires_data: None,
        min_mode: TemplateMode::Advanced,
        interactive: false,
        description: "The Choose branch used when no When matches.",
    },
    ComponentDescriptor {
        tag_name: "IfOwner",
        kind: ComponentKind::Conditional(Gate::IfOwner),
        allowed_props: &[],
        requires_data: None,
        min_mode: TemplateMode::Enhanced,
        interactive: false,
        description: "Renders its children only for the profile owner.",
    },
    ComponentDescriptor {
        tag_name: "IfVisitor",
        kind: ComponentKind::Conditional(Gate::IfVisitor),
        allowed_props: &[],
        requires_data: None,
        min_mode: TemplateMode::Enhanced,
        interactive: false,
        description: "Renders its children for everyone except the profile owner.",
    },
    ComponentDescriptor {
        tag_name: "PostList",
        kind: ComponentKind::Leaf(LeafKind::PostList),
        allowed_props: &[
            PropSchema::new("limit", LIMIT, Fallback::Number(10)),
            PropSchema::new(
                "order",
                PropType::Enum {
                    values: &["newest", "oldest"],
                },
                Fallback::Str("newest"),
            ),
            PropSchema::new("showmedia", PropType::Boolean, Fallback::Boolean(true)),
        ],
        requires_data: Some(DataSource::Posts),
        min_mode: TemplateMode::Basic,
        interactive: false,
        description: "The owner's posts.",
    },
    ComponentDescriptor {
        tag_name: "Guestbook",
        kind: ComponentKind::Leaf(LeafKind::Guestbook),
        allowed_props: &[PropSchema::new("limit", LIMIT, Fallback::Number(10))],
        requires_data: Some(DataSource::Guestbook),
        min_mode: TemplateMode::Basic,
        interactive: true,
        description: "Guestbook entries left on the profile.",
    },
    ComponentDescriptor {
        tag_name: "Bio",
        kind: ComponentKind::Leaf(LeafKind::Bio),
        allowed_props: &[PropSchema::new(
            "format",
            PropType::Enum {
                values: &["short", "full"],
            },
            Fallback::Str("full"),
        )],
        requires_data: Some(DataSource::Owner),
        min_mode: TemplateMode::Basic,
        interactive: false,
        description: "The owner's bio.",
    },
    ComponentDescriptor {
        tag_name: "DisplayName",
        kind: ComponentKind::Leaf(LeafKind::DisplayName),
        allowed_props: &[],
        requires_data: Some(DataSource::Owner),
        min_mode: TemplateMode::Basic,
        interactive: false,
        description: "The owner's display name, or handle when unset.",
    },
    ComponentDescriptor {
        tag_name: "Avatar",
        kind: ComponentKind::Leaf(LeafKind::Avatar),
        allowed_props: &[PropSchema::new(
            "size",
            PropType::Enum {
                values: &["small", "medium", "large"],
            },
            Fallback::Str("medium"),
        )],
        requires_data: Some(DataSource::Owner),
        min_mode: TemplateMode::Basic,
        interactive: false,
        description: "The owner's avatar image.",
    },
    ComponentDescriptor {
        tag_name: "MediaGrid",
        kind: ComponentKind::Leaf(LeafKind::MediaGrid),
        allowed_props: &[
            PropSchema::new("limit", LIMIT, Fallback::Number(12)),
            PropSchema::new(
                "columns",
                PropType::Number { min: 1, max: 6 },
                Fallback::Number(3),
            ),
        ],
        requires_data: Some(DataSource::Media),
        min_mode: TemplateMode::Basic,
        interactive: false,
        description: "A grid of the owner's media.",
    },
    ComponentDescriptor {
        tag_name: "PostCount",
        kind: ComponentKind::Leaf(LeafKind::PostCount),
        allowed_props: &[],
        requires_data: Some(DataSource::Posts),
        min_mode: TemplateMode::Basic,
        interactive: false,
        description: "Number of visible posts.",
    },
    ComponentDescriptor {
        tag_name: "FollowButton",
        kind: ComponentKind::Leaf(LeafKind::FollowButton),
        allowed_props: &[PropSchema::new(
            "label",
            PropType::String { max_len: 40 },
            Fallback::Str("Follow"),
        )],
        requires_data: Some(DataSource::Viewer),
        min_mode: TemplateMode::Basic,
        interactive: true,
        description: "Follow control shown to signed-in visitors.",
    },
];

static BUILTIN: LazyLock<ComponentRegistry> =
    LazyLock::new(|| ComponentRegistry::new(REGISTRY_VERSION, COMPONENTS));

#[derive(Debug)]
pub struct ComponentRegistry {
    version: u16,
    components: &'static [ComponentDescriptor],
    tag_names: Vec<&'static str>,
    index: FxHashMap<String, usize>,
}

impl ComponentRegistry {
    fn new(version: u16, components: &'static [ComponentDescriptor]) -> Self {
        let index = components
            .iter()
            .enumerate()
            .map(|(i, descriptor)| (descriptor.tag_name.to_ascii_lowercase(), i))
            .collect();

        Self {
            version,
            components,
            tag_names: components.iter().map(|descriptor| descriptor.tag_name).collect(),
            index,
        }
    }

    pub fn builtin() -> &'static ComponentRegistry {
        &BUILTIN
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn get(&self, tag: &str) -> Option<&'static ComponentDescriptor> {
        self.index
            .get(tag.to_ascii_lowercase().as_str())
            .map(|&i| &self.components[i])
    }

    /// Tag names the parser must keep in place.
    pub fn tag_names(&self) -> &[&'static str] {
        &self.tag_names
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ComponentDescriptor> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
