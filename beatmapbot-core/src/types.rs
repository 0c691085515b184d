/// A unit from one of the monitored streams. Reddit calls these "things";
/// the bot only ever handles comments and self-post submissions.
#[derive(Debug, Clone)]
pub enum Thing {
    Comment {
        id: String,
        author: String,
        permalink: String,
        body_html: String,
    },
    Submission {
        id: String,
        author: String,
        permalink: String,
        selftext_html: Option<String>,
    },
}

impl Thing {
    pub fn id(&self) -> &str {
        match self {
            Thing::Comment { id, .. } | Thing::Submission { id, .. } => id,
        }
    }

    pub fn author(&self) -> &str {
        match self {
            Thing::Comment { author, .. } | Thing::Submission { author, .. } => author,
        }
    }

    pub fn permalink(&self) -> &str {
        match self {
            Thing::Comment { permalink, .. } | Thing::Submission { permalink, .. } => permalink,
        }
    }

    /// Rendered HTML body, if the thing has one. Link submissions have none.
    pub fn body_html(&self) -> Option<&str> {
        match self {
            Thing::Comment { body_html, .. } => Some(body_html),
            Thing::Submission { selftext_html, .. } => selftext_html.as_deref(),
        }
    }

    /// Reddit fullname prefix + id, as required by the comment endpoint.
    pub fn fullname(&self) -> String {
        match self {
            Thing::Comment { id, .. } => format!("t1_{id}"),
            Thing::Submission { id, .. } => format!("t3_{id}"),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Thing::Comment { .. } => "comment",
            Thing::Submission { .. } => "submission",
        }
    }
}

/// One node of a submission's comment tree, reduced to what the
/// has-replied check needs.
#[derive(Debug, Clone)]
pub struct CommentNode {
    pub id: String,
    pub author: String,
    pub replies: Vec<CommentNode>,
}

/// Which kind of osu! resource a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    Beatmap,
    Mapset,
}

impl MapKind {
    /// Query parameter name in the osu! v1 API.
    pub fn as_param(self) -> &'static str {
        match self {
            MapKind::Beatmap => "b",
            MapKind::Mapset => "s",
        }
    }
}

/// A parsed (kind, id) beatmap reference extracted from a thing's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapRef {
    pub kind: MapKind,
    pub id: u64,
}

impl MapRef {
    pub fn beatmap(id: u64) -> Self {
        Self {
            kind: MapKind::Beatmap,
            id,
        }
    }

    pub fn mapset(id: u64) -> Self {
        Self {
            kind: MapKind::Mapset,
            id,
        }
    }
}
