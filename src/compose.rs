use beatmapbot_core::{CoreError, MapKind, MapRef, TemplateConfig, TemplateExtra};
use osu_api::{BeatmapInfo, BeatmapSource};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Reddit's hard ceiling on comment length.
const MAX_COMMENT_LEN: usize = 10_000;

const LINE_BREAK: &str = "\n\n";

/// Builds reply text from an ordered list of map references.
///
/// De-duplicates the list (first occurrence wins), renders one template
/// block per unique map, and stops appending once the next block would
/// push the comment past the length ceiling.
pub struct Composer<S> {
    source: S,
    template: TemplateConfig,
    extras: HashMap<String, TemplateExtra>,
    limit: usize,
}

impl<S: BeatmapSource> Composer<S> {
    pub fn new(
        source: S,
        template: TemplateConfig,
        extras: HashMap<String, TemplateExtra>,
    ) -> Self {
        Self {
            source,
            template,
            extras,
            limit: MAX_COMMENT_LEN,
        }
    }

    pub async fn compose(&self, maps: &[MapRef]) -> Result<String, CoreError> {
        let sep = self.template.sep.as_str();
        let base_len =
            self.template.header.len() + self.template.footer.len() + LINE_BREAK.len() * 2;

        let mut body = String::new();
        let mut seen: HashSet<MapRef> = HashSet::new();
        for map in maps {
            if !seen.insert(*map) {
                continue;
            }
            let block = self.format_map(*map).await?;
            if base_len + body.len() + sep.len() + block.len() > self.limit {
                warn!(
                    "Reached the comment length limit; {} map reference(s) in this thing",
                    maps.len()
                );
                break;
            }
            if !body.is_empty() {
                body.push_str(sep);
            }
            body.push_str(&block);
        }

        Ok(format!(
            "{header}{LINE_BREAK}{body}{LINE_BREAK}{footer}",
            header = self.template.header,
            footer = self.template.footer,
        ))
    }

    /// One rendered block for a map reference; an unknown map renders a
    /// placeholder rather than failing the whole reply.
    async fn format_map(&self, map: MapRef) -> Result<String, CoreError> {
        let records = self.source.lookup(map.kind, map.id).await?;
        let Some(first) = records.first() else {
            return Ok(match map.kind {
                MapKind::Beatmap => "Invalid map.".to_string(),
                MapKind::Mapset => "Invalid mapset.".to_string(),
            });
        };

        let fields = self.prepare_fields(first);
        // One record is a single difficulty; several means the link was
        // to a whole set.
        let template = if records.len() == 1 {
            &self.template.map
        } else {
            &self.template.mapset
        };
        Ok(render(template, &fields))
    }

    fn prepare_fields(&self, info: &BeatmapInfo) -> HashMap<String, String> {
        let mut fields: HashMap<String, String> = HashMap::new();
        fields.insert("beatmap_id".to_string(), info.beatmap_id.clone());
        fields.insert("beatmapset_id".to_string(), info.beatmapset_id.clone());
        fields.insert("artist".to_string(), info.artist.clone());
        fields.insert("title".to_string(), info.title.clone());
        fields.insert("creator".to_string(), info.creator.clone());
        fields.insert("version".to_string(), info.version.clone());
        fields.insert("source".to_string(), info.source.clone());
        fields.insert("approved".to_string(), info.approved.clone());
        fields.insert("mode".to_string(), info.mode.clone());
        fields.insert("bpm".to_string(), info.bpm.clone());
        fields.insert("difficultyrating".to_string(), info.difficultyrating.clone());
        fields.insert("hit_length".to_string(), info.hit_length.clone());
        fields.insert("total_length".to_string(), info.total_length.clone());
        fields.insert(
            "max_combo".to_string(),
            info.max_combo.clone().unwrap_or_default(),
        );

        // Configured lookup tables run against the raw API values.
        for (name, extra) in &self.extras {
            if let Some(raw) = fields.get(&extra.key).cloned() {
                let display = extra.values.get(&raw).cloned().unwrap_or(raw);
                fields.insert(name.clone(), display);
            }
        }

        if let Some(rating) = fields.get("difficultyrating") {
            if let Ok(value) = rating.parse::<f64>() {
                fields.insert("difficultyrating".to_string(), format!("{value:.2}"));
            }
        }
        for key in ["hit_length", "total_length"] {
            if let Some(raw) = fields.get(key) {
                if let Ok(seconds) = raw.parse::<u64>() {
                    fields.insert(key.to_string(), seconds_to_string(seconds));
                }
            }
        }
        for key in ["artist", "creator", "source", "title", "version"] {
            if let Some(raw) = fields.get(key) {
                let sanitised = sanitise_md(raw);
                fields.insert(key.to_string(), sanitised);
            }
        }

        fields
    }
}

/// Substitute `{field}` placeholders. Unknown placeholders stay verbatim.
fn render(template: &str, fields: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in fields {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// m:ss rendering of a length in seconds.
fn seconds_to_string(seconds: u64) -> String {
    format!("{}:{:0>2}", seconds / 60, seconds % 60)
}

/// Escape markdown so titles like "xi - *Fre*edom_Dive" render literally.
/// Emphasis characters become numeric character references; the rest get
/// backslash-escaped, backslash itself first.
fn sanitise_md(input: &str) -> String {
    let mut escaped = input.to_string();
    for c in ['*', '_'] {
        escaped = escaped.replace(c, &format!("&#{:0>4};", c as u32));
    }
    for pattern in ["\\", "[", "]", "^", "~~"] {
        escaped = escaped.replace(pattern, &format!("\\{pattern}"));
    }
    escaped
}
