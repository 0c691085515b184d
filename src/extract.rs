use beatmapbot_core::{MapKind, MapRef, Thing};
use html_escape::decode_html_entities;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    // Anchor text is captured separately and compared against the href
    // below; link text that differs from the target is not a beatmap link.
    static ref ANCHOR_RE: Regex =
        Regex::new(r#"<a href="(https?://osu\.ppy\.sh/[^"]+)">([^<]+)</a>"#)
            .expect("valid anchor pattern");
}

/// All beatmap references in a thing's rendered body, in document order.
/// Duplicates are kept; the composer de-duplicates over the full list.
pub fn maps_from_thing(thing: &Thing) -> Vec<MapRef> {
    match thing.body_html() {
        Some(body_html) => maps_from_html(body_html),
        None => Vec::new(),
    }
}

/// Scan rendered HTML for `<a href="URL">URL</a>` anchors pointing at
/// osu.ppy.sh and parse each into a [`MapRef`]. Reddit escapes the
/// rendered body a second time on the wire, so entities are decoded
/// twice before scanning.
pub fn maps_from_html(body_html: &str) -> Vec<MapRef> {
    let once = decode_html_entities(body_html);
    let decoded = decode_html_entities(once.as_ref());

    ANCHOR_RE
        .captures_iter(&decoded)
        .filter_map(|caps| {
            let href = caps.get(1)?.as_str();
            let text = caps.get(2)?.as_str();
            if href != text {
                return None;
            }
            let url = decode_html_entities(href);
            parse_map_url(url.as_ref())
        })
        .collect()
}

/// Parse one osu.ppy.sh URL into a map reference.
///
/// Recognized shapes:
///   /b/<id>             beatmap
///   /s/<id>             mapset
///   /p/beatmap?b=<id>   beatmap (b wins over s when both are present)
///   /p/beatmap?s=<id>   mapset
///
/// Anything else, including non-numeric ids, yields `None`.
fn parse_map_url(url: &str) -> Option<MapRef> {
    let parsed = Url::parse(url).ok()?;
    let path = parsed.path();

    let (kind, raw_id) = if let Some(rest) = path.strip_prefix("/b/") {
        (MapKind::Beatmap, rest.to_string())
    } else if let Some(rest) = path.strip_prefix("/s/") {
        (MapKind::Mapset, rest.to_string())
    } else if path == "/p/beatmap" {
        let query: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let param = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        if let Some(id) = param("b") {
            (MapKind::Beatmap, id)
        } else if let Some(id) = param("s") {
            (MapKind::Mapset, id)
        } else {
            return None;
        }
    } else {
        return None;
    };

    // Old-style links sometimes carry extra parameters glued onto the
    // path, e.g. /b/115891&m=0.
    let raw_id = match raw_id.find('&') {
        Some(pos) => &raw_id[..pos],
        None => raw_id.as_str(),
    };

    if raw_id.is_empty() || !raw_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = raw_id.parse::<u64>().ok()?;
    Some(MapRef { kind, id })
}
