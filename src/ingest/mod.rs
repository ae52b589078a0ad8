//! Ingestion - raw entries from the news index, normalized for the store

pub mod gdelt;

pub use gdelt::GdeltClient;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::LazyLock;

use crate::store::{GeoPoint, IncomingArticle};

static FIRST_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<a\s[^>]*href\s*=\s*"([^"]+)""#).unwrap());
static TITLE_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"title\s*=\s*"([^"]+)""#).unwrap());

/// One entry as produced by the news index, before normalization.
///
/// Field names follow the index's export so archived raw files import as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Location name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Mention count; the index sometimes sends strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shareimage: Option<String>,
    #[serde(default)]
    pub html: String,
    /// GeoJSON geometry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

/// Treat the index's "N/A" placeholders and blanks as missing
fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("n/a"))
        .map(str::to_string)
}

/// First `<a href="...">` target in the HTML
pub fn first_link(html: &str) -> Option<String> {
    FIRST_LINK
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Stable identifier for entries without a link
pub fn content_hash(title: &str, html: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(html.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

fn point(geometry: &Value) -> Option<GeoPoint> {
    let coords = geometry.get("coordinates")?.as_array()?;
    Some(GeoPoint {
        longitude: coords.first()?.as_f64()?,
        latitude: coords.get(1)?.as_f64()?,
    })
}

fn mention_count(count: &Value) -> Option<u64> {
    match count {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawArticle {
    /// Normalize into a store entry.
    ///
    /// The title falls back to the HTML `title` attribute, then to the
    /// location name. The identifier is the explicit URL, else the first
    /// link in the HTML, else a content hash.
    pub fn into_incoming(self) -> IncomingArticle {
        let location_name = present(&self.name);
        let title = present(&self.title)
            .or_else(|| {
                TITLE_ATTR
                    .captures(&self.html)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
            })
            .or_else(|| location_name.clone())
            .unwrap_or_default();
        let link = present(&self.url).or_else(|| first_link(&self.html));
        let id = link
            .clone()
            .unwrap_or_else(|| content_hash(&title, &self.html));

        IncomingArticle {
            id,
            title,
            location_name,
            link,
            mention_count: self.count.as_ref().and_then(mention_count),
            share_image: present(&self.shareimage),
            location: self.geometry.as_ref().and_then(point),
            body_html: self.html,
        }
    }
}

/// Load a JSON array of raw entries, e.g. an archived index export
pub fn load_raw_file(path: &Path) -> Result<Vec<RawArticle>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let entries: Vec<RawArticle> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as a JSON array of articles", path.display()))?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_link_becomes_identifier() {
        let raw = RawArticle {
            title: Some("Landslide in Nepal".to_string()),
            name: Some("Kathmandu, Nepal".to_string()),
            count: Some(json!(3)),
            html: r#"<A HREF="https://news.example/slide" title="Landslide in Nepal">Landslide</a>"#.to_string(),
            geometry: Some(json!({"type": "Point", "coordinates": [85.3, 27.7]})),
            ..RawArticle::default()
        };
        let incoming = raw.into_incoming();
        assert_eq!(incoming.id, "https://news.example/slide");
        assert_eq!(incoming.link.as_deref(), Some("https://news.example/slide"));
        assert_eq!(incoming.mention_count, Some(3));
        assert_eq!(incoming.location, Some(GeoPoint { longitude: 85.3, latitude: 27.7 }));
    }

    #[test]
    fn test_title_recovered_from_html_attribute() {
        let raw = RawArticle {
            title: None,
            name: Some("Cusco, Peru".to_string()),
            html: r#"<a href="https://x.example/1" title="Mudslide buries road">read</a>"#.to_string(),
            ..RawArticle::default()
        };
        assert_eq!(raw.into_incoming().title, "Mudslide buries road");
    }

    #[test]
    fn test_title_falls_back_to_location_name() {
        let raw = RawArticle {
            title: Some("N/A".to_string()),
            name: Some("Cusco, Peru".to_string()),
            count: Some(json!("N/A")),
            shareimage: Some("N/A".to_string()),
            html: "<p>no links here</p>".to_string(),
            ..RawArticle::default()
        };
        let incoming = raw.into_incoming();
        assert_eq!(incoming.title, "Cusco, Peru");
        assert!(incoming.mention_count.is_none());
        assert!(incoming.share_image.is_none());
        // No link: a content hash stands in
        assert_eq!(incoming.id.len(), 16);
        assert!(incoming.link.is_none());
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("a", "<p>b</p>"), content_hash("a", "<p>b</p>"));
        assert_ne!(content_hash("a", "<p>b</p>"), content_hash("a", "<p>c</p>"));
    }

    #[test]
    fn test_load_raw_file_accepts_export_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        std::fs::write(
            &path,
            r#"[{"title": "Quake", "name": "Lima", "count": "12", "shareimage": "N/A",
                 "html": "<a href=\"https://q.example\">q</a>",
                 "geometry": {"type": "Point", "coordinates": [-77.0, -12.0]}}]"#,
        )
        .unwrap();
        let entries = load_raw_file(&path).unwrap();
        assert_eq!(entries.len(), 1);
        let incoming = entries[0].clone().into_incoming();
        assert_eq!(incoming.mention_count, Some(12));
        assert_eq!(incoming.id, "https://q.example");
    }
}
