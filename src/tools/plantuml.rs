//! PlantUML rendering tool.
//!
//! Sends diagram source to a PlantUML server, normalizes the rendered output
//! to chat-friendly dimensions and emits it to the conversation as an
//! inline base64 image. The diagram source itself is returned as a code
//! block so the model can keep referring to it.

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::ImageFormat;
use image::imageops::FilterType;
use quick_xml::events::Event;
use quick_xml::events::attributes::Attribute;
use quick_xml::{Reader, Writer};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::error::PluginError;
use crate::core::plugin::{EventSink, merge_valves};

/// Rendered diagrams are normalized so the shortest side matches this target.
const SHORTEST_SIDE_TARGET: u32 = 768;
/// Hard cap on the longest side after scaling.
const LONGEST_SIDE_CAP: u32 = 2048;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlantUmlValves {
    /// Render endpoint; a `/svg` suffix selects SVG output, anything else
    /// is treated as a raster format.
    pub server_url: String,
    pub request_timeout: u64,
}

impl Default for PlantUmlValves {
    fn default() -> Self {
        Self {
            server_url: "http://plantuml:8080/png".to_string(),
            request_timeout: 60,
        }
    }
}

/// Ensures the source carries start/end markers; sources pasted from chat
/// frequently omit them.
fn wrap_diagram(source: &str) -> String {
    let trimmed = source.trim();
    if trimmed.starts_with("@start") {
        trimmed.to_string()
    } else {
        format!("@startuml\n{}\n@enduml", trimmed)
    }
}

/// Target dimensions under the scaling rule. The shortest side is brought to
/// the target in both directions, so small renders are enlarged too; the
/// longest-side cap takes precedence when the two conflict.
fn scaled_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let short = width.min(height);
    let long = width.max(height);

    let mut scale = f64::from(SHORTEST_SIDE_TARGET) / f64::from(short);
    if f64::from(long) * scale > f64::from(LONGEST_SIDE_CAP) {
        scale = f64::from(LONGEST_SIDE_CAP) / f64::from(long);
    }
    (
        ((f64::from(width) * scale).round() as u32).max(1),
        ((f64::from(height) * scale).round() as u32).max(1),
    )
}

fn numeric_prefix(raw: &str) -> Option<f64> {
    let digits: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

/// Rewrites the root `<svg>` width/height attributes to the scaled size,
/// leaving the viewBox alone so the drawing scales with them.
fn scale_svg(svg: &str) -> Result<String, PluginError> {
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut root_seen = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| PluginError::Unexpected(format!("invalid svg: {e}")))?;
        match event {
            Event::Eof => break,
            Event::Start(start) if !root_seen && start.name().as_ref() == b"svg" => {
                root_seen = true;
                let mut width = None;
                let mut height = None;
                for attr in start.attributes().with_checks(false).flatten() {
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.as_ref() {
                        b"width" => width = numeric_prefix(&value),
                        b"height" => height = numeric_prefix(&value),
                        _ => {}
                    }
                }

                let mut rewritten = start.clone();
                if let (Some(w), Some(h)) = (width, height) {
                    let (new_w, new_h) =
                        scaled_dimensions(w.round() as u32, h.round() as u32);
                    let attrs: Vec<Attribute> = start
                        .attributes()
                        .with_checks(false)
                        .flatten()
                        .filter(|a| {
                            !matches!(a.key.as_ref(), b"width" | b"height")
                        })
                        .collect();
                    rewritten.clear_attributes();
                    for attr in attrs {
                        rewritten.push_attribute(attr);
                    }
                    rewritten.push_attribute(("width", format!("{new_w}px").as_str()));
                    rewritten.push_attribute(("height", format!("{new_h}px").as_str()));
                }
                writer
                    .write_event(Event::Start(rewritten))
                    .map_err(|e| PluginError::Unexpected(format!("svg rewrite: {e}")))?;
            }
            other => {
                writer
                    .write_event(other)
                    .map_err(|e| PluginError::Unexpected(format!("svg rewrite: {e}")))?;
            }
        }
    }

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| PluginError::Unexpected(format!("svg rewrite: {e}")))
}

/// Decode, rescale and re-encode a raster rendering as PNG.
fn scale_raster(bytes: &[u8]) -> Result<Vec<u8>, PluginError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| PluginError::Unexpected(format!("undecodable rendering: {e}")))?;
    let (width, height) = (image.width(), image.height());
    let (new_w, new_h) = scaled_dimensions(width, height);

    let image = if (new_w, new_h) != (width, height) {
        debug!(
            from = %format!("{}x{}", width, height),
            to = %format!("{}x{}", new_w, new_h),
            "scaling diagram"
        );
        image.resize_exact(new_w, new_h, FilterType::Lanczos3)
    } else {
        image
    };

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| PluginError::Unexpected(format!("png encode: {e}")))?;
    Ok(out.into_inner())
}

pub struct PlantUmlTool {
    valves: RwLock<PlantUmlValves>,
    client: Client,
}

impl PlantUmlTool {
    pub fn new(valves: PlantUmlValves) -> Result<Self, PluginError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(valves.request_timeout))
            .build()
            .map_err(PluginError::from_transport)?;
        Ok(Self {
            valves: RwLock::new(valves),
            client,
        })
    }

    pub fn id(&self) -> &str {
        "plantuml"
    }

    /// Render a diagram and emit it to the conversation. Returns the
    /// wrapped source as a code block, or a formatted error string.
    pub async fn render(&self, source: &str, sink: &EventSink) -> String {
        if source.trim().is_empty() {
            return "Error: diagram source is empty".to_string();
        }
        let valves = self.valves.read().await.clone();
        let wrapped = wrap_diagram(source);

        sink.status("Rendering the diagram", false);
        let response = match self
            .client
            .post(&valves.server_url)
            .header("Content-Type", "text/plain")
            .body(wrapped.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err = PluginError::from_transport(err);
                warn!("plantuml request failed: {}", err);
                sink.status("Diagram rendering failed", true);
                return err.user_message();
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = PluginError::from_status(status.as_u16(), body);
            warn!("plantuml server rejected the diagram: {}", err);
            sink.status("Diagram rendering failed", true);
            return err.user_message();
        }

        let data_uri = if valves.server_url.trim_end_matches('/').ends_with("/svg") {
            match response.text().await.map_err(PluginError::from_transport) {
                Ok(svg) => match scale_svg(&svg) {
                    Ok(scaled) => format!(
                        "data:image/svg+xml;base64,{}",
                        BASE64.encode(scaled.as_bytes())
                    ),
                    Err(err) => {
                        sink.status("Diagram rendering failed", true);
                        return err.user_message();
                    }
                },
                Err(err) => {
                    sink.status("Diagram rendering failed", true);
                    return err.user_message();
                }
            }
        } else {
            match response.bytes().await.map_err(PluginError::from_transport) {
                Ok(bytes) => match scale_raster(&bytes) {
                    Ok(png) => format!("data:image/png;base64,{}", BASE64.encode(png)),
                    Err(err) => {
                        sink.status("Diagram rendering failed", true);
                        return err.user_message();
                    }
                },
                Err(err) => {
                    sink.status("Diagram rendering failed", true);
                    return err.user_message();
                }
            }
        };

        sink.message(format!("![diagram]({data_uri})"));
        sink.status("Diagram ready", true);
        format!("```plantuml\n{}\n```", wrapped)
    }

    pub async fn on_valves_updated(&self, patch: Value) -> Result<(), PluginError> {
        let mut current = {
            let valves = self.valves.read().await;
            serde_json::to_value(&*valves)
                .map_err(|e| PluginError::Unexpected(e.to_string()))?
        };
        merge_valves(&mut current, &patch);
        let next: PlantUmlValves = serde_json::from_value(current)
            .map_err(|e| PluginError::BadRequest(format!("invalid valves: {e}")))?;
        *self.valves.write().await = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_bare_diagram_source() {
        assert_eq!(
            wrap_diagram("Alice -> Bob: hello"),
            "@startuml\nAlice -> Bob: hello\n@enduml"
        );
        assert_eq!(
            wrap_diagram("@startmindmap\n* root\n@endmindmap"),
            "@startmindmap\n* root\n@endmindmap"
        );
    }

    #[test]
    fn small_diagrams_are_enlarged_to_target() {
        assert_eq!(scaled_dimensions(640, 480), (1024, 768));
        assert_eq!(scaled_dimensions(768, 1200), (768, 1200));
    }

    #[test]
    fn shortest_side_is_scaled_to_target() {
        let (w, h) = scaled_dimensions(1536, 1024);
        assert_eq!(h, SHORTEST_SIDE_TARGET);
        assert_eq!(w, 1152);
    }

    #[test]
    fn longest_side_cap_wins_over_target() {
        let (w, h) = scaled_dimensions(8192, 1024);
        assert_eq!(w, LONGEST_SIDE_CAP);
        assert_eq!(h, 256);
    }

    #[test]
    fn zero_dimensions_pass_through() {
        assert_eq!(scaled_dimensions(0, 100), (0, 100));
    }

    #[test]
    fn svg_root_dimensions_are_rewritten() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="3000px" height="1500px" viewBox="0 0 3000 1500"><rect/></svg>"#;
        let scaled = scale_svg(svg).unwrap();
        assert!(scaled.contains(r#"width="1536px""#));
        assert!(scaled.contains(r#"height="768px""#));
        assert!(scaled.contains(r#"viewBox="0 0 3000 1500""#));
    }

    #[test]
    fn svg_without_dimensions_is_untouched() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><rect/></svg>"#;
        let scaled = scale_svg(svg).unwrap();
        assert!(scaled.contains("<svg"));
        assert!(scaled.contains("<rect"));
    }
}
