//! Sandboxed preview of a resolved template.
//!
//! The resolved document is only ever shown inside an `<iframe>` carrying
//! `sandbox="allow-scripts"` without `allow-same-origin`, so template
//! scripts run in an opaque origin and cannot reach the host page, its
//! cookies or its storage. Device emulation wraps the same document and
//! never triggers a new resolution.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::resolver::resolve;
use crate::value::ConfigTree;

/// `Content-Security-Policy` value for serving a resolved document directly.
pub const SANDBOX_CSP: &str = "sandbox allow-scripts";

/// Shown when there is no template code or no configuration yet.
pub const EMPTY_DOCUMENT: &str = "<!doctype html><html><head><meta charset=\"utf-8\"></head>\
<body style=\"font-family:sans-serif;color:#6b7280;display:flex;align-items:center;\
justify-content:center;height:100vh;margin:0\"><p>Nothing to preview yet</p></body></html>";

/// Emulated screen size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Desktop,
    Tablet,
    Mobile,
    Fullscreen,
}

impl Device {
    /// Viewport in CSS pixels; `None` fills the available space.
    #[must_use]
    pub const fn viewport(self) -> Option<(u32, u32)> {
        match self {
            Self::Desktop => Some((1280, 800)),
            Self::Tablet => Some((768, 1024)),
            Self::Mobile => Some((375, 667)),
            Self::Fullscreen => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Tablet => "tablet",
            Self::Mobile => "mobile",
            Self::Fullscreen => "fullscreen",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "tablet" => Ok(Self::Tablet),
            "mobile" => Ok(Self::Mobile),
            "fullscreen" | "full" => Ok(Self::Fullscreen),
            other => Err(format!("unknown device: {other}")),
        }
    }
}

/// Resolve `template_code` against `values` for previewing. Absent or blank
/// code, or absent values, give [`EMPTY_DOCUMENT`].
#[must_use]
pub fn compute_preview(template_code: Option<&str>, values: Option<&ConfigTree>) -> String {
    match (template_code.filter(|code| !code.trim().is_empty()), values) {
        (Some(code), Some(values)) => resolve(code, values),
        _ => EMPTY_DOCUMENT.to_owned(),
    }
}

/// Escape text for a double- or single-quoted HTML attribute value.
#[must_use]
pub fn escape_attribute(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap a resolved document in a device frame page.
#[must_use]
pub fn frame(document: &str, device: Device) -> String {
    let size = device.viewport().map_or_else(
        || "width:100vw;height:100vh".to_owned(),
        |(w, h)| format!("width:{w}px;height:{h}px"),
    );
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>Preview ({device})</title>\
<style>body{{margin:0;background:#f3f4f6;display:flex;justify-content:center;padding:{pad}}}\
.device{{background:#fff;box-shadow:0 4px 24px rgba(0,0,0,.12);overflow:hidden}}\
iframe{{width:100%;height:100%;border:0;display:block}}</style></head>\
<body><div class=\"device device-{device}\" style=\"{size}\">\
<iframe title=\"App preview\" sandbox=\"allow-scripts\" referrerpolicy=\"no-referrer\" srcdoc=\"{doc}\"></iframe>\
</div></body></html>",
        pad = if device == Device::Fullscreen { "0" } else { "24px" },
        doc = escape_attribute(document),
    )
}

#[derive(Debug, Clone)]
struct Cached {
    revision: u64,
    code: String,
    document: Arc<str>,
}

/// Keeps the current preview document in step with the store.
///
/// [`PreviewRenderer::update`] re-resolves only when the tree snapshot or
/// the code changed; device switches reuse the cached document.
#[derive(Debug, Clone, Default)]
pub struct PreviewRenderer {
    cached: Option<Cached>,
    device: Device,
    resolutions: u64,
}

impl PreviewRenderer {
    #[must_use]
    pub fn new(device: Device) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    /// Bring the document up to date and return it.
    pub fn update(&mut self, template_code: Option<&str>, values: Option<&ConfigTree>) -> Arc<str> {
        let (Some(code), Some(values)) = (template_code, values) else {
            self.cached = None;
            return Arc::from(EMPTY_DOCUMENT);
        };
        if let Some(cached) = self
            .cached
            .as_ref()
            .filter(|c| c.revision == values.revision() && c.code == code)
        {
            return Arc::clone(&cached.document);
        }

        let document: Arc<str> = Arc::from(compute_preview(Some(code), Some(values)));
        self.resolutions += 1;
        trace!(revision = values.revision(), "preview re-resolved");
        self.cached = Some(Cached {
            revision: values.revision(),
            code: code.to_owned(),
            document: Arc::clone(&document),
        });
        document
    }

    /// The current document, or [`EMPTY_DOCUMENT`] before the first update.
    #[must_use]
    pub fn document(&self) -> &str {
        self.cached.as_ref().map_or(EMPTY_DOCUMENT, |c| &*c.document)
    }

    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    /// The current document in the current device frame.
    #[must_use]
    pub fn frame(&self) -> String {
        frame(self.document(), self.device)
    }

    /// How many times the resolver has run.
    #[must_use]
    pub const fn resolutions(&self) -> u64 {
        self.resolutions
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::path::ConfigPath;
    use crate::store::set_path;
    use crate::value::FieldValue;
    use serde_json::json;

    const CODE: &str = "<h1 style=\"color:{{styling.color}}\">{{title}}</h1>";

    fn tree() -> ConfigTree {
        ConfigTree::new(FieldValue::from(json!({"title": "Hi", "styling": {"color": "red"}})))
    }

    #[test]
    fn absent_inputs_render_the_empty_document() {
        assert_eq!(compute_preview(None, Some(&tree())), EMPTY_DOCUMENT);
        assert_eq!(compute_preview(Some("  "), Some(&tree())), EMPTY_DOCUMENT);
        assert_eq!(compute_preview(Some(CODE), None), EMPTY_DOCUMENT);
        assert_eq!(
            compute_preview(Some(CODE), Some(&tree())),
            "<h1 style=\"color:red\">Hi</h1>"
        );
    }

    #[test]
    fn frame_sandboxes_and_escapes_the_document() {
        let html = frame("<p class=\"x\">a & 'b'</p>", Device::Mobile);
        assert!(html.contains("sandbox=\"allow-scripts\""));
        assert!(!html.contains("allow-same-origin"));
        assert!(html.contains("width:375px;height:667px"));
        assert!(html.contains("srcdoc=\"&lt;p class=&quot;x&quot;&gt;a &amp; &#39;b&#39;&lt;/p&gt;\""));
    }

    #[test]
    fn hostile_values_cannot_break_out_of_srcdoc() {
        let values = ConfigTree::new(FieldValue::from(json!({"title": "\"></iframe><script>alert(1)</script>"})));
        let html = frame(&compute_preview(Some(CODE), Some(&values)), Device::Desktop);
        assert_eq!(html.matches("<iframe").count(), 1);
        assert_eq!(html.matches("</iframe>").count(), 1);
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn device_switch_does_not_re_resolve() {
        let tree = tree();
        let mut renderer = PreviewRenderer::new(Device::Desktop);
        renderer.update(Some(CODE), Some(&tree));
        assert_eq!(renderer.resolutions(), 1);

        for device in [Device::Tablet, Device::Mobile, Device::Fullscreen] {
            renderer.set_device(device);
            assert!(renderer.frame().contains(&format!("device-{device}")));
        }
        renderer.update(Some(CODE), Some(&tree));
        assert_eq!(renderer.resolutions(), 1);
    }

    #[test]
    fn every_tree_change_replaces_the_document() {
        let tree = tree();
        let mut renderer = PreviewRenderer::default();
        renderer.update(Some(CODE), Some(&tree));

        let edited = set_path(&tree, &ConfigPath::key("title"), FieldValue::text("Hello"));
        let doc = renderer.update(Some(CODE), Some(&edited));
        assert_eq!(&*doc, "<h1 style=\"color:red\">Hello</h1>");
        assert_eq!(renderer.document(), &*doc);
        assert_eq!(renderer.resolutions(), 2);

        renderer.update(Some("{{title}}"), Some(&edited));
        assert_eq!(renderer.document(), "Hello");
        assert_eq!(renderer.resolutions(), 3);

        renderer.update(None, Some(&edited));
        assert_eq!(renderer.document(), EMPTY_DOCUMENT);
    }

    #[test]
    fn devices_parse_and_print() {
        assert_eq!("Mobile".parse::<Device>(), Ok(Device::Mobile));
        assert_eq!("full".parse::<Device>(), Ok(Device::Fullscreen));
        assert!("watch".parse::<Device>().is_err());
        assert_eq!(Device::Tablet.viewport(), Some((768, 1024)));
        assert_eq!(Device::Fullscreen.viewport(), None);
    }
}
