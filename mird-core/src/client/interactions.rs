//! Page interactions and how they map to tracked events

use std::collections::BTreeSet;

/// Scroll thresholds in percent of the scrollable distance
pub const SCROLL_DEPTHS: [u8; 4] = [25, 50, 75, 100];

/// Something the visitor did on the page.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    /// Click on a CTA button; carries the button text
    CtaClick { text: String },
    /// Click on the video preview
    VideoPreviewClick,
    /// Click on a curriculum module header; carries the module title
    ModuleExpansion { title: String },
    /// Click on an absolute `http(s)` link
    ExternalLinkClick { text: String, href: String },
    /// Window scrolled
    Scroll(ScrollPosition),
    /// Enrolment click after the EU redirect decision
    EnrollClick { eu_visitor: bool },
}

/// A tracked `(category, action, label)` triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub category: &'static str,
    pub action: &'static str,
    pub label: Option<String>,
}

impl EventSpec {
    fn new(category: &'static str, action: &'static str, label: Option<String>) -> Self {
        Self {
            category,
            action,
            label,
        }
    }
}

impl Interaction {
    /// The event a click maps to. Scrolls are threshold-based and handled by
    /// [`ScrollDepthTracker`], so they return `None` here.
    pub fn event_spec(&self) -> Option<EventSpec> {
        let spec = match self {
            Interaction::CtaClick { text } => {
                EventSpec::new("Engagement", "CTA Click", Some(text.trim().to_string()))
            }
            Interaction::VideoPreviewClick => {
                EventSpec::new("Engagement", "Video Preview Click", None)
            }
            Interaction::ModuleExpansion { title } => {
                EventSpec::new("Engagement", "Module Expansion", Some(title.trim().to_string()))
            }
            Interaction::ExternalLinkClick { text, href } => EventSpec::new(
                "Navigation",
                "External Link Click",
                Some(format!("{} ({})", text.trim(), href)),
            ),
            Interaction::EnrollClick { eu_visitor } => EventSpec::new(
                "Conversion",
                "Enroll Click",
                Some(
                    if *eu_visitor {
                        "EU Visitor - Pre-checkout"
                    } else {
                        "Non-EU Visitor - Direct"
                    }
                    .to_string(),
                ),
            ),
            Interaction::Scroll(_) => return None,
        };
        Some(spec)
    }
}

/// Window geometry at the time of a scroll event, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPosition {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub document_height: f64,
}

impl ScrollPosition {
    /// Rounded percentage of the scrollable distance, or `None` when the
    /// document fits in the viewport.
    pub fn percent(&self) -> Option<u32> {
        let scrollable = self.document_height - self.viewport_height;
        if scrollable <= 0.0 {
            return None;
        }
        let percent = (self.scroll_top.max(0.0) / scrollable * 100.0).round();
        Some(percent as u32)
    }
}

/// Remembers which scroll depths were already reported on this page load.
#[derive(Debug, Default, Clone)]
pub struct ScrollDepthTracker {
    fired: BTreeSet<u8>,
}

impl ScrollDepthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the thresholds crossed for the first time, in ascending order.
    pub fn observe(&mut self, position: ScrollPosition) -> Vec<u8> {
        let Some(percent) = position.percent() else {
            return Vec::new();
        };

        SCROLL_DEPTHS
            .into_iter()
            .filter(|depth| percent >= u32::from(*depth) && self.fired.insert(*depth))
            .collect()
    }

    /// Forget everything; a new page load starts from scratch.
    pub fn reset(&mut self) {
        self.fired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(scroll_top: f64) -> ScrollPosition {
        ScrollPosition {
            scroll_top,
            viewport_height: 1000.0,
            document_height: 5000.0,
        }
    }

    #[test]
    fn test_click_mappings() {
        let cta = Interaction::CtaClick {
            text: "  Enroll Now ".to_string(),
        };
        assert_eq!(
            cta.event_spec(),
            Some(EventSpec::new("Engagement", "CTA Click", Some("Enroll Now".to_string())))
        );

        let link = Interaction::ExternalLinkClick {
            text: "LinkedIn".to_string(),
            href: "https://linkedin.com/in/x".to_string(),
        };
        let spec = link.event_spec().unwrap();
        assert_eq!(spec.category, "Navigation");
        assert_eq!(spec.label.as_deref(), Some("LinkedIn (https://linkedin.com/in/x)"));

        let video = Interaction::VideoPreviewClick.event_spec().unwrap();
        assert_eq!(video.action, "Video Preview Click");
        assert!(video.label.is_none());

        let enroll = Interaction::EnrollClick { eu_visitor: false }.event_spec().unwrap();
        assert_eq!(enroll.label.as_deref(), Some("Non-EU Visitor - Direct"));

        assert!(Interaction::Scroll(at(0.0)).event_spec().is_none());
    }

    #[test]
    fn test_scroll_depth_fires_each_threshold_once() {
        let mut tracker = ScrollDepthTracker::new();

        assert!(tracker.observe(at(900.0)).is_empty()); // 22.5%
        assert_eq!(tracker.observe(at(1000.0)), vec![25]);
        assert!(tracker.observe(at(1000.0)).is_empty());
        assert_eq!(tracker.observe(at(3100.0)), vec![50, 75]);
        assert!(tracker.observe(at(0.0)).is_empty());
        assert_eq!(tracker.observe(at(4000.0)), vec![100]);
        assert!(tracker.observe(at(4000.0)).is_empty());
    }

    #[test]
    fn test_unscrollable_page_is_ignored() {
        let mut tracker = ScrollDepthTracker::new();
        let short = ScrollPosition {
            scroll_top: 0.0,
            viewport_height: 900.0,
            document_height: 900.0,
        };
        assert_eq!(short.percent(), None);
        assert!(tracker.observe(short).is_empty());
    }
}
