//! Caption and clock text state. Layout and glyph shaping live in the renderer;
//! this module decides what the text says and how opaque it is.
use std::collections::HashSet;
use std::fmt::Write;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::config::{ClockOptions, Justify, TextField, TextOptions};
use crate::events::{PictureRef, PictureRequest};

pub const FIELD_SEPARATOR: &str = " • ";
pub const PAUSED_MARKER: &str = "PAUSED";

/// Horizontal region a caption occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAnchor {
    Full,
    /// Left half of a portrait pair.
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySlot {
    pub anchor: SlotAnchor,
    pub justify: Justify,
    pub text: String,
    /// Bumped whenever `text` changes so the renderer knows to reshape.
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClockOverlay {
    pub text: String,
    pub justify: Justify,
    pub revision: u64,
    enabled: bool,
}

impl ClockOverlay {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

pub struct OverlayManager {
    options: TextOptions,
    clock_options: ClockOptions,
    enabled: HashSet<TextField>,
    request: Option<PictureRequest>,
    paused: bool,
    slots: Vec<OverlaySlot>,
    caption_alpha: f32,
    clock: ClockOverlay,
    revision: u64,
    pair_portraits: bool,
}

impl OverlayManager {
    /// `pair_portraits` must match the compositor so captions line up with
    /// what is on screen.
    pub fn new(options: &TextOptions, clock: &ClockOptions, pair_portraits: bool) -> Self {
        Self {
            enabled: options.fields.iter().copied().collect(),
            options: options.clone(),
            clock_options: clock.clone(),
            request: None,
            paused: false,
            slots: Vec::new(),
            caption_alpha: 0.0,
            clock: ClockOverlay {
                text: String::new(),
                justify: clock.justify,
                revision: 0,
                enabled: clock.enabled,
            },
            revision: 0,
            pair_portraits,
        }
    }

    /// Rebuilds captions for a newly shown slide.
    pub fn set_slide(&mut self, request: &PictureRequest) {
        self.request = Some(request.clone());
        self.rebuild();
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            self.paused = paused;
            self.rebuild();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns true when the set of shown fields changed.
    pub fn set_text_field(&mut self, field: TextField, on: bool) -> bool {
        let changed = if on {
            self.enabled.insert(field)
        } else {
            self.enabled.remove(&field)
        };
        if changed {
            debug!(field = field.as_str(), on, "caption field toggled");
            self.rebuild();
        }
        changed
    }

    pub fn clear_text_fields(&mut self) -> bool {
        if self.enabled.is_empty() {
            return false;
        }
        self.enabled.clear();
        self.rebuild();
        true
    }

    pub fn is_text_field_on(&self, field: TextField) -> bool {
        self.enabled.contains(&field)
    }

    /// Recomputes the caption fade for the frame drawn at `now`.
    pub fn update(
        &mut self,
        now: Instant,
        image_alpha: f64,
        name_due: Option<Instant>,
        text_display: Duration,
    ) {
        self.caption_alpha = caption_envelope(now, image_alpha, name_due, text_display);
    }

    pub fn caption_alpha(&self) -> f32 {
        self.caption_alpha
    }

    /// The backing band follows the caption fade but only behind real text.
    pub fn band_alpha(&self) -> f32 {
        if self.options.backing_band && self.has_caption() {
            self.caption_alpha
        } else {
            0.0
        }
    }

    pub fn has_caption(&self) -> bool {
        self.slots.iter().any(|slot| !slot.text.is_empty())
    }

    pub fn slots(&self) -> &[OverlaySlot] {
        &self.slots
    }

    pub fn options(&self) -> &TextOptions {
        &self.options
    }

    /// Replaces the clock text; returns false when nothing changed.
    pub fn update_clock(&mut self, text: &str) -> bool {
        if self.clock.text == text {
            return false;
        }
        self.clock.text = text.to_string();
        self.revision += 1;
        self.clock.revision = self.revision;
        true
    }

    /// Formats `now` with the clock's format and time zone.
    pub fn format_clock(&self, now: DateTime<Utc>) -> String {
        format_in_zone(now, &self.clock_options.format, self.clock_options.timezone)
    }

    pub fn set_clock_enabled(&mut self, enabled: bool) {
        self.clock.enabled = enabled;
    }

    pub fn clock_enabled(&self) -> bool {
        self.clock.enabled
    }

    pub fn clock(&self) -> &ClockOverlay {
        &self.clock
    }

    pub fn clock_options(&self) -> &ClockOptions {
        &self.clock_options
    }

    fn rebuild(&mut self) {
        let Some(request) = self.request.as_ref() else {
            return;
        };
        let fields: Vec<TextField> = TextField::ALL
            .into_iter()
            .filter(|field| self.enabled.contains(field))
            .collect();

        let second = request.second.as_deref().filter(|_| self.pair_portraits);
        let layout: Vec<(SlotAnchor, Justify, &PictureRef)> = match second {
            Some(right) => vec![
                (SlotAnchor::Left, Justify::Left, request.first.as_ref()),
                (SlotAnchor::Right, Justify::Right, right),
            ],
            None => vec![(SlotAnchor::Full, self.options.justify, request.first.as_ref())],
        };

        let mut slots = Vec::with_capacity(layout.len());
        for (anchor, justify, picture) in layout {
            self.revision += 1;
            slots.push(OverlaySlot {
                anchor,
                justify,
                text: build_caption(picture, &fields, &self.options, self.paused),
                revision: self.revision,
            });
        }
        self.slots = slots;
    }
}

/// Joins the enabled fields of one picture in their fixed display order.
pub fn build_caption(
    picture: &PictureRef,
    fields: &[TextField],
    options: &TextOptions,
    paused: bool,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in TextField::ALL {
        if !fields.contains(&field) {
            continue;
        }
        let part = match field {
            TextField::Title => picture.title.clone(),
            TextField::Caption => picture.caption.clone(),
            TextField::Name => picture
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            TextField::Date => picture.taken_at.map(|at| format_date(at, options)),
            TextField::Location => location_text(picture, &options.suppress_locations),
            TextField::Folder => picture
                .path
                .parent()
                .and_then(|dir| dir.file_name())
                .map(|name| name.to_string_lossy().into_owned()),
        };
        if let Some(part) = part.filter(|p| !p.trim().is_empty()) {
            parts.push(part.trim().to_string());
        }
    }
    if paused {
        parts.push(PAUSED_MARKER.to_string());
    }
    parts.join(FIELD_SEPARATOR)
}

fn format_date(at: DateTime<Utc>, options: &TextOptions) -> String {
    format_in_zone(at, &options.date_format, options.timezone)
}

/// Renders `at` in `tz` (local time when unset). A format chrono cannot
/// render yields an empty string.
fn format_in_zone(at: DateTime<Utc>, format: &str, tz: Option<Tz>) -> String {
    let mut out = String::new();
    let written = match tz {
        Some(tz) => write!(out, "{}", at.with_timezone(&tz).format(format)),
        None => write!(out, "{}", at.with_timezone(&Local).format(format)),
    };
    if written.is_err() {
        warn!(format, "time format could not be rendered");
        out.clear();
    }
    out
}

fn location_text(picture: &PictureRef, suppress: &[String]) -> Option<String> {
    match picture.location.as_deref() {
        Some(location) => Some(suppress_location(location, suppress)),
        None => picture
            .coordinates
            .map(|(lat, lon)| format!("{lat:.4}, {lon:.4}")),
    }
}

/// Removes configured substrings and tidies the comma-separated remainder.
pub fn suppress_location(location: &str, suppress: &[String]) -> String {
    let mut cleaned = location.to_string();
    for needle in suppress.iter().filter(|s| !s.is_empty()) {
        cleaned = cleaned.replace(needle.as_str(), "");
    }
    cleaned
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Caption opacity: fades in after the slide settles and out before `name_due`.
pub fn caption_envelope(
    now: Instant,
    image_alpha: f64,
    name_due: Option<Instant>,
    text_display: Duration,
) -> f32 {
    let Some(due) = name_due else {
        return 0.0;
    };
    let text_secs = text_display.as_secs_f32();
    if image_alpha < 1.0 || now >= due || text_secs <= 0.0 {
        return 0.0;
    }
    let remaining = due.duration_since(now).as_secs_f32();
    let dt = (text_secs - remaining + 0.1) / text_secs;
    let ramp = (text_secs / 4.0).max(4.0);
    (ramp * (image_alpha as f32 - (1.0 - 2.0 * dt).abs())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn options() -> TextOptions {
        TextOptions {
            fields: TextField::ALL.to_vec(),
            timezone: Some(chrono_tz::UTC),
            ..TextOptions::default()
        }
    }

    fn picture() -> PictureRef {
        PictureRef {
            title: Some("Harbour".into()),
            caption: Some("Morning fog".into()),
            location: Some("Paris, France".into()),
            taken_at: Some(Utc.with_ymd_and_hms(2021, 6, 3, 9, 30, 0).unwrap()),
            ..PictureRef::new("/photos/trip/IMG_0001.jpg")
        }
    }

    #[test]
    fn caption_fields_follow_fixed_order() {
        let text = build_caption(&picture(), &TextField::ALL, &options(), false);
        assert_eq!(
            text,
            "Harbour • Morning fog • IMG_0001.jpg • Jun 03, 2021 • Paris, France • trip"
        );
    }

    #[test]
    fn field_order_ignores_configured_order() {
        let fields = [TextField::Folder, TextField::Title];
        let text = build_caption(&picture(), &fields, &options(), false);
        assert_eq!(text, "Harbour • trip");
    }

    #[test]
    fn paused_marker_is_appended() {
        let text = build_caption(&picture(), &[TextField::Title], &options(), true);
        assert_eq!(text, "Harbour • PAUSED");
        let text = build_caption(&picture(), &[], &options(), true);
        assert_eq!(text, "PAUSED");
    }

    #[test]
    fn location_suppression_cleans_separators() {
        assert_eq!(suppress_location("Paris, France", &["France".into()]), "Paris");
        assert_eq!(
            suppress_location("Rue X, , Lyon ,France", &["France".into()]),
            "Rue X, Lyon"
        );
        assert_eq!(suppress_location("Oslo", &[]), "Oslo");
    }

    #[test]
    fn coordinates_stand_in_for_missing_location() {
        let pic = PictureRef {
            coordinates: Some((48.85661, 2.35222)),
            ..PictureRef::new("a.jpg")
        };
        let text = build_caption(&pic, &[TextField::Location], &options(), false);
        assert_eq!(text, "48.8566, 2.3522");
    }

    #[test]
    fn pairs_get_side_anchored_slots() {
        let mut overlay = OverlayManager::new(&options(), &ClockOptions::default(), true);
        let request = PictureRequest::pair(picture(), PictureRef::new("/x/right.jpg"));
        overlay.set_text_field(TextField::Name, true);
        overlay.set_slide(&request);
        let slots = overlay.slots();
        assert_eq!(slots.len(), 2);
        assert_eq!((slots[0].anchor, slots[0].justify), (SlotAnchor::Left, Justify::Left));
        assert_eq!((slots[1].anchor, slots[1].justify), (SlotAnchor::Right, Justify::Right));
        assert!(slots[1].text.contains("right.jpg"));
    }

    #[test]
    fn unpaired_layout_captions_only_the_shown_picture() {
        let mut overlay = OverlayManager::new(&options(), &ClockOptions::default(), false);
        let request = PictureRequest::pair(picture(), PictureRef::new("/x/right.jpg"));
        overlay.set_slide(&request);
        let slots = overlay.slots();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].anchor, SlotAnchor::Full);
        assert!(!slots[0].text.contains("right.jpg"));
    }

    #[test]
    fn toggling_fields_rebuilds_with_new_revision() {
        let mut overlay = OverlayManager::new(&options(), &ClockOptions::default(), true);
        overlay.set_slide(&PictureRequest::single(picture()));
        let before = overlay.slots()[0].revision;
        assert!(overlay.set_text_field(TextField::Title, false));
        assert!(!overlay.set_text_field(TextField::Title, false));
        assert!(!overlay.is_text_field_on(TextField::Title));
        assert!(overlay.slots()[0].revision > before);
        assert!(!overlay.slots()[0].text.contains("Harbour"));

        assert!(overlay.clear_text_fields());
        assert!(!overlay.has_caption());
        overlay.set_paused(true);
        assert_eq!(overlay.slots()[0].text, PAUSED_MARKER);
    }

    #[test]
    fn clock_rebuilds_only_on_change() {
        let mut overlay = OverlayManager::new(&options(), &ClockOptions::default(), true);
        assert!(overlay.update_clock("10:41"));
        let revision = overlay.clock().revision;
        assert!(!overlay.update_clock("10:41"));
        assert_eq!(overlay.clock().revision, revision);
        assert!(overlay.update_clock("10:42"));
        assert!(overlay.clock().revision > revision);
    }

    #[test]
    fn clock_uses_configured_zone() {
        let clock = ClockOptions {
            timezone: Some(chrono_tz::Asia::Tokyo),
            ..ClockOptions::default()
        };
        let overlay = OverlayManager::new(&options(), &clock, true);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(overlay.format_clock(now), "09:05");
    }

    #[test]
    fn unrenderable_formats_yield_empty_text() {
        let clock = ClockOptions {
            format: "%Q".to_string(),
            timezone: Some(chrono_tz::UTC),
            ..ClockOptions::default()
        };
        let overlay = OverlayManager::new(&options(), &clock, true);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(overlay.format_clock(now), "");

        let text_options = TextOptions {
            date_format: "%Q".to_string(),
            ..options()
        };
        let text = build_caption(&picture(), &[TextField::Title, TextField::Date], &text_options, false);
        assert_eq!(text, "Harbour");
    }

    #[test]
    fn envelope_rises_then_falls() {
        let text = Duration::from_secs(8);
        let t0 = Instant::now();
        let due = Some(t0 + text);
        assert_eq!(caption_envelope(t0, 0.5, due, text), 0.0);
        let start = caption_envelope(t0, 1.0, due, text);
        assert!((start - 0.1).abs() < 1e-4);
        assert_eq!(caption_envelope(t0 + Duration::from_secs(4), 1.0, due, text), 1.0);
        let late = caption_envelope(t0 + Duration::from_millis(7950), 1.0, due, text);
        assert!(late < 0.5);
        assert_eq!(caption_envelope(t0 + text, 1.0, due, text), 0.0);
        assert_eq!(caption_envelope(t0, 1.0, None, text), 0.0);
    }

    #[test]
    fn band_only_behind_text() {
        let mut overlay = OverlayManager::new(
            &TextOptions {
                fields: vec![TextField::Title],
                ..options()
            },
            &ClockOptions::default(),
            true,
        );
        let t0 = Instant::now();
        overlay.set_slide(&PictureRequest::single(PictureRef::new("untitled.jpg")));
        overlay.update(t0 + Duration::from_secs(4), 1.0, Some(t0 + Duration::from_secs(8)), Duration::from_secs(8));
        assert_eq!(overlay.caption_alpha(), 1.0);
        assert_eq!(overlay.band_alpha(), 0.0);

        overlay.set_slide(&PictureRequest::single(picture()));
        assert_eq!(overlay.band_alpha(), 1.0);
    }
}
