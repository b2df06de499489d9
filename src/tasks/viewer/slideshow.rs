//! Per-frame slideshow driver, independent of the GPU backend.
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::overlay::OverlayManager;
use super::transition::{
    PanStrategy, SlideUniforms, TransitionEngine, TransitionGate, TransitionTiming,
};
use crate::config::{Configuration, TextField, parse_hex_rgb};
use crate::events::{PictureRequest, PreparedSlide, ViewerCommand};
use crate::processing::CompositedFrame;
use crate::tasks::prefetch::SlideFeed;

/// Result of one iteration of the display loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStatus {
    pub keep_running: bool,
    /// Reserved; always false.
    pub skip_requested: bool,
}

/// What the canvas ended up showing after a new frame was offered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Presented {
    /// The new frame is the foreground; the old foreground moved behind it.
    New { aspect: f32 },
    /// Upload failed; foreground and background were swapped instead.
    Reused { aspect: f32 },
    /// Nothing to show yet.
    Nothing,
}

/// Everything the canvas needs to draw one frame.
pub struct FrameScene<'a> {
    pub uniforms: &'a SlideUniforms,
    pub overlay: &'a OverlayManager,
}

/// GPU side of the slideshow: owns the textures and issues draw calls.
pub trait SlideCanvas {
    fn present_slide(&mut self, frame: CompositedFrame) -> Presented;
    fn display_aspect(&self) -> f32;
    fn draw(&mut self, scene: &FrameScene<'_>);
}

/// Foreground/background pair. Items move between the two slots, never copied.
#[derive(Debug)]
pub struct SlidePair<T> {
    fg: Option<T>,
    bg: Option<T>,
}

impl<T> Default for SlidePair<T> {
    fn default() -> Self {
        Self { fg: None, bg: None }
    }
}

impl<T> SlidePair<T> {
    /// `Some` pushes a new foreground; `None` swaps the existing pair.
    pub fn advance(&mut self, next: Option<T>) {
        match next {
            Some(item) => self.bg = self.fg.replace(item),
            None if self.bg.is_some() => std::mem::swap(&mut self.fg, &mut self.bg),
            None => {}
        }
    }

    pub fn foreground(&self) -> Option<&T> {
        self.fg.as_ref()
    }

    pub fn background(&self) -> Option<&T> {
        self.bg.as_ref()
    }
}

pub struct SlideShow {
    engine: TransitionEngine,
    overlay: OverlayManager,
    timing: TransitionTiming,
    gate: TransitionGate,
    requests: SlidePair<PictureRequest>,
    paused: bool,
    next_requested: bool,
    running: bool,
}

impl SlideShow {
    pub fn new(cfg: &Configuration, gate: TransitionGate) -> Self {
        let show = &cfg.slideshow;
        let timing = TransitionTiming {
            slide: show.slide_duration,
            fade: show.fade_duration,
            text_display: cfg.text.display_duration,
            frame_rate: show.frame_rate,
        };
        let mut engine = TransitionEngine::new(
            timing,
            show.fit,
            show.kenburns,
            PanStrategy::from(show.pan),
        );
        engine.set_brightness(cfg.display.brightness);
        engine.set_edge_alpha(cfg.compositor.edge_alpha);
        let [r, g, b] = parse_hex_rgb(&cfg.display.background).unwrap_or([0, 0, 0]);
        engine.set_background(linear_rgba([r, g, b]));

        Self {
            engine,
            overlay: OverlayManager::new(&cfg.text, &cfg.clock, show.pair_portraits),
            timing,
            gate,
            requests: SlidePair::default(),
            paused: false,
            next_requested: false,
            running: true,
        }
    }

    /// Runs one display-loop iteration for the frame shown at `now`.
    pub fn frame(
        &mut self,
        now: Instant,
        feed: &mut impl SlideFeed,
        canvas: &mut impl SlideCanvas,
    ) -> FrameStatus {
        if !self.running {
            return FrameStatus {
                keep_running: false,
                skip_requested: false,
            };
        }

        // an explicit `Next` steps even while paused; the pause itself holds
        let due = (self.engine.is_due(now) && !self.paused) || self.next_requested;
        if due {
            if let Some(slide) = feed.try_take() {
                self.next_requested = false;
                self.show(now, slide, canvas);
            }
        }

        self.engine.update(now);
        self.gate.publish(self.engine.is_in_transition());
        self.overlay.update(
            now,
            self.engine.alpha(),
            self.engine.name_due(),
            self.timing.text_display,
        );
        if self.overlay.clock_enabled() {
            let text = self.overlay.format_clock(Utc::now());
            self.overlay.update_clock(&text);
        }

        canvas.draw(&FrameScene {
            uniforms: self.engine.uniforms(),
            overlay: &self.overlay,
        });

        FrameStatus {
            keep_running: true,
            skip_requested: false,
        }
    }

    fn show(&mut self, now: Instant, slide: PreparedSlide, canvas: &mut impl SlideCanvas) {
        let PreparedSlide { request, frame } = slide;
        let path = request.first.path.clone();
        let aspect = match canvas.present_slide(frame) {
            Presented::New { aspect } => {
                debug!(path = %path.display(), aspect, "starting slide");
                self.requests.advance(Some(request));
                aspect
            }
            Presented::Reused { aspect } => {
                warn!(path = %path.display(), "slide upload failed; showing previous pair");
                self.requests.advance(None);
                aspect
            }
            Presented::Nothing => {
                warn!(path = %path.display(), "slide upload failed with nothing to fall back on");
                return;
            }
        };
        self.engine
            .start_slide(now, self.timing, canvas.display_aspect(), aspect);
        if let Some(current) = self.requests.foreground() {
            self.overlay.set_slide(current);
        }
    }

    /// Applies a runtime command; returns false for commands handled elsewhere.
    ///
    /// `SetDisplayPower` only covers the slideshow side: a dark panel pauses
    /// the show and switching it back on resumes. The panel itself is driven
    /// by the caller.
    pub fn apply_command(&mut self, command: &ViewerCommand, now: Instant) -> bool {
        match *command {
            ViewerCommand::TogglePause => self.set_paused(!self.paused, now),
            ViewerCommand::SetPaused(paused) => self.set_paused(paused, now),
            ViewerCommand::Next => {
                self.next_requested = true;
            }
            ViewerCommand::SetBrightness(value) => {
                self.engine.set_brightness(value);
                info!(brightness = self.engine.brightness(), "brightness changed");
            }
            ViewerCommand::SetTextField(field, on) => {
                if self.overlay.set_text_field(field, on) {
                    self.engine.extend_name_due(now, self.timing.text_display);
                }
            }
            ViewerCommand::ClearTextFields => {
                if self.overlay.clear_text_fields() {
                    self.engine.extend_name_due(now, self.timing.text_display);
                }
            }
            ViewerCommand::SetClock(enabled) => self.overlay.set_clock_enabled(enabled),
            ViewerCommand::SetDisplayPower(on) => self.set_paused(!on, now),
            ViewerCommand::SetMattingTolerance(_) => return false,
        }
        true
    }

    fn set_paused(&mut self, paused: bool, now: Instant) {
        if self.paused == paused {
            return;
        }
        info!(paused, "slideshow pause changed");
        self.paused = paused;
        self.overlay.set_paused(paused);
        self.engine.extend_name_due(now, self.timing.text_display);
    }

    /// Makes the next `frame` call report that the loop should end.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn brightness(&self) -> f32 {
        self.engine.brightness()
    }

    pub fn is_text_field_on(&self, field: TextField) -> bool {
        self.overlay.is_text_field_on(field)
    }

    pub fn current_request(&self) -> Option<&PictureRequest> {
        self.requests.foreground()
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }

    pub fn overlay(&self) -> &OverlayManager {
        &self.overlay
    }
}

/// Converts an sRGB byte triple into an opaque linear colour.
pub fn linear_rgba(rgb: [u8; 3]) -> [f32; 4] {
    let srgb = palette::Srgb::new(rgb[0], rgb[1], rgb[2]).into_format::<f32>();
    let linear = srgb.into_linear();
    [linear.red, linear.green, linear.blue, 1.0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PictureRef;
    use image::RgbaImage;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeCanvas {
        pair: SlidePair<u32>,
        uploads: u32,
        fail_uploads: bool,
        draws: u32,
        last_blend: f32,
    }

    impl SlideCanvas for FakeCanvas {
        fn present_slide(&mut self, frame: CompositedFrame) -> Presented {
            if self.fail_uploads {
                self.pair.advance(None);
                return match self.pair.foreground() {
                    Some(_) => Presented::Reused { aspect: 1.0 },
                    None => Presented::Nothing,
                };
            }
            self.uploads += 1;
            self.pair.advance(Some(self.uploads));
            Presented::New {
                aspect: frame.aspect(),
            }
        }

        fn display_aspect(&self) -> f32 {
            16.0 / 9.0
        }

        fn draw(&mut self, scene: &FrameScene<'_>) {
            self.draws += 1;
            self.last_blend = scene.uniforms.blend;
        }
    }

    #[derive(Default)]
    struct QueueFeed(VecDeque<PreparedSlide>);

    impl SlideFeed for QueueFeed {
        fn try_take(&mut self) -> Option<PreparedSlide> {
            self.0.pop_front()
        }
    }

    fn slide(name: &str) -> PreparedSlide {
        PreparedSlide {
            request: PictureRequest::single(PictureRef {
                title: Some(name.to_string()),
                ..PictureRef::new(format!("{name}.jpg"))
            }),
            frame: CompositedFrame::new(RgbaImage::new(16, 9)),
        }
    }

    fn feed(names: &[&str]) -> QueueFeed {
        QueueFeed(names.iter().map(|n| slide(n)).collect())
    }

    fn config() -> Configuration {
        let mut cfg = Configuration::default();
        cfg.slideshow.slide_duration = Duration::from_secs(10);
        cfg.slideshow.fade_duration = Duration::from_secs(1);
        cfg.slideshow.frame_rate = 20;
        cfg.text.fields = vec![TextField::Title];
        cfg
    }

    fn title(show: &SlideShow) -> Option<String> {
        show.current_request()
            .and_then(|request| request.first.title.clone())
    }

    #[test]
    fn takes_a_slide_only_when_due() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let mut feed = feed(&["a", "b", "c"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();

        let status = show.frame(t0, &mut feed, &mut canvas);
        assert_eq!(
            status,
            FrameStatus {
                keep_running: true,
                skip_requested: false
            }
        );
        assert_eq!(canvas.uploads, 1);
        show.frame(t0 + Duration::from_secs(1), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 1);
        assert_eq!(feed.0.len(), 2);
        show.frame(t0 + Duration::from_secs(10), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 2);
        assert_eq!(title(&show).as_deref(), Some("b"));
        assert_eq!(canvas.draws, 3);
    }

    #[test]
    fn pause_holds_the_current_slide() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let mut feed = feed(&["a", "b"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();
        show.frame(t0, &mut feed, &mut canvas);
        assert!(show.apply_command(&ViewerCommand::TogglePause, t0));
        assert!(show.is_paused());
        show.frame(t0 + Duration::from_secs(30), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 1);
        assert_eq!(show.overlay().slots()[0].text, "a • PAUSED");

        show.apply_command(&ViewerCommand::SetPaused(false), t0);
        show.frame(t0 + Duration::from_secs(31), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 2);
    }

    #[test]
    fn next_steps_while_paused() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let mut feed = feed(&["a", "b", "c"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();
        show.frame(t0, &mut feed, &mut canvas);
        show.apply_command(&ViewerCommand::SetPaused(true), t0);
        show.apply_command(&ViewerCommand::Next, t0);

        show.frame(t0 + Duration::from_millis(100), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 2);
        assert_eq!(title(&show).as_deref(), Some("b"));
        assert!(show.is_paused());
        assert_eq!(show.overlay().slots()[0].text, "b • PAUSED");

        // still paused: the slide timer alone does not advance
        show.frame(t0 + Duration::from_secs(30), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 2);
    }

    #[test]
    fn clearing_fields_restarts_the_caption_timer() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let mut feed = feed(&["a"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();
        show.frame(t0, &mut feed, &mut canvas);
        let before = show.engine().name_due();

        let later = t0 + Duration::from_secs(5);
        assert!(show.apply_command(&ViewerCommand::ClearTextFields, later));
        assert!(show.engine().name_due() > before);
        assert!(!show.is_text_field_on(TextField::Title));
    }

    #[test]
    fn next_advances_without_waiting() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let mut feed = feed(&["a"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();
        show.frame(t0, &mut feed, &mut canvas);
        show.apply_command(&ViewerCommand::Next, t0);

        // nothing prepared yet: the request stays pending
        show.frame(t0 + Duration::from_millis(50), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 1);
        feed.0.push_back(slide("b"));
        show.frame(t0 + Duration::from_millis(100), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 2);
        assert_eq!(title(&show).as_deref(), Some("b"));
    }

    #[test]
    fn failed_upload_falls_back_to_previous_pair() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let mut feed = feed(&["a", "b", "c"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();
        show.frame(t0, &mut feed, &mut canvas);
        show.frame(t0 + Duration::from_secs(10), &mut feed, &mut canvas);
        canvas.fail_uploads = true;
        show.frame(t0 + Duration::from_secs(20), &mut feed, &mut canvas);
        assert_eq!(title(&show).as_deref(), Some("a"));
        assert_eq!(canvas.pair.foreground(), Some(&1));
        assert_eq!(show.engine().alpha(), 1.0 / 20.0);
    }

    #[test]
    fn gate_reflects_transition_state() {
        let gate = TransitionGate::default();
        let mut show = SlideShow::new(&config(), gate.clone());
        let mut feed = feed(&["a"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();
        show.frame(t0, &mut feed, &mut canvas);
        assert!(gate.is_in_transition());
        for n in 1..=25 {
            show.frame(t0 + Duration::from_millis(50 * n), &mut feed, &mut canvas);
        }
        assert_eq!(canvas.last_blend, 1.0);
        assert!(!gate.is_in_transition());
    }

    #[test]
    fn stop_ends_the_loop() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        show.stop();
        let status = show.frame(Instant::now(), &mut QueueFeed::default(), &mut FakeCanvas::default());
        assert!(!status.keep_running);
        assert!(!status.skip_requested);
    }

    #[test]
    fn commands_for_other_components_are_declined() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let now = Instant::now();
        assert!(!show.apply_command(&ViewerCommand::SetMattingTolerance(0.2), now));
        assert!(show.apply_command(&ViewerCommand::SetBrightness(3.0), now));
        assert_eq!(show.brightness(), 1.0);
        assert!(show.apply_command(&ViewerCommand::SetTextField(TextField::Date, true), now));
        assert!(show.is_text_field_on(TextField::Date));
    }

    #[test]
    fn dark_display_pauses_the_show() {
        let mut show = SlideShow::new(&config(), TransitionGate::default());
        let mut feed = feed(&["a", "b"]);
        let mut canvas = FakeCanvas::default();
        let t0 = Instant::now();
        show.frame(t0, &mut feed, &mut canvas);

        assert!(show.apply_command(&ViewerCommand::SetDisplayPower(false), t0));
        assert!(show.is_paused());
        show.frame(t0 + Duration::from_secs(30), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 1);

        assert!(show.apply_command(&ViewerCommand::SetDisplayPower(true), t0));
        assert!(!show.is_paused());
        show.frame(t0 + Duration::from_secs(31), &mut feed, &mut canvas);
        assert_eq!(canvas.uploads, 2);
    }

    #[test]
    fn slide_pair_moves_and_swaps() {
        let mut pair = SlidePair::default();
        pair.advance(None);
        assert_eq!(pair.foreground(), None);
        pair.advance(Some(1));
        pair.advance(None);
        assert_eq!((pair.foreground(), pair.background()), (Some(&1), None));
        pair.advance(Some(2));
        assert_eq!((pair.foreground(), pair.background()), (Some(&2), Some(&1)));
        pair.advance(None);
        assert_eq!((pair.foreground(), pair.background()), (Some(&1), Some(&2)));
    }
}
