use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};

use crate::config::PanKind;

/// A new slide is considered imminent once it is this close.
pub const TRANSITION_LEAD: Duration = Duration::from_secs(5);

const ALPHA_SNAP: f64 = 1e-6;

/// Uniform block consumed by `slide.wgsl`. Layout must match the shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SlideUniforms {
    /// Linear RGBA shown where neither texture covers the screen.
    pub background: [f32; 4],
    pub fg_scale: [f32; 2],
    pub fg_offset: [f32; 2],
    pub bg_scale: [f32; 2],
    pub bg_offset: [f32; 2],
    /// Smoothstepped crossfade weight of the foreground.
    pub blend: f32,
    pub brightness: f32,
    /// Opacity of the stretched texture edge outside the picture.
    pub edge_alpha: f32,
    pub _pad: f32,
}

impl Default for SlideUniforms {
    fn default() -> Self {
        Self {
            background: [0.0, 0.0, 0.0, 1.0],
            fg_scale: [1.0, 1.0],
            fg_offset: [0.0, 0.0],
            bg_scale: [1.0, 1.0],
            bg_offset: [0.0, 0.0],
            blend: 1.0,
            brightness: 1.0,
            edge_alpha: 0.5,
            _pad: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionTiming {
    pub slide: Duration,
    pub fade: Duration,
    pub text_display: Duration,
    pub frame_rate: u32,
}

/// Ken Burns motion applied once the crossfade has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanStrategy {
    /// Eases each offset towards `step * elapsed`.
    Linear,
    None,
}

impl PanStrategy {
    pub fn compute_step(&self, current: f32, step: f32, elapsed: f32) -> f32 {
        match self {
            Self::Linear => current * 0.95 + step * elapsed * 0.05,
            Self::None => current,
        }
    }
}

impl From<PanKind> for PanStrategy {
    fn from(kind: PanKind) -> Self {
        match kind {
            PanKind::Linear => Self::Linear,
            PanKind::None => Self::None,
        }
    }
}

/// Shared read-only view of whether a slide change is under way or imminent.
#[derive(Debug, Clone, Default)]
pub struct TransitionGate(Arc<AtomicBool>);

impl TransitionGate {
    pub fn is_in_transition(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, in_transition: bool) {
        self.0.store(in_transition, Ordering::Relaxed);
    }
}

/// Per-slide crossfade and pan state, advanced once per rendered frame.
#[derive(Debug)]
pub struct TransitionEngine {
    timing: TransitionTiming,
    fit: bool,
    kenburns: bool,
    pan: PanStrategy,
    alpha: f64,
    delta_alpha: f64,
    pan_step: [f32; 2],
    uniforms: SlideUniforms,
    next_due: Option<Instant>,
    name_due: Option<Instant>,
    in_transition: bool,
}

impl TransitionEngine {
    pub fn new(timing: TransitionTiming, fit: bool, kenburns: bool, pan: PanStrategy) -> Self {
        Self {
            timing,
            fit,
            kenburns,
            pan,
            alpha: 1.0,
            delta_alpha: 1.0,
            pan_step: [0.0, 0.0],
            uniforms: SlideUniforms::default(),
            next_due: None,
            name_due: None,
            in_transition: false,
        }
    }

    /// Begins the crossfade to a new foreground with the given aspect.
    pub fn start_slide(
        &mut self,
        now: Instant,
        timing: TransitionTiming,
        display_aspect: f32,
        image_aspect: f32,
    ) {
        self.timing = timing;
        self.alpha = 0.0;
        self.uniforms.blend = 0.0;
        let frames = self.timing.fade.as_secs_f64() * self.timing.frame_rate.max(1) as f64;
        self.delta_alpha = if frames < 1.0 { 1.0 } else { 1.0 / frames };
        self.next_due = Some(now + self.timing.slide);
        self.name_due = Some(now + self.timing.fade + self.timing.text_display);

        self.uniforms.bg_scale = self.uniforms.fg_scale;
        self.uniforms.bg_offset = self.uniforms.fg_offset;
        let (scale, offset) = fit_uniforms(display_aspect, image_aspect, self.fit);
        self.uniforms.fg_scale = scale;
        self.uniforms.fg_offset = offset;

        if self.kenburns {
            let pannable = self.pannable_secs();
            for axis in 0..2 {
                self.pan_step[axis] = if pannable > 0.0 {
                    offset[axis] * 2.0 / pannable
                } else {
                    0.0
                };
            }
            self.uniforms.fg_offset = [0.0, 0.0];
        }
        self.in_transition = true;
    }

    /// Advances pan and fade for the frame drawn at `now`.
    pub fn update(&mut self, now: Instant) {
        if self.kenburns && self.alpha >= 1.0 {
            if let Some(next_due) = self.next_due {
                let remaining = next_due.saturating_duration_since(now).as_secs_f32();
                let elapsed = (self.pannable_secs() - remaining).max(0.0);
                for axis in 0..2 {
                    self.uniforms.fg_offset[axis] = self.pan.compute_step(
                        self.uniforms.fg_offset[axis],
                        self.pan_step[axis],
                        elapsed,
                    );
                }
            }
        }

        if self.alpha < 1.0 {
            self.alpha += self.delta_alpha;
            if (1.0 - self.alpha).abs() < ALPHA_SNAP {
                self.alpha = 1.0;
            }
            self.alpha = self.alpha.clamp(0.0, 1.0);
            let a = self.alpha as f32;
            self.uniforms.blend = a * a * (3.0 - 2.0 * a);
        }

        let imminent = self
            .next_due
            .is_some_and(|due| due.saturating_duration_since(now) < TRANSITION_LEAD);
        self.in_transition = imminent || self.alpha < 1.0;
    }

    /// True before the first slide and once the current slide has run its course.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_none_or(|due| now >= due)
    }

    /// Pushes the caption deadline out so a refreshed caption gets its full time.
    pub fn extend_name_due(&mut self, now: Instant, text_display: Duration) {
        let extended = now + text_display;
        self.name_due = Some(self.name_due.map_or(extended, |due| due.max(extended)));
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        self.uniforms.brightness = brightness.clamp(0.0, 1.0);
    }

    pub fn brightness(&self) -> f32 {
        self.uniforms.brightness
    }

    pub fn set_edge_alpha(&mut self, edge_alpha: f32) {
        self.uniforms.edge_alpha = edge_alpha.clamp(0.0, 1.0);
    }

    pub fn set_background(&mut self, background: [f32; 4]) {
        self.uniforms.background = background;
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn delta_alpha(&self) -> f64 {
        self.delta_alpha
    }

    pub fn name_due(&self) -> Option<Instant> {
        self.name_due
    }

    pub fn timing(&self) -> TransitionTiming {
        self.timing
    }

    pub fn is_in_transition(&self) -> bool {
        self.in_transition
    }

    pub fn uniforms(&self) -> &SlideUniforms {
        &self.uniforms
    }

    fn pannable_secs(&self) -> f32 {
        self.timing.slide.as_secs_f32() - self.timing.fade.as_secs_f32()
    }
}

/// Texture-space scale and offset for one slot.
///
/// `fit` letterboxes the whole picture; otherwise the picture fills the screen
/// and the overflowing axis is cropped.
pub fn fit_uniforms(display_aspect: f32, image_aspect: f32, fit: bool) -> ([f32; 2], [f32; 2]) {
    let mut ratio = display_aspect / image_aspect.max(f32::EPSILON);
    let axis = if (ratio > 1.0 && fit) || (ratio <= 1.0 && !fit) {
        0
    } else {
        ratio = 1.0 / ratio;
        1
    };
    let mut scale = [1.0, 1.0];
    let mut offset = [0.0, 0.0];
    scale[axis] = ratio;
    offset[axis] = (ratio - 1.0) / 2.0;
    (scale, offset)
}
