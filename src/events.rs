use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TextField;
use crate::processing::CompositedFrame;

/// Descriptor of one picture as supplied by the catalog. Never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureRef {
    pub path: PathBuf,
    /// EXIF orientation code, 1 when absent.
    pub orientation: u16,
    /// Taller than wide once orientation is applied.
    pub portrait: bool,
    pub taken_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub caption: Option<String>,
    pub location: Option<String>,
    /// Latitude and longitude in decimal degrees.
    pub coordinates: Option<(f64, f64)>,
}

impl PictureRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            orientation: 1,
            portrait: false,
            taken_at: None,
            title: None,
            caption: None,
            location: None,
            coordinates: None,
        }
    }
}

/// One slide: a single picture or a pair of portraits.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureRequest {
    pub first: Arc<PictureRef>,
    pub second: Option<Arc<PictureRef>>,
}

impl PictureRequest {
    pub fn single(picture: PictureRef) -> Self {
        Self {
            first: Arc::new(picture),
            second: None,
        }
    }

    pub fn pair(left: PictureRef, right: PictureRef) -> Self {
        Self {
            first: Arc::new(left),
            second: Some(Arc::new(right)),
        }
    }

    pub fn is_pair(&self) -> bool {
        self.second.is_some()
    }

    pub fn pictures(&self) -> impl Iterator<Item = &PictureRef> {
        std::iter::once(self.first.as_ref()).chain(self.second.as_deref())
    }
}

/// A composited frame plus the request whose metadata drives the captions.
#[derive(Debug)]
pub struct PreparedSlide {
    pub request: PictureRequest,
    pub frame: CompositedFrame,
}

/// Runtime control messages applied by the display loop between frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    TogglePause,
    SetPaused(bool),
    /// Advance to the next prepared slide without waiting for the timer.
    Next,
    SetBrightness(f32),
    SetTextField(TextField, bool),
    ClearTextFields,
    SetClock(bool),
    SetMattingTolerance(f32),
    SetDisplayPower(bool),
}
