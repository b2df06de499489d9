use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use palette::Srgb;
use serde::Deserialize;

use crate::processing::matting::MatTolerance;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Root directory scanned recursively by the bundled directory catalog.
    pub photo_library_path: PathBuf,
    /// Directory catalog ordering and rescan behaviour.
    pub catalog: CatalogOptions,
    /// Slide timing, frame rate and fit/pan behaviour.
    pub slideshow: SlideshowOptions,
    /// How decoded pictures are turned into a single texture.
    pub compositor: CompositorOptions,
    /// Caption overlay shown over each slide.
    pub text: TextOptions,
    /// Optional clock overlay.
    pub clock: ClockOptions,
    /// Window and output settings.
    pub display: DisplayOptions,
    /// Shell commands used to query and switch the panel power.
    #[serde(default)]
    pub display_power: Option<DisplayPowerOptions>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(mut self) -> Result<Self> {
        self.slideshow
            .validate()
            .context("invalid slideshow configuration")?;
        self.compositor
            .validate()
            .context("invalid compositor configuration")?;
        self.text.validate().context("invalid text configuration")?;
        self.clock.validate().context("invalid clock configuration")?;
        ensure!(
            (0.0..=1.0).contains(&self.display.brightness),
            "display.brightness must be within [0, 1]"
        );
        ensure!(
            parse_hex_rgb(&self.display.background).is_some(),
            "display.background must be a hex colour such as #000000"
        );
        if let Some(power) = self.display_power.as_ref() {
            power
                .validate()
                .context("invalid display-power configuration")?;
        }

        // Panning needs the picture to overflow the screen, which neither fit
        // mode nor a blurred fill allows.
        if self.slideshow.kenburns {
            if self.slideshow.fit {
                tracing::info!("kenburns enabled; forcing fill mode");
                self.slideshow.fit = false;
            }
            if self.compositor.blur.enabled {
                tracing::info!("kenburns enabled; disabling edge blur");
                self.compositor.blur.enabled = false;
            }
        }
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            photo_library_path: PathBuf::new(),
            catalog: CatalogOptions::default(),
            slideshow: SlideshowOptions::default(),
            compositor: CompositorOptions::default(),
            text: TextOptions::default(),
            clock: ClockOptions::default(),
            display: DisplayOptions::default(),
            display_power: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CatalogOptions {
    /// Shuffle the playlist after every full pass.
    pub shuffle: bool,
    /// Optional deterministic seed for shuffling.
    pub shuffle_seed: Option<u64>,
    /// How often the library is rescanned for added or removed files.
    #[serde(with = "humantime_serde")]
    pub rescan_interval: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            shuffle: true,
            shuffle_seed: None,
            rescan_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanKind {
    Linear,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SlideshowOptions {
    /// Time each slide stays on screen, fade included.
    #[serde(with = "humantime_serde")]
    pub slide_duration: Duration,
    /// Length of the crossfade between slides.
    #[serde(with = "humantime_serde")]
    pub fade_duration: Duration,
    /// Target frames per second used for the alpha ramp.
    pub frame_rate: u32,
    /// Show the whole picture (letterboxed) instead of filling the screen.
    pub fit: bool,
    /// Slowly pan across pictures that overflow the screen.
    pub kenburns: bool,
    /// Pan motion used when `kenburns` is enabled.
    pub pan: PanKind,
    /// Show two portrait pictures side by side.
    pub pair_portraits: bool,
}

impl SlideshowOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=240).contains(&self.frame_rate),
            "frame-rate must be between 1 and 240"
        );
        ensure!(
            self.slide_duration > Duration::ZERO,
            "slide-duration must be positive"
        );
        Ok(())
    }
}

impl Default for SlideshowOptions {
    fn default() -> Self {
        Self {
            slide_duration: Duration::from_secs(200),
            fade_duration: Duration::from_secs(10),
            frame_rate: 20,
            fit: false,
            kenburns: false,
            pan: PanKind::Linear,
            pair_portraits: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CompositorOptions {
    pub mat: MatOptions,
    pub blur: EdgeBlurOptions,
    /// Opacity of the stretched edge / blurred background fill.
    pub edge_alpha: f32,
    /// Upper bound for either side of the uploaded texture.
    pub max_texture_dimension: u32,
    /// Use scaled IDCT decoding for JPEGs larger than the screen.
    pub fast_jpeg_decode: bool,
}

impl CompositorOptions {
    fn validate(&mut self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.edge_alpha),
            "edge-alpha must be within [0, 1]"
        );
        ensure!(
            self.max_texture_dimension >= 64,
            "max-texture-dimension must be at least 64"
        );
        ensure!(self.blur.amount >= 0.0, "blur.amount must not be negative");
        self.blur.zoom = self.blur.zoom.max(1.0);
        self.mat.validate()
    }
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            mat: MatOptions::default(),
            blur: EdgeBlurOptions::default(),
            edge_alpha: 0.5,
            max_texture_dimension: 4096,
            fast_jpeg_decode: true,
        }
    }
}

/// `images` accepts `true`, `false` or a numeric aspect tolerance.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum MatImagesSetting {
    Flag(bool),
    Tolerance(f32),
}

impl MatImagesSetting {
    pub fn tolerance(self) -> MatTolerance {
        match self {
            Self::Flag(true) => MatTolerance::Always,
            Self::Flag(false) => MatTolerance::Off,
            Self::Tolerance(value) => MatTolerance::from_value(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatStyle {
    Plain,
    Double,
    Bevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum MatColor {
    /// Derived from the picture's average colour.
    Auto,
    Fixed([u8; 3]),
}

impl TryFrom<String> for MatColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        parse_hex_rgb(&value)
            .map(Self::Fixed)
            .ok_or_else(|| format!("invalid mat colour '{value}'; expected 'auto' or #rrggbb"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct MatOptions {
    pub images: MatImagesSetting,
    pub style: MatStyle,
    pub outer_color: MatColor,
    pub inner_color: MatColor,
    /// Minimum outer mat width in pixels.
    pub outer_border: u32,
    /// Width of the inner ring used by the `double` and `bevel` styles.
    pub inner_border: u32,
}

impl MatOptions {
    fn validate(&self) -> Result<()> {
        if let MatImagesSetting::Tolerance(value) = self.images {
            ensure!(
                (0.0..=1.0).contains(&value),
                "mat.images tolerance must be within [0, 1]"
            );
        }
        Ok(())
    }
}

impl Default for MatOptions {
    fn default() -> Self {
        Self {
            images: MatImagesSetting::Tolerance(0.01),
            style: MatStyle::Bevel,
            outer_color: MatColor::Auto,
            inner_color: MatColor::Fixed([240, 236, 226]),
            outer_border: 75,
            inner_border: 40,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct EdgeBlurOptions {
    pub enabled: bool,
    /// Gaussian sigma applied to the 512 px wide background sample.
    pub amount: f32,
    /// Extra zoom into the background sample; values below 1 are raised to 1.
    pub zoom: f32,
}

impl Default for EdgeBlurOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            amount: 12.0,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextField {
    Title,
    Caption,
    Name,
    Date,
    Location,
    Folder,
}

impl TextField {
    pub const ALL: [TextField; 6] = [
        TextField::Title,
        TextField::Caption,
        TextField::Name,
        TextField::Date,
        TextField::Location,
        TextField::Folder,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Caption => "caption",
            Self::Name => "name",
            Self::Date => "date",
            Self::Location => "location",
            Self::Folder => "folder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Justify {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct TextOptions {
    /// Caption fields shown at startup. Display order is fixed: title,
    /// caption, name, date, location, folder.
    pub fields: Vec<TextField>,
    /// How long a caption stays up after the fade completes.
    #[serde(with = "humantime_serde")]
    pub display_duration: Duration,
    /// chrono format string for the `date` field.
    pub date_format: String,
    /// Optional time zone used to render capture dates.
    pub timezone: Option<Tz>,
    pub justify: Justify,
    /// Font size in pixels.
    pub size: f32,
    pub font: Option<String>,
    pub color: String,
    /// Substrings removed from the `location` field before display.
    pub suppress_locations: Vec<String>,
    /// Draw a dark gradient band behind captions.
    pub backing_band: bool,
}

impl TextOptions {
    fn validate(&self) -> Result<()> {
        ensure!(self.size > 0.0, "text.size must be positive");
        ensure!(
            self.display_duration > Duration::ZERO,
            "text.display-duration must be positive"
        );
        ensure!(
            parse_hex_rgb(&self.color).is_some(),
            "text.color must be a hex colour such as #ffffff"
        );
        ensure!(
            is_valid_time_format(&self.date_format),
            "text.date-format '{}' is not a valid strftime format",
            self.date_format
        );
        Ok(())
    }
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            fields: vec![TextField::Title, TextField::Date, TextField::Location],
            display_duration: Duration::from_secs(20),
            date_format: "%b %d, %Y".to_string(),
            timezone: None,
            justify: Justify::Center,
            size: 40.0,
            font: None,
            color: "#ffffff".to_string(),
            suppress_locations: Vec::new(),
            backing_band: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ClockOptions {
    pub enabled: bool,
    /// chrono format string.
    pub format: String,
    pub justify: Justify,
    pub size: f32,
    pub timezone: Option<Tz>,
}

impl ClockOptions {
    fn validate(&self) -> Result<()> {
        ensure!(self.size > 0.0, "clock.size must be positive");
        ensure!(
            !self.format.trim().is_empty(),
            "clock.format must not be blank"
        );
        ensure!(
            is_valid_time_format(&self.format),
            "clock.format '{}' is not a valid strftime format",
            self.format
        );
        Ok(())
    }
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            format: "%H:%M".to_string(),
            justify: Justify::Right,
            size: 50.0,
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DisplayOptions {
    pub fullscreen: bool,
    pub title: String,
    /// Colour behind letterboxed slides.
    pub background: String,
    /// Initial output brightness multiplier.
    pub brightness: f32,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            fullscreen: true,
            title: "Frame Display".to_string(),
            background: "#000000".to_string(),
            brightness: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DisplayPowerOptions {
    /// Command printing the current power state (`display_power=1` or `1`).
    pub query_command: String,
    pub on_command: String,
    pub off_command: String,
}

impl DisplayPowerOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.query_command.trim().is_empty(),
            "query-command must not be blank"
        );
        ensure!(
            !self.on_command.trim().is_empty(),
            "on-command must not be blank"
        );
        ensure!(
            !self.off_command.trim().is_empty(),
            "off-command must not be blank"
        );
        Ok(())
    }
}

impl Default for DisplayPowerOptions {
    fn default() -> Self {
        Self {
            query_command: "vcgencmd display_power".to_string(),
            on_command: "vcgencmd display_power 1".to_string(),
            off_command: "vcgencmd display_power 0".to_string(),
        }
    }
}

/// True when chrono can render every specifier in `format`.
pub fn is_valid_time_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Parses `#rgb`, `#rrggbb` (with or without the leading hash).
pub fn parse_hex_rgb(input: &str) -> Option<[u8; 3]> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let rgb = Srgb::<u8>::from_str(trimmed).ok()?;
    Some([rgb.red, rgb.green, rgb.blue])
}
