use std::path::PathBuf;

use anyhow::{Result, bail, ensure};
use bytemuck::{Pod, Zeroable};
use fontdb::{Database, Family, Query};
use glyphon::cosmic_text::Align;
use glyphon::{
    Attrs, Buffer, Cache, Color, FamilyOwned, FontSystem, Metrics, Resolution, Shaping, SwashCache,
    TextArea, TextAtlas, TextBounds, TextRenderer, Viewport, Wrap,
};
use tracing::{debug, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use super::overlay::{OverlayManager, SlotAnchor};
use super::slideshow::{FrameScene, Presented, SlideCanvas, SlidePair};
use super::transition::SlideUniforms;
use crate::config::{Configuration, Justify, parse_hex_rgb};
use crate::processing::CompositedFrame;

/// Peak opacity of the caption backing band.
const BAND_MAX_ALPHA: f32 = 170.0 / 255.0;
/// Screen fraction, from the bottom, covered by the band.
const BAND_EXTENT: f32 = 1.0 / 3.0;
const TEXT_MARGIN_FRACTION: f32 = 0.03;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BandUniforms {
    color: [f32; 4],
    extent: f32,
    _pad: [f32; 3],
}

struct SlideTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl SlideTexture {
    fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

/// A shaped block of text and where it goes on screen.
struct ShapedText {
    revision: u64,
    buffer: Buffer,
    left: f32,
    top: f32,
    right: f32,
}

/// Draws the crossfading slide pair, the caption band and the text overlays.
pub struct SlideRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    size: PhysicalSize<u32>,
    background: wgpu::Color,

    slide_pipeline: wgpu::RenderPipeline,
    slide_layout: wgpu::BindGroupLayout,
    slide_uniforms: wgpu::Buffer,
    slide_bind_group: Option<wgpu::BindGroup>,
    sampler: wgpu::Sampler,
    placeholder: SlideTexture,
    textures: SlidePair<SlideTexture>,

    band_pipeline: wgpu::RenderPipeline,
    band_uniforms: wgpu::Buffer,
    band_bind_group: wgpu::BindGroup,
    band_alpha: f32,

    _cache: Cache,
    viewport: Viewport,
    atlas: TextAtlas,
    text_renderer: TextRenderer,
    font_system: FontSystem,
    swash_cache: SwashCache,
    font_family: FamilyOwned,
    text_rgb: [u8; 3],
    caption_size: f32,
    clock_size: f32,
    captions: Vec<ShapedText>,
    clock: Option<ShapedText>,
    caption_alpha: f32,
    clock_visible: bool,
}

impl SlideRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        format: wgpu::TextureFormat,
        size: PhysicalSize<u32>,
        cfg: &Configuration,
    ) -> Self {
        let slide_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("slide-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/slide.wgsl").into()),
        });
        let slide_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("slide-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let slide_pipeline = fullscreen_pipeline(
            device,
            format,
            &slide_shader,
            &slide_layout,
            "slide-pipeline",
            None,
        );
        let slide_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("slide-uniforms"),
            contents: bytemuck::bytes_of(&SlideUniforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("slide-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let placeholder = create_texture(device, queue, 1, 1, &[0, 0, 0, 0], "slide-placeholder");

        let band_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("band-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/band.wgsl").into()),
        });
        let band_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("band-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let band_pipeline = fullscreen_pipeline(
            device,
            format,
            &band_shader,
            &band_layout,
            "band-pipeline",
            Some(wgpu::BlendState::ALPHA_BLENDING),
        );
        let band_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("band-uniforms"),
            contents: bytemuck::bytes_of(&BandUniforms {
                color: [0.0; 4],
                extent: BAND_EXTENT,
                _pad: [0.0; 3],
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let band_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("band-bind-group"),
            layout: &band_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: band_uniforms.as_entire_binding(),
            }],
        });

        let mut font_system = FontSystem::new();
        initialize_font_database(font_system.db_mut());
        let font_family = resolve_font_family(&font_system, cfg.text.font.as_deref());
        let cache = Cache::new(device);
        let viewport = Viewport::new(device, &cache);
        let mut atlas = TextAtlas::new(device, queue, &cache, format);
        let text_renderer =
            TextRenderer::new(&mut atlas, device, wgpu::MultisampleState::default(), None);

        let [r, g, b] = parse_hex_rgb(&cfg.display.background).unwrap_or([0, 0, 0]);
        let background = super::slideshow::linear_rgba([r, g, b]);

        Self {
            device: device.clone(),
            queue: queue.clone(),
            size,
            background: wgpu::Color {
                r: background[0] as f64,
                g: background[1] as f64,
                b: background[2] as f64,
                a: 1.0,
            },
            slide_pipeline,
            slide_layout,
            slide_uniforms,
            slide_bind_group: None,
            sampler,
            placeholder,
            textures: SlidePair::default(),
            band_pipeline,
            band_uniforms,
            band_bind_group,
            band_alpha: 0.0,
            _cache: cache,
            viewport,
            atlas,
            text_renderer,
            font_system,
            swash_cache: SwashCache::new(),
            font_family,
            text_rgb: parse_hex_rgb(&cfg.text.color).unwrap_or([255, 255, 255]),
            caption_size: cfg.text.size,
            clock_size: cfg.clock.size,
            captions: Vec::new(),
            clock: None,
            caption_alpha: 0.0,
            clock_visible: false,
        }
    }

    /// The largest texture edge this device accepts.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        if self.size == size {
            return;
        }
        self.size = size;
        // shaped text depends on the surface width
        self.captions.clear();
        self.clock = None;
    }

    /// Records the slide, band and text passes into `encoder`.
    pub fn encode(&mut self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("slide-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.background),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let Some(bind_group) = self.slide_bind_group.as_ref() {
                pass.set_pipeline(&self.slide_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            if self.band_alpha > 0.0 {
                pass.set_pipeline(&self.band_pipeline);
                pass.set_bind_group(0, &self.band_bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            if let Err(err) = self
                .text_renderer
                .render(&self.atlas, &self.viewport, &mut pass)
            {
                warn!(error = %err, "overlay text draw failed");
            }
        }
        self.atlas.trim();
    }

    fn upload(&self, frame: CompositedFrame) -> Result<SlideTexture> {
        let (width, height) = (frame.width(), frame.height());
        let max = self.max_texture_dimension();
        ensure!(width > 0 && height > 0, "slide has no pixels");
        ensure!(
            width <= max && height <= max,
            "slide {width}x{height} exceeds the {max}px texture limit"
        );
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = create_texture(
            &self.device,
            &self.queue,
            width,
            height,
            frame.image().as_raw(),
            "slide-texture",
        );
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(oom) {
            bail!("texture upload failed: {err}");
        }
        Ok(texture)
    }

    fn rebuild_bind_group(&mut self) {
        let Some(fg) = self.textures.foreground() else {
            self.slide_bind_group = None;
            return;
        };
        let bg = self.textures.background().unwrap_or(&self.placeholder);
        self.slide_bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("slide-bind-group"),
            layout: &self.slide_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.slide_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&fg.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&bg.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        }));
    }

    fn sync_text(&mut self, overlay: &OverlayManager) {
        let (width, height) = (self.size.width as f32, self.size.height as f32);
        let margin = (width.min(height) * TEXT_MARGIN_FRACTION).round();

        let slots = overlay.slots();
        let stale = self.captions.len() != slots.len()
            || self
                .captions
                .iter()
                .zip(slots)
                .any(|(shaped, slot)| shaped.revision != slot.revision);
        if stale {
            let captions: Vec<ShapedText> = slots
                .iter()
                .map(|slot| {
                    let (left, right) = anchor_span(slot.anchor, width, margin);
                    let mut shaped = self.shape(
                        &slot.text,
                        slot.justify,
                        self.caption_size,
                        left,
                        right,
                        slot.revision,
                    );
                    shaped.top = (height - margin - text_height(&shaped.buffer)).max(0.0);
                    shaped
                })
                .collect();
            debug!(slots = captions.len(), "captions reshaped");
            self.captions = captions;
        }

        let clock = overlay.clock();
        self.clock_visible = clock.is_enabled() && !clock.text.is_empty();
        if self.clock_visible
            && self
                .clock
                .as_ref()
                .is_none_or(|shaped| shaped.revision != clock.revision)
        {
            let mut shaped = self.shape(
                &clock.text,
                clock.justify,
                self.clock_size,
                margin,
                width - margin,
                clock.revision,
            );
            shaped.top = margin;
            self.clock = Some(shaped);
        }
    }

    fn shape(
        &mut self,
        text: &str,
        justify: Justify,
        size: f32,
        left: f32,
        right: f32,
        revision: u64,
    ) -> ShapedText {
        let metrics = Metrics::new(size, size * 1.2);
        let mut buffer = Buffer::new(&mut self.font_system, metrics);
        buffer.set_wrap(&mut self.font_system, Wrap::WordOrGlyph);
        buffer.set_metrics_and_size(
            &mut self.font_system,
            metrics,
            Some((right - left).max(1.0)),
            None,
        );
        let attrs = Attrs::new().family(self.font_family.as_family());
        buffer.set_text(&mut self.font_system, text, &attrs, Shaping::Advanced);
        let align = match justify {
            Justify::Left => Align::Left,
            Justify::Center => Align::Center,
            Justify::Right => Align::Right,
        };
        for line in &mut buffer.lines {
            line.set_align(Some(align));
        }
        buffer.shape_until_scroll(&mut self.font_system, false);
        ShapedText {
            revision,
            buffer,
            left,
            top: 0.0,
            right,
        }
    }

    fn prepare_text(&mut self) {
        self.viewport.update(
            &self.queue,
            Resolution {
                width: self.size.width,
                height: self.size.height,
            },
        );
        let [r, g, b] = self.text_rgb;
        let caption_color = Color::rgba(r, g, b, (self.caption_alpha * 255.0).round() as u8);
        let clock_color = Color::rgba(r, g, b, 255);
        let bottom = self.size.height as i32;

        let mut areas = Vec::with_capacity(self.captions.len() + 1);
        if self.caption_alpha > 0.0 {
            areas.extend(self.captions.iter().map(|shaped| text_area(shaped, caption_color, bottom)));
        }
        if self.clock_visible {
            if let Some(shaped) = self.clock.as_ref() {
                areas.push(text_area(shaped, clock_color, bottom));
            }
        }

        if let Err(err) = self.text_renderer.prepare(
            &self.device,
            &self.queue,
            &mut self.font_system,
            &mut self.atlas,
            &self.viewport,
            areas,
            &mut self.swash_cache,
        ) {
            warn!(error = %err, "overlay text prepare failed");
        }
    }
}

impl SlideCanvas for SlideRenderer {
    fn present_slide(&mut self, frame: CompositedFrame) -> Presented {
        let presented = match self.upload(frame) {
            Ok(texture) => {
                let aspect = texture.aspect();
                self.textures.advance(Some(texture));
                Presented::New { aspect }
            }
            Err(err) => {
                warn!(error = %err, "slide texture upload failed");
                self.textures.advance(None);
                match self.textures.foreground() {
                    Some(fg) => Presented::Reused { aspect: fg.aspect() },
                    None => Presented::Nothing,
                }
            }
        };
        self.rebuild_bind_group();
        presented
    }

    fn display_aspect(&self) -> f32 {
        self.size.width.max(1) as f32 / self.size.height.max(1) as f32
    }

    fn draw(&mut self, scene: &FrameScene<'_>) {
        self.queue
            .write_buffer(&self.slide_uniforms, 0, bytemuck::bytes_of(scene.uniforms));

        self.band_alpha = scene.overlay.band_alpha() * BAND_MAX_ALPHA;
        self.queue.write_buffer(
            &self.band_uniforms,
            0,
            bytemuck::bytes_of(&BandUniforms {
                color: [0.0, 0.0, 0.0, self.band_alpha],
                extent: BAND_EXTENT,
                _pad: [0.0; 3],
            }),
        );

        self.caption_alpha = scene.overlay.caption_alpha();
        self.sync_text(scene.overlay);
        self.prepare_text();
    }
}

fn text_area(shaped: &ShapedText, color: Color, bottom: i32) -> TextArea<'_> {
    TextArea {
        buffer: &shaped.buffer,
        left: shaped.left,
        top: shaped.top,
        scale: 1.0,
        bounds: TextBounds {
            left: shaped.left as i32,
            top: 0,
            right: shaped.right as i32,
            bottom,
        },
        default_color: color,
        custom_glyphs: &[],
    }
}

fn text_height(buffer: &Buffer) -> f32 {
    buffer
        .layout_runs()
        .map(|run| run.line_top + run.line_height)
        .fold(0.0, f32::max)
}

/// Horizontal extent of a caption slot in pixels.
fn anchor_span(anchor: SlotAnchor, width: f32, margin: f32) -> (f32, f32) {
    let half = width / 2.0;
    match anchor {
        SlotAnchor::Full => (margin, width - margin),
        SlotAnchor::Left => (margin, half - margin),
        SlotAnchor::Right => (half + margin, width - margin),
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::BindGroupLayout,
    label: &str,
    blend: Option<wgpu::BlendState>,
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn create_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    pixels: &[u8],
    label: &str,
) -> SlideTexture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        texture.as_image_copy(),
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    SlideTexture {
        _texture: texture,
        view,
        width,
        height,
    }
}

fn initialize_font_database(db: &mut Database) {
    db.load_system_fonts();
    let bundled = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/fonts");
    if bundled.exists() {
        db.load_fonts_dir(&bundled);
    }
}

fn resolve_font_family(font_system: &FontSystem, requested: Option<&str>) -> FamilyOwned {
    let db = font_system.db();
    if let Some(name) = requested.map(str::trim).filter(|name| !name.is_empty()) {
        if font_available(db, name) {
            return FamilyOwned::Name(name.into());
        }
        warn!(font = %name, "configured font not found; using default");
    }
    if font_available(db, "DejaVu Sans") {
        FamilyOwned::Name("DejaVu Sans".into())
    } else {
        FamilyOwned::SansSerif
    }
}

fn font_available(db: &Database, name: &str) -> bool {
    let query = Query {
        families: &[Family::Name(name)],
        ..Default::default()
    };
    db.query(&query).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_uniform_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<BandUniforms>(), 32);
        assert_eq!(std::mem::size_of::<SlideUniforms>(), 64);
    }

    #[test]
    fn pair_slots_split_the_screen() {
        assert_eq!(anchor_span(SlotAnchor::Full, 1000.0, 10.0), (10.0, 990.0));
        assert_eq!(anchor_span(SlotAnchor::Left, 1000.0, 10.0), (10.0, 490.0));
        assert_eq!(anchor_span(SlotAnchor::Right, 1000.0, 10.0), (510.0, 990.0));
    }
}
