//! Directory-backed picture source.
//!
//! Scans a library once at startup, hands pictures out in passes (optionally
//! shuffled) and pairs consecutive portraits. A background thread rescans on an
//! interval, holding off while a slide change is under way.
use std::collections::{HashSet, VecDeque};
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use crossbeam_channel::{self as xchan, RecvTimeoutError, Sender};
use exif::{In, Tag, Value};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CatalogOptions;
use crate::events::{PictureRef, PictureRequest};
use crate::processing::decode::exif_orientation;
use crate::processing::orientation::swaps_dimensions;
use crate::tasks::prefetch::PictureSource;
use crate::tasks::viewer::transition::TransitionGate;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// How often a deferred rescan checks the gate again.
const RESCAN_RETRY: Duration = Duration::from_millis(250);

struct CatalogState {
    pictures: Vec<Arc<PictureRef>>,
    queue: VecDeque<Arc<PictureRef>>,
    rng: StdRng,
}

impl CatalogState {
    fn refill(&mut self, shuffle: bool) {
        let mut pass = self.pictures.clone();
        if shuffle {
            pass.shuffle(&mut self.rng);
        }
        self.queue = pass.into();
    }

    fn replace(&mut self, pictures: Vec<Arc<PictureRef>>) {
        let present: HashSet<&Path> = pictures.iter().map(|p| p.path.as_path()).collect();
        self.queue.retain(|p| present.contains(p.path.as_path()));
        self.pictures = pictures;
    }
}

pub struct DirectoryCatalog {
    options: CatalogOptions,
    pair_portraits: bool,
    state: Arc<Mutex<CatalogState>>,
    rescan: Option<RescanWorker>,
}

struct RescanWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for RescanWorker {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("catalog rescan thread panicked");
            }
        }
    }
}

impl DirectoryCatalog {
    /// Scans `root` and starts the periodic rescan.
    pub fn open(
        root: impl Into<PathBuf>,
        options: CatalogOptions,
        pair_portraits: bool,
        gate: TransitionGate,
    ) -> Result<Self> {
        let root = root.into();
        let pictures = scan(&root);
        info!(root = %root.display(), count = pictures.len(), "picture library scanned");

        let rng = match options.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let state = Arc::new(Mutex::new(CatalogState {
            pictures,
            queue: VecDeque::new(),
            rng,
        }));

        let rescan = if options.rescan_interval.is_zero() {
            None
        } else {
            let (shutdown_tx, shutdown_rx) = xchan::bounded::<()>(0);
            let interval = options.rescan_interval;
            let handle = thread::Builder::new()
                .name("catalog-rescan".into())
                .spawn({
                    let state = Arc::clone(&state);
                    move || loop {
                        match shutdown_rx.recv_timeout(interval) {
                            Err(RecvTimeoutError::Timeout) => {}
                            _ => break,
                        }
                        while gate.is_in_transition() {
                            debug!("rescan deferred during transition");
                            match shutdown_rx.recv_timeout(RESCAN_RETRY) {
                                Err(RecvTimeoutError::Timeout) => {}
                                _ => return,
                            }
                        }
                        let pictures = scan(&root);
                        debug!(count = pictures.len(), "picture library rescanned");
                        state
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .replace(pictures);
                    }
                })
                .context("failed to spawn catalog rescan thread")?;
            Some(RescanWorker {
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            })
        };

        Ok(Self {
            options,
            pair_portraits,
            state,
            rescan,
        })
    }

    pub fn len(&self) -> usize {
        self.lock().pictures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rescanning(&self) -> bool {
        self.rescan.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PictureSource for DirectoryCatalog {
    fn next_request(&mut self) -> Option<PictureRequest> {
        let shuffle = self.options.shuffle;
        let pair_portraits = self.pair_portraits;
        let mut state = self.lock();
        if state.queue.is_empty() {
            state.refill(shuffle);
        }
        let first = state.queue.pop_front()?;
        let next_is_portrait = state.queue.front().is_some_and(|next| next.portrait);
        let second = if pair_portraits && first.portrait && next_is_portrait {
            state.queue.pop_front()
        } else {
            None
        };
        Some(PictureRequest { first, second })
    }
}

/// Recursively collects every readable picture under `root`, sorted by path.
pub fn scan(root: &Path) -> Vec<Arc<PictureRef>> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image(p))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .filter_map(|path| describe(&path).map(Arc::new))
        .collect()
}

fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if IMAGE_EXTENSIONS.contains(&e.as_str())
    )
}

/// Reads header dimensions and EXIF metadata without decoding pixels.
fn describe(path: &Path) -> Option<PictureRef> {
    let (width, height) = match image::image_dimensions(path) {
        Ok(dims) => dims,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping unreadable picture");
            return None;
        }
    };
    let mut picture = PictureRef::new(path);
    if let Some(exif) = read_exif(path) {
        picture.orientation = exif_orientation(&exif).unwrap_or(1);
        picture.taken_at = ascii_field(&exif, Tag::DateTimeOriginal).and_then(|s| parse_exif_time(&s));
        picture.title = ascii_field(&exif, Tag::ImageDescription);
        picture.coordinates = gps_coordinates(&exif);
    }
    let (w, h) = if swaps_dimensions(picture.orientation) {
        (height, width)
    } else {
        (width, height)
    };
    picture.portrait = h > w;
    Some(picture)
}

fn read_exif(path: &Path) -> Option<exif::Exif> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    exif::Reader::new().read_from_container(&mut buf).ok()
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(values) => values
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// EXIF timestamps carry no zone; they are taken as local time.
fn parse_exif_time(raw: &str) -> Option<chrono::DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn gps_coordinates(exif: &exif::Exif) -> Option<(f64, f64)> {
    let lat = gps_degrees(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S')?;
    let lon = gps_degrees(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W')?;
    Some((lat, lon))
}

fn gps_degrees(exif: &exif::Exif, tag: Tag, reference: Tag, negative: char) -> Option<f64> {
    let Value::Rational(parts) = &exif.get_field(tag, In::PRIMARY)?.value else {
        return None;
    };
    if parts.len() < 3 {
        return None;
    }
    let degrees = parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0;
    let flip = ascii_field(exif, reference).is_some_and(|r| r.starts_with(negative));
    Some(if flip { -degrees } else { degrees })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::Instant;
    use tempfile::tempdir;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) {
        RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255]))
            .save(dir.join(name))
            .unwrap();
    }

    fn options(shuffle: bool) -> CatalogOptions {
        CatalogOptions {
            shuffle,
            shuffle_seed: Some(7),
            rescan_interval: Duration::ZERO,
        }
    }

    fn names(request: &PictureRequest) -> Vec<String> {
        request
            .pictures()
            .map(|p| p.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn scan_skips_non_images_and_broken_files() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "a.png", 4, 2);
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_png(&dir.path().join("nested"), "b.PNG", 2, 4);
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();

        let pictures = scan(dir.path());
        assert_eq!(pictures.len(), 2);
        assert!(!pictures[0].portrait);
        assert!(pictures[1].portrait);
        assert_eq!(pictures[1].orientation, 1);
    }

    #[test]
    fn consecutive_portraits_are_paired() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "a.png", 2, 4);
        write_png(dir.path(), "b.png", 2, 4);
        write_png(dir.path(), "c.png", 4, 2);
        write_png(dir.path(), "d.png", 2, 4);
        let mut catalog =
            DirectoryCatalog::open(dir.path(), options(false), true, TransitionGate::default())
                .unwrap();
        assert_eq!(names(&catalog.next_request().unwrap()), ["a.png", "b.png"]);
        assert_eq!(names(&catalog.next_request().unwrap()), ["c.png"]);
        assert_eq!(names(&catalog.next_request().unwrap()), ["d.png"]);
        // next pass starts over
        assert_eq!(names(&catalog.next_request().unwrap()), ["a.png", "b.png"]);
    }

    #[test]
    fn pairing_can_be_disabled() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "a.png", 2, 4);
        write_png(dir.path(), "b.png", 2, 4);
        let mut catalog =
            DirectoryCatalog::open(dir.path(), options(false), false, TransitionGate::default())
                .unwrap();
        assert!(!catalog.next_request().unwrap().is_pair());
    }

    #[test]
    fn empty_library_yields_nothing() {
        let dir = tempdir().unwrap();
        let mut catalog =
            DirectoryCatalog::open(dir.path(), options(true), true, TransitionGate::default())
                .unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.next_request().is_none());
    }

    #[test]
    fn seeded_shuffle_is_repeatable() {
        let dir = tempdir().unwrap();
        for i in 0..12 {
            write_png(dir.path(), &format!("{i:02}.png"), 4, 2);
        }
        let order = || {
            let mut catalog =
                DirectoryCatalog::open(dir.path(), options(true), false, TransitionGate::default())
                    .unwrap();
            (0..12)
                .map(|_| names(&catalog.next_request().unwrap()).remove(0))
                .collect::<Vec<_>>()
        };
        let first = order();
        assert_eq!(first, order());
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted.len(), 12);
        sorted.dedup();
        assert_eq!(sorted.len(), 12, "a pass shows every picture once");
    }

    #[test]
    fn rescan_waits_for_transition_to_finish() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "a.png", 4, 2);
        let gate = TransitionGate::default();
        gate.publish(true);
        let catalog = DirectoryCatalog::open(
            dir.path(),
            CatalogOptions {
                rescan_interval: Duration::from_millis(20),
                ..options(false)
            },
            false,
            gate.clone(),
        )
        .unwrap();
        assert!(catalog.is_rescanning());
        write_png(dir.path(), "b.png", 4, 2);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(catalog.len(), 1);

        gate.publish(false);
        let deadline = Instant::now() + Duration::from_secs(5);
        while catalog.len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn exif_time_is_read_as_local() {
        let parsed = parse_exif_time("2021:06:03 09:30:00").unwrap();
        let local = parsed.with_timezone(&Local);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2021-06-03 09:30");
        assert!(parse_exif_time("yesterday").is_none());
    }
}
