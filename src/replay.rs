//! Offline heat-map generation from a record log.
//!
//! The log is split into one segment per page view. Each segment is
//! rendered at several elapsed-time cutoffs, optionally composited over a
//! screenshot of the page, and an `index.html` links every image.

use crate::core::heatmap::{
    encode_png, load_image, render_heatmap, Brush, HeatmapOptions, RenderError,
};
use crate::recording::PageViewRecord;
use crate::tracker::protocol::FrameMessage;
use crate::tracker::types::Frame;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Segment name used for frames recorded before the first page view.
pub const UNKNOWN_URL: &str = "UNKNOWN URL";

/// Elapsed-time limits rendered for every segment; `-1` means everything.
pub const CUTOFFS_SECS: [i64; 4] = [-1, 5, 10, 15];

pub const DEFAULT_CANVAS_WIDTH: u32 = 1920;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1080;

/// Marker distinguishing page-view lines from frame lines.
const PAGE_VIEW_KEY: &str = "request path";

/// Errors that abort a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not load heat-map brush: {0}")]
    Brush(#[source] RenderError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl ReplayError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Frames recorded while one page was shown.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSegment {
    pub url: String,
    /// When the page was requested, if known.
    pub viewed_at: Option<DateTime<Utc>>,
    pub frames: Vec<Frame>,
}

impl PageSegment {
    fn unknown() -> Self {
        Self {
            url: UNKNOWN_URL.to_string(),
            viewed_at: None,
            frames: Vec::new(),
        }
    }

    fn from_page_view(record: PageViewRecord) -> Self {
        Self {
            url: record.request_path,
            viewed_at: DateTime::from_timestamp(record.unix_time, 0),
            frames: Vec::new(),
        }
    }

    /// Reference time for the cutoffs: the page view, else the first frame.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.viewed_at
            .or_else(|| self.frames.first().map(|f| f.received_at))
    }
}

/// Split a record log into page segments. The first segment always holds
/// frames seen before any page view. Undecodable lines are skipped.
pub fn parse_log<R: BufRead>(reader: R) -> std::io::Result<Vec<PageSegment>> {
    let mut segments = Vec::new();
    let mut current = PageSegment::unknown();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        if line.contains(PAGE_VIEW_KEY) {
            match serde_json::from_str::<PageViewRecord>(&line) {
                Ok(record) => {
                    segments.push(std::mem::replace(
                        &mut current,
                        PageSegment::from_page_view(record),
                    ));
                }
                Err(e) => warn!(line = index + 1, error = %e, "skipping bad page-view record"),
            }
            continue;
        }

        match serde_json::from_str::<FrameMessage>(&line) {
            Ok(mut message) => match message.frame_mut() {
                Ok(frame) => current.frames.push(frame.clone()),
                Err(reason) => debug!(line = index + 1, ?reason, "skipping record without frame"),
            },
            Err(e) => warn!(line = index + 1, error = %e, "skipping bad frame record"),
        }
    }

    segments.push(current);
    Ok(segments)
}

/// Page URL to background image, as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageConfig {
    images: HashMap<String, PathBuf>,
}

impl ImageConfig {
    /// Read the mapping. A missing or invalid file yields an empty mapping.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no image config");
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(images) => Self { images },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid image config, ignoring");
                Self::default()
            }
        }
    }

    pub fn background_for(&self, url: &str) -> Option<&Path> {
        self.images
            .get(url)
            .map(PathBuf::as_path)
            .filter(|p| !p.as_os_str().is_empty())
    }
}

impl FromIterator<(String, PathBuf)> for ImageConfig {
    fn from_iter<I: IntoIterator<Item = (String, PathBuf)>>(iter: I) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

/// Inputs of a replay run.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub log_file: PathBuf,
    pub output_dir: PathBuf,
    pub brush_path: PathBuf,
    pub image_config: ImageConfig,
    pub width: u32,
    pub height: u32,
}

impl ReplayOptions {
    pub fn new(log_file: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
            output_dir: output_dir.into(),
            brush_path: PathBuf::from("heatmap_brush.png"),
            image_config: ImageConfig::default(),
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
        }
    }
}

/// Images written for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentImages {
    pub url: String,
    pub files: Vec<String>,
}

/// What a replay produced.
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    pub segments: Vec<SegmentImages>,
    pub index: PathBuf,
}

impl ReplaySummary {
    pub fn image_count(&self) -> usize {
        self.segments.iter().map(|s| s.files.len()).sum()
    }
}

/// Render every segment of the log into `output_dir` and write the index.
pub fn run_replay(options: &ReplayOptions) -> Result<ReplaySummary, ReplayError> {
    let file = File::open(&options.log_file).map_err(|e| ReplayError::io(&options.log_file, e))?;
    let segments =
        parse_log(BufReader::new(file)).map_err(|e| ReplayError::io(&options.log_file, e))?;

    std::fs::create_dir_all(&options.output_dir)
        .map_err(|e| ReplayError::io(&options.output_dir, e))?;
    info!(
        segments = segments.len(),
        output = %options.output_dir.display(),
        "log loaded"
    );

    let brush = Brush::load(&options.brush_path).map_err(ReplayError::Brush)?;

    let mut written = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let background = options
            .image_config
            .background_for(&segment.url)
            .map(load_image)
            .transpose()?;

        let mut files = Vec::new();
        for cutoff in CUTOFFS_SECS {
            let mut heatmap = HeatmapOptions::new(options.width, options.height)
                .with_cutoff_secs(cutoff);
            if let Some(start) = segment.start() {
                heatmap = heatmap.with_start(start);
            }

            let name = format!("{index}_{cutoff}sec.png");
            let gaze_only = render_heatmap(&segment.frames, &brush, &heatmap)?;
            write_png(&options.output_dir, &name, &gaze_only)?;
            files.push(name);

            if let Some(background) = background.as_ref() {
                let name = format!("{index}_bg_{cutoff}sec.png");
                let composite = render_heatmap(
                    &segment.frames,
                    &brush,
                    &heatmap.with_background(background),
                )?;
                write_png(&options.output_dir, &name, &composite)?;
                files.push(name);
            }
        }
        info!(segment = index, url = %segment.url, images = files.len(), "segment rendered");
        written.push(SegmentImages {
            url: segment.url.clone(),
            files,
        });
    }

    let title = options
        .output_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = options.output_dir.join("index.html");
    std::fs::write(&index, render_index(&title, &written))
        .map_err(|e| ReplayError::io(&index, e))?;

    Ok(ReplaySummary {
        segments: written,
        index,
    })
}

fn write_png(dir: &Path, name: &str, image: &image::RgbaImage) -> Result<(), ReplayError> {
    let path = dir.join(name);
    let bytes = encode_png(image)?;
    std::fs::write(&path, bytes).map_err(|e| ReplayError::io(&path, e))?;
    debug!(path = %path.display(), "image written");
    Ok(())
}

/// Thumbnail page linking every image, grouped by page URL.
pub fn render_index(title: &str, segments: &[SegmentImages]) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<html><head><title>heatmap: {}</title></head><body>",
        escape_html(title)
    );
    for segment in segments {
        let _ = write!(html, "<hr>{}<br>", escape_html(&segment.url));
        for file in &segment.files {
            let file = escape_html(file);
            let _ = write!(html, "<a href=\"{file}\"><img src=\"{file}\" width=\"100\"></a> ");
        }
    }
    html.push_str("</body></html>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LOG: &str = concat!(
        r#"{"category":"tracker","request":"get","statuscode":200,"values":{"frame":{"avg":{"x":10,"y":10},"receivedAt":"2024-01-01T00:00:00Z"}}}"#,
        "\n",
        r#"{"request path":"/index.html","unix time":1704067200}"#,
        "\n",
        "not json at all\n",
        r#"{"category":"tracker","statuscode":200,"values":{"frame":{"avg":{"x":20,"y":20},"GoTime":"2024-01-01T00:00:01Z"}}}"#,
        "\n",
        r#"{"category":"tracker","statuscode":200,"values":{"frame":{"avg":{"x":30,"y":30},"receivedAt":"2024-01-01T00:00:08Z"}}}"#,
        "\n",
        "\n",
        r#"{"request path":"/about.html","unix time":1704067300}"#,
        "\n",
    );

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("gaze-agent-replay-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_log_segments() {
        let segments = parse_log(Cursor::new(LOG)).unwrap();
        assert_eq!(segments.len(), 3);

        assert_eq!(segments[0].url, UNKNOWN_URL);
        assert_eq!(segments[0].viewed_at, None);
        assert_eq!(segments[0].frames.len(), 1);

        assert_eq!(segments[1].url, "/index.html");
        assert_eq!(segments[1].viewed_at, DateTime::from_timestamp(1_704_067_200, 0));
        assert_eq!(segments[1].frames.len(), 2);
        assert_eq!(segments[1].frames[0].avg.x, 20.0);

        assert_eq!(segments[2].url, "/about.html");
        assert!(segments[2].frames.is_empty());
    }

    #[test]
    fn test_segment_start_falls_back_to_first_frame() {
        let segments = parse_log(Cursor::new(LOG)).unwrap();
        assert_eq!(segments[0].start(), Some(segments[0].frames[0].received_at));
        assert_eq!(segments[1].start(), segments[1].viewed_at);
        assert_eq!(segments[2].start(), segments[2].viewed_at);
    }

    #[test]
    fn test_empty_log_has_one_segment() {
        let segments = parse_log(Cursor::new("")).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].url, UNKNOWN_URL);
    }

    #[test]
    fn test_image_config_load() {
        let dir = temp_dir("imgcfg");
        let path = dir.join("images.json");
        std::fs::write(&path, r#"{"/index.html": "shots/index.png", "/blank": ""}"#).unwrap();

        let config = ImageConfig::load(&path);
        assert_eq!(config.background_for("/index.html"), Some(Path::new("shots/index.png")));
        assert_eq!(config.background_for("/blank"), None);
        assert_eq!(config.background_for("/other"), None);

        assert_eq!(ImageConfig::load(dir.join("missing.json")), ImageConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_run_replay_writes_images_and_index() {
        let dir = temp_dir("run");
        let log_path = dir.join("log.json");
        std::fs::write(&log_path, LOG).unwrap();

        let brush_path = dir.join("brush.png");
        Brush::solid(4, [255, 0, 0, 128]).image().save(&brush_path).unwrap();
        let background_path = dir.join("index_bg.png");
        image::RgbaImage::from_pixel(64, 48, image::Rgba([255, 255, 255, 255]))
            .save(&background_path)
            .unwrap();

        let output = dir.join("out");
        let mut options = ReplayOptions::new(&log_path, &output);
        options.brush_path = brush_path;
        options.width = 64;
        options.height = 48;
        options.image_config =
            [("/index.html".to_string(), background_path)].into_iter().collect();

        let summary = run_replay(&options).unwrap();
        assert_eq!(summary.segments.len(), 3);
        assert_eq!(summary.segments[0].files.len(), 4);
        assert_eq!(summary.segments[1].files.len(), 8);
        assert_eq!(summary.image_count(), 16);

        for name in ["0_-1sec.png", "1_5sec.png", "1_bg_15sec.png", "2_10sec.png"] {
            assert!(output.join(name).exists(), "{name} missing");
        }
        assert!(!output.join("0_bg_5sec.png").exists());

        // The 5 second cutoff drops the frame recorded 8 s after the page view.
        let cut = image::open(output.join("1_5sec.png")).unwrap().to_rgba8();
        assert_eq!(cut.get_pixel(30, 30).0[3], 0);
        let full = image::open(output.join("1_-1sec.png")).unwrap().to_rgba8();
        assert!(full.get_pixel(30, 30).0[3] > 0);

        let index = std::fs::read_to_string(&summary.index).unwrap();
        assert!(index.contains("/index.html"));
        assert!(index.contains("1_bg_10sec.png"));
        assert!(index.contains(UNKNOWN_URL));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_brush_is_reported() {
        let dir = temp_dir("nobrush");
        let log_path = dir.join("log.json");
        std::fs::write(&log_path, LOG).unwrap();

        let mut options = ReplayOptions::new(&log_path, dir.join("out"));
        options.brush_path = dir.join("missing.png");
        assert!(matches!(run_replay(&options), Err(ReplayError::Brush(_))));

        let options = ReplayOptions::new(dir.join("missing.log"), dir.join("out"));
        assert!(matches!(run_replay(&options), Err(ReplayError::Io { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_index_escapes_urls() {
        let html = render_index(
            "run",
            &[SegmentImages {
                url: "/a?b=1&c=<2>".to_string(),
                files: vec!["0_5sec.png".to_string()],
            }],
        );
        assert!(html.contains("/a?b=1&amp;c=&lt;2&gt;"));
        assert!(html.starts_with("<html><head><title>heatmap: run</title>"));
    }
}
