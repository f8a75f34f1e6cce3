//! Rich-content bodies rendered to PNG images, tiled by height.

pub mod wkhtml;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{IntakeError, Result};
use crate::export::attachment::random_token;
use crate::model::record::{MailRecord, RENDERED_BODY_PLACEHOLDER};
use crate::profile::SourceProfile;

pub use wkhtml::WkHtmlToImage;

/// Length of the random base name given to rendered images.
const IMAGE_NAME_LEN: usize = 10;

static IMG_SELF_CLOSING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<img[^>]*>").expect("static regex"));
static IMG_OPEN_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<img>[^>]*</img>").expect("static regex"));

/// HTML-to-PNG capability.
pub trait Rasterizer: Send + Sync {
    /// Render `html` at `width_px` into a PNG at `output`.
    fn rasterize(&self, html: &str, width_px: u32, output: &Path) -> Result<()>;
}

/// `true` when the body carries enough markup to be rendered instead of stored as text.
pub fn is_rich_content(body: &str) -> bool {
    (body.contains("<html") && body.contains("</html>")) || body.contains("<br>")
}

/// Strip images and wrap the body in a shell pinned to `width_px`.
pub fn prepare_html(body: &str, width_px: u32) -> String {
    let stripped = IMG_SELF_CLOSING.replace_all(body, "");
    let stripped = IMG_OPEN_CLOSE.replace_all(&stripped, "");
    let stripped = stripped.replace("src=\"cid:", "src=\"");
    format!("<html><style> html{{width: {width_px}px !important;}}</style>{stripped}</html>")
}

/// Rasterize the record body into `dir` and put the image paths first in its attachments.
///
/// Images taller than the profile's `max_height_px` are split into tiles
/// (top to bottom) and the untiled image is deleted. On success the body is
/// replaced by [`RENDERED_BODY_PLACEHOLDER`].
pub fn render_record(
    record: &mut MailRecord,
    profile: &SourceProfile,
    dir: &Path,
    rasterizer: &dyn Rasterizer,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| IntakeError::Render(format!("cannot create {}: {e}", dir.display())))?;

    let output = dir.join(format!("{}.png", random_token(IMAGE_NAME_LEN)));
    let html = prepare_html(&record.body, profile.max_width_px);

    if let Err(e) = rasterizer.rasterize(&html, profile.max_width_px, &output) {
        remove_quietly(&output);
        return Err(e);
    }

    let paths = match tile_image(&output, profile.max_height_px) {
        Ok(paths) => paths,
        Err(e) => {
            remove_quietly(&output);
            return Err(e);
        }
    };

    info!(id = %record.id, images = paths.len(), "Rendered body to image");
    let mut attachments: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    attachments.append(&mut record.attachments);
    record.attachments = attachments;
    record.converted_to_image = true;
    record.body = RENDERED_BODY_PLACEHOLDER.to_string();
    Ok(paths)
}

/// Split `path` into tiles of at most `max_height` pixels.
///
/// Returns `[path]` when no split is needed. Tiles are written next to the
/// source as `{stem}_{y}.png` and the source is removed.
pub fn tile_image(path: &Path, max_height: u32) -> Result<Vec<PathBuf>> {
    if max_height == 0 {
        return Err(IntakeError::Render("tile height must be positive".into()));
    }
    let image = image::open(path)
        .map_err(|e| IntakeError::Render(format!("cannot read {}: {e}", path.display())))?;
    let (width, height) = (image.width(), image.height());
    if height <= max_height {
        return Ok(vec![path.to_path_buf()]);
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("render");
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut tiles = Vec::new();
    for y in (0..height).step_by(max_height as usize) {
        let tile_height = max_height.min(height - y);
        let tile_path = parent.join(format!("{stem}_{y}.png"));
        let saved = image
            .crop_imm(0, y, width, tile_height)
            .save(&tile_path)
            .map_err(|e| IntakeError::Render(format!("cannot write {}: {e}", tile_path.display())));
        if let Err(e) = saved {
            tiles.iter().for_each(|t: &PathBuf| remove_quietly(t));
            return Err(e);
        }
        debug!(path = %tile_path.display(), y, tile_height, "Saved tile");
        tiles.push(tile_path);
    }

    remove_quietly(path);
    Ok(tiles)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove image");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::profile::tests::test_profile;
    use tempfile::TempDir;

    /// Writes a blank PNG of fixed height instead of rendering.
    pub(crate) struct BlankRasterizer {
        pub height: u32,
    }

    impl Rasterizer for BlankRasterizer {
        fn rasterize(&self, _html: &str, width_px: u32, output: &Path) -> Result<()> {
            image::RgbImage::new(width_px, self.height)
                .save(output)
                .map_err(|e| IntakeError::Render(e.to_string()))
        }
    }

    struct FailingRasterizer;

    impl Rasterizer for FailingRasterizer {
        fn rasterize(&self, _html: &str, _width_px: u32, _output: &Path) -> Result<()> {
            Err(IntakeError::Render("engine missing".into()))
        }
    }

    fn record(attachments: Vec<String>) -> MailRecord {
        MailRecord {
            id: "INBOX3".into(),
            date: "2023-01-02 10:00:00".into(),
            body: "<html><body>hi</body></html>".into(),
            subject: "s".into(),
            sender: String::new(),
            receiver: String::new(),
            folder: "INBOX".into(),
            is_sent: false,
            converted_to_image: false,
            attachments,
        }
    }

    fn profile(width: u32, max_height: u32) -> SourceProfile {
        let mut p = test_profile();
        p.max_width_px = width;
        p.max_height_px = max_height;
        p
    }

    fn png_height(path: &str) -> u32 {
        image::open(path).unwrap().height()
    }

    #[test]
    fn test_rich_content_detection() {
        assert!(is_rich_content("<html><body>x</body></html>"));
        assert!(is_rich_content("line<br>line"));
        assert!(!is_rich_content("<HTML></HTML>"));
        assert!(!is_rich_content("<html> never closed"));
        assert!(!is_rich_content("plain text"));
    }

    #[test]
    fn test_prepare_html_strips_images() {
        let html = prepare_html(
            r#"<p>a<img src="cid:logo"></p><img>x</img><a src="cid:doc">d</a>"#,
            640,
        );
        assert_eq!(
            html,
            r#"<html><style> html{width: 640px !important;}</style><p>a</p>x</img><a src="doc">d</a></html>"#
        );
    }

    #[test]
    fn test_tall_image_is_tiled_in_order() {
        let dir = TempDir::new().unwrap();
        let mut rec = record(vec!["/files/report.pdf".into()]);
        let paths = render_record(
            &mut rec,
            &profile(100, 1200),
            dir.path(),
            &BlankRasterizer { height: 3000 },
        )
        .unwrap();

        assert_eq!(paths.len(), 3);
        assert_eq!(rec.attachments.len(), 4);
        let heights: Vec<u32> = rec.attachments[..3].iter().map(|p| png_height(p)).collect();
        assert_eq!(heights, vec![1200, 1200, 600]);
        assert!(rec.attachments[0].ends_with("_0.png"));
        assert!(rec.attachments[1].ends_with("_1200.png"));
        assert!(rec.attachments[2].ends_with("_2400.png"));
        assert_eq!(rec.attachments[3], "/files/report.pdf");

        // Only the tiles remain
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
        assert!(rec.converted_to_image);
        assert_eq!(rec.body, RENDERED_BODY_PLACEHOLDER);
    }

    #[test]
    fn test_short_image_goes_first() {
        let dir = TempDir::new().unwrap();
        let mut rec = record(vec!["/files/a.txt".into()]);
        render_record(
            &mut rec,
            &profile(100, 1200),
            dir.path(),
            &BlankRasterizer { height: 800 },
        )
        .unwrap();

        assert_eq!(rec.attachments.len(), 2);
        assert_eq!(png_height(&rec.attachments[0]), 800);
        assert_eq!(rec.attachments[1], "/files/a.txt");
    }

    #[test]
    fn test_exact_height_is_not_tiled() {
        let dir = TempDir::new().unwrap();
        let mut rec = record(Vec::new());
        let paths = render_record(
            &mut rec,
            &profile(50, 1200),
            dir.path(),
            &BlankRasterizer { height: 1200 },
        )
        .unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_render_failure_leaves_record_untouched() {
        let dir = TempDir::new().unwrap();
        let mut rec = record(Vec::new());
        let before = rec.clone();
        let err = render_record(&mut rec, &profile(100, 1200), dir.path(), &FailingRasterizer)
            .unwrap_err();
        assert!(matches!(err, IntakeError::Render(_)));
        assert_eq!(rec, before);
    }
}
