use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use paperstamp_core::tools::photo::decode_image;
use paperstamp_core::{
    AnnotationId, Color, Engine, FontPainter, PagePoint, PointerEvent, ScreenPoint, SignaturePad,
    TextSetting, ToastLevel, Tool,
};
use pdf_engine::{ImagePdfWriter, OpenSource, PdfRasterizer};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{load_settings_file, Settings, Storage};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,paperstamp_core=info,paperstamp_cli=info";
const VERBOSE_FILTER: &str =
    "warn,paperstamp_core=debug,paperstamp_cli=debug,storage=debug,pdf_engine=debug";

#[derive(Debug, Parser)]
#[command(name = "paperstamp-cli")]
#[command(about = "PaperStamp CLI")]
pub struct Cli {
    /// Log engine activity at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Settings file to use instead of the stored settings.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render one page to a PNG.
    RenderPage {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Pixels per point
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Apply a script of annotation edits and export a flattened PDF.
    Flatten {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "JSON")]
        script: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// TrueType or OpenType font for text annotations.
        #[arg(long, value_name = "TTF")]
        font: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct FlattenOutput {
    output: String,
    pages: u32,
    annotations: usize,
}

/// Edits applied, in order, before exporting. Pages are 1-based; positions are
/// page-normalized with the origin at the top-left. `target` is the index of an
/// annotation created earlier in the same script.
#[derive(Debug, Deserialize)]
pub struct Script {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    Text {
        #[serde(default = "first_page")]
        page: u32,
        x: f32,
        y: f32,
        content: String,
        #[serde(default)]
        font_size: Option<f32>,
        #[serde(default)]
        bold: bool,
        #[serde(default)]
        italic: bool,
        #[serde(default)]
        color: Option<[u8; 3]>,
    },
    Stamp {
        #[serde(default = "first_page")]
        page: u32,
        x: f32,
        y: f32,
    },
    /// Strokes in signature-pad pixels.
    Signature {
        #[serde(default = "first_page")]
        page: u32,
        strokes: Vec<Vec<[f32; 2]>>,
    },
    Image {
        #[serde(default = "first_page")]
        page: u32,
        path: PathBuf,
    },
    /// Drag the annotation body by a screen-pixel offset at the current zoom.
    Move { target: usize, dx: f32, dy: f32 },
    /// Drag the resize handle by a screen-pixel offset at the current zoom.
    Resize { target: usize, dx: f32, dy: f32 },
    Delete { target: usize },
    Undo,
    Redo,
    Zoom { level: f32 },
}

fn first_page() -> u32 {
    1
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Text { .. } => "text",
            Operation::Stamp { .. } => "stamp",
            Operation::Signature { .. } => "signature",
            Operation::Image { .. } => "image",
            Operation::Move { .. } => "move",
            Operation::Resize { .. } => "resize",
            Operation::Delete { .. } => "delete",
            Operation::Undo => "undo",
            Operation::Redo => "redo",
            Operation::Zoom { .. } => "zoom",
        }
    }
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::RenderPage { file, page, scale, output } => {
            run_render_page(&file, page, scale, output.as_deref())
        }
        Commands::Flatten { file, script, output, font } => {
            let settings = load_settings(cli.config.as_deref())?;
            run_flatten(&file, &script, output.as_deref(), font.as_deref(), settings)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    // A subscriber may already be installed when `run` is called more than once.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_settings(config: Option<&Path>) -> Result<Settings> {
    if let Some(path) = config {
        return load_settings_file(path)
            .with_context(|| format!("failed to read settings from {}", path.display()));
    }

    match Storage::from_default_project().and_then(|storage| storage.load_settings()) {
        Ok(settings) => Ok(settings),
        Err(err) => {
            warn!(%err, "stored settings unavailable, using defaults");
            Ok(Settings::default())
        }
    }
}

fn open_rasterizer(file: &Path) -> Result<Box<dyn PdfRasterizer>> {
    ensure_pdf_exists(file)?;

    #[cfg(feature = "pdfium")]
    let rasterizer: Box<dyn PdfRasterizer> = Box::new(
        pdf_engine::pdfium_backend::PdfiumRasterizer::open(OpenSource::from(file))
            .context("failed to open PDF")?,
    );
    #[cfg(not(feature = "pdfium"))]
    let rasterizer: Box<dyn PdfRasterizer> = Box::new(
        pdf_engine::LoadedPdf::open(OpenSource::from(file)).context("failed to open PDF")?,
    );

    Ok(rasterizer)
}

fn run_info(file: &Path) -> Result<()> {
    let rasterizer = open_rasterizer(file)?;

    let page_count = rasterizer.page_count();
    let pages = (0..page_count)
        .map(|page| {
            let size = rasterizer.page_size(page)?;
            Ok(PageSizeOutput { width: size.width_pt, height: size.height_pt })
        })
        .collect::<Result<Vec<_>>>()?;

    let payload = InfoOutput { path: file.display().to_string(), page_count, pages };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

fn run_render_page(file: &Path, page: u32, scale: f32, output: Option<&Path>) -> Result<()> {
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }
    if !(scale.is_finite() && scale > 0.0) {
        anyhow::bail!("--scale must be a positive number");
    }

    let rasterizer = open_rasterizer(file)?;
    let image = rasterizer.render_page(page - 1, scale).context("failed to render page")?;

    let output = output
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| sibling_output(file, &format!("page-{page}.png")));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    image.save(&output).with_context(|| format!("failed to write image to {}", output.display()))?;
    println!("{}", output.display());

    Ok(())
}

fn run_flatten(
    file: &Path,
    script_path: &Path,
    output: Option<&Path>,
    font: Option<&Path>,
    settings: Settings,
) -> Result<()> {
    let script_bytes = fs::read(script_path)
        .with_context(|| format!("failed to read script {}", script_path.display()))?;
    let script: Script = serde_json::from_slice(&script_bytes).context("invalid script")?;

    let rasterizer = open_rasterizer(file)?;

    let mut engine = Engine::new(settings.config).with_text_defaults(settings.text_defaults);
    if let Some(font) = font {
        let painter = FontPainter::load(font)
            .with_context(|| format!("failed to load font {}", font.display()))?;
        engine = engine.with_painter(Arc::new(painter));
    }
    report_toasts(&mut engine);

    engine.open_document(&*rasterizer).context("failed to open PDF")?;

    let mut runner = ScriptRunner { engine: &mut engine, created: Vec::new() };
    for (index, operation) in script.operations.iter().enumerate() {
        runner
            .apply(operation)
            .with_context(|| format!("operation {index} ({}) failed", operation.name()))?;
        report_toasts(runner.engine);
    }

    let bytes =
        engine.export_flattened(&*rasterizer, &ImagePdfWriter::new()).context("export failed")?;

    let output =
        output.map(ToOwned::to_owned).unwrap_or_else(|| sibling_output(file, "flattened.pdf"));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output, &bytes).with_context(|| format!("failed to write {}", output.display()))?;
    info!(path = %output.display(), "flattened document written");

    let summary = FlattenOutput {
        output: output.display().to_string(),
        pages: rasterizer.page_count(),
        annotations: engine.document().map_or(0, |document| document.annotation_count()),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn report_toasts(engine: &mut Engine) {
    for toast in engine.drain_toasts() {
        match toast.level {
            ToastLevel::Info => info!("{}", toast.message),
            ToastLevel::Warning | ToastLevel::Error => warn!("{}", toast.message),
        }
    }
}

/// Replays script operations through the same entry points the UI uses.
struct ScriptRunner<'a> {
    engine: &'a mut Engine,
    created: Vec<AnnotationId>,
}

impl ScriptRunner<'_> {
    fn apply(&mut self, operation: &Operation) -> Result<()> {
        debug!(op = operation.name(), "script operation");

        match operation {
            Operation::Text { page, x, y, content, font_size, bold, italic, color } => {
                let at = PagePoint::new(*x, *y);
                let (id, _) = self.engine.place_with_tool(Tool::Text, page_index(*page)?, at)?;
                if let Some(session) = self.engine.text_edit_mut() {
                    session.insert_str(content);
                }
                self.engine.commit_text_edit();

                let mut settings = Vec::new();
                if let Some(size) = font_size {
                    settings.push(TextSetting::FontSize(*size));
                }
                if *bold {
                    settings.push(TextSetting::Bold(true));
                }
                if *italic {
                    settings.push(TextSetting::Italic(true));
                }
                if let Some([r, g, b]) = color {
                    settings.push(TextSetting::Color(Color::rgb(*r, *g, *b)));
                }
                for setting in settings {
                    self.engine.apply_text_setting(setting)?;
                }
                self.created.push(id);
            }
            Operation::Stamp { page, x, y } => {
                let at = PagePoint::new(*x, *y);
                let (id, _) = self.engine.place_with_tool(Tool::Stamp, page_index(*page)?, at)?;
                self.created.push(id);
            }
            Operation::Signature { page, strokes } => {
                let mut pad = SignaturePad::new();
                for stroke in strokes {
                    pad.push_stroke(stroke.iter().map(|[x, y]| (*x, *y)).collect());
                }
                self.engine.set_current_page(page_index(*page)?)?;
                let id = self.engine.place_signature(&pad)?;
                self.created.push(id);
            }
            Operation::Image { page, path } => {
                let bytes = fs::read(path)
                    .with_context(|| format!("failed to read image {}", path.display()))?;
                let image = decode_image(&bytes)?;
                self.engine.set_current_page(page_index(*page)?)?;
                let id = self.engine.place_photo(image)?;
                self.created.push(id);
            }
            Operation::Move { target, dx, dy } => {
                let id = self.target(*target)?;
                let start = self
                    .engine
                    .annotation_center_on_screen(id)
                    .context("annotation is not on screen")?;
                self.drag(start, *dx, *dy);
            }
            Operation::Resize { target, dx, dy } => {
                let id = self.target(*target)?;
                let start =
                    self.engine.resize_handle_on_screen(id).context("annotation is not on screen")?;
                self.drag(start, *dx, *dy);
            }
            Operation::Delete { target } => {
                let id = self.target(*target)?;
                self.engine.select(Some(id));
                self.engine.delete_selected();
            }
            Operation::Undo => {
                self.engine.undo();
            }
            Operation::Redo => {
                self.engine.redo();
            }
            Operation::Zoom { level } => {
                self.engine.set_zoom(*level);
            }
        }

        Ok(())
    }

    fn target(&self, index: usize) -> Result<AnnotationId> {
        let id = self
            .created
            .get(index)
            .copied()
            .with_context(|| format!("no annotation #{index} in script"))?;
        let exists = self.engine.document().is_some_and(|document| document.contains(id));
        if !exists {
            anyhow::bail!("annotation #{index} has been deleted");
        }
        Ok(id)
    }

    fn drag(&mut self, start: ScreenPoint, dx: f32, dy: f32) {
        let end = ScreenPoint::new(start.x + dx, start.y + dy);
        self.engine.handle_pointer(PointerEvent::down(1, start.x, start.y));
        self.engine.handle_pointer(PointerEvent::moved(1, end.x, end.y));
        self.engine.handle_pointer(PointerEvent::up(1, end.x, end.y));
    }
}

fn page_index(page: u32) -> Result<u32> {
    if page == 0 {
        anyhow::bail!("pages are 1-based and must be >= 1");
    }
    Ok(page - 1)
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn sibling_output(file: &Path, suffix: &str) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("document");

    file.with_file_name(format!("{stem}-{suffix}"))
}
