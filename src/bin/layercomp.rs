use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "layercomp", version)]
struct Cli {
    /// Log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run frames of a scene and print the plane plan for every display.
    Plan(PlanArgs),
    /// Print the partitions of one display's layer stack.
    Partition(PartitionArgs),
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Input scene JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Compositor options JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Display capabilities JSON (one entry per display).
    #[arg(long)]
    caps: Option<PathBuf>,

    /// Number of frames to run.
    #[arg(long, default_value_t = 1)]
    frames: u64,

    /// Also render every composition.
    #[arg(long)]
    compose: bool,
}

#[derive(Parser, Debug)]
struct PartitionArgs {
    /// Input scene JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Display index.
    #[arg(long, default_value_t = 0)]
    display: usize,
}

#[derive(serde::Serialize)]
struct FrameReport {
    frame: u64,
    displays: Vec<DisplayReport>,
    cache: layercomp::CacheStats,
    cached: usize,
}

#[derive(serde::Serialize)]
struct DisplayReport {
    display: usize,
    planes: Vec<PlaneReport>,
    host_layers: Vec<bool>,
}

#[derive(serde::Serialize)]
struct PlaneReport {
    #[serde(flatten)]
    role: layercomp::PlaneRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    composer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Command::Plan(args) => cmd_plan(args),
        Command::Partition(args) => cmd_partition(args),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn read_content(path: &Path) -> anyhow::Result<layercomp::Content> {
    layercomp::Content::from_path(path)
        .with_context(|| format!("load scene '{}'", path.display()))
}

fn read_caps(path: Option<&Path>) -> anyhow::Result<Vec<layercomp::DisplayCaps>> {
    let Some(path) = path else {
        return Ok(vec![layercomp::DisplayCaps::default()]);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("open caps '{}'", path.display()))?;
    let caps: Vec<layercomp::DisplayCaps> =
        serde_json::from_str(&text).with_context(|| "parse caps JSON")?;
    if caps.is_empty() {
        anyhow::bail!("caps file '{}' lists no displays", path.display());
    }
    Ok(caps)
}

/// Replace the scene's symbolic buffer ids with real buffers.
///
/// Layers sharing an id share a buffer. 32-bit RGB sources get a pattern derived from their
/// id so composed output is distinguishable.
fn materialize(
    content: &mut layercomp::Content,
    buffers: &layercomp::MemoryBufferManager,
) -> anyhow::Result<()> {
    use layercomp::BufferManager as _;

    let mut allocated: BTreeMap<u64, layercomp::BufferHandle> = BTreeMap::new();
    let mut bind = |layer: &mut layercomp::Layer,
                    usage: layercomp::BufferUsage|
     -> anyhow::Result<()> {
        let Some(id) = layer.handle else {
            return Ok(());
        };
        if let Some(h) = allocated.get(&id.0) {
            layer.handle = Some(*h);
            return Ok(());
        }
        let (w, h) = match usage {
            layercomp::BufferUsage::Source => (
                (layer.src.x1.ceil() as u32).max(1),
                (layer.src.y1.ceil() as u32).max(1),
            ),
            _ => (layer.dst.width().max(1), layer.dst.height().max(1)),
        };
        let tag = format!("scene-{}", id.0);
        let handle = if layer.format.is_rgb32() && usage == layercomp::BufferUsage::Source {
            let px = [id.0 as u8, (id.0 >> 8) as u8, 0x80, 0xff];
            let bytes: Vec<u8> = px.iter().copied().cycle().take((w * h * 4) as usize).collect();
            buffers.create_filled(&tag, w, h, layer.format, &bytes)?
        } else {
            buffers.create_buffer(&tag, w, h, layer.format, usage)?
        };
        allocated.insert(id.0, handle);
        layer.handle = Some(handle);
        Ok(())
    };

    for d in 0..content.len() {
        let display = content.edit_display(d);
        let stack = display.edit_layer_stack();
        for i in 0..stack.len() {
            bind(stack.edit_layer(i), layercomp::BufferUsage::Source)?;
        }
        stack.update_layer_flags();
        if let Some(l) = display.output_layer.as_mut() {
            bind(l, layercomp::BufferUsage::RenderTarget)?;
        }
        if let Some(l) = display.host_target.as_mut() {
            bind(l, layercomp::BufferUsage::RenderTarget)?;
        }
    }
    Ok(())
}

fn report(c: &layercomp::Compositor, displays: usize) -> FrameReport {
    let mgr = c.manager();
    let displays = (0..displays)
        .filter_map(|d| {
            let planes = c.planes(d)?;
            let plans = (0..planes.max_planes())
                .map(|p| {
                    let role = planes.role(p).clone();
                    let entry = match &role {
                        layercomp::PlaneRole::Composed { composition, .. }
                        | layercomp::PlaneRole::Preprocessed { composition, .. } => {
                            mgr.composition(*composition)
                        }
                        _ => None,
                    };
                    PlaneReport {
                        composer: entry.map(|e| e.composer_name().to_owned()),
                        cost: entry.map(|e| e.cost().0),
                        role,
                    }
                })
                .collect();
            Some(DisplayReport {
                display: d,
                planes: plans,
                host_layers: mgr.host().host_layers(d).to_vec(),
            })
        })
        .collect();
    FrameReport {
        frame: c.frame(),
        displays,
        cache: mgr.stats(),
        cached: mgr.cached(),
    }
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let opts = match &args.config {
        Some(p) => layercomp::CompositorOpts::from_path(p)
            .with_context(|| format!("load config '{}'", p.display()))?,
        None => layercomp::CompositorOpts::default(),
    }
    .with_env_overrides();
    let caps = read_caps(args.caps.as_deref())?;

    let mut content = read_content(&args.in_path)?;
    let buffers = Arc::new(layercomp::MemoryBufferManager::new());
    materialize(&mut content, &buffers)?;

    let mut compositor = layercomp::Compositor::new(opts, caps, buffers.clone())?;
    let mut policy = layercomp::StackPolicy::default();
    for _ in 0..args.frames {
        compositor.prepare(&content, &mut policy)?;
        if args.compose {
            compositor.compose()?;
        }
        let line = serde_json::to_string(&report(&compositor, content.len()))?;
        println!("{line}");
        compositor.end_frame();
    }

    let stats = buffers.stats();
    eprintln!(
        "buffers: {} live, {} bytes, {} allocations, {} refused",
        stats.live_buffers, stats.live_bytes, stats.allocations, stats.refused
    );
    Ok(())
}

fn cmd_partition(args: PartitionArgs) -> anyhow::Result<()> {
    let content = read_content(&args.in_path)?;
    if args.display >= content.len() {
        anyhow::bail!(
            "display {} out of range ({} displays)",
            args.display,
            content.len()
        );
    }
    let display = content.display(args.display);
    let target = layercomp::IRect::from_size(display.width, display.height);
    let parts = layercomp::partition(display.layer_stack(), target);
    println!("{}", serde_json::to_string_pretty(&parts)?);
    Ok(())
}
