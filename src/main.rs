//! Rasterflow CLI - Streaming Tiled Inference
//!
//! This is a demonstration CLI for the Rasterflow library.

use anyhow::{bail, Context, Result};
use rasterflow::prelude::*;

fn main() -> Result<()> {
    env_logger::init();
    println!("🛰  Rasterflow - Streaming Tiled Inference v{}", rasterflow::VERSION);
    println!();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        return Ok(());
    }

    match args[1].as_str() {
        "reporters" => list_reporters(),
        "plan" => plan(&args[2..])?,
        "run" => run(&args[2..])?,
        "help" | "--help" | "-h" => print_usage(&args[0]),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage(&args[0]);
        }
    }
    Ok(())
}

fn print_usage(program: &str) {
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  reporters              List available output reporters");
    println!("  plan [options]         Show the chunk size the budget planner picks");
    println!("  run <side> [options]   Run a synthetic <side>x<side> raster end to end");
    println!("  help                   Show this help message");
    println!();
    println!("Options:");
    println!("  --ceiling-mb <n>   Memory ceiling in MB (default 2048)");
    println!("  --patch <n>        Patch size in pixels (default 224)");
    println!("  --stride <n>       Patch stride in pixels (default 112)");
    println!("  --margin <n>       Overlap margin in pixels");
    println!("  --classes <n>      Probe class count (default 4)");
    println!("  --config <file>    TOML configuration patch, applied per-instance");
    println!("  --out <dir>        Reporter output directory");
}

fn list_reporters() {
    let registry = ReporterRegistry::with_builtins();
    println!("Available reporters ({} total):", registry.len());
    println!();
    for (name, entry) in registry.entries() {
        println!("  • {} - {}", name, entry.description);
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            let value = args
                .get(i + 1)
                .with_context(|| format!("{flag} needs a value"))?;
            Ok(Some(value.parse().with_context(|| format!("bad {flag}"))?))
        }
        None => Ok(None),
    }
}

fn build_config(args: &[String]) -> Result<RunConfig> {
    let mut stack = ConfigStack::new();
    if let Some(path) = parse_flag::<String>(args, "--config")? {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config '{path}'"))?;
        stack.push(ConfigLayer::PerTarget, ConfigPatch::from_toml(&text)?);
    }

    let mut cli = ConfigPatch::default();
    cli.memory_ceiling_bytes =
        parse_flag::<u64>(args, "--ceiling-mb")?.map(|mb| mb * 1024 * 1024);
    cli.patch_size = parse_flag(args, "--patch")?;
    cli.stride = parse_flag(args, "--stride")?;
    cli.overlap_margin = parse_flag(args, "--margin")?;
    cli.output_dir = parse_flag::<String>(args, "--out")?.map(Into::into);
    stack.push(ConfigLayer::PerInstance, cli);

    Ok(stack.resolve()?)
}

fn plan(args: &[String]) -> Result<()> {
    let config = build_config(args)?;
    let classes: usize = parse_flag(args, "--classes")?.unwrap_or(4);
    let capability = MeanProbe::new(classes);

    let registry = ReporterRegistry::with_builtins();
    let reporters = registry.create_set(&config.reporters)?;
    let sizing = ReporterSizing {
        num_classes: classes,
        bands: 1,
    };
    let reporter_bpp: f64 = reporters
        .iter()
        .map(|r| r.memory_multiplier(&config, &sizing))
        .sum();

    let budget = MemoryBudget::new(
        config.memory_ceiling_bytes,
        capability.output_bytes_per_pixel(),
        reporter_bpp,
        config.patch_size,
        config.stride,
        config.batch_size,
        config.safety_factor,
    )?;
    let margin = config.overlap_margin.unwrap_or(0);
    let side = budget.plan_chunk_size(margin)?;

    println!("Ceiling:        {} bytes", budget.ceiling_bytes);
    println!(
        "Cost:           {:.2} B/px (model {:.2} + reporters {:.2}), x{:.2} safety",
        budget.bytes_per_pixel(),
        budget.model_bytes_per_pixel,
        budget.reporter_bytes_per_pixel,
        budget.safety_factor
    );
    println!("Margin:         {margin} px");
    println!("Chunk size:     {side} px");
    println!("Projected peak: {} bytes", budget.projected_peak(side, margin));
    Ok(())
}

fn run(args: &[String]) -> Result<()> {
    let side: u32 = match args.first() {
        Some(v) => v.parse().context("bad raster side length")?,
        None => bail!("run needs a raster side length, e.g. `run 4096`"),
    };
    let config = build_config(&args[1..])?;
    let classes: usize = parse_flag(args, "--classes")?.unwrap_or(4);
    let capability = MeanProbe::new(classes);

    let source = MemoryRasterSource::from_fn(side, side, 1, |_, r, c| {
        ((r * 31 + c * 17) % 255) as f32 / 255.0
    });

    let registry = ReporterRegistry::with_builtins();
    let mut reporters = registry.create_set(&config.reporters)?;

    let orchestrator = PipelineOrchestrator::new(config).with_progress(|event| {
        if let ProgressEvent::ChunkReported { chunk, index, total } = event {
            println!("  reported {chunk} ({index}/{total})");
        }
    });
    let summary = orchestrator.run(&source, &capability, &mut reporters)?;

    println!();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
