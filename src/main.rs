use clap::{Parser, Subcommand};
use darkroom::catalog::FilterProperty;
use darkroom::config::{self, EngineConfig};
use darkroom::imaging::{self, FilterRenderPipeline, RenderContext, RenderScale};
use darkroom::params::FilterParameterSet;
use darkroom::presets::PresetLibrary;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "darkroom")]
#[command(about = "Parametric image-filter engine")]
#[command(long_about = "\
Parametric image-filter engine

Renders an image through the twelve darkroom adjustments. Parameters are a
flat JSON object of property name to value; absent keys keep their defaults
and out-of-range values are clamped:

  {
    \"brightness\": 0.1,
    \"contrast\": 1.2,
    \"vignette\": 0.4
  }

Run 'darkroom catalog' to list every property with its range, and
'darkroom gen-config' to generate a documented darkroom.toml.

Set RUST_LOG=debug for per-stage render logs.")]
#[command(version)]
struct Cli {
    /// Engine configuration file (missing file means stock defaults)
    #[arg(long, default_value = "darkroom.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render an image through a parameter set
    Render {
        /// Source image (jpg, png, tif, webp)
        input: PathBuf,
        /// Destination; the format follows the extension
        output: PathBuf,
        /// Parameter JSON file
        #[arg(long)]
        params: Option<PathBuf>,
        /// Overlay a named preset on top of the parameters
        #[arg(long)]
        preset: Option<String>,
        /// Render at preview size instead of full resolution
        #[arg(long)]
        preview: bool,
    },
    /// Print the default parameter set as JSON
    Defaults,
    /// List every filter property with its range, default and step
    Catalog,
    /// Print the preset library as JSON
    Presets,
    /// Print a stock darkroom.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Render {
            input,
            output,
            params,
            preset,
            preview,
        } => {
            let engine = config::load_config(&cli.config)?;
            let presets = load_presets(&engine)?;
            let mut values = match params {
                Some(path) => FilterParameterSet::from_json(&std::fs::read_to_string(path)?)?,
                None => FilterParameterSet::new(),
            };
            if let Some(name) = preset {
                let preset = presets
                    .get(&name)
                    .ok_or_else(|| format!("unknown preset '{name}'"))?;
                values = preset.applied_to(&values);
            }
            render(&engine, &input, &output, &values, preview)?;
        }
        Command::Defaults => {
            println!("{}", FilterParameterSet::new().to_json_pretty()?);
        }
        Command::Catalog => {
            println!(
                "{:<16} {:>8} {:>8} {:>8} {:>6}",
                "property", "min", "max", "default", "step"
            );
            for property in FilterProperty::ALL {
                let info = property.info();
                println!(
                    "{:<16} {:>8} {:>8} {:>8} {:>6}",
                    property.name(),
                    info.min,
                    info.max,
                    info.default,
                    info.step
                );
            }
        }
        Command::Presets => {
            let engine = config::load_config(&cli.config)?;
            println!("{}", load_presets(&engine)?.to_json_pretty()?);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Built-in presets plus the configured library file, if any.
fn load_presets(engine: &EngineConfig) -> Result<PresetLibrary, Box<dyn std::error::Error>> {
    let mut library = PresetLibrary::builtin();
    if let Some(path) = &engine.presets.library {
        library.load_file(Path::new(path))?;
    }
    Ok(library)
}

fn render(
    engine: &EngineConfig,
    input: &Path,
    output: &Path,
    params: &FilterParameterSet,
    preview: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = RenderContext::new(config::effective_threads(&engine.render))?;
    let pipeline = FilterRenderPipeline::new(Arc::new(context));

    let source = imaging::load_image(input)?;
    let (base, scale) = if preview {
        let base = pipeline.downsample(&source, engine.preview.max_edge)?;
        let scale = imaging::render_scale(source.dimensions(), base.dimensions());
        (base, RenderScale::new(scale))
    } else {
        (source, RenderScale::FULL)
    };

    let rendered = pipeline.apply_chain(&base, params, scale)?;
    for skipped in &rendered.skipped {
        eprintln!("skipped {}: {}", skipped.stage.property, skipped.reason);
    }
    let image = rendered.into_image();
    imaging::save_image(&image, output)?;
    println!(
        "{} → {} ({}x{}, {} filters)",
        input.display(),
        output.display(),
        image.width(),
        image.height(),
        params.active_properties().len()
    );
    Ok(())
}
