mod context;
mod server;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use varia_batch::{BatchOptions, BatchPipeline};
use varia_core::{VariaConfig, CONFIG_FILE_NAME};
use varia_ir::request::{GRAPHIC_NAME_PARAM, PROJECT_ID_PARAM};
use varia_ir::{validate_template, DataSet, RenderRequest, Template};
use varia_render::Compositor;
use varia_web::RasterRequest;

use crate::context::AppContext;

#[derive(Parser)]
#[command(
    name = "varia",
    version,
    about = "Varia — parameterized SVG templates, composed and rendered",
    long_about = "Varia composes SVG templates with runtime values and renders them to PNG.\nServe the render page, compose a single graphic, or batch-render a CSV."
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a template with overrides and write the SVG
    Compose {
        /// Project whose template to compose
        #[arg()]
        project_id: String,

        /// Override as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Replacement base document reference
        #[arg(long)]
        graphic: Option<String>,

        /// Read the template from a JSON file instead of the template store
        #[arg(long)]
        template: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Wrap the SVG in the render page HTML
        #[arg(long)]
        html: bool,
    },

    /// Render one graphic to PNG through the render server
    Render {
        /// Project whose template to render
        #[arg()]
        project_id: String,

        /// Override as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Replacement base document reference
        #[arg(long)]
        graphic: Option<String>,

        /// Output PNG path
        #[arg(short, long, default_value = "output.png")]
        output: PathBuf,
    },

    /// Render one PNG per row of a CSV, TSV or JSON data file
    Batch {
        /// Path to the data file
        #[arg(long)]
        data: PathBuf,

        /// Render URL template, e.g. "http://localhost:3000/generate?projectId=p&title={{title}}"
        #[arg(long)]
        url: String,

        /// Number of rows rendered in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Retries per row for transient failures
        #[arg(long)]
        retries: Option<u32>,

        /// Column used to name the output objects
        #[arg(long)]
        id_column: Option<String>,

        /// Write a JSON report of results and failures
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Start the render server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Check a template JSON file for structural errors
    Validate {
        #[arg()]
        file: PathBuf,
    },

    /// Display version and configuration info
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = VariaConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Compose {
            project_id,
            params,
            graphic,
            template,
            output,
            html,
        } => run_async(cmd_compose(config, project_id, params, graphic, template, output, html)),
        Commands::Render {
            project_id,
            params,
            graphic,
            output,
        } => run_async(cmd_render(config, project_id, params, graphic, output)),
        Commands::Batch {
            data,
            url,
            concurrency,
            retries,
            id_column,
            report,
        } => {
            let mut options = BatchOptions::from_config(&config);
            if let Some(c) = concurrency {
                options.concurrency = c;
            }
            if let Some(r) = retries {
                options.retries = r;
            }
            if let Some(col) = id_column {
                options.id_column = col;
            }
            run_async(cmd_batch(config, data, url, options, report))
        }
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .with_context(|| format!("invalid listen address {}:{}", host, port))?;
            let ctx = AppContext::from_config(config)?;
            run_async(server::run_server(ctx, addr))
        }
        Commands::Validate { file } => cmd_validate(file),
        Commands::Info => cmd_info(&cli.config, &config),
    }
}

fn run_async<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to initialize async runtime")?;
    runtime.block_on(future)
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn request_pairs(
    project_id: String,
    params: Vec<(String, String)>,
    graphic: Option<String>,
) -> Vec<(String, String)> {
    let mut pairs = vec![(PROJECT_ID_PARAM.to_string(), project_id)];
    if let Some(graphic) = graphic {
        pairs.push((GRAPHIC_NAME_PARAM.to_string(), graphic));
    }
    pairs.extend(params);
    pairs
}

fn load_template_file(file: &Path) -> Result<Template> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read template: {}", file.display()))?;
    Template::from_json(&json).with_context(|| format!("failed to parse template: {}", file.display()))
}

async fn cmd_compose(
    config: VariaConfig,
    project_id: String,
    params: Vec<(String, String)>,
    graphic: Option<String>,
    template: Option<PathBuf>,
    output: Option<PathBuf>,
    html: bool,
) -> Result<()> {
    let ctx = AppContext::from_config(config)?;
    let request = RenderRequest::from_query_pairs(request_pairs(project_id, params, graphic))?;

    let composed = match template {
        Some(file) => {
            let template = load_template_file(&file)?;
            Compositor::new(Arc::clone(&ctx.documents))
                .compose(&request.resolve(&template))
                .await?
        }
        None => ctx.compose(&request).await?,
    };

    let body = if html {
        composed.to_html(ctx.marker_id())
    } else {
        composed.svg.clone()
    };
    match output {
        Some(path) => {
            tokio::fs::write(&path, body)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("✓ Composed {} ({})", path.display(), composed.hash.short());
        }
        None => println!("{}", body),
    }
    Ok(())
}

async fn cmd_render(
    config: VariaConfig,
    project_id: String,
    params: Vec<(String, String)>,
    graphic: Option<String>,
    output: PathBuf,
) -> Result<()> {
    let ctx = AppContext::from_config(config)?;
    let pairs = request_pairs(project_id, params, graphic);
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&pairs)
        .finish();
    let url = ctx.generate_url(&query);

    let start = Instant::now();
    let rasterizer = ctx.rasterizer()?;
    let image = rasterizer
        .render(&RasterRequest::new(url.clone(), &ctx.config.rasterizer))
        .await
        .with_context(|| format!("failed to render {}", url))?;
    tokio::fs::write(&output, &image.bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "✓ Rendered {} ({}x{}) in {:.2}s",
        output.display(),
        image.width,
        image.height,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn cmd_batch(
    config: VariaConfig,
    data: PathBuf,
    url: String,
    options: BatchOptions,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let dataset = DataSet::load(&data)
        .with_context(|| format!("failed to load data file: {}", data.display()))?;
    println!(
        "📊 Loaded {} columns from {}",
        dataset.columns.len(),
        data.display()
    );

    let ctx = AppContext::from_config(config)?;
    let rasterizer = ctx.rasterizer()?;
    let pipeline = BatchPipeline::new(rasterizer, Arc::clone(&ctx.documents), options);

    let start = Instant::now();
    let report = pipeline.render_batch(dataset.rows(), &url).await?;

    for result in &report.results {
        println!("   ✓ row {} → {}", result.row_index, result.reference);
    }
    for failure in &report.failures {
        println!("   ✗ {}", failure);
    }
    println!(
        "✓ Batch complete: {}/{} rows rendered in {:.2}s",
        report.results.len(),
        report.total_rows(),
        start.elapsed().as_secs_f64()
    );

    if let Some(path) = report_path {
        let failures: Vec<serde_json::Value> = report
            .failures
            .iter()
            .map(|f| {
                serde_json::json!({
                    "rowIndex": f.row_index,
                    "url": f.url,
                    "stage": f.stage.to_string(),
                    "error": f.source.to_string(),
                })
            })
            .collect();
        let json = serde_json::json!({
            "imageUrls": report.references(),
            "results": report.results,
            "failures": failures,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&json)?)
            .with_context(|| format!("failed to write report: {}", path.display()))?;
        println!("   Report: {}", path.display());
    }
    Ok(())
}

fn cmd_validate(file: PathBuf) -> Result<()> {
    let template = load_template_file(&file)?;
    println!("🔍 Checking {}", file.display());
    match validate_template(&template) {
        Ok(()) => {
            println!(
                "   ✓ {} tags, {} overlay layers",
                template.tags.len(),
                template.images.len()
            );
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                println!("   ✗ {}", e);
            }
            anyhow::bail!("{} error(s) in {}", errors.len(), file.display())
        }
    }
}

fn cmd_info(config_path: &Path, config: &VariaConfig) -> Result<()> {
    println!("🖼  Varia");
    println!("   Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "   Config:      {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (defaults)" }
    );
    println!("   Public URL:  {}", config.server.public_url);
    println!("   Storage:     {} ({})", config.storage.kind, config.storage.root.display());
    println!("   Templates:   {}", config.storage.templates_dir.display());
    println!(
        "   Rasterizer:  {} (ready marker {}, {}ms)",
        config.rasterizer.node, config.rasterizer.ready_selector, config.rasterizer.timeout_ms
    );
    println!(
        "   Batch:       {} workers, {} retries",
        config.batch.concurrency, config.batch.retries
    );
    Ok(())
}
