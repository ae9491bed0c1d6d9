//! # Page-Harvest command line
//!
//! Renders a URL or an HTML file in Chrome (reached over the DevTools
//! Protocol), waits for the DOM to settle and prints the requested
//! extraction as JSON. Also offers a plain HTTP fetch.
//!
//! ## Environment variables
//! - `HARVEST_CDP_ENDPOINT`: CDP endpoint (default: ws://localhost:9222)
//! - `HARVEST_TIMEOUT_MS`, `HARVEST_DEBOUNCE_MS`, `HARVEST_GRACE_MS`,
//!   `HARVEST_SCRIPT_TIMEOUT_MS`: readiness and evaluation windows
//! - `RUST_LOG`: log filter

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use page_harvest::{
    cdp::{CdpBrowser, CdpBrowserImpl},
    config::Config,
    engine::{CdpEngine, ContentMode},
    fetch::{FetchOption, Fetcher},
    loader::WebLoader,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

#[derive(Parser)]
#[command(name = "page-harvest", about = "Render pages and extract structured data", version)]
struct Cli {
    /// CDP endpoint of a running Chrome
    #[arg(long, global = true)]
    cdp_endpoint: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page and extract data from it
    Extract {
        /// Page to load
        #[arg(long, conflicts_with = "html", required_unless_present = "html")]
        url: Option<String>,

        /// HTML file to render instead of a URL
        #[arg(long)]
        html: Option<PathBuf>,

        /// Base URL for relative references in --html
        #[arg(long, requires = "html")]
        base_url: Option<String>,

        /// What to extract
        #[arg(long, value_enum, default_value_t = Output::All)]
        output: Output,

        /// Restrict text and HTML extraction to this selector
        #[arg(long)]
        selector: Option<String>,

        /// Readiness timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Emulate a mobile viewport
        #[arg(long)]
        mobile: bool,

        /// Do not block images, stylesheets, media and fonts
        #[arg(long)]
        no_block: bool,
    },

    /// Fetch a URL without rendering it
    Fetch {
        url: String,

        /// Print the body
        #[arg(long)]
        body: bool,

        /// Required MIME type
        #[arg(long)]
        content_type: Option<String>,

        /// Maximum body size in bytes
        #[arg(long)]
        max_size: Option<usize>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Metadata,
    Text,
    InnerText,
    Html,
    Links,
    Images,
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?.with_env_overrides()?,
        None => Config::from_env()?,
    };
    if let Some(endpoint) = cli.cdp_endpoint {
        config.cdp_endpoint = endpoint;
    }

    // Initialize tracing - respect RUST_LOG environment variable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    info!("Page-Harvest v{}", page_harvest::VERSION);

    match cli.command {
        Commands::Extract {
            url,
            html,
            base_url,
            output,
            selector,
            timeout_ms,
            mobile,
            no_block,
        } => {
            if let Some(timeout_ms) = timeout_ms {
                config.timeout_ms = timeout_ms;
            }
            if mobile {
                config.content_mode = ContentMode::Mobile;
            }
            if no_block {
                config.block_resources = false;
            }
            let loader_config = Arc::new(config.loader_configuration()?);

            // Bad input must fail before a browser target is opened
            let source = match (url, html) {
                (Some(url), _) => PageSource::from_url(&url)?,
                (None, Some(path)) => {
                    let markup = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    PageSource::from_markup(markup, base_url.as_deref())?
                }
                (None, None) => anyhow::bail!("either --url or --html is required"),
            };

            let browser: Arc<dyn CdpBrowser> = Arc::new(CdpBrowserImpl::new(config.cdp_endpoint.clone()));
            let engine = Arc::new(CdpEngine::launch(browser, &loader_config).await?);

            let loader = match source {
                PageSource::Url(url) => WebLoader::from_url(engine, url, loader_config).await?,
                PageSource::Markup { html, base_url } => {
                    WebLoader::from_html(engine, html, base_url, loader_config).await?
                }
            };

            let result = extract(&loader, output, selector.as_deref()).await;
            loader.close().await;

            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Fetch {
            url,
            body,
            content_type,
            max_size,
        } => {
            let url = Url::parse(&url).with_context(|| format!("invalid URL {}", url))?;
            let mut options = vec![FetchOption::Timeout(Duration::from_millis(config.timeout_ms))];
            if let Some(content_type) = content_type {
                options.push(FetchOption::ExpectedContentType(content_type));
            }
            if let Some(max_size) = max_size {
                options.push(FetchOption::MaxSize(max_size));
            }

            let result = Fetcher::new().fetch(&url, &options, body).await?;
            let summary = serde_json::json!({
                "url": result.url.as_str(),
                "status": result.status_code,
                "contentType": result.content_type,
                "size": result.size,
                "body": result.content,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

/// Validated page to render
#[derive(Debug)]
enum PageSource {
    Url(Url),
    Markup { html: String, base_url: Option<Url> },
}

impl PageSource {
    fn from_url(url: &str) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid URL {}", url))?;
        Ok(PageSource::Url(url))
    }

    fn from_markup(html: String, base_url: Option<&str>) -> anyhow::Result<Self> {
        let base_url = base_url
            .map(|base| Url::parse(base).with_context(|| format!("invalid base URL {}", base)))
            .transpose()?;
        Ok(PageSource::Markup { html, base_url })
    }
}

async fn extract(loader: &WebLoader, output: Output, selector: Option<&str>) -> anyhow::Result<serde_json::Value> {
    let state = loader.wait_until_ready().await?;
    if !state.is_resolved() {
        warn!("Extracting from an unresolved document: {:?}", state);
    }

    let mut result = serde_json::Map::new();
    result.insert("readiness".to_string(), format!("{:?}", state).into());

    if matches!(output, Output::Metadata | Output::All) {
        result.insert("metadata".to_string(), serde_json::to_value(loader.get_metadata().await?)?);
    }
    if matches!(output, Output::Text | Output::All) {
        result.insert("text".to_string(), loader.get_text_content(selector).await?.into());
    }
    if output == Output::InnerText {
        result.insert("innerText".to_string(), loader.get_inner_text(selector).await?.into());
    }
    if output == Output::Html {
        result.insert("html".to_string(), loader.get_inner_html(selector).await?.into());
    }
    if matches!(output, Output::Links | Output::All) {
        let mut links: Vec<String> = loader.get_links_absolute_string(None).await?.into_iter().collect();
        links.sort();
        result.insert("links".to_string(), links.into());
    }
    if matches!(output, Output::Images | Output::All) {
        let mut images: Vec<String> = loader.get_images_absolute_string(None).await?.into_iter().collect();
        images.sort();
        result.insert("images".to_string(), images.into());
    }

    Ok(serde_json::Value::Object(result))
}
