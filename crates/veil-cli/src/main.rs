use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use veil_client::{
    EngineRenderer, HtmlExtractor, HttpProxyProber, ListFormat, ProxyListSource,
    ReqwestRangeSource, ReqwestRobotsSource, TorManager,
};
use veil_core::throttle::ThrottledRenderer;
use veil_core::traits::CircuitRoute;
use veil_core::{
    ContentFetcher, Engine, FetchRequest, FetchResult, MediaKind, ProxyPool, ResumableDownloader,
    VeilConfig,
};

type Fetcher = ContentFetcher<ThrottledRenderer<EngineRenderer>, HtmlExtractor, ReqwestRobotsSource>;

#[derive(Parser)]
#[command(name = "veil", version, about = "Anonymity-aware web content acquisition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a page and print its text and media URLs as JSON
    Crawl {
        /// Target URL
        url: String,

        /// Rendering engine (light-http, chromium-settled, chromium-idle)
        #[arg(short, long)]
        engine: Option<Engine>,

        /// Ignore robots.txt
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Force (true) or skip (false) the browser engine
        #[arg(long)]
        dynamic: Option<bool>,

        /// Download the page's images and videos afterwards
        #[arg(long, default_value_t = false)]
        download_media: bool,

        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Download a single file with resumable, parallel range requests
    Download {
        url: String,

        /// File name inside the download directory
        #[arg(short, long)]
        filename: Option<String>,

        /// Start over even if a checkpoint exists
        #[arg(long, default_value_t = false)]
        no_resume: bool,

        /// Download directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Route the transfer through Tor
        #[arg(long, default_value_t = false)]
        tor: bool,
    },

    /// Download several media files, skipping failures
    DownloadMany {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Media kind used to name files without a usable name (image, video)
        #[arg(short, long, default_value = "image")]
        kind: MediaKind,

        #[arg(short, long)]
        dir: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        tor: bool,
    },

    /// Ask the Tor relay for a fresh circuit
    RenewIdentity,
}

#[derive(Args)]
struct NetworkArgs {
    /// Route requests through Tor
    #[arg(long, default_value_t = false)]
    tor: bool,

    /// Rotate through proxies discovered from public lists
    #[arg(long, default_value_t = false)]
    proxy_pool: bool,

    /// Extra plain-text proxy list URLs (one host:port per line)
    #[arg(long = "proxy-list")]
    proxy_lists: Vec<String>,

    /// Known-good proxies added to the pool without probing
    #[arg(long = "proxy")]
    proxies: Vec<String>,

    /// How long to wait for the first validated proxy
    #[arg(long, default_value_t = 30)]
    pool_warmup_secs: u64,

    /// Fail instead of falling back to a direct connection
    #[arg(long, default_value_t = false)]
    require_proxy: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("veil=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = VeilConfig::from_env().context("Invalid VEIL_* configuration")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, shutting down");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Crawl {
            url,
            engine,
            force,
            dynamic,
            download_media,
            network,
        } => {
            let mut config = config;
            if let Some(engine) = engine {
                config.fetch.default_engine = engine;
            }
            config.fetch.require_proxy |= network.require_proxy;
            let request = FetchRequest::new(url, config.fetch.default_engine)
                .force(force)
                .dynamic(dynamic);
            cmd_crawl(config, request, download_media, &network, cancel).await?;
        }
        Commands::Download {
            url,
            filename,
            no_resume,
            dir,
            tor,
        } => {
            let mut config = config;
            if let Some(dir) = dir {
                config.download.download_dir = dir;
            }
            let tor = start_tor(&config, tor).await?;
            let downloader = build_downloader(&config, tor.as_deref(), cancel)?;
            let result = downloader
                .download(&url, filename.as_deref(), !no_resume)
                .await;
            stop_tor(tor).await;
            let saved = result.with_context(|| format!("Download of {url} failed"))?;
            println!("{}", saved.display());
        }
        Commands::DownloadMany {
            urls,
            kind,
            dir,
            tor,
        } => {
            let mut config = config;
            if let Some(dir) = dir {
                config.download.download_dir = dir;
            }
            let tor = start_tor(&config, tor).await?;
            let downloader = build_downloader(&config, tor.as_deref(), cancel)?;
            let saved = downloader.download_many(&urls, kind).await;
            stop_tor(tor).await;

            tracing::info!(saved = saved.len(), requested = urls.len(), "Batch finished");
            for path in saved {
                println!("{}", path.display());
            }
        }
        Commands::RenewIdentity => {
            let tor = TorManager::new(config.tor.clone());
            tor.start().await.context("Failed to reach Tor")?;
            let renewed = tor.renew_identity().await;
            tor.stop().await;
            renewed.context("Failed to renew Tor identity")?;
            println!("Identity renewed");
        }
    }

    Ok(())
}

async fn cmd_crawl(
    config: VeilConfig,
    request: FetchRequest,
    download_media: bool,
    network: &NetworkArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let engine = request.effective_engine();
    if !EngineRenderer::supports(engine) {
        anyhow::bail!("Engine {engine} needs a build with the `browser` feature");
    }

    let tor = start_tor(&config, network.tor).await?;
    let pool = if network.proxy_pool || !network.proxies.is_empty() {
        Some(start_pool(&config, network).await?)
    } else {
        None
    };

    let fetcher = build_fetcher(&config, tor.clone(), pool.clone())?;

    tracing::info!(url = %request.url, engine = %engine, "Crawling");
    let result = tokio::select! {
        result = fetcher.crawl(&request) => Some(result),
        () = cancel.cancelled() => None,
    };

    if let Some(pool) = &pool {
        pool.shutdown();
        pool.wait().await;
    }

    let outcome = match result {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if download_media && let FetchResult::Content { image_urls, video_urls, .. } = &result {
                let downloader = build_downloader(&config, tor.as_deref(), cancel)?;
                let images: Vec<String> = image_urls.iter().cloned().collect();
                let videos: Vec<String> = video_urls.iter().cloned().collect();
                let mut saved = downloader.download_many(&images, MediaKind::Image).await;
                saved.extend(downloader.download_many(&videos, MediaKind::Video).await);
                tracing::info!(
                    saved = saved.len(),
                    found = images.len() + videos.len(),
                    dir = %config.download.download_dir.display(),
                    "Media downloaded"
                );
            }
            Ok(())
        }
        None => Err(anyhow::anyhow!("Crawl cancelled")),
    };

    stop_tor(tor).await;
    outcome
}

fn build_fetcher(
    config: &VeilConfig,
    tor: Option<Arc<TorManager>>,
    pool: Option<ProxyPool>,
) -> Result<Fetcher> {
    let mut renderer = EngineRenderer::new(&config.fetch).context("Failed to create renderer")?;
    if let Some(tor) = &tor {
        renderer = renderer.with_circuit_session(tor.get_session()?);
    }
    let renderer = ThrottledRenderer::new(renderer, config.fetch.throttle.clone());

    let (agent, timeout) = (&config.fetch.robots_agent, config.fetch.request_timeout);
    let robots = match &tor {
        Some(tor) => ReqwestRobotsSource::with_client(tor.get_session()?, agent, timeout),
        None => ReqwestRobotsSource::new(agent, timeout).context("Failed to create robots client")?,
    };

    let mut fetcher = ContentFetcher::new(renderer, HtmlExtractor::new(), robots, config.fetch.clone());
    if let Some(pool) = pool {
        fetcher = fetcher.with_proxy_pool(pool);
    }
    if let Some(tor) = tor {
        fetcher = fetcher.with_circuit(tor as Arc<dyn CircuitRoute>);
    }
    Ok(fetcher)
}

fn build_downloader(
    config: &VeilConfig,
    tor: Option<&TorManager>,
    cancel: CancellationToken,
) -> Result<ResumableDownloader<ReqwestRangeSource>> {
    let timeout = config.download.request_timeout;
    let source = match tor {
        Some(tor) => ReqwestRangeSource::with_client(tor.get_session()?, timeout),
        None => ReqwestRangeSource::new(timeout).context("Failed to create download client")?,
    };
    Ok(ResumableDownloader::new(source, config.download.clone()).with_cancellation(cancel))
}

async fn start_pool(config: &VeilConfig, network: &NetworkArgs) -> Result<ProxyPool> {
    let pool = ProxyPool::new(config.proxy.clone());
    pool.seed(&network.proxies);

    if network.proxy_pool {
        let timeout = config.proxy.test_timeout;
        let mut sources = vec![ProxyListSource::free_proxy_list(timeout)?];
        for (i, url) in network.proxy_lists.iter().enumerate() {
            sources.push(ProxyListSource::new(
                format!("list-{i}"),
                url,
                ListFormat::PlainText,
                timeout,
            )?);
        }
        pool.start(sources, HttpProxyProber::new(&config.proxy.test_url, timeout));

        let warmup = Duration::from_secs(network.pool_warmup_secs);
        let filled = tokio::time::timeout(warmup, async {
            while pool.is_empty() {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await;
        if filled.is_err() {
            tracing::warn!(secs = network.pool_warmup_secs, "No validated proxy yet");
        }
    }

    tracing::info!(proxies = pool.len(), "Proxy pool ready");
    Ok(pool)
}

async fn start_tor(config: &VeilConfig, enabled: bool) -> Result<Option<Arc<TorManager>>> {
    if !enabled {
        return Ok(None);
    }
    let tor = Arc::new(TorManager::new(config.tor.clone()));
    tor.start().await.context("Failed to start Tor")?;
    Ok(Some(tor))
}

async fn stop_tor(tor: Option<Arc<TorManager>>) {
    if let Some(tor) = tor {
        tor.stop().await;
    }
}
