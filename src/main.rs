use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use console::style;
use sweepd::{
   Client, Result, Server, StopStatus,
   archive::{self, ArchiveDecoder},
   config::Config,
   decoder::ArchiveLocator,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for sweepd
#[derive(Parser)]
#[command(name = "sweepd")]
#[command(about = "Decode-on-demand cache server for radar sweeps")]
#[command(version)]
struct Cli {
   #[arg(long, global = true, env = "SWEEPD_CONFIG", help = "TOML config file")]
   config: Option<PathBuf>,

   #[arg(long, global = true, help = "Server host (overrides config)")]
   host: Option<String>,

   #[arg(long, global = true, help = "Server port (overrides config)")]
   port: Option<u16>,

   #[command(subcommand)]
   command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Run the cache server until SIGINT/SIGTERM")]
   Serve {
      #[arg(short = 'n', long, help = "Number of reader threads (2-16)")]
      readers: Option<usize>,

      #[arg(long, help = "Cache capacity in entries")]
      cache: Option<usize>,
   },

   #[command(about = "Fetch one sweep through the server")]
   Get {
      #[arg(help = "Path of the sweep file on the server host")]
      path: String,

      #[arg(long, help = "Archive member locator as JSON")]
      tarinfo: Option<String>,

      #[arg(short = 'c', long, help = "Pooled connections (1-16)")]
      connections: Option<usize>,
   },

   #[command(about = "Show the number of cached sweeps")]
   Stats,

   #[command(about = "Print the member locator of a tar archive")]
   Scan {
      #[arg(help = "Archive to scan")]
      archive: PathBuf,
   },

   #[command(name = "config", about = "Print the effective configuration")]
   ShowConfig,
}

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
      .init();

   let cli = Cli::parse();
   if let Err(err) = run(cli).await {
      eprintln!("{err}");
      std::process::exit(1);
   }
}

async fn run(cli: Cli) -> Result<()> {
   let mut config = Config::load(cli.config.as_deref())?;
   if let Some(host) = cli.host {
      config.server.host.clone_from(&host);
      config.client.host = host;
   }
   if let Some(port) = cli.port {
      config.server.port = port;
      config.client.port = port;
   }

   match cli.command {
      Cmd::Serve { readers, cache } => {
         if let Some(readers) = readers {
            config.server.readers = readers;
         }
         if let Some(cache) = cache {
            config.server.cache_capacity = cache;
         }
         serve(config).await
      },
      Cmd::Get { path, tarinfo, connections } => {
         if let Some(connections) = connections {
            config.client.connections = connections;
         }
         let tarinfo = tarinfo
            .map(|raw| serde_json::from_str::<ArchiveLocator>(&raw))
            .transpose()?;
         let client = Client::connect(config.client).await?;
         match client.get(&path, tarinfo).await? {
            Some(record) => {
               println!("{}", style(&record.source).cyan());
               for (symbol, data) in &record.products {
                  println!("  {symbol}: {} B", data.len());
               }
            },
            None => println!("{}", style("No data").yellow()),
         }
         client.close().await;
         Ok(())
      },
      Cmd::Stats => {
         let client = Client::connect(config.client).await?;
         match client.stats().await? {
            Some(count) => println!("cached sweeps: {}", style(count).cyan()),
            None => println!("{}", style("No data").yellow()),
         }
         client.close().await;
         Ok(())
      },
      Cmd::Scan { archive } => {
         let index = archive::scan_members(&archive)?;
         println!("{}", serde_json::to_string_pretty(&index)?);
         Ok(())
      },
      Cmd::ShowConfig => {
         print!("{}", config.to_toml()?);
         Ok(())
      },
   }
}

async fn serve(config: Config) -> Result<()> {
   let server = Arc::new(Server::new(config.server, Arc::new(ArchiveDecoder::new()))?);
   let stopper = server.install_signal_handler(None)?;

   println!("{}", style("Starting sweepd server...").green().bold());
   server.start().await?;
   if let Some(addr) = server.local_addr() {
      println!("Listening: {}", style(addr).cyan());
   }
   println!("Readers: {}", style(server.config().effective_readers()).cyan());
   println!("Cache: {} entries", style(server.cache().capacity()).cyan());
   println!("{}", style("Press Ctrl+C to stop").dim());

   match stopper.await {
      Ok((signal, StopStatus::Stopped)) => {
         println!("\n{}", style(format!("{signal} received, server stopped")).green());
      },
      Ok((signal, StopStatus::AlreadyStopped)) => {
         println!("\n{}", style(format!("{signal} received")).yellow());
      },
      Err(e) => {
         server.stop().await;
         return Err(sweepd::Error::Server { op: "serve", reason: e.to_string() });
      },
   }
   Ok(())
}
