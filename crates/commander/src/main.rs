//! Operator tool for vault2 key sets and local smoke tests.
//!
//! Key management works on a JSON keys file of generated node identities.
//! The run/bootstrap/store/verify/test sub-commands drive in-process
//! vaults and a local blob store; attaching to a live network is the
//! routing layer's job, not this tool's.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

mod commander;

/// Vault2 commander.
#[derive(Parser, Debug)]
#[command(name = "vault2-commander", disable_version_flag = true)]
struct Args {
    /// Create keys and write to file.
    #[arg(short = 'c', long)]
    create: bool,

    /// Load keys from file.
    #[arg(short = 'l', long)]
    load: bool,

    /// Run vaults with available keys.
    #[arg(short = 'r', long)]
    run: bool,

    /// Run bootstrap nodes only, using first 2 keys.
    #[arg(short = 'b', long)]
    bootstrap: bool,

    /// Store chunks locally.
    #[arg(short = 's', long)]
    store: bool,

    /// Verify stored chunks are retrievable.
    #[arg(short = 'v', long)]
    verify: bool,

    /// Run simple test that stores and retrieves chunks through a vault.
    #[arg(short = 't', long)]
    test: bool,

    /// Delete keys file.
    #[arg(short = 'd', long)]
    delete: bool,

    /// Print the list of keys available.
    #[arg(short = 'p', long)]
    print: bool,

    /// Endpoint of bootstrap node, if attaching to running network.
    #[arg(long)]
    peer: Option<String>,

    /// Number of keys to create.
    #[arg(long = "pmids_count", default_value_t = 12)]
    pmids_count: usize,

    /// Path to keys file.
    #[arg(long = "keys_path")]
    keys_path: Option<PathBuf>,

    /// Path to chunk directory.
    #[arg(long = "chunk_path")]
    chunk_path: Option<PathBuf>,

    /// Number of chunk sets to store and verify.
    #[arg(long = "chunk_set_count", default_value_t = 5)]
    chunk_set_count: usize,
}

impl Args {
    fn any_selected(&self) -> bool {
        self.create
            || self.load
            || self.run
            || self.bootstrap
            || self.store
            || self.verify
            || self.test
            || self.delete
            || self.print
    }
}

fn main() {
    let t = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    let _ = tracing::subscriber::set_global_default(t);

    let args = Args::parse();
    if !args.any_selected() {
        use clap::CommandFactory;
        let _ = Args::command().print_help();
        eprintln!("\noptions order: [c|l|d] p [r|b] s v t");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start runtime: {error}");
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(commander::Commander::new(args).execute());
    if let Err(error) = result {
        eprintln!("commander failed: {error}");
        std::process::exit(1);
    }
}

pub(crate) use commander::NoopSender;

pub(crate) fn noop_sender() -> vault2_api::DynRoutingSender {
    Arc::new(NoopSender)
}
