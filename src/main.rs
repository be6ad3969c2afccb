mod breaker;
mod client;
mod config;
mod grace;
mod htlc_limits;
mod registry;
mod scheduler;
mod state;
mod supervisor;
mod types;

use crate::client::{LndRestClient, NodeClient};
use crate::grace::classify::FeatureBitClassifier;
use crate::registry::ProtectionRegistry;
use crate::types::short_pubkey;
use clap::{Parser, Subcommand};
use config::Config;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "chan-warden", about = "Channel health sidecar for LND")]
struct Cli {
    /// Path to config file (default: ./chanwarden.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// LND REST endpoint, e.g. https://127.0.0.1:8080
    #[arg(long)]
    rest_url: Option<String>,

    /// Path to LND's tls.cert
    #[arg(long)]
    tlscert: Option<PathBuf>,

    /// Path to the macaroon file
    #[arg(long)]
    macaroon_path: Option<PathBuf>,

    /// Directory holding admin.macaroon
    #[arg(long)]
    macaroon_dir: Option<PathBuf>,

    /// Bitcoin network (mainnet, testnet, signet, regtest, ...)
    #[arg(long)]
    network: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    /// Log decisions without changing anything on the node
    #[arg(long)]
    dry_run: bool,

    /// Keep max/min HTLC size in line with channel liquidity
    #[arg(long)]
    enable_htlc_size_control: bool,

    /// Disable channels that run out of liquidity, re-enable when they recover
    #[arg(long)]
    enable_liquidity_circuit_breaker: bool,

    /// Reconnect peers that have HTLCs close to expiry
    #[arg(long)]
    enable_grace_period_reconnect: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enabled loops until interrupted (default)
    Daemon,
    /// Run one pass of every enabled loop and exit
    RunOnce,
    /// Print node identity and per-channel liquidity
    Status,
}

impl Cli {
    /// Command-line values win over the config file.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.rest_url {
            config.server.rest_url = url.clone();
        }
        if let Some(cert) = &self.tlscert {
            config.server.tls_cert_path = cert.clone();
        }
        if let Some(path) = &self.macaroon_path {
            config.server.macaroon_path = Some(path.clone());
        }
        if let Some(dir) = &self.macaroon_dir {
            config.server.macaroon_dir = Some(dir.clone());
        }
        if let Some(network) = &self.network {
            config.server.network = network.clone();
        }
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        config.general.dry_run |= self.dry_run;
        config.htlc_limits.enabled |= self.enable_htlc_size_control;
        config.circuit_breaker.enabled |= self.enable_liquidity_circuit_breaker;
        config.grace_period.enabled |= self.enable_grace_period_reconnect;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    // Initialize logging
    let log_level = config.general.log_level.clone();
    env_logger::Builder::new()
        .filter_level(log_level.parse().unwrap_or(log::LevelFilter::Info))
        .format_timestamp_secs()
        .init();

    info!("chan-warden v{} starting", env!("CARGO_PKG_VERSION"));

    if config.general.dry_run {
        warn!("DRY-RUN MODE: no policy or status changes will be sent");
    }

    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => run_daemon(config).await,
        Commands::RunOnce => {
            let client = LndRestClient::new(&config)?;
            run_once(&config, &client).await
        }
        Commands::Status => {
            let client = LndRestClient::new(&config)?;
            print_status(&client).await
        }
    }
}

async fn run_daemon(config: Arc<Config>) -> anyhow::Result<()> {
    if !config.any_loop_enabled() {
        warn!("No loop enabled -- nothing to do, exiting");
        return Ok(());
    }

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal, finishing current passes...");
        let _ = shutdown_tx.send(true);
    });

    let connect_config = config.clone();
    let result = supervisor::supervise(
        config,
        move || LndRestClient::new(&connect_config).map(Arc::new),
        shutdown_rx,
    )
    .await;

    match &result {
        Ok(()) => info!("Shut down gracefully"),
        Err(e) => error!("Giving up: {:#}", e),
    }
    result
}

/// One pass of each enabled loop, protector first so the breaker sees a
/// fresh protection generation.
pub async fn run_once(config: &Config, client: &impl NodeClient) -> anyhow::Result<()> {
    if !config.any_loop_enabled() {
        warn!("No loop enabled -- nothing to do");
        return Ok(());
    }

    info!("Running single pass...");
    let identity = client
        .get_local_identity()
        .await
        .map_err(|e| e.context("Could not get local node info"))?;
    let registry = ProtectionRegistry::new();

    if config.grace_period.enabled {
        let classifier = FeatureBitClassifier::new(config.grace_period.target_feature_bit);
        grace::run_pass(config, client, &registry, &classifier).await?;
    }
    if config.circuit_breaker.enabled {
        breaker::run_pass(config, client, &identity.pubkey, &registry).await?;
    }
    if config.htlc_limits.enabled {
        htlc_limits::run_pass(config, client, &identity.pubkey).await?;
    }

    info!("Single pass complete");
    Ok(())
}

async fn print_status(client: &impl NodeClient) -> anyhow::Result<()> {
    let state = state::NodeState::collect(client).await?;
    let identity = &state.identity;

    println!("chan-warden status");
    println!("==================");
    if identity.alias.is_empty() {
        println!("Node:              {}", identity.pubkey);
    } else {
        println!("Node:              {} ({})", identity.alias, identity.pubkey);
    }
    println!("Block height:      {}", identity.block_height);
    println!(
        "Channels:          {} ({} active)",
        state.channels.len(),
        state.active_channel_count()
    );
    println!("Local balance:     {} sat", state.total_local_balance_sat());
    println!("Pending HTLCs:     {}", state.pending_htlc_count());

    if state.channels.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<20} {:<18} {:>6} {:>12} {:>12} {:>10} {:>12} {:>5}",
        "CHANNEL", "PEER", "ACTIVE", "CAPACITY", "BALANCE", "RESERVE", "HEADROOM", "HTLCS"
    );
    for channel in &state.channels {
        let reserve = channel.local_constraints.chan_reserve_sat;
        let headroom =
            channel.local_balance_sat as i128 - breaker::liquidity_threshold_sat(reserve);
        println!(
            "{:<20} {:<18} {:>6} {:>12} {:>12} {:>10} {:>12} {:>5}",
            channel.chan_id,
            short_pubkey(&channel.remote_pubkey),
            if channel.active { "yes" } else { "no" },
            channel.capacity_sat,
            channel.local_balance_sat,
            reserve,
            headroom,
            channel.pending_htlcs.len()
        );
    }

    Ok(())
}

#[cfg(test)]
mod integration_tests {
    use crate::client::mock::MockNodeClient;
    use crate::config::Config;
    use crate::types::{
        ChanStatusAction, Channel, ChannelConstraints, PendingHtlc, RemoteNodeInfo, RoutingPolicy,
    };
    use clap::Parser;

    fn test_config() -> Config {
        let mut config = Config::test_default(std::path::PathBuf::from("/dev/null"));
        config.general.dry_run = false;
        config
    }

    fn txid(n: u64) -> String {
        format!("{:064x}", n)
    }

    fn make_channel(id: u64, peer: &str, balance: i64, reserve: u64) -> Channel {
        Channel {
            chan_id: id,
            channel_point: format!("{}:1", txid(id)),
            remote_pubkey: peer.to_string(),
            active: true,
            capacity_sat: 1_000_000,
            local_balance_sat: balance,
            local_constraints: ChannelConstraints {
                chan_reserve_sat: reserve,
                max_pending_amt_msat: 990_000_000,
            },
            pending_htlcs: Vec::new(),
        }
    }

    fn enabled_policy() -> RoutingPolicy {
        RoutingPolicy {
            time_lock_delta: 40,
            min_htlc_msat: 1_000,
            max_htlc_msat: 990_000_000,
            fee_base_msat: 1_000,
            fee_rate_milli_msat: 100,
            disabled: false,
        }
    }

    fn amp_peer(pubkey: &str) -> RemoteNodeInfo {
        RemoteNodeInfo {
            alias: format!("peer-{}", &pubkey[..8]),
            features: [31].into_iter().collect(),
            addresses: vec!["203.0.113.7:9735".to_string()],
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: Nothing enabled
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn test_run_once_nothing_enabled() {
        let config = test_config();
        let mock = MockNodeClient::new();
        assert!(super::run_once(&config, &mock).await.is_ok());
        assert!(mock.policy_update_calls.lock().unwrap().is_empty());
        assert!(mock.status_calls.lock().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 2: Protected channel is not re-enabled in the same pass
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn test_run_once_protector_shields_breaker() {
        let mut config = test_config();
        config.grace_period.enabled = true;
        config.circuit_breaker.enabled = true;

        let peer_a = format!("03{}", "a".repeat(64));
        let peer_b = format!("03{}", "b".repeat(64));

        let mut mock = MockNodeClient::new();
        // Both healthy and currently disabled; channel 1 carries an HTLC about to expire
        let mut protected = make_channel(1, &peer_a, 400_000, 1_000);
        protected.pending_htlcs.push(PendingHtlc {
            incoming: true,
            amount_sat: 500,
            hash_lock: vec![0xab; 32],
            expiration_height: mock.identity.block_height + 5,
        });
        mock.channels = vec![protected, make_channel(2, &peer_b, 400_000, 1_000)];
        mock.nodes.insert(peer_a.clone(), amp_peer(&peer_a));
        mock.nodes.insert(peer_b.clone(), amp_peer(&peer_b));
        let mut disabled = enabled_policy();
        disabled.disabled = true;
        mock.set_local_policy(1, disabled.clone());
        mock.set_local_policy(2, disabled);

        super::run_once(&config, &mock).await.unwrap();

        // Peer A bounced
        assert_eq!(*mock.disconnect_calls.lock().unwrap(), vec![peer_a.clone()]);
        assert_eq!(mock.connect_calls.lock().unwrap().len(), 1);

        // Only the unprotected channel got re-enabled
        let status = mock.status_calls.lock().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].0.funding_txid, txid(2));
        assert_eq!(status[0].1, ChanStatusAction::Enable);
        assert!(mock.local_policy(1).unwrap().disabled);
    }

    // -----------------------------------------------------------------------
    // Test 3: All three loops together
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn test_run_once_all_loops() {
        let mut config = test_config();
        config.grace_period.enabled = true;
        config.circuit_breaker.enabled = true;
        config.htlc_limits.enabled = true;

        let peer = format!("03{}", "c".repeat(64));
        let mut mock = MockNodeClient::new();
        mock.channels = vec![make_channel(7, &peer, 400_000, 10_000)];
        mock.nodes.insert(peer.clone(), amp_peer(&peer));
        let mut policy = enabled_policy();
        policy.disabled = true;
        mock.set_local_policy(7, policy);

        super::run_once(&config, &mock).await.unwrap();

        // Healthy channel re-enabled, no HTLCs so nobody bounced
        let status = mock.status_calls.lock().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].1, ChanStatusAction::Enable);
        assert!(mock.disconnect_calls.lock().unwrap().is_empty());

        // 390_000 sat spendable -> 2^28 msat
        let updates = mock.policy_update_calls.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].max_htlc_msat, 268_435_456);
        assert_eq!(mock.local_policy(7).unwrap().max_htlc_msat, 268_435_456);
    }

    // -----------------------------------------------------------------------
    // Test 4: Dry-run touches nothing
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn test_run_once_dry_run() {
        let mut config = test_config();
        config.general.dry_run = true;
        config.grace_period.enabled = true;
        config.circuit_breaker.enabled = true;
        config.htlc_limits.enabled = true;

        let peer = format!("03{}", "d".repeat(64));
        let mut mock = MockNodeClient::new();
        let mut channel = make_channel(3, &peer, 100, 1_000);
        channel.pending_htlcs.push(PendingHtlc {
            incoming: false,
            amount_sat: 50,
            hash_lock: vec![1; 32],
            expiration_height: mock.identity.block_height + 1,
        });
        mock.channels = vec![channel];
        mock.nodes.insert(peer.clone(), amp_peer(&peer));
        mock.set_local_policy(3, enabled_policy());

        super::run_once(&config, &mock).await.unwrap();

        assert!(mock.policy_update_calls.lock().unwrap().is_empty());
        assert!(mock.status_calls.lock().unwrap().is_empty());
        assert!(mock.disconnect_calls.lock().unwrap().is_empty());
        assert!(mock.connect_calls.lock().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 5: Failing node aborts the pass
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn test_run_once_list_failure() {
        let mut config = test_config();
        config.circuit_breaker.enabled = true;
        let mut mock = MockNodeClient::new();
        mock.fail_list_channels = true;
        assert!(super::run_once(&config, &mock).await.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = super::Cli::parse_from([
            "chan-warden",
            "--rest-url",
            "https://10.0.0.2:8080",
            "--network",
            "signet",
            "--dry-run",
            "--enable-liquidity-circuit-breaker",
            "run-once",
        ]);
        let mut config = test_config();
        cli.apply_overrides(&mut config);

        assert_eq!(config.server.rest_url, "https://10.0.0.2:8080");
        assert_eq!(config.server.network, "signet");
        assert!(config.general.dry_run);
        assert!(config.circuit_breaker.enabled);
        assert!(!config.htlc_limits.enabled);
        assert!(!config.grace_period.enabled);
        assert!(matches!(cli.command, Some(super::Commands::RunOnce)));
    }
}
