use std::sync::Arc;

use kiln_blockstore::{BlockstoreBuilder, CacheOpts};
use kiln_dag::{BlockService, DagService, PathResolver};
use kiln_exchange::{NetworkExchange, OfflineExchange, RoutingParams};
use kiln_interfaces::prelude::*;
use kiln_interfaces::{HostParams, Muxer, Security};
use kiln_pinner::Pinner;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{BuildConfig, RepoConfig, ResolvedConfig};
use crate::discovery::run_discovery;
use crate::error::NodeError;
use crate::files::load_files_root;
use crate::identity::{load_identity, load_private_key};
use crate::lifecycle::Lifecycle;
use crate::node::{Node, Services};
use crate::reprovider::Reprovider;
use crate::validator::NamespacedValidator;

/// Builds a node from `cfg`.
///
/// Every layer that needs cleanup is registered with the node's lifecycle as soon as it
/// exists. If a later step fails, or `token` is cancelled before construction finishes,
/// whatever was built is torn down again before the error is returned.
pub async fn new_node(token: CancellationToken, cfg: BuildConfig) -> Result<Node, NodeError> {
    let cfg = cfg.fill_defaults()?;
    let lifecycle = Arc::new(Lifecycle::new(&token));

    match build(lifecycle.clone(), cfg).await {
        Ok(node) => {
            info!(
                "Node {} started in {} mode",
                node.identity(),
                if node.is_online() { "online" } else { "offline" }
            );
            Ok(node)
        },
        Err(e) => {
            warn!("Node construction failed, unwinding: {e}");
            lifecycle.unwind().await;
            Err(e)
        },
    }
}

async fn build(lifecycle: Arc<Lifecycle>, cfg: ResolvedConfig) -> Result<Node, NodeError> {
    let repo = cfg.repo.clone();
    {
        let repo = repo.clone();
        lifecycle.on_teardown("repo", move || async move { repo.close().await });
    }
    if lifecycle.is_cancelled() {
        return Err(NodeError::Cancelled);
    }
    let repo_config = repo.config()?;

    let identity = load_identity(&repo_config)?;
    let peerstore = Arc::new(Peerstore::new());
    if cfg.online {
        let keypair = load_private_key(&repo_config, identity)?;
        peerstore.add_public_key(identity, keypair.public())?;
    }
    let validator = Arc::new(NamespacedValidator::standard(peerstore.clone()));

    let datastore = repo.datastore();
    let blocks = lifecycle
        .race(
            BlockstoreBuilder::new(datastore.clone())
                .with_cache(cache_opts(&cfg, &repo_config))
                .with_hash_on_read(repo_config.datastore.hash_on_read)
                .with_filestore(
                    repo_config.experimental.filestore_enabled,
                    repo_config.experimental.urlstore_enabled,
                )
                .with_file_manager(repo.file_manager())
                .build(),
        )
        .await??;
    let blockstore: Arc<dyn Blockstore> = blocks.blockstore.clone();

    let mut services = Services::default();
    let exchange: Arc<dyn Exchange> = if cfg.online {
        let params = host_params(&cfg, identity, peerstore.clone());
        let transport = cfg.host.build(params)?;
        {
            let transport = transport.clone();
            lifecycle.on_teardown("host", move || async move { transport.close().await });
        }

        let routing = cfg.routing.build(RoutingParams {
            peer_id: identity,
            transport: transport.clone(),
            datastore: datastore.clone(),
        })?;
        {
            let routing = routing.clone();
            lifecycle.on_teardown("routing", move || async move { routing.close().await });
        }

        let addrs = lifecycle
            .race(transport.listen(&repo_config.addresses.swarm))
            .await??;
        info!("Swarm listening on {addrs:?}");

        let peers = bootstrap_peers(&repo_config);
        if let Err(e) = lifecycle.race(routing.bootstrap(&peers)).await? {
            warn!("Failed to bootstrap content routing: {e:#}");
        }

        let mdns = &repo_config.discovery.mdns;
        if mdns.enabled && !mdns.interval.is_zero() {
            lifecycle.spawn("discovery", run_discovery(transport.clone(), mdns.interval));
        }

        services.transport = Some(transport.clone());
        services.routing = Some(routing.clone());
        Arc::new(NetworkExchange::new(
            blockstore.clone(),
            transport,
            routing,
            Default::default(),
        ))
    } else {
        Arc::new(OfflineExchange::new(blockstore.clone()))
    };
    {
        let exchange = exchange.clone();
        lifecycle.on_teardown("exchange", move || async move {
            exchange.close().await?;
            Ok(())
        });
    }

    let block_service = Arc::new(BlockService::new(blockstore.clone(), exchange.clone()));
    let dag = Arc::new(DagService::new(block_service.clone()));
    // Pin sets are stored locally and must never trigger a network fetch.
    let internal = Arc::new(DagService::new(Arc::new(BlockService::new(
        blockstore.clone(),
        Arc::new(OfflineExchange::new(blockstore.clone())),
    ))));

    let pinner = Arc::new(
        lifecycle
            .race(Pinner::load_or_create(
                datastore.clone(),
                dag.clone(),
                internal,
            ))
            .await??,
    );
    let resolver = Arc::new(PathResolver::new(dag.clone()));

    if let Some(routing) = &services.routing {
        let reprovider_config = &repo_config.reprovider;
        let reprovider = Arc::new(Reprovider::new(
            reprovider_config.strategy,
            blockstore.clone(),
            pinner.clone(),
            dag.clone(),
            routing.clone(),
        ));
        if !reprovider_config.interval.is_zero() {
            lifecycle.spawn(
                "reprovider",
                reprovider.clone().run(reprovider_config.interval),
            );
        }
        services.reprovider = Some(reprovider);
    }

    let files_root = lifecycle
        .race(load_files_root(
            &datastore,
            &dag,
            repo_config.experimental.sharding_enabled,
        ))
        .await??;

    Ok(Node {
        identity,
        peerstore,
        validator,
        repo,
        blocks,
        exchange,
        block_service,
        dag,
        pinner,
        resolver,
        files_root: RwLock::new(files_root),
        online: cfg.online,
        services,
        lifecycle,
        closed: Default::default(),
    })
}

/// Nil repos go without a cache; the bloom filter only pays off for long running nodes.
fn cache_opts(cfg: &ResolvedConfig, repo_config: &RepoConfig) -> Option<CacheOpts> {
    if cfg.nil_repo {
        return None;
    }
    let bloom_filter_size = if cfg.permanent {
        repo_config.datastore.bloom_filter_size
    } else {
        0
    };
    Some(CacheOpts {
        bloom_filter_size,
        ..Default::default()
    })
}

fn host_params(cfg: &ResolvedConfig, peer_id: PeerId, peerstore: Arc<Peerstore>) -> HostParams {
    let security = if cfg.disable_encryption {
        warn!(
            "Your node has been configured to run WITHOUT ENCRYPTED CONNECTIONS. You will not be \
             able to connect to any nodes configured to use encrypted connections"
        );
        None
    } else {
        Some(Security::Noise)
    };

    let mut muxers = vec![Muxer::Yamux];
    if cfg.get_opt("mplex") {
        muxers.push(Muxer::Mplex);
    }

    HostParams {
        peer_id,
        peerstore,
        security,
        muxers,
        pubsub: cfg.get_opt("pubsub") || cfg.get_opt("ipnsps"),
        ipns_pubsub: cfg.get_opt("ipnsps"),
    }
}

fn bootstrap_peers(repo_config: &RepoConfig) -> Vec<PeerInfo> {
    repo_config
        .bootstrap
        .iter()
        .filter_map(|addr| match PeerInfo::from_multiaddr(addr) {
            Ok(peer) => Some(peer),
            Err(e) => {
                warn!("Ignoring bootstrap address: {e:#}");
                None
            },
        })
        .collect()
}
