use std::{
    env,
    error::Error,
    process,
    sync::{Arc, mpsc},
};

use tracing::info;
use tracing_subscriber::EnvFilter;

use gilliam_scheduler::{
    bootstrap::Bootstrap,
    cli::{Cli, Commands, parse_args},
    clock::{Clock, SystemClock},
    config::load_manifest,
    constants::{
        DEFAULT_FORMATION, ENV_FORMATION, ENV_SERVICE_REGISTRY, LEADER_LOCK, STORE_PORT,
        store_endpoint,
    },
    executor::{ExecutorManager, HttpExecutorManager},
    lock::LeaderLock,
    model::mint_short_id,
    registry::{HttpServiceRegistry, ServiceRegistry},
    scheduler::{Scheduler, Terminator, Updater},
    store::{EtcdKvStore, InstanceStore, KvStore},
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    if let Err(err) = run(args) {
        eprintln!("gsched: {err}");
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    let formation = args
        .formation
        .clone()
        .or_else(|| env::var(ENV_FORMATION).ok())
        .unwrap_or_else(|| DEFAULT_FORMATION.to_string());
    let registry_endpoints = args
        .service_registry
        .clone()
        .or_else(|| env::var(ENV_SERVICE_REGISTRY).ok())
        .unwrap_or_default();

    match args.command {
        Commands::Check { manifest } => {
            let manifest = load_manifest(Some(&manifest))?;
            println!("manifest OK: {} services", manifest.services.len());
            for (service, template) in &manifest.services {
                let ports = template
                    .ports
                    .as_ref()
                    .map(|ports| format!(" ports {ports:?}"))
                    .unwrap_or_default();
                println!("  {service}: {}{ports}", template.image);
            }
            Ok(())
        }

        Commands::Bootstrap { manifest } => {
            let manifest = load_manifest(Some(&manifest))?;
            let registry: Arc<dyn ServiceRegistry> =
                Arc::new(HttpServiceRegistry::from_endpoints(&registry_endpoints));

            let mut manager = HttpExecutorManager::new(Arc::clone(&registry));
            manager.start();
            let manager: Arc<dyn ExecutorManager> = Arc::new(manager);

            let kv: Arc<dyn KvStore> = Arc::new(EtcdKvStore::new(&format!(
                "{}:{STORE_PORT}",
                store_endpoint(&formation)
            )));

            info!("bootstrapping formation '{formation}'");
            Bootstrap::new(registry, manager, kv, &formation).run(manifest)?;
            Ok(())
        }

        Commands::Run { holder } => {
            let registry: Arc<dyn ServiceRegistry> =
                Arc::new(HttpServiceRegistry::from_endpoints(&registry_endpoints));

            let mut manager = HttpExecutorManager::new(Arc::clone(&registry));
            manager.start();
            let manager: Arc<dyn ExecutorManager> = Arc::new(manager);

            let kv: Arc<dyn KvStore> = Arc::new(EtcdKvStore::new(&format!(
                "{}:{STORE_PORT}",
                store_endpoint(&formation)
            )));

            let holder =
                holder.unwrap_or_else(|| format!("scheduler-{}", mint_short_id(&formation)));
            info!("acquiring leader lock as '{holder}'");
            let leader = Arc::new(LeaderLock::acquire(Arc::clone(&kv), LEADER_LOCK, &holder)?);

            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let instances = Arc::new(InstanceStore::new(Arc::clone(&kv), &formation));

            let scheduler = Scheduler::new(
                Arc::clone(&clock),
                Arc::clone(&instances),
                Arc::clone(&manager),
                Arc::clone(&leader),
            )
            .spawn();
            let updater = Updater::new(
                Arc::clone(&clock),
                Arc::clone(&instances),
                Arc::clone(&manager),
                Arc::clone(&leader),
            )
            .spawn();
            let terminator = Terminator::new(
                clock,
                instances,
                Arc::clone(&manager),
                Arc::clone(&leader),
            )
            .spawn();

            info!("control loops running for formation '{formation}'");

            let (tx, rx) = mpsc::channel();
            ctrlc::set_handler(move || {
                let _ = tx.send(());
            })?;
            rx.recv()?;

            info!("shutting down control loops");
            scheduler.stop();
            updater.stop();
            terminator.stop();
            drop(leader);
            Ok(())
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
