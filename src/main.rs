// src/main.rs

mod api;
mod cert;
mod config;
mod kubeconfig;
mod manifests;
mod phases;
mod types;
mod utils;

use api::defaults::{DEFAULT_CERTIFICATES_DIR, DEFAULT_KUBERNETES_DIR};
use api::scheme::InternalDocument;
use api::{new_registry, Registry};
use clap::{Parser, Subcommand, ValueEnum};
use config::loader::InitOverrides;
use config::NoClusterSource;
use phases::init::{init_workflow, InitData};
use phases::join::{join_workflow, JoinData};
use std::path::{Path, PathBuf};
use std::process;
use types::emit_warnings;
use utils::logging::{FileLogger, Logger, MultiLogger, StdoutLogger};

#[derive(Parser)]
#[command(
    name = "k8s-bootstrap",
    version,
    about = "Bootstrap and maintain the control plane of a Kubernetes cluster"
)]
struct Cli {
    /// Print debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Also append output to this file
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Warn when a reused certificate has fewer than this many days left
    #[arg(long, global = true)]
    expiry_warning_days: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set up a control plane node
    Init(InitArgs),
    /// Join this node to an existing cluster
    Join(JoinArgs),
    /// Certificate maintenance
    Certs {
        #[command(subcommand)]
        command: CertsCommand,
    },
    /// Print or migrate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Bootstrap token helpers
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[derive(Parser)]
struct InitArgs {
    /// Path to a kubeadm-style configuration file
    #[arg(long)]
    config: Option<String>,
    /// Directory where certificates are stored
    #[arg(long)]
    cert_dir: Option<String>,
    #[arg(long, default_value = DEFAULT_KUBERNETES_DIR)]
    kubernetes_dir: String,
    #[arg(long)]
    kubernetes_version: Option<String>,
    /// Address the API server advertises on
    #[arg(long)]
    advertise_address: Option<String>,
    #[arg(long)]
    bind_port: Option<u16>,
    /// Pod network CIDR, enables node CIDR allocation
    #[arg(long)]
    pod_network_cidr: Option<String>,
    #[arg(long)]
    service_cidr: Option<String>,
    #[arg(long)]
    service_dns_domain: Option<String>,
    #[arg(long)]
    node_name: Option<String>,
    /// Stable endpoint (host or host:port) shared by all control plane nodes
    #[arg(long)]
    control_plane_endpoint: Option<String>,
    #[arg(long)]
    image_repository: Option<String>,
    /// Write everything to a staging directory and leave the host alone
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    phase: Option<InitPhase>,
}

#[derive(Subcommand)]
enum InitPhase {
    /// Run a single phase of the init workflow
    Phase { name: String },
}

#[derive(Parser)]
struct JoinArgs {
    /// API server endpoint of the cluster to join, as host:port
    endpoint: Option<String>,
    #[arg(long)]
    config: Option<String>,
    /// Bootstrap token for discovery and TLS bootstrap
    #[arg(long)]
    token: Option<String>,
    /// Pin of the cluster CA public key, may repeat
    #[arg(long = "discovery-token-ca-cert-hash")]
    discovery_token_ca_cert_hash: Vec<String>,
    /// Trust the API server without verifying its CA
    #[arg(long)]
    discovery_token_unsafe_skip_ca_verification: bool,
    #[arg(long)]
    node_name: Option<String>,
    #[arg(long, default_value = DEFAULT_KUBERNETES_DIR)]
    kubernetes_dir: String,
}

#[derive(Subcommand)]
enum CertsCommand {
    /// Report when each certificate in the PKI directory expires
    CheckExpiration {
        #[arg(long, default_value = DEFAULT_CERTIFICATES_DIR)]
        cert_dir: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the fully defaulted init configuration at the preferred version
    Print {
        /// Start from this configuration file instead of compiled-in defaults
        #[arg(long)]
        config: Option<String>,
    },
    /// Re-encode an old configuration file at the preferred version
    Migrate {
        #[arg(long)]
        old_config: String,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Generate a random bootstrap token
    Generate,
}

fn build_logger(debug: bool, log_file: Option<&str>) -> std::io::Result<Box<dyn Logger>> {
    match log_file {
        Some(path) => Ok(Box::new(MultiLogger::new(vec![
            Box::new(StdoutLogger::new(debug)),
            Box::new(FileLogger::new(path, debug)?),
        ]))),
        None => Ok(Box::new(StdoutLogger::new(debug))),
    }
}

fn main() {
    let cli = Cli::parse();
    let mut logger = match build_logger(cli.debug, cli.log_file.as_deref()) {
        Ok(logger) => logger,
        Err(error) => {
            eprintln!("error: cannot open log file: {}", error);
            process::exit(1);
        }
    };
    if let Err(error) = run(cli, logger.as_mut()) {
        eprintln!("error: {}", error);
        process::exit(1);
    }
}

fn run(cli: Cli, logger: &mut dyn Logger) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(days) = cli.expiry_warning_days {
        config::timeouts::set_active(config::timeouts::Timeouts {
            certificate_expiry_warning_days: days,
            ..Default::default()
        });
    }
    let registry = new_registry();
    match cli.command {
        Command::Init(args) => run_init(args, cli.debug, cli.log_file.as_deref(), registry, logger),
        Command::Join(args) => run_join(args, registry, logger),
        Command::Certs { command } => run_certs(command),
        Command::Config { command } => run_config(command, &registry),
        Command::Token { command } => match command {
            TokenCommand::Generate => {
                println!("{}", phases::token::generate_bootstrap_token()?);
                Ok(())
            }
        },
    }
}

fn run_init(
    args: InitArgs,
    debug: bool,
    log_file: Option<&str>,
    registry: Registry,
    logger: &mut dyn Logger,
) -> Result<(), Box<dyn std::error::Error>> {
    let overrides = InitOverrides {
        kubernetes_version: args.kubernetes_version,
        advertise_address: args.advertise_address,
        bind_port: args.bind_port,
        service_subnet: args.service_cidr,
        pod_subnet: args.pod_network_cidr,
        dns_domain: args.service_dns_domain,
        node_name: args.node_name,
        certificates_dir: args.cert_dir,
        control_plane_endpoint: args.control_plane_endpoint,
        image_repository: args.image_repository,
    };

    let loaded = config::load_init_configuration(
        args.config.as_deref(),
        &overrides,
        &NoClusterSource,
        &registry,
    )?;
    emit_warnings(&loaded.warnings, logger);

    let mut data = InitData::new(
        loaded.config,
        args.kubernetes_dir,
        args.dry_run,
        registry,
        build_logger(debug, log_file)?,
    )?;
    if args.dry_run {
        logger.log(&format!(
            "[dry-run] Writing everything under {}",
            data.write_root.display()
        ));
    }

    let mut workflow = init_workflow()?;
    match args.phase {
        Some(InitPhase::Phase { name }) => workflow.run_one(&name, &mut data, logger)?,
        None => {
            workflow.run_all(&mut data, logger)?;
            logger.log("Your Kubernetes control plane has initialized successfully!");
        }
    }
    write_component_configs(&loaded.component_configs, &data, logger)?;
    Ok(())
}

/// Component configs ride along with the init config; persist them next to
/// the other rendered documents so a later uploader can apply them.
fn write_component_configs(
    components: &[config::ComponentConfig],
    data: &InitData,
    logger: &mut dyn Logger,
) -> Result<(), Box<dyn std::error::Error>> {
    for component in components {
        let dir = data.write_root.join("setup");
        std::fs::create_dir_all(&dir)?;
        let name = format!("{}.yaml", component.kind().to_lowercase());
        std::fs::write(dir.join(&name), component.marshal()?)?;
        logger.log(&format!("[init] Rendered setup/{}", name));
    }
    Ok(())
}

fn run_join(
    args: JoinArgs,
    registry: Registry,
    logger: &mut dyn Logger,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut cfg, mut warnings) = config::load_join_configuration(args.config.as_deref(), &registry)?;

    if let Some(endpoint) = args.endpoint {
        cfg.discovery.api_server_endpoint = endpoint;
    }
    if let Some(token) = args.token {
        cfg.discovery.token = token;
    }
    if !args.discovery_token_ca_cert_hash.is_empty() {
        cfg.discovery.ca_cert_hashes = args.discovery_token_ca_cert_hash;
    }
    if args.discovery_token_unsafe_skip_ca_verification {
        cfg.discovery.unsafe_skip_ca_verification = true;
    }
    if let Some(name) = args.node_name {
        cfg.node_registration.name = name;
    }
    api::defaults::apply_join_defaults(&mut cfg, &mut warnings);
    emit_warnings(&warnings, logger);

    let mut data = JoinData {
        cfg,
        kubernetes_dir: PathBuf::from(args.kubernetes_dir),
        logger: Box::new(StdoutLogger::new(false)),
    };
    join_workflow()?.run_all(&mut data, logger)?;
    logger.log("This node is ready to bootstrap against the cluster.");
    Ok(())
}

fn run_certs(command: CertsCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        CertsCommand::CheckExpiration { cert_dir, output } => {
            let report = cert::verification::check_expiration(Path::new(&cert_dir))?;
            match output {
                OutputFormat::Text => {
                    print!("{}", cert::verification::format_expiration_table(&report))
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            Ok(())
        }
    }
}

fn run_config(command: ConfigCommand, registry: &Registry) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ConfigCommand::Print { config } => {
            let loaded = config::load_init_configuration(
                config.as_deref(),
                &InitOverrides::default(),
                &NoClusterSource,
                registry,
            )?;
            let mut logger = StdoutLogger::new(false);
            emit_warnings(&loaded.warnings, &mut logger);
            print!("{}", registry.encode_init_configuration(&loaded.config)?);
            println!("---");
            print!(
                "{}",
                registry.encode_cluster_configuration(&loaded.config.cluster)?
            );
            Ok(())
        }
        ConfigCommand::Migrate { old_config } => {
            let contents = std::fs::read_to_string(&old_config)?;
            let mut rendered = Vec::new();
            for (gvk, value) in config::loader::split_documents(&contents)? {
                // Non-kubeadm documents (component configs) are carried
                // through as-is; only kubeadm kinds get re-encoded.
                if gvk.group != api::scheme::KUBEADM_GROUP {
                    rendered.push(serde_yaml::to_string(&value)?);
                    continue;
                }
                let (document, warnings) = registry.decode(value)?;
                let mut logger = StdoutLogger::new(false);
                emit_warnings(&warnings, &mut logger);
                match document {
                    InternalDocument::Init(init) => {
                        rendered.push(registry.encode_init_configuration(&init)?);
                        rendered.push(registry.encode_cluster_configuration(&init.cluster)?);
                    }
                    InternalDocument::Cluster(cluster) => {
                        rendered.push(registry.encode_cluster_configuration(&cluster)?);
                    }
                    InternalDocument::Join(join) => {
                        rendered.push(registry.encode_join_configuration(&join)?);
                    }
                }
            }
            print!("{}", rendered.join("---\n"));
            Ok(())
        }
    }
}
