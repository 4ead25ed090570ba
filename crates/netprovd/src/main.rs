// # netprovd - netprov Command-Line Daemon
//
// Thin integration layer over netprov-core. It is responsible for:
// 1. Reading configuration (JSON file plus environment variables)
// 2. Registering device backends and repositories
// 3. Running one request against one router or contract
// 4. Printing the JSON result on stdout
//
// Reconciliation, provisioning and retry decisions all live in netprov-core.
// Logs go to stderr so stdout stays machine-readable.
//
// ## Configuration
//
// - `NETPROV_CONFIG`: Path to a JSON `CoreConfig` file (optional)
// - `NETPROV_STORE_PATH`: JSON record store; overrides the file's repository
// - `NETPROV_ENCRYPTION_KEY`: Hex AES-256 key for stored router passwords
// - `NETPROV_PRIMARY_BACKEND`: `api` or `rest`; the other one becomes the fallback
// - `NETPROV_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export NETPROV_STORE_PATH=/var/lib/netprov/records.json
// export NETPROV_ENCRYPTION_KEY=$(cat /etc/netprov/key.hex)
//
// netprovd sync --router 3
// netprovd activate 42
// echo -n 'router-password' | netprovd seal-password
// ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use netprov_core::credentials::AesGcmCipher;
use netprov_core::upsert::Upserted;
use netprov_core::{
    BackendConfig, BackendRegistry, CoreConfig, ProvisioningEngine, Repository, RepositoryConfig, RouterLocks,
    SessionOpener, SyncEngine,
};
use serde_json::{Value, json};
use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes
///
/// - 0: Request completed
/// - 1: Configuration or startup error
/// - 2: Request failed (or completed only partially)
#[derive(Debug, Clone, Copy)]
enum NetprovExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<NetprovExitCode> for ExitCode {
    fn from(code: NetprovExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Parser)]
#[command(name = "netprovd", version, about = "Router reconciliation and subscriber provisioning")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile device objects into the records of one router
    Sync {
        #[arg(long)]
        router: i64,
        #[arg(long, value_enum, default_value_t = SyncKind::All)]
        kind: SyncKind,
    },
    /// Activate a pending contract
    Activate { contract: i64 },
    /// Force an active contract's session to restart
    Reset { contract: i64 },
    /// Remove a contract's device objects and then the contract
    Delete { contract: i64 },
    /// Push an address pool record to its router
    PublishPool { pool: i64 },
    /// Push a PPP profile record to its router
    PublishProfile { profile: i64 },
    /// Push a PPPoE server record to its router
    PublishPppoe {
        server: i64,
        /// Permit a server on an interface detected as the uplink
        #[arg(long)]
        allow_uplink: bool,
    },
    /// Push a DHCP server record and its networks to its router
    PublishDhcp {
        server: i64,
        #[arg(long)]
        allow_uplink: bool,
    },
    /// Encrypt a router password read from stdin for storage
    SealPassword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SyncKind {
    Pools,
    Profiles,
    Pppoe,
    Dhcp,
    All,
}

/// Environment settings
#[derive(Debug, Default)]
struct Settings {
    config_path: Option<PathBuf>,
    store_path: Option<String>,
    encryption_key: Option<String>,
    primary_backend: Option<String>,
    log_level: String,
}

impl Settings {
    fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            config_path: non_empty("NETPROV_CONFIG").map(PathBuf::from),
            store_path: non_empty("NETPROV_STORE_PATH"),
            encryption_key: non_empty("NETPROV_ENCRYPTION_KEY"),
            primary_backend: non_empty("NETPROV_PRIMARY_BACKEND"),
            log_level: non_empty("NETPROV_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NETPROV_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        if let Some(backend) = &self.primary_backend
            && !matches!(backend.as_str(), "api" | "rest")
        {
            anyhow::bail!(
                "NETPROV_PRIMARY_BACKEND '{}' is not supported. Supported backends: api, rest",
                backend
            );
        }

        if let Some(path) = &self.store_path
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "NETPROV_STORE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        Ok(())
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Config file (or defaults) with environment overrides applied
    fn load(&self) -> Result<CoreConfig> {
        let mut config = match &self.config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Cannot read config file {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => CoreConfig::default(),
        };

        if let Some(path) = &self.store_path {
            config.repository = RepositoryConfig::File { path: path.clone() };
        }
        if let Some(key) = &self.encryption_key {
            config.device.encryption_key = Some(key.clone());
        }
        if let Some(wanted) = self.primary_backend.as_deref()
            && config.device.primary.type_name() != wanted
        {
            // Promote the configured fallback when it is the wanted backend
            let promoted = config
                .device
                .fallback
                .take()
                .filter(|fallback| fallback.type_name() == wanted)
                .unwrap_or_else(|| default_backend(wanted));
            config.device.fallback = Some(std::mem::replace(&mut config.device.primary, promoted));
        }

        config.validate()?;
        Ok(config)
    }
}

fn default_backend(name: &str) -> BackendConfig {
    match name {
        "rest" => BackendConfig::Rest {
            port: None,
            use_tls: true,
            accept_invalid_certs: false,
            timeout_secs: 10,
        },
        _ => BackendConfig::Api {
            port: None,
            timeout_secs: 10,
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = Settings::from_env();
    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {}", e);
        return NetprovExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(settings.log_level())
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NetprovExitCode::ConfigError.into();
    }

    let config = match settings.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return NetprovExitCode::ConfigError.into();
        }
    };

    if let Command::SealPassword = cli.command {
        return seal_password(&config).into();
    }

    if matches!(config.repository, RepositoryConfig::Memory) {
        warn!("Using the in-memory repository; records are not persisted");
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NetprovExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run(config, cli.command).await {
            Ok(outcome) => {
                println!("{}", outcome.output);
                if outcome.complete {
                    NetprovExitCode::Success
                } else {
                    warn!("Request completed partially");
                    NetprovExitCode::RuntimeError
                }
            }
            Err(e) => {
                error!("Request failed: {:#}", e);
                println!("{}", json!({ "error": format!("{:#}", e) }));
                NetprovExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Printed result of one request
struct Outcome {
    output: Value,
    complete: bool,
}

impl Outcome {
    fn complete(output: Value) -> Self {
        Self { output, complete: true }
    }
}

/// Registry with every backend compiled into this binary
fn registry() -> BackendRegistry {
    let registry = BackendRegistry::with_builtin_repositories();

    #[cfg(feature = "api")]
    {
        info!("Registering RouterOS API backend");
        netprov_routeros_api::register(&registry);
    }

    #[cfg(feature = "rest")]
    {
        info!("Registering RouterOS REST backend");
        netprov_routeros_rest::register(&registry);
    }

    registry
}

async fn run(config: CoreConfig, command: Command) -> Result<Outcome> {
    let registry = registry();
    let repository: Arc<dyn Repository> = Arc::from(registry.create_repository(&config.repository).await?);
    let opener = SessionOpener::from_config(&registry, &config.device)?;
    let locks = Arc::new(RouterLocks::new());

    let sync = || {
        SyncEngine::new(Arc::clone(&repository), opener.clone(), config.sync.clone()).with_locks(Arc::clone(&locks))
    };
    let provisioning = || {
        ProvisioningEngine::new(Arc::clone(&repository), opener.clone(), config.provisioning.clone())
            .with_locks(Arc::clone(&locks))
    };

    let outcome = match command {
        Command::Sync { router, kind } => {
            let engine = sync();
            match kind {
                SyncKind::All => {
                    let report = engine.sync_all(router).await?;
                    let complete = report.is_complete();
                    Outcome {
                        output: serde_json::to_value(&report)?,
                        complete,
                    }
                }
                SyncKind::Pools => Outcome::complete(serde_json::to_value(engine.sync_pools(router).await?)?),
                SyncKind::Profiles => Outcome::complete(serde_json::to_value(engine.sync_profiles(router).await?)?),
                SyncKind::Pppoe => {
                    Outcome::complete(serde_json::to_value(engine.sync_pppoe_servers(router).await?)?)
                }
                SyncKind::Dhcp => Outcome::complete(serde_json::to_value(engine.sync_dhcp_servers(router).await?)?),
            }
        }
        Command::Activate { contract } => {
            Outcome::complete(serde_json::to_value(provisioning().activate(contract).await?)?)
        }
        Command::Reset { contract } => {
            Outcome::complete(serde_json::to_value(provisioning().reset_connection(contract).await?)?)
        }
        Command::Delete { contract } => {
            let report = provisioning().delete_contract(contract).await?;
            let complete = report.failures.is_empty();
            Outcome {
                output: serde_json::to_value(&report)?,
                complete,
            }
        }
        Command::PublishPool { pool } => Outcome::complete(upserted_json(&sync().publish_pool(pool).await?)),
        Command::PublishProfile { profile } => {
            Outcome::complete(upserted_json(&sync().publish_profile(profile).await?))
        }
        Command::PublishPppoe { server, allow_uplink } => {
            Outcome::complete(upserted_json(&sync().publish_pppoe_server(server, allow_uplink).await?))
        }
        Command::PublishDhcp { server, allow_uplink } => {
            let publication = sync().publish_dhcp_server(server, allow_uplink).await?;
            Outcome::complete(json!({
                "server": upserted_json(&publication.server),
                "networks": publication.networks.iter().map(upserted_json).collect::<Vec<_>>(),
            }))
        }
        Command::SealPassword => anyhow::bail!("seal-password does not contact routers"),
    };
    Ok(outcome)
}

fn upserted_json(upserted: &Upserted) -> Value {
    json!({
        "id": upserted.object.id,
        "action": upserted.action,
        "degraded": upserted.degraded,
    })
}

fn seal_password(config: &CoreConfig) -> NetprovExitCode {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("Failed to read password from stdin: {}", e);
        return NetprovExitCode::RuntimeError;
    }
    match seal(config, input.trim_end_matches(['\r', '\n'])) {
        Ok(sealed) => {
            println!("{}", sealed);
            NetprovExitCode::Success
        }
        Err(e) => {
            eprintln!("Cannot seal password: {:#}", e);
            NetprovExitCode::ConfigError
        }
    }
}

fn seal(config: &CoreConfig, password: &str) -> Result<String> {
    let key = config
        .device
        .encryption_key
        .as_deref()
        .context("NETPROV_ENCRYPTION_KEY is required to seal passwords")?;
    if password.is_empty() {
        anyhow::bail!("Password on stdin is empty");
    }
    Ok(AesGcmCipher::new(key)?.encrypt(password)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netprov_core::credentials::PasswordCipher;
    use std::collections::HashMap;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn cli_parses_commands() {
        let cli = Cli::try_parse_from(["netprovd", "sync", "--router", "3", "--kind", "pppoe"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Sync {
                router: 3,
                kind: SyncKind::Pppoe
            }
        ));

        let cli = Cli::try_parse_from(["netprovd", "sync", "--router", "3"]).unwrap();
        assert!(matches!(cli.command, Command::Sync { kind: SyncKind::All, .. }));

        let cli = Cli::try_parse_from(["netprovd", "publish-pppoe", "5", "--allow-uplink"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::PublishPppoe {
                server: 5,
                allow_uplink: true
            }
        ));

        assert!(Cli::try_parse_from(["netprovd", "activate"]).is_err());
    }

    #[test]
    fn defaults_without_environment() {
        let settings = settings(&[]);
        settings.validate().unwrap();
        assert_eq!(settings.log_level(), Level::INFO);

        let config = settings.load().unwrap();
        assert!(matches!(config.repository, RepositoryConfig::Memory));
        assert_eq!(config.device.primary.type_name(), "api");
    }

    #[test]
    fn environment_overrides_apply() {
        let config = settings(&[
            ("NETPROV_STORE_PATH", "records.json"),
            ("NETPROV_ENCRYPTION_KEY", KEY),
            ("NETPROV_PRIMARY_BACKEND", "rest"),
        ])
        .load()
        .unwrap();

        assert!(matches!(config.repository, RepositoryConfig::File { ref path } if path == "records.json"));
        assert_eq!(config.device.encryption_key.as_deref(), Some(KEY));
        assert_eq!(config.device.primary.type_name(), "rest");
        assert_eq!(config.device.fallback.as_ref().map(|b| b.type_name()), Some("api"));
    }

    #[test]
    fn primary_backend_swaps_with_configured_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netprov.json");
        std::fs::write(
            &path,
            r#"{ "device": {
                "primary": { "type": "api" },
                "fallback": { "type": "rest", "port": 8443, "accept_invalid_certs": true }
            } }"#,
        )
        .unwrap();

        let config = settings(&[
            ("NETPROV_CONFIG", path.to_str().unwrap()),
            ("NETPROV_PRIMARY_BACKEND", "rest"),
        ])
        .load()
        .unwrap();
        assert_eq!(config.device.primary.port(), Some(8443));
        assert_eq!(config.device.fallback.as_ref().map(|b| b.type_name()), Some("api"));

        let unchanged = settings(&[("NETPROV_PRIMARY_BACKEND", "api")]).load().unwrap();
        assert_eq!(unchanged.device.primary.type_name(), "api");
        assert_eq!(unchanged.device.fallback.as_ref().map(|b| b.type_name()), Some("rest"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(settings(&[("NETPROV_LOG_LEVEL", "verbose")]).validate().is_err());
        assert!(settings(&[("NETPROV_PRIMARY_BACKEND", "ssh")]).validate().is_err());
        assert!(
            settings(&[("NETPROV_STORE_PATH", "/nonexistent/netprov/records.json")])
                .validate()
                .is_err()
        );
        assert!(settings(&[("NETPROV_ENCRYPTION_KEY", "abcd")]).load().is_err());
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netprov.json");
        std::fs::write(
            &path,
            r#"{
                "device": { "primary": { "type": "api", "port": 18728 }, "connect_both": true },
                "provisioning": { "password_length": 16 }
            }"#,
        )
        .unwrap();

        let config = settings(&[("NETPROV_CONFIG", path.to_str().unwrap())]).load().unwrap();
        assert_eq!(config.device.primary.port(), Some(18728));
        assert!(config.device.connect_both);
        assert!(config.device.fallback.is_none());
        assert_eq!(config.provisioning.password_length, 16);
    }

    #[test]
    fn sealed_password_decrypts_with_the_same_key() {
        let config = settings(&[("NETPROV_ENCRYPTION_KEY", KEY)]).load().unwrap();
        let sealed = seal(&config, "router-password").unwrap();
        assert_ne!(sealed, "router-password");

        let cipher = AesGcmCipher::new(KEY).unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "router-password");
    }

    #[test]
    fn sealing_requires_a_key() {
        assert!(seal(&CoreConfig::default(), "router-password").is_err());
    }
}
