//! §6 CLI surface. Administrative subcommands (`user`, `file`, `versions`
//! when no `--server` is given) talk to the embedded database directly;
//! `sync`/`syncdir` and any subcommand given `--server` go over the wire
//! protocol instead, via [`crate::client::ApiClient`].

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use regex::Regex;

use crate::client::ApiClient;
use crate::config::Config;
use crate::crypto;
use crate::db::{self, files, models::UserStats, users, DbPool};
use crate::localcache::{self, CachedFile, LocalCache};
use crate::reconciler;
use crate::walker;

#[derive(Parser)]
#[command(name = "coldstore")]
#[command(about = "Multi-user, versioned, chunked, zero-knowledge file sync", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Base URL of a running `coldstore serve` instance. When set, `user`,
    /// `file`, and `versions` subcommands go over HTTP instead of touching
    /// the local database directly.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Login name for `--server` mode.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Login password for `--server` mode. Prompted for if omitted.
    #[arg(long, global = true)]
    pub password: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage user accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Inspect or remove files in the catalog.
    File {
        #[command(subcommand)]
        action: FileAction,
    },
    /// Inspect or remove file versions.
    Versions {
        #[command(subcommand)]
        action: VersionsAction,
    },
    /// Reconcile one local path against one remote name.
    Sync {
        /// Sync this specific version number instead of the current one.
        #[arg(long)]
        version: Option<i64>,
        /// Re-verify every present chunk's hash even when the file looks unchanged.
        #[arg(long)]
        extra_strict: bool,
        local: PathBuf,
        remote: String,
    },
    /// Reconcile every file under a local directory against a remote prefix.
    Syncdir {
        #[arg(long)]
        extra_strict: bool,
        local: PathBuf,
        remote: String,
    },
    /// Run the HTTP server.
    Serve {
        /// Override the configured bind address.
        addr: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserAction {
    Add {
        name: String,
        password: String,
        #[arg(long, default_value_t = 1_000_000_000)]
        quota: i64,
    },
    Rm {
        name: String,
    },
    Mod {
        name: String,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
        #[arg(long)]
        quota: Option<i64>,
    },
    Stats {
        name: String,
    },
    /// Set (or rotate) the crypto passphrase's verifier for a user.
    Cryptopass {
        name: String,
        passphrase: String,
    },
}

#[derive(Subcommand)]
pub enum FileAction {
    Ls {
        /// Only list names matching this regular expression.
        #[arg(long)]
        regex: Option<String>,
    },
    Rm {
        name_or_regex: String,
        #[arg(long)]
        regex: bool,
        /// Print what would be removed without removing it.
        #[arg(long)]
        dryrun: bool,
    },
}

#[derive(Subcommand)]
pub enum VersionsAction {
    Ls {
        name: String,
    },
    Rm {
        min: i64,
        max: i64,
        name: String,
    },
}

async fn local_pool(config: &Config) -> anyhow::Result<DbPool> {
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    Ok(pool)
}

fn require_user(cli: &Cli) -> anyhow::Result<&str> {
    cli.user
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--user is required in --server mode"))
}

/// Log in to `--server` and return the client alongside the login response,
/// which carries `login-salt` (public, needed to derive the crypto key).
async fn login(cli: &Cli) -> anyhow::Result<(ApiClient, crate::client::LoginResponse)> {
    let server = cli.server.as_ref().expect("called only when --server is set");
    let user = require_user(cli)?;
    let password = match &cli.password {
        Some(p) => p.clone(),
        None => rpassword::prompt_password(format!("password for {user}: "))?,
    };
    let mut client = ApiClient::new(server);
    let resp = client.login(user, &password).await?;
    Ok((client, resp))
}

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match &cli.command {
        Commands::User { action } => run_user(&cli, &config, action).await,
        Commands::File { action } => run_file(&cli, &config, action).await,
        Commands::Versions { action } => run_versions(&cli, &config, action).await,
        Commands::Sync { version, extra_strict, local, remote } => {
            run_sync(&cli, &config, *version, *extra_strict, local, remote).await
        }
        Commands::Syncdir { extra_strict, local, remote } => {
            run_syncdir(&cli, &config, *extra_strict, local, remote).await
        }
        Commands::Serve { addr } => run_serve(config, addr.clone()).await,
    }
}

async fn run_user(cli: &Cli, config: &Config, action: &UserAction) -> anyhow::Result<()> {
    if cli.server.is_some() {
        anyhow::bail!("user administration requires direct database access; omit --server");
    }
    let pool = local_pool(config).await?;
    match action {
        UserAction::Add { name, password, quota } => {
            let salt = crypto::generate_login_salt();
            let verifier = crypto::hash_login_password(password, &salt)?;
            let user = users::add_user(&pool, name, &salt, &verifier, *quota).await?;
            println!("created user {} (id {})", user.name, user.id);
        }
        UserAction::Rm { name } => {
            users::remove_user(&pool, name).await?;
            println!("removed user {name}");
        }
        UserAction::Mod { name, new_name, new_password, quota } => {
            let user = users::get_user(&pool, name).await?;
            let new_login_verifier = match new_password {
                Some(p) => Some(crypto::hash_login_password(p, &user.login_salt)?),
                None => None,
            };
            users::update_user(
                &pool,
                user.id,
                users::UserUpdate {
                    new_name: new_name.clone(),
                    new_login_salt: None,
                    new_login_verifier,
                    new_crypto_verifier: None,
                    new_quota: *quota,
                },
            )
            .await?;
            println!("updated user {name}");
        }
        UserAction::Stats { name } => {
            let user = users::get_user(&pool, name).await?;
            let stats: UserStats = users::get_user_stats(&pool, user.id).await?;
            println!(
                "{name}: allocated {}/{} bytes, revision {}",
                stats.allocated, stats.quota, stats.revision
            );
        }
        UserAction::Cryptopass { name, passphrase } => {
            let user = users::get_user(&pool, name).await?;
            let key = crypto::derive_crypto_key(passphrase, &user.login_salt);
            users::set_user_crypto_verifier(&pool, user.id, &key.verifier()).await?;
            println!("crypto passphrase set for {name}");
        }
    }
    Ok(())
}

async fn run_file(cli: &Cli, config: &Config, action: &FileAction) -> anyhow::Result<()> {
    if cli.server.is_some() {
        let (client, resp) = login(cli).await?;
        let passphrase = rpassword::prompt_password("crypto passphrase: ")?;
        let key = derive_and_verify_server_key(&client, &resp, &passphrase).await?;
        let all: Vec<(String, crate::client::RemoteFileInfo)> = client
            .list_files()
            .await?
            .into_iter()
            .filter_map(|f| key.decrypt_name(&f.name).ok().map(|name| (name, f)))
            .collect();
        match action {
            FileAction::Ls { regex } => {
                let re = regex.as_deref().map(Regex::new).transpose()?;
                for (name, _) in all {
                    if re.as_ref().map(|r| r.is_match(&name)).unwrap_or(true) {
                        println!("{name}");
                    }
                }
            }
            FileAction::Rm { name_or_regex, regex, dryrun } => {
                let matches: Vec<_> = if *regex {
                    let re = Regex::new(name_or_regex)?;
                    all.into_iter().filter(|(name, _)| re.is_match(name)).collect()
                } else {
                    all.into_iter().filter(|(name, _)| name == name_or_regex).collect()
                };
                for (name, f) in matches {
                    if *dryrun {
                        println!("would remove {name}");
                    } else {
                        client.remove_file(f.id).await?;
                        println!("removed {name}");
                    }
                }
            }
        }
        return Ok(());
    }

    let pool = local_pool(config).await?;
    let user = require_user(cli)?;
    let db_user = users::get_user(&pool, user).await?;
    let passphrase = rpassword::prompt_password("crypto passphrase: ")?;
    let key = derive_and_verify_local_key(&pool, &db_user, &passphrase).await?;
    let all: Vec<(String, db::models::FileInfo)> = files::get_all_user_file_infos(&pool, db_user.id)
        .await?
        .into_iter()
        .filter_map(|f| key.decrypt_name(&f.name).ok().map(|name| (name, f)))
        .collect();
    match action {
        FileAction::Ls { regex } => {
            let re = regex.as_deref().map(Regex::new).transpose()?;
            for (name, _) in all {
                if re.as_ref().map(|r| r.is_match(&name)).unwrap_or(true) {
                    println!("{name}");
                }
            }
        }
        FileAction::Rm { name_or_regex, regex, dryrun } => {
            let matches: Vec<_> = if *regex {
                let re = Regex::new(name_or_regex)?;
                all.into_iter().filter(|(name, _)| re.is_match(name)).collect()
            } else {
                all.into_iter().filter(|(name, _)| name == name_or_regex).collect()
            };
            for (name, f) in matches {
                if *dryrun {
                    println!("would remove {name}");
                } else {
                    files::remove_file(&pool, db_user.id, f.id).await?;
                    println!("removed {name}");
                }
            }
        }
    }
    Ok(())
}

async fn run_versions(cli: &Cli, config: &Config, action: &VersionsAction) -> anyhow::Result<()> {
    if cli.server.is_some() {
        let (client, resp) = login(cli).await?;
        let passphrase = rpassword::prompt_password("crypto passphrase: ")?;
        let key = derive_and_verify_server_key(&client, &resp, &passphrase).await?;
        match action {
            VersionsAction::Ls { name } => {
                let info = find_remote_file(&client, &key, name).await?;
                for v in client.list_versions(info.id).await? {
                    println!("{}\t{}\t{} bytes", v.version_number, v.file_hash, v.chunk_count);
                }
            }
            VersionsAction::Rm { min, max, name } => {
                let info = find_remote_file(&client, &key, name).await?;
                client.delete_versions(info.id, *min, *max).await?;
                println!("removed versions {min}..={max} of {name}");
            }
        }
        return Ok(());
    }

    let pool = local_pool(config).await?;
    let user = require_user(cli)?;
    let db_user = users::get_user(&pool, user).await?;
    let passphrase = rpassword::prompt_password("crypto passphrase: ")?;
    let key = derive_and_verify_local_key(&pool, &db_user, &passphrase).await?;
    match action {
        VersionsAction::Ls { name } => {
            let info = find_local_file(&pool, &key, db_user.id, name).await?;
            for v in files::get_file_versions(&pool, info.id).await? {
                println!("{}\t{}\t{} bytes", v.version_number, v.file_hash, v.chunk_count);
            }
        }
        VersionsAction::Rm { min, max, name } => {
            let info = find_local_file(&pool, &key, db_user.id, name).await?;
            let current_number = match info.current_version_id {
                Some(id) => files::get_file_version(&pool, id).await?.version_number,
                None => 0,
            };
            files::delete_file_versions(&pool, db_user.id, info.id, *min, *max, current_number).await?;
            println!("removed versions {min}..={max} of {name}");
        }
    }
    Ok(())
}

/// Derive the crypto key from `passphrase` and check it against the
/// account's stored crypto-verifier (§3's lifecycle: the verifier is set
/// once by the client and thereafter used to confirm a re-entered
/// passphrase still decrypts the user's prior data). An empty verifier
/// means none has been set yet, so this bootstraps it instead of failing.
async fn derive_and_verify_server_key(
    client: &ApiClient,
    resp: &crate::client::LoginResponse,
    passphrase: &str,
) -> anyhow::Result<crypto::CryptoKey> {
    let key = crypto::derive_crypto_key(passphrase, &resp.login_salt);
    if resp.crypto_verifier.is_empty() {
        client.set_crypto_hash(&key.verifier()).await?;
    } else if STANDARD.encode(key.verifier()) != resp.crypto_verifier {
        anyhow::bail!("crypto passphrase does not match this account's stored verifier");
    }
    Ok(key)
}

/// Same check as `derive_and_verify_server_key`, against the local catalog's
/// stored verifier instead of a logged-in server's.
async fn derive_and_verify_local_key(
    pool: &DbPool,
    user: &db::models::User,
    passphrase: &str,
) -> anyhow::Result<crypto::CryptoKey> {
    let key = crypto::derive_crypto_key(passphrase, &user.login_salt);
    if user.crypto_verifier.is_empty() {
        users::set_user_crypto_verifier(pool, user.id, &key.verifier()).await?;
    } else if key.verifier() != user.crypto_verifier {
        anyhow::bail!("crypto passphrase does not match this account's stored verifier");
    }
    Ok(key)
}

/// Same randomized-nonce reasoning as `find_remote_file`, against the local
/// catalog instead of the server's.
async fn find_local_file(
    pool: &DbPool,
    key: &crypto::CryptoKey,
    user_id: i64,
    plaintext_name: &str,
) -> anyhow::Result<db::models::FileInfo> {
    for info in files::get_all_user_file_infos(pool, user_id).await? {
        if key.decrypt_name(&info.name).map(|n| n == plaintext_name).unwrap_or(false) {
            return Ok(info);
        }
    }
    anyhow::bail!("no such file: {plaintext_name}")
}

/// Names are encrypted with a randomized nonce, so an exact-ciphertext match
/// against a freshly re-encrypted name can never succeed; every FileInfo must
/// be fetched and its name decrypted instead.
async fn find_remote_file(
    client: &ApiClient,
    key: &crypto::CryptoKey,
    plaintext_name: &str,
) -> anyhow::Result<crate::client::RemoteFileInfo> {
    for info in client.list_files().await? {
        if key.decrypt_name(&info.name).map(|n| n == plaintext_name).unwrap_or(false) {
            return Ok(info);
        }
    }
    anyhow::bail!("no such remote file: {plaintext_name}")
}

/// Open (creating if absent) the on-disk plaintext-name cache for the
/// current `--server`/`--user` pair and refresh it if the server's revision
/// has advanced past what was last seen (Design Notes §9).
async fn open_and_refresh_cache(cli: &Cli, client: &ApiClient, key: &crypto::CryptoKey) -> anyhow::Result<LocalCache> {
    let server = cli.server.as_ref().expect("called only when --server is set");
    let user = require_user(cli)?;
    let cache_path = localcache::default_cache_path(server, user);
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let cache = LocalCache::open(&cache_path)?;
    let stats = client.user_stats().await?;
    if cache.known_revision()?.map(|r| r != stats.revision).unwrap_or(true) {
        let remote_files = client.list_files().await?;
        let cached: Vec<CachedFile> = remote_files
            .iter()
            .filter_map(|f| {
                key.decrypt_name(&f.name).ok().map(|name| CachedFile {
                    plaintext_name: name,
                    file_id: f.id,
                    current_version_id: f.current_version_id,
                })
            })
            .collect();
        cache.refresh(stats.revision, &cached)?;
    }
    Ok(cache)
}

async fn run_sync(
    cli: &Cli,
    config: &Config,
    version: Option<i64>,
    extra_strict: bool,
    local: &PathBuf,
    remote: &str,
) -> anyhow::Result<()> {
    if cli.server.is_none() {
        anyhow::bail!("sync requires --server");
    }
    let (client, resp) = login(cli).await?;
    let passphrase = rpassword::prompt_password("crypto passphrase: ")?;
    let key = derive_and_verify_server_key(&client, &resp, &passphrase).await?;
    let cache = open_and_refresh_cache(cli, &client, &key).await?;
    let result = reconciler::reconcile(&client, &key, local, remote, version, config.chunk_size, extra_strict, Some(&cache)).await?;
    println!("{remote}: {:?} ({} chunk(s) transferred)", result.status, result.chunks_transferred);
    Ok(())
}

async fn run_syncdir(cli: &Cli, config: &Config, extra_strict: bool, local: &PathBuf, remote: &str) -> anyhow::Result<()> {
    if cli.server.is_none() {
        anyhow::bail!("syncdir requires --server");
    }
    let (client, resp) = login(cli).await?;
    let passphrase = rpassword::prompt_password("crypto passphrase: ")?;
    let key = derive_and_verify_server_key(&client, &resp, &passphrase).await?;
    let cache = open_and_refresh_cache(cli, &client, &key).await?;

    let summary = walker::walk(&client, &key, local, remote, config.chunk_size, extra_strict, Some(&cache)).await?;
    println!(
        "{} file(s) reconciled, {} chunk(s) transferred",
        summary.files_processed, summary.chunks_transferred
    );
    Ok(())
}

async fn run_serve(mut config: Config, addr: Option<String>) -> anyhow::Result<()> {
    if let Some(addr) = addr {
        config.bind_addr = addr;
    }
    let pool = local_pool(&config).await?;
    let state = crate::api::AppState::new(pool, config);
    crate::api::serve(state).await
}
