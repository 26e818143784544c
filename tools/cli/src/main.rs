//! Lockbox CLI - Command line interface for the local secret vault.
//!
//! Stores policy-protected configuration values and encrypts files with
//! keys held in the vault.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use lockbox_common::ErrorKind;
use lockbox_crypto::FileCodec;
use lockbox_vault::{
    AuthOutcome, ConfigStore, KeyAuthenticator, LoadOutcome, ProtectionPolicy, SaveOutcome,
    SecretKeyVault, VaultConfig, DEFAULT_IDENTIFIER,
};

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Lockbox - Device-local secret vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Vault configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store, read or remove a protected configuration value.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Encrypt or decrypt files with a vault key.
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Show vault location and keys.
    Info,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Save a value (from --value, or stdin).
    Save {
        #[arg(short, long, default_value = DEFAULT_IDENTIFIER)]
        id: String,

        #[arg(short, long, value_enum, default_value = "none")]
        policy: PolicyArg,

        /// Value to store; read from stdin when omitted.
        #[arg(long)]
        value: Option<String>,
    },

    /// Print a stored value.
    Load {
        #[arg(short, long, default_value = DEFAULT_IDENTIFIER)]
        id: String,

        #[arg(short, long, value_enum, default_value = "none")]
        policy: PolicyArg,
    },

    /// Remove a stored value and its key.
    Remove {
        #[arg(short, long, default_value = DEFAULT_IDENTIFIER)]
        id: String,

        #[arg(short, long, value_enum, default_value = "none")]
        policy: PolicyArg,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// Encrypt a file into an e2e-*.bin file next to it.
    Encrypt {
        #[arg(short, long)]
        input: PathBuf,

        /// Vault key to encrypt with; created if absent.
        #[arg(short, long)]
        key_alias: String,
    },

    /// Decrypt a file produced by `file encrypt`.
    Decrypt {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        key_alias: String,
    },
}

/// Policies usable from a terminal.
#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    None,
    Password,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;
    let vault = Arc::new(SecretKeyVault::new(config).context("Invalid vault configuration")?);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Save { id, policy, value } => cmd_config_save(vault, &id, policy, value),
            ConfigAction::Load { id, policy } => cmd_config_load(vault, &id, policy),
            ConfigAction::Remove { id, policy } => cmd_config_remove(vault, &id, policy),
        },

        Commands::File { action } => match action {
            FileAction::Encrypt { input, key_alias } => {
                cmd_file_encrypt(&vault, &input, &key_alias)
            }
            FileAction::Decrypt {
                input,
                output,
                key_alias,
            } => cmd_file_decrypt(&vault, &input, &output, &key_alias),
        },

        Commands::Info => cmd_info(&vault),
    }
}

/// Read the configuration file, or default to the user data directory.
fn load_config(path: Option<&Path>) -> Result<VaultConfig> {
    match path {
        Some(path) => VaultConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display())),
        None => {
            let data = dirs::data_dir().context("No data directory for this user")?;
            Ok(VaultConfig::new(data.join("lockbox")))
        }
    }
}

/// Build the authenticator for a policy, prompting for a password only when
/// the vault asks for one.
fn authenticator(policy: PolicyArg) -> (ProtectionPolicy, KeyAuthenticator) {
    match policy {
        PolicyArg::None => (ProtectionPolicy::None, KeyAuthenticator::None),
        PolicyArg::Password => {
            let prompt = || match rpassword::prompt_password("Enter password: ") {
                Ok(password) => AuthOutcome::Granted(Zeroizing::new(password)),
                Err(e) => AuthOutcome::Failed(format!("Failed to read password: {}", e)),
            };
            (ProtectionPolicy::Password, KeyAuthenticator::Password(Arc::new(prompt)))
        }
    }
}

fn store(vault: Arc<SecretKeyVault>, id: &str, policy: PolicyArg) -> Result<ConfigStore> {
    if !ConfigStore::valid_identifier(id) {
        anyhow::bail!("Invalid identifier: use 1-100 letters, digits, '-' or '_'");
    }
    let (policy, auth) = authenticator(policy);
    Ok(ConfigStore::new(vault, id, policy, auth))
}

/// Save a configuration value.
fn cmd_config_save(
    vault: Arc<SecretKeyVault>,
    id: &str,
    policy: PolicyArg,
    value: Option<String>,
) -> Result<()> {
    let store = store(vault, id, policy)?;

    let value = match value {
        Some(value) => Zeroizing::new(value),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read value from stdin")?;
            Zeroizing::new(buf)
        }
    };

    match store.save(&value).context("Failed to save value")? {
        SaveOutcome::Saved => println!("Saved {}", store.storage_name()),
        SaveOutcome::Cancelled => println!("Cancelled."),
    }
    Ok(())
}

/// Print a configuration value.
fn cmd_config_load(vault: Arc<SecretKeyVault>, id: &str, policy: PolicyArg) -> Result<()> {
    let store = store(vault, id, policy)?;

    match store.load() {
        Ok(LoadOutcome::Loaded(value)) => {
            let value = Zeroizing::new(value);
            println!("{}", value.as_str());
        }
        Ok(LoadOutcome::Cancelled) => println!("Cancelled."),
        Ok(LoadOutcome::NotFound) => anyhow::bail!("Nothing stored under {}", store.storage_name()),
        Err(e) if e.kind() == ErrorKind::TamperDetected => {
            anyhow::bail!("Stored value for {} has been modified: {}", store.storage_name(), e)
        }
        Err(e) => return Err(e).context("Failed to load value"),
    }
    Ok(())
}

/// Remove a configuration value.
fn cmd_config_remove(vault: Arc<SecretKeyVault>, id: &str, policy: PolicyArg) -> Result<()> {
    let store = store(vault, id, policy)?;
    store.remove().context("Failed to remove value")?;

    println!("Removed {}", store.storage_name());
    Ok(())
}

/// Encrypt a file.
fn cmd_file_encrypt(vault: &SecretKeyVault, input: &Path, alias: &str) -> Result<()> {
    info!("Encrypting {}", input.display());

    let key = vault
        .get_or_create_key(alias, ProtectionPolicy::None, None)
        .context("Failed to get file key")?;
    let encrypted = FileCodec::new()
        .encrypt_file(input, key.as_bytes())
        .context("Failed to encrypt file")?;

    println!("Encrypted: {}", encrypted.display());
    Ok(())
}

/// Decrypt a file.
fn cmd_file_decrypt(
    vault: &SecretKeyVault,
    input: &Path,
    output: &Path,
    alias: &str,
) -> Result<()> {
    info!("Decrypting {} to {}", input.display(), output.display());

    if !vault.contains_key(alias).context("Failed to open vault")? {
        anyhow::bail!("No key named {}", alias);
    }
    let key = vault
        .get_or_create_key(alias, ProtectionPolicy::None, None)
        .context("Failed to get file key")?;
    FileCodec::new()
        .decrypt_file(input, key.as_bytes(), output)
        .context("Failed to decrypt file")?;

    println!("Decrypted: {}", output.display());
    Ok(())
}

/// Show vault information.
fn cmd_info(vault: &SecretKeyVault) -> Result<()> {
    let config = vault.config();
    let entries = vault.entries().context("Failed to open vault")?;

    println!("Vault Information:");
    println!("  Root: {}", config.root.display());
    println!("  Keystore: {}", config.keystore_path().display());
    println!("  Keys: {}", entries.len());
    for entry in entries {
        println!(
            "    {} ({}, created {})",
            entry.alias,
            entry.policy.suffix(),
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}
