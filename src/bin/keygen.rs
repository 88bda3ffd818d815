use anyhow::Context;
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tunebridge::credentials::KeyPair;

#[derive(Parser)]
#[command(name = "tunebridge-keygen")]
#[command(about = "Generate the RSA key pair that wraps cached Spotify tokens")]
struct Cli {
    /// Directory to write private.pem and public.pem into
    #[arg(long, default_value = "keys")]
    out_dir: PathBuf,

    /// Modulus size in bits
    #[arg(long, default_value_t = 3072)]
    bits: usize,

    /// Replace existing key files
    #[arg(long)]
    force: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let private_path = cli.out_dir.join("private.pem");
    let public_path = cli.out_dir.join("public.pem");
    if !cli.force && (private_path.exists() || public_path.exists()) {
        anyhow::bail!(
            "{} already holds a key pair; replacing it makes every cached token unreadable (use --force)",
            cli.out_dir.display()
        );
    }

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("creating {}", cli.out_dir.display()))?;

    println!("Generating {}-bit RSA key pair...", cli.bits);
    let keys = KeyPair::generate(cli.bits)?;

    let private_pem = keys.private().to_pem()?;
    if cli.force && private_path.exists() {
        fs::remove_file(&private_path)
            .with_context(|| format!("removing {}", private_path.display()))?;
    }
    write_private(&private_path, private_pem.as_bytes())?;
    fs::write(&public_path, keys.public().to_pem()?)
        .with_context(|| format!("writing {}", public_path.display()))?;

    println!("Private key: {}", private_path.display());
    println!("Public key:  {}", public_path.display());
    println!("Fingerprint: {}", keys.public().fingerprint_hex());
    println!();
    println!("Set keys.private_key_path (or TUNEBRIDGE_KEYS__PRIVATE_KEY_PATH) to the private key.");
    Ok(())
}

/// Create the private key file, owner-only from the first byte on.
fn write_private(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tunebridge-keygen-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("private.pem");
        let _ = fs::remove_file(&path);
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_is_created_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let path = scratch("mode");

        write_private(&path, b"secret").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&path).unwrap(), b"secret");
    }

    #[test]
    fn test_existing_private_key_is_not_overwritten() {
        let path = scratch("exists");
        write_private(&path, b"first").unwrap();

        assert!(write_private(&path, b"second").is_err());
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }
}
