//! The `taglens models` command for fetching and checking classifier models.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use taglens_core::pipeline::Fingerprinter;
use taglens_core::Config;

/// Arguments for the `models` command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Subcommands for model management.
#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// Download model.onnx and selected_tags.csv from Hugging Face
    Download {
        /// Model identity (defaults to `model.identity` from the config)
        #[arg(long)]
        model: Option<String>,

        /// Hugging Face repository (`owner/name`) for identities not in the built-in list
        #[arg(long)]
        repo: Option<String>,

        /// Download again even if the files are already present
        #[arg(long)]
        force: bool,
    },

    /// List known and installed models
    List,

    /// Check installed files against their recorded BLAKE3 checksums
    Verify {
        /// Model identity (defaults to `model.identity` from the config)
        #[arg(long)]
        model: Option<String>,
    },

    /// Show model directory path
    Path,
}

/// A tagger published on Hugging Face.
struct KnownModel {
    identity: &'static str,
    label: &'static str,
    repo: &'static str,
}

const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        identity: "wd-swinv2-tagger-v3",
        label: "SwinV2 (448)",
        repo: "SmilingWolf/wd-swinv2-tagger-v3",
    },
    KnownModel {
        identity: "wd-vit-tagger-v3",
        label: "ViT (448)",
        repo: "SmilingWolf/wd-vit-tagger-v3",
    },
    KnownModel {
        identity: "wd-convnext-tagger-v3",
        label: "ConvNeXt (448)",
        repo: "SmilingWolf/wd-convnext-tagger-v3",
    },
    KnownModel {
        identity: "wd-vit-large-tagger-v3",
        label: "ViT Large (448)",
        repo: "SmilingWolf/wd-vit-large-tagger-v3",
    },
    KnownModel {
        identity: "wd-eva02-large-tagger-v3",
        label: "EVA02 Large (448)",
        repo: "SmilingWolf/wd-eva02-large-tagger-v3",
    },
];

/// Files fetched for every model, in download order.
const MODEL_FILES: &[&str] = &["model.onnx", "selected_tags.csv"];

/// BLAKE3 checksums recorded at download time, one `<hash>  <file>` per line.
const MANIFEST_NAME: &str = "checksums.txt";

/// Outcome of checking one file against the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCheck {
    Ok,
    Missing,
    Unrecorded,
    Mismatch { expected: String, actual: String },
}

/// Execute the models command.
pub async fn execute(args: ModelsArgs, config: Config) -> anyhow::Result<()> {
    match args.command {
        ModelsCommand::Download { model, repo, force } => {
            let identity = model.unwrap_or_else(|| config.model.identity.clone());
            let repo = resolve_repo(&identity, repo.as_deref())?;
            let dir = config.model_dir().join(&identity);

            let client = reqwest::Client::builder()
                .user_agent(concat!("taglens/", env!("CARGO_PKG_VERSION")))
                .build()?;
            download_model(&client, &repo, &dir, force).await?;

            if config.model.path.is_some() || config.model.labels.is_some() {
                tracing::warn!(
                    "model.path / model.labels are set in the config and take precedence over {:?}",
                    dir
                );
            }
            tracing::info!("{} ready in {:?}", identity, dir);
        }

        ModelsCommand::List => {
            let model_dir = config.model_dir();
            println!("Models directory: {}\n", model_dir.display());

            for known in KNOWN_MODELS {
                let status = install_status(&model_dir.join(known.identity));
                let default_marker = if known.identity == config.model.identity {
                    "  (configured)"
                } else {
                    ""
                };
                println!(
                    "  - {:28} {:18} {:14}{}",
                    known.identity, known.label, status, default_marker
                );
            }

            // Identities installed by hand or with --repo.
            if let Ok(entries) = std::fs::read_dir(&model_dir) {
                let mut extra: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .filter(|name| find_known(name).is_none())
                    .collect();
                extra.sort();
                for name in extra {
                    let status = install_status(&model_dir.join(&name));
                    println!("  - {:28} {:18} {:14}", name, "custom", status);
                }
            }
        }

        ModelsCommand::Verify { model } => {
            let identity = model.unwrap_or_else(|| config.model.identity.clone());
            let dir = config.model_dir().join(&identity);
            let checks = verify_dir(&dir)?;

            let mut bad = 0;
            for (file, check) in &checks {
                match check {
                    FileCheck::Ok => println!("  {file:20} ok"),
                    FileCheck::Missing => {
                        bad += 1;
                        println!("  {file:20} missing");
                    }
                    FileCheck::Unrecorded => {
                        bad += 1;
                        println!("  {file:20} no recorded checksum");
                    }
                    FileCheck::Mismatch { expected, actual } => {
                        bad += 1;
                        println!("  {file:20} MISMATCH (expected {expected}, got {actual})");
                    }
                }
            }
            if bad > 0 {
                anyhow::bail!(
                    "{bad} file(s) in {} failed verification; run `taglens models download --model {identity} --force`",
                    dir.display()
                );
            }
        }

        ModelsCommand::Path => {
            println!("{}", config.model_dir().display());
        }
    }

    Ok(())
}

fn find_known(identity: &str) -> Option<&'static KnownModel> {
    KNOWN_MODELS.iter().find(|m| m.identity == identity)
}

/// Repository to fetch `identity` from. An explicit `owner/name` wins.
fn resolve_repo(identity: &str, explicit: Option<&str>) -> anyhow::Result<String> {
    if let Some(repo) = explicit {
        let valid = repo
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
        if !valid {
            anyhow::bail!("--repo must look like `owner/name`, got {repo:?}");
        }
        return Ok(repo.to_string());
    }
    match find_known(identity) {
        Some(known) => Ok(known.repo.to_string()),
        None => anyhow::bail!(
            "Unknown model {identity:?}. Pass --repo owner/name, or pick one of: {}",
            KNOWN_MODELS
                .iter()
                .map(|m| m.identity)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn file_url(repo: &str, file: &str) -> String {
    format!("https://huggingface.co/{repo}/resolve/main/{file}")
}

fn install_status(dir: &Path) -> &'static str {
    let present = MODEL_FILES.iter().filter(|f| dir.join(f).exists()).count();
    if present == MODEL_FILES.len() {
        "ready"
    } else if present == 0 {
        "not installed"
    } else {
        "incomplete"
    }
}

/// Fetch every model file into `dir` and record its checksums.
///
/// Files already on disk are kept unless `force` is set.
async fn download_model(
    client: &reqwest::Client,
    repo: &str,
    dir: &Path,
    force: bool,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    for file in MODEL_FILES {
        let dest = dir.join(file);
        if dest.exists() && !force {
            tracing::info!("{} already exists at {:?}", file, dest);
            continue;
        }

        let url = file_url(repo, file);
        tracing::info!("Downloading {}...", file);
        tracing::info!("  Source: {}", url);
        tracing::info!("  Destination: {:?}", dest);
        download_file(client, &url, &dest).await?;

        let file_size = tokio::fs::metadata(&dest).await?.len();
        tracing::info!(
            "  {} complete ({:.1} MB)",
            file,
            file_size as f64 / (1024.0 * 1024.0)
        );
    }

    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || write_manifest(&dir)).await??;
    Ok(())
}

/// Stream `url` into `dest`. The body lands in a `.part` file that is only
/// renamed into place once complete.
async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> anyhow::Result<()> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let response = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| anyhow::anyhow!("Download failed: {e}"))?;

    let total_size = response.content_length();
    if let Some(size) = total_size {
        tracing::info!("  Size: {:.1} MB", size as f64 / (1024.0 * 1024.0));
    }

    let partial = part_path(dest);
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                anyhow::bail!("Download of {url} interrupted: {e}");
            }
        };
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if let Some(total) = total_size {
            if downloaded % (50 * 1024 * 1024) < chunk.len() as u64 {
                tracing::info!(
                    "  Progress: {:.0}%",
                    downloaded as f64 / total as f64 * 100.0
                );
            }
        }
    }

    file.flush().await?;
    drop(file);

    if let Some(total) = total_size {
        if downloaded != total {
            let _ = tokio::fs::remove_file(&partial).await;
            anyhow::bail!("Download of {url} truncated: got {downloaded} of {total} bytes");
        }
    }

    tokio::fs::rename(&partial, dest).await?;
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Hash every present model file and write the manifest.
fn write_manifest(dir: &Path) -> anyhow::Result<()> {
    let mut manifest = String::new();
    for file in MODEL_FILES {
        let path = dir.join(file);
        if !path.exists() {
            continue;
        }
        let hash = Fingerprinter::content_hash(&path)
            .map_err(|e| anyhow::anyhow!("Checksum computation failed for {}: {e}", path.display()))?;
        tracing::debug!("  {}: {}…", file, &hash[..16]);
        manifest.push_str(&format!("{hash}  {file}\n"));
    }
    std::fs::write(dir.join(MANIFEST_NAME), manifest)?;
    Ok(())
}

fn read_manifest(dir: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let path = dir.join(MANIFEST_NAME);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        anyhow::anyhow!(
            "No checksum manifest at {} ({e}); download the model with `taglens models download`",
            path.display()
        )
    })?;
    Ok(content
        .lines()
        .filter_map(|line| line.split_once("  "))
        .map(|(hash, file)| (file.trim().to_string(), hash.trim().to_string()))
        .collect())
}

/// Check each model file in `dir` against the manifest.
fn verify_dir(dir: &Path) -> anyhow::Result<Vec<(String, FileCheck)>> {
    let recorded = read_manifest(dir)?;

    MODEL_FILES
        .iter()
        .map(|file| {
            let path = dir.join(file);
            let expected = recorded
                .iter()
                .find(|(name, _)| name == file)
                .map(|(_, hash)| hash.clone());
            let check = if !path.exists() {
                FileCheck::Missing
            } else {
                match expected {
                    None => FileCheck::Unrecorded,
                    Some(expected) => {
                        let actual = Fingerprinter::content_hash(&path).map_err(|e| {
                            anyhow::anyhow!("Checksum computation failed for {}: {e}", path.display())
                        })?;
                        if actual == expected {
                            FileCheck::Ok
                        } else {
                            FileCheck::Mismatch { expected, actual }
                        }
                    }
                }
            };
            Ok((file.to_string(), check))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(dir: &Path) {
        std::fs::write(dir.join("model.onnx"), b"onnx bytes").unwrap();
        std::fs::write(dir.join("selected_tags.csv"), "tag_id,name,category,count\n1,cat,0,10\n").unwrap();
    }

    #[test]
    fn test_known_identity_resolves_to_repo() {
        let repo = resolve_repo("wd-vit-tagger-v3", None).unwrap();
        assert_eq!(repo, "SmilingWolf/wd-vit-tagger-v3");
        assert_eq!(
            file_url(&repo, "selected_tags.csv"),
            "https://huggingface.co/SmilingWolf/wd-vit-tagger-v3/resolve/main/selected_tags.csv"
        );
    }

    #[test]
    fn test_unknown_identity_needs_repo() {
        let err = resolve_repo("my-tagger", None).unwrap_err().to_string();
        assert!(err.contains("--repo"), "{err}");
        assert!(err.contains("wd-swinv2-tagger-v3"), "{err}");

        assert_eq!(resolve_repo("my-tagger", Some("me/my-tagger")).unwrap(), "me/my-tagger");
        assert!(resolve_repo("my-tagger", Some("my-tagger")).is_err());
        assert!(resolve_repo("my-tagger", Some("a/b/c")).is_err());
    }

    #[test]
    fn test_part_path_keeps_extension() {
        assert_eq!(
            part_path(Path::new("/models/wd/model.onnx")),
            PathBuf::from("/models/wd/model.onnx.part")
        );
    }

    #[test]
    fn test_install_status() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(install_status(dir.path()), "not installed");
        std::fs::write(dir.path().join("model.onnx"), b"x").unwrap();
        assert_eq!(install_status(dir.path()), "incomplete");
        install(dir.path());
        assert_eq!(install_status(dir.path()), "ready");
    }

    #[test]
    fn test_manifest_verifies_untouched_files() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path());
        write_manifest(dir.path()).unwrap();

        let manifest = std::fs::read_to_string(dir.path().join(MANIFEST_NAME)).unwrap();
        let expected = Fingerprinter::content_hash(&dir.path().join("model.onnx")).unwrap();
        assert!(manifest.contains(&format!("{expected}  model.onnx")));

        let checks = verify_dir(dir.path()).unwrap();
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|(_, c)| *c == FileCheck::Ok));
    }

    #[test]
    fn test_verify_reports_changed_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path());
        write_manifest(dir.path()).unwrap();

        std::fs::write(dir.path().join("model.onnx"), b"truncated").unwrap();
        std::fs::remove_file(dir.path().join("selected_tags.csv")).unwrap();

        let checks = verify_dir(dir.path()).unwrap();
        assert!(matches!(checks[0], (ref f, FileCheck::Mismatch { .. }) if f == "model.onnx"));
        assert_eq!(checks[1], ("selected_tags.csv".to_string(), FileCheck::Missing));
    }

    #[test]
    fn test_verify_without_manifest_errors() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path());
        let err = verify_dir(dir.path()).unwrap_err().to_string();
        assert!(err.contains("checksum manifest"), "{err}");
    }

    #[test]
    fn test_file_added_after_download_is_unrecorded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"onnx bytes").unwrap();
        write_manifest(dir.path()).unwrap();
        std::fs::write(dir.path().join("selected_tags.csv"), "name\ncat\n").unwrap();

        let checks = verify_dir(dir.path()).unwrap();
        assert_eq!(checks[0].1, FileCheck::Ok);
        assert_eq!(checks[1].1, FileCheck::Unrecorded);
    }
}
