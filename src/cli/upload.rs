use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};

use girder_client::config::Settings;
use girder_client::context::AppContext;
use girder_client::upload::{UploadFile, UploadTarget, Uploader};

use super::progress;

#[derive(Clone, Debug, Args)]
pub struct UploadArg {
    /// Local file to upload
    pub path: PathBuf,
    /// Parent model type: `folder` or `item`
    #[arg(long, requires = "parent_id", conflicts_with = "file_id")]
    pub parent_type: Option<String>,
    /// Parent folder or item id
    #[arg(long, requires = "parent_type")]
    pub parent_id: Option<String>,
    /// Replace the contents of this existing file instead
    #[arg(long)]
    pub file_id: Option<String>,
    /// Chunk size in bytes for server-mediated uploads
    #[arg(long)]
    pub chunk_size: Option<u64>,
    /// How many times to resume after a recoverable failure
    #[arg(long, default_value_t = 3)]
    pub max_resumes: u32,
}

impl UploadArg {
    pub fn target(&self) -> Result<UploadTarget> {
        match (&self.parent_type, &self.parent_id, &self.file_id) {
            (Some(parent_type), Some(parent_id), None) => Ok(UploadTarget::Parent {
                parent_type: parent_type.clone(),
                parent_id: parent_id.clone(),
            }),
            (None, None, Some(file_id)) => Ok(UploadTarget::NewContents {
                file_id: file_id.clone(),
            }),
            _ => bail!("give either --parent-type and --parent-id, or --file-id"),
        }
    }
}

pub async fn run(ctx: AppContext, settings: &Settings, arg: UploadArg) -> Result<()> {
    let target = arg.target()?;
    let file = UploadFile::from_path(&arg.path)
        .await
        .with_context(|| format!("cannot read {}", arg.path.display()))?;

    let pb = progress::upload_bar(file.size());
    let tracker = progress::track(pb.clone(), ctx.subscribe());
    let mut uploader = Uploader::with_chunk_size(
        ctx,
        arg.chunk_size.unwrap_or(settings.upload_chunk_size),
    );

    let mut result = uploader.execute(target, file).await;
    let mut resumes = 0;
    while let Err(ref err) = result {
        if !err.is_recoverable() || resumes >= arg.max_resumes {
            break;
        }
        resumes += 1;
        warn!("{} (resuming, attempt {}/{})", err, resumes, arg.max_resumes);
        result = uploader.resume().await;
    }

    if result.as_ref().is_err_and(|e| e.is_recoverable()) {
        if let Err(e) = uploader.abort().await {
            warn!("{}", e);
        }
    }
    // Closing the bus ends the tracker.
    drop(uploader);
    if tracker.await.is_err() {
        pb.abandon();
    }

    let file = result?;
    info!("Uploaded {}", arg.path.display());
    println!("{}", file.id().unwrap_or_default());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cmd {
        #[command(flatten)]
        arg: UploadArg,
    }

    #[test]
    fn test_parent_target() {
        let cmd = Cmd::parse_from([
            "upload",
            "scan.png",
            "--parent-type",
            "folder",
            "--parent-id",
            "f1",
        ]);
        assert_eq!(cmd.arg.target().unwrap(), UploadTarget::folder("f1"));
        assert_eq!(cmd.arg.max_resumes, 3);
    }

    #[test]
    fn test_new_contents_target() {
        let cmd = Cmd::parse_from(["upload", "scan.png", "--file-id", "file9"]);
        assert_eq!(
            cmd.arg.target().unwrap(),
            UploadTarget::NewContents {
                file_id: "file9".into()
            }
        );
    }

    #[test]
    fn test_target_required() {
        let cmd = Cmd::parse_from(["upload", "scan.png"]);
        assert!(cmd.arg.target().is_err());
        assert!(Cmd::try_parse_from(["upload", "a", "--parent-type", "folder"]).is_err());
        assert!(Cmd::try_parse_from([
            "upload",
            "a",
            "--parent-type",
            "folder",
            "--parent-id",
            "f1",
            "--file-id",
            "x"
        ])
        .is_err());
    }
}
