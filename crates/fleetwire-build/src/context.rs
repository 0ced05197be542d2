//! ビルドコンテキスト作成
//!
//! サービスのソースディレクトリを tar.gz に固めて Docker Engine に渡します。

use crate::error::{BuildError, BuildResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::{Path, PathBuf};
use tar::Builder;

/// コンテキストサイズの警告閾値
const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

/// コンテキストに含めないディレクトリ
const SKIPPED_DIRS: [&str; 4] = [".git", "node_modules", "target", "__pycache__"];

/// サービスのビルドコンテキスト
#[derive(Debug)]
pub struct BuildContext {
    pub data: Vec<u8>,
    pub dockerfile: PathBuf,
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ソースディレクトリ直下の Dockerfile を確認してパスを返す
    pub fn locate_dockerfile(source_dir: &Path) -> BuildResult<PathBuf> {
        if !source_dir.is_dir() {
            return Err(BuildError::ContextNotFound(source_dir.to_path_buf()));
        }
        let dockerfile = source_dir.join("Dockerfile");
        if !dockerfile.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile));
        }
        Ok(dockerfile)
    }

    /// ソースディレクトリをtar.gzアーカイブとして作成
    pub fn create_context(source_dir: &Path) -> BuildResult<BuildContext> {
        let dockerfile = Self::locate_dockerfile(source_dir)?;
        tracing::debug!("Creating build context from: {}", source_dir.display());

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.follow_symlinks(false);

            Self::append_dir(&mut tar, source_dir, Path::new(""))?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());
        Self::check_context_size(archive_data.len());

        Ok(BuildContext {
            data: archive_data,
            dockerfile,
        })
    }

    fn append_dir<W: std::io::Write>(
        tar: &mut Builder<W>,
        dir: &Path,
        prefix: &Path,
    ) -> BuildResult<()> {
        let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        // アーカイブの内容を決定的にする
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name();
            let path = entry.path();
            let archive_path = prefix.join(&name);
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if SKIPPED_DIRS.iter().any(|d| name == *d) {
                    tracing::debug!("Skipping {}", path.display());
                    continue;
                }
                tar.append_dir(&archive_path, &path)?;
                Self::append_dir(tar, &path, &archive_path)?;
            } else {
                tar.append_path_with_name(&path, &archive_path)?;
            }
        }
        Ok(())
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}
