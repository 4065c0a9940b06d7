//! 作业输出归档的解压与结果文件定位

use analysis_core::{PipelineError, PipelineResult};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// 解压 gzip 压缩的 tar 归档到 `dest`
pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> PipelineResult<()> {
    let file = File::open(archive_path)?;
    std::fs::create_dir_all(dest)?;

    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.unpack(dest).map_err(|e| {
        PipelineError::Archive(format!("解压 {} 失败: {e}", archive_path.display()))
    })?;

    debug!("已解压 {} -> {}", archive_path.display(), dest.display());
    Ok(())
}

/// 递归查找文件名为 `file_name` 的结果文件，必须恰好有一个
pub fn find_result_file(root: &Path, file_name: &str) -> PipelineResult<PathBuf> {
    let mut matches = Vec::new();
    collect_matches(root, file_name, &mut matches)?;

    match matches.len() {
        1 => Ok(matches.remove(0)),
        n => Err(PipelineError::ResultFileMismatch {
            expected: file_name.to_string(),
            matches: n,
        }),
    }
}

fn collect_matches(dir: &Path, file_name: &str, matches: &mut Vec<PathBuf>) -> PipelineResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_matches(&path, file_name, matches)?;
        } else if file_type.is_file() && entry.file_name() == file_name {
            matches.push(path);
        }
    }
    Ok(())
}

/// 在阻塞线程池中解压并定位结果文件
pub async fn extract_and_locate(
    archive_path: PathBuf,
    dest: PathBuf,
    file_name: String,
) -> PipelineResult<PathBuf> {
    tokio::task::spawn_blocking(move || {
        extract_tar_gz(&archive_path, &dest)?;
        find_result_file(&dest, &file_name)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("解压任务异常退出: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn build_archive(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_extract_and_find_nested_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("output.tar.gz");
        build_archive(
            &archive,
            &[
                ("run/logs/stdout.txt", "ok"),
                ("run/results/clusters.json", r#"{"data": []}"#),
            ],
        );

        let dest = dir.path().join("extracted");
        extract_tar_gz(&archive, &dest).unwrap();
        let found = find_result_file(&dest, "clusters.json").unwrap();
        assert!(found.ends_with("run/results/clusters.json"));
    }

    #[test]
    fn test_missing_result_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("output.tar.gz");
        build_archive(&archive, &[("run/other.json", "{}")]);

        let dest = dir.path().join("extracted");
        extract_tar_gz(&archive, &dest).unwrap();
        let err = find_result_file(&dest, "outliers.json").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResultFileMismatch { matches: 0, .. }
        ));
    }

    #[test]
    fn test_duplicate_result_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("output.tar.gz");
        build_archive(
            &archive,
            &[("a/predictions.json", "{}"), ("b/predictions.json", "{}")],
        );

        let dest = dir.path().join("extracted");
        extract_tar_gz(&archive, &dest).unwrap();
        let err = find_result_file(&dest, "predictions.json").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResultFileMismatch { matches: 2, .. }
        ));
        assert!(err.is_structural());
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("output.tar.gz");
        std::fs::write(&archive, b"not a gzip stream").unwrap();

        let err = extract_tar_gz(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, PipelineError::Archive(_)));
    }
}
