use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{FileConfig, ParquetCodec};
use crate::error::{MarketError, Result};

/// Map the configured codec and level to a polars compression setting.
pub fn parquet_compression(codec: ParquetCodec, level: Option<i32>) -> Result<ParquetCompression> {
    let compression = match codec {
        ParquetCodec::Zstd => {
            let level = level
                .map(ZstdLevel::try_new)
                .transpose()
                .map_err(|e| MarketError::Config(format!("Invalid zstd level: {}", e)))?;
            ParquetCompression::Zstd(level)
        }
        ParquetCodec::Snappy => ParquetCompression::Snappy,
        ParquetCodec::Lz4 => ParquetCompression::Lz4Raw,
        ParquetCodec::Uncompressed => ParquetCompression::Uncompressed,
    };
    Ok(compression)
}

/// Sibling path used while a file is being written.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write through a sibling temp file, renaming into place only once `write` succeeded.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let staging = staging_path(path);
    let outcome = File::create(&staging)
        .map_err(MarketError::from)
        .and_then(|mut file| {
            write(&mut file)?;
            file.sync_all()?;
            Ok(())
        });

    match outcome {
        Ok(()) => {
            fs::rename(&staging, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&staging);
            Err(e)
        }
    }
}

/// Write `df` to `path` as Parquet with the configured compression.
///
/// Returns the size of the written file in bytes.
pub fn write_parquet(df: &mut DataFrame, path: &Path, files: &FileConfig) -> Result<u64> {
    let compression = parquet_compression(files.parquet_compression, files.parquet_compression_level)?;
    debug!("Writing {} rows to {} ({:?})", df.height(), path.display(), compression);

    write_atomically(path, |file| {
        ParquetWriter::new(file)
            .with_compression(compression)
            .finish(df)?;
        Ok(())
    })?;

    let size = fs::metadata(path)?.len();
    info!(
        "Wrote {} rows to {} ({:.2} MB)",
        df.height(),
        path.display(),
        size as f64 / (1024.0 * 1024.0)
    );
    Ok(size)
}

/// Stream `lf` into Parquet at `path` without collecting it, through a sibling temp file.
///
/// Returns the row count from the written file's metadata and its size in bytes.
pub fn sink_parquet(lf: LazyFrame, path: &Path, files: &FileConfig) -> Result<(usize, u64)> {
    let compression = parquet_compression(files.parquet_compression, files.parquet_compression_level)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let staging = staging_path(path);
    debug!("Streaming to {} ({:?})", staging.display(), compression);

    let options = ParquetWriteOptions {
        compression,
        maintain_order: true,
        ..Default::default()
    };
    let written = lf
        .sink_parquet(&staging, options, None)
        .map_err(MarketError::from)
        .and_then(|()| Ok(ParquetReader::new(File::open(&staging)?).num_rows()?));
    let rows = match written {
        Ok(rows) => rows,
        Err(e) => {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
    };
    fs::rename(&staging, path)?;

    let size = fs::metadata(path)?.len();
    info!(
        "Streamed {} rows to {} ({:.2} MB)",
        rows,
        path.display(),
        size as f64 / (1024.0 * 1024.0)
    );
    Ok((rows, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_level_is_validated() {
        assert!(parquet_compression(ParquetCodec::Zstd, Some(22)).is_ok());
        assert!(parquet_compression(ParquetCodec::Zstd, None).is_ok());
        assert!(matches!(
            parquet_compression(ParquetCodec::Zstd, Some(99)),
            Err(MarketError::Config(_))
        ));
    }

    #[test]
    fn parquet_round_trip_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("contracts.parquet");
        let mut df = df!("contract_id" => ["C1", "C2"], "annual_amount" => [1.0, 2.0]).unwrap();

        let size = write_parquet(&mut df, &path, &FileConfig::default()).unwrap();
        assert!(size > 0);
        assert!(!staging_path(&path).exists());

        let back = ParquetReader::new(File::open(&path).unwrap()).finish().unwrap();
        assert!(back.equals(&df));
    }

    #[test]
    fn sink_streams_lazy_frame_and_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("contracts.parquet");
        let df = df!("contract_id" => ["C1", "C2", "C3"], "annual_amount" => [1.0, 2.0, 3.0]).unwrap();

        let (rows, size) = sink_parquet(df.clone().lazy(), &path, &FileConfig::default()).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(size, fs::metadata(&path).unwrap().len());
        assert!(!staging_path(&path).exists());

        let back = ParquetReader::new(File::open(&path).unwrap()).finish().unwrap();
        assert!(back.equals(&df));
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        fs::write(&path, "old").unwrap();

        let result = write_atomically(&path, |_| Err(MarketError::Config("boom".into())));
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert!(!staging_path(&path).exists());
    }
}
